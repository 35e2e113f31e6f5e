//! Telescope-level solve of the baseline pistons.
//!
//! Baseline pistons b relate to telescope pistons p through a signed
//! incidence matrix (`b = Mᵀp`, +1 on tel1, -1 on tel2). The system is
//! underdetermined by a global offset, so one extra "pivot" baseline with
//! piston 0 pins one telescope. Every telescope is tried as pivot and the
//! solution tracking the most telescopes wins, since a fixed pivot could
//! itself be lost.

use fringe_types::constants::SNR_WEIGHT_FLOOR;
use fringe_types::error::{RtdError, RtdResult};
use fringe_types::mapping::MappingTable;
use fringe_types::state::TelescopeSolution;
use ndarray::{s, Array1, Array2};

use crate::linalg::invert;

/// Relative margin a mean SNR must clear to replace an equally tracked pivot.
const PIVOT_TIE_TOLERANCE: f64 = 1e-9;

/// Solution for one pivot choice.
#[derive(Debug, Clone)]
pub struct PivotSolution {
    pub pivot: usize,
    /// Zero for telescopes whose SNR is at or below threshold.
    pub position: Array1<f64>,
    /// SNR as derived from the normal matrix, before clipping.
    pub snr: Array1<f64>,
    pub tracking: Vec<bool>,
}

impl PivotSolution {
    pub fn n_tracked(&self) -> usize {
        self.tracking.iter().filter(|&&t| t).count()
    }

    fn clipped_mean(&self) -> f64 {
        if self.snr.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .snr
            .iter()
            .zip(&self.tracking)
            .map(|(&s, &t)| if t { s } else { 0.0 })
            .sum();
        total / self.snr.len() as f64
    }
}

/// Weighted baseline system ready to be solved for any pivot.
#[derive(Debug, Clone)]
pub struct BaselineSystem {
    /// `[n_tel, n_base + 1]`, last column reserved for the pivot.
    incidence: Array2<f64>,
    /// Diagonal of W, pivot weight last.
    weights: Array1<f64>,
    /// Baseline pistons, pivot piston (0) last.
    pistons: Array1<f64>,
    n_base: usize,
    snr_min: f64,
    /// Baselines whose SNR clears the threshold.
    n_usable: usize,
}

impl BaselineSystem {
    /// Build the system from a table with one entry per baseline.
    ///
    /// In `niobate` mode only the first half of the baselines (one
    /// polarization) enters the system.
    pub fn new(
        position: &Array1<f64>,
        snr: &Array1<f64>,
        mapping: &MappingTable,
        snr_min: f64,
        niobate: bool,
    ) -> RtdResult<Self> {
        let reduced = mapping.reduce_to_unique_baselines();
        let n_tel = reduced.n_telescopes();
        let n_base_total = reduced.n_baselines();
        let n_base = if niobate {
            n_base_total / 2
        } else {
            n_base_total
        };
        if position.len() < n_base || snr.len() < n_base {
            return Err(RtdError::InvalidInput(format!(
                "{n_base} baselines to solve but got {} positions and {} SNRs",
                position.len(),
                snr.len()
            )));
        }

        let mut incidence = Array2::zeros((n_tel, n_base + 1));
        for (i, e) in reduced.entries().iter().take(n_base).enumerate() {
            incidence[[e.tel1 - 1, i]] = 1.0;
            incidence[[e.tel2 - 1, i]] = -1.0;
        }

        let mut weights = Array1::zeros(n_base + 1);
        let mut n_usable = 0;
        for i in 0..n_base {
            let usable = snr[i] > snr_min;
            if usable {
                n_usable += 1;
            }
            weights[i] = (if usable { snr[i] } else { 0.0 }) + SNR_WEIGHT_FLOOR;
        }
        weights[n_base] = weights
            .slice(s![..n_base])
            .iter()
            .fold(SNR_WEIGHT_FLOOR, |acc, &w| acc.max(w));

        let mut pistons = Array1::zeros(n_base + 1);
        pistons
            .slice_mut(s![..n_base])
            .assign(&position.slice(s![..n_base]));

        Ok(BaselineSystem {
            incidence,
            weights,
            pistons,
            n_base,
            snr_min,
            n_usable,
        })
    }

    pub fn n_telescopes(&self) -> usize {
        self.incidence.nrows()
    }

    pub fn n_baselines(&self) -> usize {
        self.n_base
    }

    /// Solve `(M W Mᵀ)⁻¹ (M W b)` with `pivot` as the reference telescope.
    pub fn solve_with_pivot(&self, pivot: usize) -> RtdResult<PivotSolution> {
        let n_tel = self.n_telescopes();
        if pivot >= n_tel {
            return Err(RtdError::InvalidInput(format!(
                "pivot {pivot} out of range for {n_tel} telescopes"
            )));
        }
        let mut m = self.incidence.clone();
        m.column_mut(self.n_base).fill(0.0);
        m[[pivot, self.n_base]] = 1.0;

        // M W, scaling each column by its weight
        let mw = &m * &self.weights;
        let normal = mw.dot(&m.t());
        let inverse = invert(&normal)?;
        let raw = inverse.dot(&mw.dot(&self.pistons));

        let snr = inverse.diag().mapv(|d| if d > 0.0 { 1.0 / d } else { 0.0 });
        let tracking: Vec<bool> = snr.iter().map(|&s| s > self.snr_min).collect();
        let position = Array1::from_iter(
            raw.iter()
                .zip(&tracking)
                .map(|(&p, &t)| if t { p } else { 0.0 }),
        );

        Ok(PivotSolution {
            pivot,
            position,
            snr,
            tracking,
        })
    }

    /// Best solution over all pivots.
    ///
    /// Pivots with a singular system are skipped. Fewer than 2 usable
    /// baselines or fewer than 2 tracked telescopes give an invalid
    /// (all-zero) solution.
    pub fn solve(&self, niobate: bool) -> TelescopeSolution {
        let n_tel = self.n_telescopes();
        if self.n_usable < 2 {
            return TelescopeSolution::invalid(n_tel, self.n_base);
        }

        let mut best: Option<PivotSolution> = None;
        for pivot in 0..n_tel {
            let candidate = match self.solve_with_pivot(pivot) {
                Ok(c) => c,
                Err(_) => continue,
            };
            let better = match &best {
                None => candidate.n_tracked() > 0,
                Some(b) => {
                    let (nc, nb) = (candidate.n_tracked(), b.n_tracked());
                    let (mc, mb) = (candidate.clipped_mean(), b.clipped_mean());
                    nc > nb || (nc == nb && mc > mb * (1.0 + PIVOT_TIE_TOLERANCE) && mc > mb)
                }
            };
            if better {
                best = Some(candidate);
            }
            if niobate && best.as_ref().is_some_and(|b| b.n_tracked() == n_tel) {
                break;
            }
        }

        match best {
            Some(b) if b.n_tracked() >= 2 => {
                let baseline_position = self
                    .incidence
                    .slice(s![.., ..self.n_base])
                    .t()
                    .dot(&b.position);
                TelescopeSolution {
                    position: b.position,
                    snr: b.snr,
                    baseline_position,
                    tracking: b.tracking,
                }
            }
            _ => TelescopeSolution::invalid(n_tel, self.n_base),
        }
    }
}

/// Per-telescope piston, SNR and tracking flags from per-baseline values.
pub fn compute_opl_matrix(
    position: &Array1<f64>,
    snr: &Array1<f64>,
    mapping: &MappingTable,
    snr_min: f64,
    niobate: bool,
) -> RtdResult<TelescopeSolution> {
    let system = BaselineSystem::new(position, snr, mapping, snr_min, niobate)?;
    Ok(system.solve(niobate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fringe_types::mapping::abcd_h;
    use ndarray::array;

    fn incidence_of(mapping: &MappingTable) -> Array2<f64> {
        let reduced = mapping.reduce_to_unique_baselines();
        let mut m = Array2::zeros((reduced.n_telescopes(), reduced.n_baselines()));
        for (i, e) in reduced.entries().iter().enumerate() {
            m[[e.tel1 - 1, i]] = 1.0;
            m[[e.tel2 - 1, i]] = -1.0;
        }
        m
    }

    #[test]
    fn test_recovers_consistent_pistons() {
        let map = abcd_h();
        let truth = array![0.0, 1.0, -0.5, 2.0];
        let b = incidence_of(&map).t().dot(&truth);
        let snr = Array1::from_elem(6, 10.0);
        let sol = compute_opl_matrix(&b, &snr, &map, 2.0, false).unwrap();
        for (p, t) in sol.position.iter().zip(truth.iter()) {
            assert!((p - t).abs() < 1e-6, "{p} vs {t}");
        }
        assert_eq!(sol.tracking, vec![true; 4]);
        for (bp, bt) in sol.baseline_position.iter().zip(b.iter()) {
            assert!((bp - bt).abs() < 1e-6);
        }
    }

    #[test]
    fn test_every_pivot_is_referenced_to_zero() {
        let map = abcd_h();
        let truth = array![0.3, 1.0, -0.5, 2.0];
        let b = incidence_of(&map).t().dot(&truth);
        let system = BaselineSystem::new(&b, &Array1::from_elem(6, 10.0), &map, 2.0, false).unwrap();
        for pivot in 0..4 {
            let sol = system.solve_with_pivot(pivot).unwrap();
            for t in 0..4 {
                let expected = truth[t] - truth[pivot];
                assert!((sol.position[t] - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_single_usable_baseline_is_invalid() {
        let map = abcd_h();
        let b = array![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let snr = array![50.0, 0.1, 0.1, 0.1, 0.1, 0.1];
        let sol = compute_opl_matrix(&b, &snr, &map, 2.0, false).unwrap();
        assert_eq!(sol, TelescopeSolution::invalid(4, 6));
    }

    #[test]
    fn test_dropped_telescope_not_tracked() {
        let map = abcd_h();
        let truth = array![0.0, 1.0, -0.5, 2.0];
        let m = incidence_of(&map);
        let b = m.t().dot(&truth);
        // every baseline touching telescope 4 is below threshold
        let snr = Array1::from_iter((0..6).map(|i| if m[[3, i]] != 0.0 { 0.5 } else { 10.0 }));
        let sol = compute_opl_matrix(&b, &snr, &map, 2.0, false).unwrap();
        assert_eq!(sol.tracking, vec![true, true, true, false]);
        assert_eq!(sol.position[3], 0.0);
        for t in 0..3 {
            assert!((sol.position[t] - (truth[t] - truth[0])).abs() < 1e-6);
        }
    }

    #[test]
    fn test_pivot_out_of_range() {
        let map = abcd_h();
        let system = BaselineSystem::new(
            &Array1::zeros(6),
            &Array1::from_elem(6, 10.0),
            &map,
            2.0,
            false,
        )
        .unwrap();
        assert!(system.solve_with_pivot(4).is_err());
    }

    #[test]
    fn test_rejects_short_inputs() {
        let map = abcd_h();
        assert!(compute_opl_matrix(&Array1::zeros(3), &Array1::zeros(3), &map, 2.0, false).is_err());
    }
}
