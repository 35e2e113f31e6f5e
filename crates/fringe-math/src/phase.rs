//! Differential phase between the two polarization channels.

use fringe_types::constants::{ENVELOPE_THRESHOLD, EQUAL_BASELINE_WEIGHT};
use fringe_types::error::{RtdError, RtdResult};
use fringe_types::mapping::{MappingTable, Polarization};
use ndarray::{Array1, Array2};
use num_complex::Complex64;

use crate::opl::compute_opl_matrix;

/// SNR threshold for the phase solve; every baseline carries the same weight
/// so this only gates on the solver-derived telescope SNR.
const PHASE_SNR_MIN: f64 = 2.0;

/// Per-telescope phase between the Down and Up channels, in degrees.
///
/// `normalized` holds contrast-normalized combined signals, one row per
/// baseline in the order of `mapping`'s reduced table. Only samples whose
/// modulus exceeds the envelope threshold contribute.
pub fn differential_phase(
    normalized: &Array2<Complex64>,
    mapping: &MappingTable,
) -> RtdResult<Array1<f64>> {
    let reduced = mapping.reduce_to_unique_baselines();
    if !reduced.is_polarized() {
        return Err(RtdError::Configuration(
            "differential phase needs a polarized mapping".to_string(),
        ));
    }
    if normalized.nrows() < reduced.len() {
        return Err(RtdError::InvalidInput(format!(
            "{} baseline rows for a {}-baseline mapping",
            normalized.nrows(),
            reduced.len()
        )));
    }

    let rows_of = |pol: Polarization| -> Vec<usize> {
        reduced
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.polarization == pol)
            .map(|(i, _)| i)
            .collect()
    };
    let down = rows_of(Polarization::Down);
    let up = rows_of(Polarization::Up);

    let core = normalized.mapv(|c| {
        if c.norm() > ENVELOPE_THRESHOLD {
            c
        } else {
            Complex64::new(0.0, 0.0)
        }
    });

    let phases = Array1::from_iter(down.iter().zip(&up).map(|(&d, &u)| {
        let cross: Complex64 = core
            .row(d)
            .iter()
            .zip(core.row(u).iter())
            .map(|(a, b)| a * b.conj())
            .sum();
        cross.im.atan2(cross.re).to_degrees()
    }));

    let weights = Array1::from_elem(phases.len(), EQUAL_BASELINE_WEIGHT);
    let solution = compute_opl_matrix(&phases, &weights, &reduced, PHASE_SNR_MIN, true)?;
    Ok(solution.position)
}
