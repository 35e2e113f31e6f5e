//! Spectral band filters.

use fringe_types::config::FilterBand;
use fringe_types::constants::WIDE_FILTER_FRACTIONS;
use fringe_types::error::{RtdError, RtdResult};
use fringe_types::state::CombinedScan;
use ndarray::{Array1, Array2, Axis, Zip};
use num_complex::Complex64;

use crate::fft::{transform_rows, Direction};

/// Per-baseline band edges derived from `band`, widened for turbulence.
///
/// Each baseline gets `power = |f_last| / min(|f_last|) - 1`, the lower edge
/// is multiplied by `(1 - t)^power` and the upper one by `(1 + t)^power`.
/// Edges are clamped to `[0, max|f|]`. Returns `[n_base, 2]`.
pub fn scale_filter(frequency: &Array2<f64>, band: [f64; 2], turbulence: f64) -> Array2<f64> {
    let (rows, cols) = frequency.dim();
    let mut out = Array2::zeros((rows, 2));
    if cols == 0 || rows == 0 {
        return out;
    }
    let (lo, hi) = if band[0] <= band[1] {
        (band[0], band[1])
    } else {
        (band[1], band[0])
    };

    let last: Array1<f64> = frequency.column(cols - 1).mapv(f64::abs);
    let min_last = last.iter().copied().fold(f64::INFINITY, f64::min);
    let freq_max = frequency.iter().fold(0.0_f64, |acc, f| acc.max(f.abs()));

    for (b, mut edges) in out.rows_mut().into_iter().enumerate() {
        let power = if min_last > 0.0 && min_last.is_finite() {
            last[b] / min_last - 1.0
        } else {
            0.0
        };
        let low = lo * (1.0 - turbulence).powf(power);
        let high = hi * (1.0 + turbulence).powf(power);
        edges[0] = low.clamp(0.0, freq_max);
        edges[1] = high.clamp(0.0, freq_max);
    }
    out
}

/// `lo < |f| < hi` per baseline, edges taken from `[n_base, 2]` bounds.
pub fn band_mask(frequency: &Array2<f64>, bounds: &Array2<f64>) -> Array2<bool> {
    let mut mask = Array2::from_elem(frequency.dim(), false);
    for ((mut row, f_row), edges) in mask
        .rows_mut()
        .into_iter()
        .zip(frequency.rows())
        .zip(bounds.rows())
    {
        let (lo, hi) = (edges[0], edges[1]);
        Zip::from(&mut row).and(&f_row).for_each(|m, &f| {
            *m = f.abs() > lo && f.abs() < hi;
        });
    }
    mask
}

/// Band-pass the spectrum and bring it back to the OPD domain.
///
/// The returned OPD axis is `linspace(-0.5, 0.5, N) / (f[1] - f[0])` per
/// baseline.
pub fn compute_filtered(
    spectrum: &Array2<Complex64>,
    frequency: &Array2<f64>,
    band: FilterBand,
    turbulence: f64,
) -> RtdResult<CombinedScan> {
    let (rows, n) = spectrum.dim();
    if frequency.dim() != (rows, n) || n < 2 {
        return Err(RtdError::InvalidInput(format!(
            "spectrum {:?} and frequency {:?} must match with at least 2 bins",
            spectrum.dim(),
            frequency.dim()
        )));
    }

    let ramp = Array1::linspace(-0.5, 0.5, n);
    let mut opd = Array2::zeros((rows, n));
    for (b, mut row) in opd.rows_mut().into_iter().enumerate() {
        let df = frequency[[b, 1]] - frequency[[b, 0]];
        if df == 0.0 {
            return Err(RtdError::InvalidInput(format!(
                "baseline {b}: zero frequency step"
            )));
        }
        row.assign(&(&ramp / df));
    }

    let mask = match band {
        FilterBand::All => None,
        FilterBand::Wide => {
            let top = frequency
                .map_axis(Axis(1), |r| r.iter().fold(0.0_f64, |acc, f| acc.max(f.abs())));
            let mut bounds = Array2::zeros((rows, 2));
            for (b, mut edges) in bounds.rows_mut().into_iter().enumerate() {
                edges[0] = WIDE_FILTER_FRACTIONS[0] * top[b];
                edges[1] = WIDE_FILTER_FRACTIONS[1] * top[b];
            }
            Some(band_mask(frequency, &bounds))
        }
        FilterBand::Band(edges) => {
            let bounds = scale_filter(frequency, edges, turbulence);
            Some(band_mask(frequency, &bounds))
        }
    };

    let mut filtered = spectrum.clone();
    if let Some(mask) = mask {
        Zip::from(&mut filtered).and(&mask).for_each(|s, &keep| {
            if !keep {
                *s = Complex64::new(0.0, 0.0);
            }
        });
    }

    Ok(CombinedScan {
        signal: transform_rows(&filtered, Direction::Inverse),
        opd,
    })
}

/// Divide each row by its largest modulus, floored at `floor`.
pub fn normalize_contrast(signal: &Array2<Complex64>, floor: f64) -> Array2<Complex64> {
    let mut out = signal.clone();
    for mut row in out.rows_mut() {
        let peak = row.iter().fold(0.0_f64, |acc, c| acc.max(c.norm())).max(floor);
        row.mapv_inplace(|c| c / peak);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft::to_complex;

    fn freq_rows(tops: &[f64], n: usize) -> Array2<f64> {
        Array2::from_shape_fn((tops.len(), n), |(b, j)| tops[b] * j as f64 / (n - 1) as f64)
    }

    #[test]
    fn test_scale_filter_slowest_baseline_unchanged() {
        let freq = freq_rows(&[2.0, 4.0], 16);
        let bounds = scale_filter(&freq, [0.5, 0.7], 0.13);
        assert!((bounds[[0, 0]] - 0.5).abs() < 1e-12);
        assert!((bounds[[0, 1]] - 0.7).abs() < 1e-12);
        // power 1 on the faster one
        assert!((bounds[[1, 0]] - 0.5 * 0.87).abs() < 1e-12);
        assert!((bounds[[1, 1]] - 0.7 * 1.13).abs() < 1e-12);
    }

    #[test]
    fn test_scale_filter_clamps_to_max_frequency() {
        let freq = freq_rows(&[1.0], 8);
        let bounds = scale_filter(&freq, [0.5, 3.0], 0.0);
        assert_eq!(bounds[[0, 1]], 1.0);
    }

    #[test]
    fn test_mask_is_strict() {
        let freq = Array2::from_shape_vec((1, 5), vec![0.0, 0.5, 0.6, 0.7, 0.8]).unwrap();
        let bounds = Array2::from_shape_vec((1, 2), vec![0.5, 0.7]).unwrap();
        let mask = band_mask(&freq, &bounds);
        assert_eq!(mask.row(0).to_vec(), vec![false, false, true, false, false]);
    }

    #[test]
    fn test_all_band_is_identity() {
        let n = 16;
        let signal = Array2::from_shape_fn((2, n), |(b, j)| Complex64::new((j + b) as f64, 0.0));
        let spectrum = transform_rows(&signal, Direction::Forward);
        let freq = freq_rows(&[1.0, 2.0], n);
        let out = compute_filtered(&spectrum, &freq, FilterBand::All, 0.1).unwrap();
        for (a, b) in out.signal.iter().zip(signal.iter()) {
            assert!((a - b).norm() < 1e-10);
        }
        // opd axis is centred
        assert!((out.opd[[0, 0]] + 0.5 * 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_band_removes_dc() {
        let n = 32;
        let signal = to_complex(&Array2::from_elem((1, n), 3.0));
        let spectrum = transform_rows(&signal, Direction::Forward);
        let freq = freq_rows(&[4.0], n);
        let out = compute_filtered(&spectrum, &freq, FilterBand::Band([0.5, 1.5]), 0.0).unwrap();
        assert!(out.signal.iter().all(|c| c.norm() < 1e-10));
    }

    #[test]
    fn test_wide_band_on_negative_axis() {
        let n = 32;
        let spectrum = Array2::from_elem((1, n), Complex64::new(1.0, 0.0));
        let freq = freq_rows(&[4.0], n).mapv(|f| -f);
        let out = compute_filtered(&spectrum, &freq, FilterBand::Wide, 0.0).unwrap();
        // bins 2..=13 survive: 0.2 < |f| < 1.8
        let energy: f64 = out.signal.iter().map(|c| c.norm_sqr()).sum();
        assert!((energy - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_contrast_peak_is_one() {
        let signal = Array2::from_shape_fn((2, 4), |(b, j)| Complex64::new(0.0, (b + 1) as f64 * j as f64));
        let out = normalize_contrast(&signal, 1e-9);
        for row in out.rows() {
            let peak = row.iter().fold(0.0_f64, |acc, c| acc.max(c.norm()));
            assert!((peak - 1.0).abs() < 1e-12);
        }
        let zeros = normalize_contrast(&Array2::zeros((1, 3)), 1e-9);
        assert!(zeros.iter().all(|c| c.norm() == 0.0));
    }
}
