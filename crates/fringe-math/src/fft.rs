//! FFT along the sample axis, wrappers around rustfft.
//!
//! Both directions are divided by sqrt(N), so the pair is unitary and a
//! forward transform followed by an inverse one gives back the input.

use fringe_types::error::{RtdError, RtdResult};
use fringe_types::state::Spectrum;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use num_complex::Complex64;
use rustfft::FftPlanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Inverse,
}

pub fn to_complex(input: &Array2<f64>) -> Array2<Complex64> {
    input.mapv(|v| Complex64::new(v, 0.0))
}

/// Unitary 1D FFT of every row.
pub fn transform_rows(input: &Array2<Complex64>, direction: Direction) -> Array2<Complex64> {
    let (_, n) = input.dim();
    let mut data = input.clone();
    if n == 0 {
        return data;
    }

    let mut planner = FftPlanner::new();
    let fft = match direction {
        Direction::Forward => planner.plan_fft_forward(n),
        Direction::Inverse => planner.plan_fft_inverse(n),
    };
    let norm = 1.0 / (n as f64).sqrt();

    let mut buffer = vec![Complex64::new(0.0, 0.0); n];
    for mut row in data.rows_mut() {
        for (b, v) in buffer.iter_mut().zip(row.iter()) {
            *b = *v;
        }
        fft.process(&mut buffer);
        row.assign(&ArrayView1::from(&buffer[..]));
        row.mapv_inplace(|c| c * norm);
    }
    data
}

/// Axis conjugate to `axis` along the sample dimension.
///
/// Row i is `linspace(0, 1, N) / (axis[i, N-2] - axis[i, N-3])`: the step is
/// taken near the end of the scan and assumed uniform over the row.
pub fn reciprocal_axis(axis: &Array2<f64>) -> RtdResult<Array2<f64>> {
    let (rows, n) = axis.dim();
    if n < 3 {
        return Err(RtdError::InvalidInput(format!(
            "need at least 3 samples to derive a frequency axis, got {n}"
        )));
    }
    let ramp = Array1::linspace(0.0, 1.0, n);
    let mut out = Array2::zeros((rows, n));
    for (i, mut row) in out.rows_mut().into_iter().enumerate() {
        let step = axis[[i, n - 2]] - axis[[i, n - 3]];
        if step == 0.0 || !step.is_finite() {
            return Err(RtdError::InvalidInput(format!(
                "row {i}: sample step is {step}, cannot derive a frequency axis"
            )));
        }
        row.assign(&(&ramp / step));
    }
    Ok(out)
}

/// Transform `data` and derive the conjugate axis of `axis`.
pub fn compute_data_fft(
    data: &Array2<Complex64>,
    axis: &Array2<f64>,
    direction: Direction,
) -> RtdResult<Spectrum> {
    if data.dim() != axis.dim() {
        return Err(RtdError::InvalidInput(format!(
            "data {:?} and axis {:?} differ in shape",
            data.dim(),
            axis.dim()
        )));
    }
    let frequency = reciprocal_axis(axis)?;
    Ok(Spectrum {
        spectrum: transform_rows(data, direction),
        frequency,
    })
}

/// Columns listed in `index`, in that order.
pub fn select_columns<T: Clone>(input: &Array2<T>, index: &[usize]) -> Array2<T> {
    input.select(Axis(1), index)
}

/// Largest usable frequency bin and the bins kept when processing the
/// oversampled part of the spectrum.
///
/// Bin u stands for the signed frequency `u - N` above N/2 and `u` below;
/// bins with `-freq_max < f <= freq_max` are kept.
pub fn oversampling_index(n_opl: usize, factor: usize) -> (usize, Vec<usize>) {
    let freq_max = n_opl / 2 / factor.max(1);
    let half = n_opl as f64 / 2.0;
    let index = (0..n_opl)
        .filter(|&u| {
            let signed = if u as f64 > half {
                u as i64 - n_opl as i64
            } else {
                u as i64
            };
            signed <= freq_max as i64 && signed > -(freq_max as i64)
        })
        .collect();
    (freq_max, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let original =
            Array2::from_shape_fn((3, 16), |(i, j)| Complex64::new((i * 16 + j) as f64, -(j as f64)));
        let spectrum = transform_rows(&original, Direction::Forward);
        let recovered = transform_rows(&spectrum, Direction::Inverse);
        for ((i, j), &val) in original.indexed_iter() {
            assert!(
                (recovered[[i, j]] - val).norm() < 1e-10,
                "FFT roundtrip failed at ({i}, {j})"
            );
        }
    }

    #[test]
    fn test_dc_component_is_unitary() {
        // Constant row: DC bin is N * v / sqrt(N) = sqrt(N) * v
        let n = 16;
        let input = Array2::from_elem((1, n), Complex64::new(2.0, 0.0));
        let spectrum = transform_rows(&input, Direction::Forward);
        assert!((spectrum[[0, 0]].re - 2.0 * (n as f64).sqrt()).abs() < 1e-10);
        for j in 1..n {
            assert!(spectrum[[0, j]].norm() < 1e-10);
        }
    }

    #[test]
    fn test_parseval() {
        let input = Array2::from_shape_fn((2, 32), |(i, j)| {
            Complex64::new(((i + 1) as f64 * j as f64 * 0.3).sin(), 0.1 * j as f64)
        });
        let spectrum = transform_rows(&input, Direction::Forward);
        let e_time: f64 = input.iter().map(|c| c.norm_sqr()).sum();
        let e_freq: f64 = spectrum.iter().map(|c| c.norm_sqr()).sum();
        assert!((e_time - e_freq).abs() < 1e-9 * e_time);
    }

    #[test]
    fn test_reciprocal_axis_uses_late_step() {
        // step 0.5 everywhere except at the start
        let mut opd = Array2::from_shape_fn((1, 8), |(_, j)| j as f64 * 0.5);
        opd[[0, 1]] = 100.0;
        let freq = reciprocal_axis(&opd).unwrap();
        assert!((freq[[0, 7]] - 2.0).abs() < 1e-12);
        assert_eq!(freq[[0, 0]], 0.0);
    }

    #[test]
    fn test_reciprocal_axis_rejects_stalled_scan() {
        let opd = Array2::from_elem((2, 8), 1.0);
        assert!(reciprocal_axis(&opd).is_err());
        assert!(reciprocal_axis(&Array2::zeros((1, 2))).is_err());
    }

    #[test]
    fn test_oversampling_index_full_band() {
        let (freq_max, index) = oversampling_index(8, 1);
        assert_eq!(freq_max, 4);
        // signed bins: 0 1 2 3 4 -3 -2 -1 ; all kept
        assert_eq!(index, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_oversampling_index_factor_two() {
        let (freq_max, index) = oversampling_index(16, 2);
        assert_eq!(freq_max, 4);
        assert_eq!(index, vec![0, 1, 2, 3, 4, 13, 14, 15]);
    }
}
