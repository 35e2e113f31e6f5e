//! IOTA piston and SNR extraction.
//!
//! The piston comes from the phase slope between neighbouring in-band
//! spectral bins, so it is free of 2π wraps across the band. Noise is the
//! out-of-band power averaged over a ring of past PSDs and rescaled to the
//! in-band bin count.

use std::f64::consts::PI;

use fringe_types::constants::NOISE_BIN_EPS;
use fringe_types::error::{RtdError, RtdResult};
use fringe_types::state::{BaselinePiston, PsdRing, Spectrum};
use ndarray::{Array1, Array2, Zip};
use num_complex::Complex64;

use crate::filter::{band_mask, scale_filter};

#[derive(Debug, Clone)]
pub struct IotaEstimate {
    pub piston: BaselinePiston,
    /// In-band edges per baseline after turbulence scaling, `[n_base, 2]`.
    pub filter_in_rescaled: Array2<f64>,
}

/// Piston, SNR and ring-averaged SNR per baseline.
///
/// `ring` is replaced by a fresh ring of `ring_capacity` slots when absent or
/// when its slot shape differs from the spectrum. A baseline without any
/// usable noise estimate gets SNR 0.
pub fn compute_opd_iota(
    spectrum: &Spectrum,
    filter_in: [f64; 2],
    filter_out: [f64; 2],
    turbulence: f64,
    ring: &mut Option<PsdRing>,
    ring_capacity: usize,
) -> RtdResult<IotaEstimate> {
    let ft = &spectrum.spectrum;
    let freq = &spectrum.frequency;
    let (n_base, n) = ft.dim();
    if freq.dim() != (n_base, n) || n < 3 {
        return Err(RtdError::InvalidInput(format!(
            "IOTA needs matching spectrum/frequency with at least 3 bins, got {:?} and {:?}",
            ft.dim(),
            freq.dim()
        )));
    }

    let bounds_in = scale_filter(freq, filter_in, turbulence);
    let bounds_out = scale_filter(freq, filter_out, turbulence);
    let mask_in = band_mask(freq, &bounds_in);
    let mut mask_out = band_mask(freq, &bounds_out);
    Zip::from(&mut mask_out)
        .and(&mask_in)
        .for_each(|out, &inside| *out = *out && !inside);

    let psd = ft.mapv(|c| c.norm_sqr());

    let needs_new = ring.as_ref().map_or(true, |r| r.shape() != psd.dim());
    if needs_new {
        *ring = Some(PsdRing::new(ring_capacity, psd.dim()));
    }
    let mean_psd = match ring.as_mut() {
        Some(r) => {
            r.push(&psd);
            r.mean()
        }
        None => psd.clone(),
    };

    let mut position = Array1::zeros(n_base);
    let mut snr = Array1::zeros(n_base);
    let mut snr_mean = Array1::zeros(n_base);

    for b in 0..n_base {
        let row = ft.row(b);
        let inside = mask_in.row(b);
        let outside = mask_out.row(b);

        let filtered = |k: usize| if inside[k] { row[k] } else { Complex64::new(0.0, 0.0) };
        let phasor: Complex64 = -(0..n - 1)
            .map(|k| filtered(k) * filtered(k + 1).conj())
            .sum::<Complex64>();

        let df = freq[[b, n - 2]] - freq[[b, n - 3]];
        position[b] = if df != 0.0 {
            phasor.im.atan2(phasor.re) / (2.0 * PI * df)
        } else {
            0.0
        };

        let n_in = inside.iter().filter(|&&m| m).count() as f64;
        let n_out = outside.iter().filter(|&&m| m).count() as f64;
        let out_power: f64 = (0..n).filter(|&k| outside[k]).map(|k| mean_psd[[b, k]]).sum();
        let noise = out_power * n_in / (n_out + NOISE_BIN_EPS);

        let in_power: f64 = (0..n).filter(|&k| inside[k]).map(|k| psd[[b, k]]).sum();
        let in_power_mean: f64 = (0..n).filter(|&k| inside[k]).map(|k| mean_psd[[b, k]]).sum();
        if noise > 0.0 {
            snr[b] = in_power / noise;
            snr_mean[b] = in_power_mean / noise;
        }
    }

    Ok(IotaEstimate {
        piston: BaselinePiston {
            position,
            snr,
            snr_mean,
        },
        filter_in_rescaled: bounds_in,
    })
}
