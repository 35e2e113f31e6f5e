// ─────────────────────────────────────────────────────────────────────
// Fringe RTD — Pipeline Steps
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Bodies of the processing steps after intake.
//!
//! Each function reads the products of its dependency from the cycle state
//! and stores its own. Gating and timing are done by the caller.

use std::sync::Arc;

use fringe_math::combine::combine_baselines;
use fringe_math::fft::{compute_data_fft, oversampling_index, select_columns, to_complex, Direction};
use fringe_math::filter::{compute_filtered, normalize_contrast};
use fringe_math::flux::flux_per_telescope;
use fringe_math::iota::compute_opd_iota;
use fringe_math::opl::compute_opl_matrix;
use fringe_math::phase::differential_phase;
use fringe_types::config::{FilterBand, PipelineConfig};
use fringe_types::constants::{CONTRAST_FLOOR, METRES_TO_MICRONS, OVERSAMPLING_SAMPLES_PER_FRINGE};
use fringe_types::error::{RtdError, RtdResult};
use fringe_types::mapping::MappingTable;
use fringe_types::state::{
    Background, ConfigurationSnapshot, PersistentState, RawScan, Spectrum, Tagged,
};
use fringe_types::step::{Step, StepLedger};
use ndarray::{s, Array2};
use tracing::{debug, info, warn};

use crate::acquisition::Acquisition;
use crate::engine::EngineData;

pub(crate) fn execute<A: Acquisition>(
    step: Step,
    data: &mut EngineData,
    acquisition: &mut A,
    settings: &PipelineConfig,
) -> RtdResult<()> {
    match step {
        // intake replaces the whole cycle and is driven by the pipeline itself
        Step::Intake => Err(RtdError::NotComputed(Step::Intake)),
        Step::Prepare => prepare(data, acquisition, settings),
        Step::Combine => combine(data),
        Step::SpectralTransform => spectral_transform(data),
        Step::PistonPerBaseline => piston_per_baseline(data, settings),
        Step::PistonPerTelescope => piston_per_telescope(data),
        Step::FilterCombined => filter_combined(data),
        Step::PrepareRaw => prepare_raw(data),
        Step::SpectralTransformRaw => spectral_transform_raw(data),
        Step::Flux => flux(data),
        Step::NormalizeCombined => normalize_combined(data),
        Step::DifferentialPhase => phase(data),
    }
}

fn product<'a, T>(slot: &'a Tagged<T>, ledger: &StepLedger) -> RtdResult<&'a T> {
    slot.get(ledger).ok_or(RtdError::NotComputed(slot.step()))
}

fn require_mapping(mapping: &Option<Arc<MappingTable>>) -> RtdResult<&MappingTable> {
    mapping.as_deref().ok_or_else(|| {
        RtdError::Configuration("no window mapping for the current instrument setup".to_string())
    })
}

/// Prepared arrays are built on copies and stored only once every fallible
/// call has succeeded, so a failed attempt leaves the intake frame intact.
fn prepare<A: Acquisition>(
    data: &mut EngineData,
    acquisition: &mut A,
    settings: &PipelineConfig,
) -> RtdResult<()> {
    let EngineData {
        cycle,
        persistent,
        config,
        ledger,
    } = data;
    let frame = product(&cycle.frame, ledger)?;
    let mut sci = frame.sci.clone();
    let mut opd = frame.opd.clone();
    let mut dark = frame.dark.clone();
    let n_opl = sci.ncols();

    // detector settling
    let n_clean = settings.n_first_samples_to_clean;
    if n_clean > 0 && n_clean < n_opl {
        let reference = sci.column(n_clean).to_owned();
        for i in 0..n_clean {
            sci.column_mut(i).assign(&reference);
        }
    }

    if config.subtract_dark_windows {
        if let Some(level) = dark.as_ref().and_then(|d| d.mean()) {
            sci -= level;
        }
    }

    opd *= METRES_TO_MICRONS;

    let factor = if settings.compute_oversampling_factor {
        oversampling_factor(&opd, config.filter_in)
    } else {
        1
    };
    debug!(factor, "oversampling factor");

    if config.refresh_pending {
        refresh_configuration(config, persistent, acquisition, n_opl, factor)?;
        config.refresh_pending = false;
    }

    if acquisition.save_background_requested() {
        persistent.background = Some(Background {
            sci: sci.clone(),
            dark: dark.clone(),
        });
        acquisition.clear_save_background();
        info!(cycle = persistent.data_counter, "background captured");
    }
    if acquisition.subtract_background_requested() {
        match persistent.background.as_ref() {
            Some(bg) if bg.sci.dim() == sci.dim() => {
                sci -= &bg.sci;
                if let (Some(dark), Some(bg_dark)) = (dark.as_mut(), bg.dark.as_ref()) {
                    if dark.dim() == bg_dark.dim() {
                        *dark -= bg_dark;
                    }
                }
            }
            Some(_) => debug!("background shape differs from scan, not subtracted"),
            None => {}
        }
    }

    // centre every opd row on its middle sample
    if n_opl > 0 {
        let mid = n_opl / 2;
        for mut row in opd.rows_mut() {
            let centre = row[mid];
            row.mapv_inplace(|v| v - centre);
        }
    }

    config.snr_min = acquisition
        .snr_min_setting()
        .unwrap_or(settings.snr_min);

    let frame = cycle
        .frame
        .get_mut(ledger)
        .ok_or(RtdError::NotComputed(Step::Intake))?;
    frame.sci = sci;
    frame.opd = opd;
    frame.dark = dark;
    Ok(())
}

/// Samples per fringe at the fastest baseline, in units of 3.5 samples.
fn oversampling_factor(opd: &Array2<f64>, filter_in: [f64; 2]) -> usize {
    if opd.ncols() < 19 {
        return 1;
    }
    let steps: Vec<f64> = opd.rows().into_iter().map(|r| r[18] - r[17]).collect();
    let mut widest = 0.0_f64;
    for (i, a) in steps.iter().enumerate() {
        for b in &steps[i + 1..] {
            widest = widest.max((a - b).abs());
        }
    }
    let centre = 0.5 * (filter_in[0] + filter_in[1]);
    if widest <= 0.0 || centre <= 0.0 {
        return 1;
    }
    let sampling = 1.0 / centre / widest;
    ((sampling / OVERSAMPLING_SAMPLES_PER_FRINGE).floor() as usize).max(1)
}

fn refresh_configuration<A: Acquisition>(
    config: &mut ConfigurationSnapshot,
    persistent: &mut PersistentState,
    acquisition: &mut A,
    n_opl: usize,
    factor: usize,
) -> RtdResult<()> {
    // query everything before touching the snapshot
    let instrument = acquisition.instrument_config_name()?;
    let delay_lines = acquisition.delay_line_numbers()?;
    let mapping = acquisition.find_mapping(&instrument, config.n_win_sci);

    persistent.config_counter += 1;
    if persistent.background.take().is_some() {
        info!("scan shape changed, saved background dropped");
    }
    match &mapping {
        Some(table) => {
            config.mapping_reduced = Some(Arc::new(table.reduce_to_unique_baselines()));
            config.n_polar = table.n_polarizations();
            config.n_base = table.n_baselines();
        }
        None => {
            warn!(
                instrument = %instrument,
                windows = config.n_win_sci,
                "no mapping for this setup, combination disabled"
            );
            config.mapping_reduced = None;
            config.n_polar = 0;
            config.n_base = 0;
        }
    }
    config.mapping = mapping;
    config.instrument = instrument;
    config.delay_lines = delay_lines;

    let (freq_max, index) = oversampling_index(n_opl, factor);
    config.freq_max = freq_max;
    config.oversampling_index = index;
    config.filter_in_rescaled = None;

    info!(
        config_counter = persistent.config_counter,
        instrument = %config.instrument,
        windows = config.n_win_sci,
        dark_windows = config.n_win_dark,
        samples = n_opl,
        baselines = config.n_base,
        polarizations = config.n_polar,
        "instrument configuration refreshed"
    );
    Ok(())
}

fn combine(data: &mut EngineData) -> RtdResult<()> {
    let EngineData {
        cycle,
        config,
        ledger,
        ..
    } = data;
    let frame = product(&cycle.frame, ledger)?;
    let combined = combine_baselines(&frame.sci, &frame.opd, config.mapping.as_deref())?;
    cycle.combined.set(combined);
    Ok(())
}

/// Keep only the oversampling bins. The full set is left untouched.
fn restrict(spectrum: &mut Spectrum, index: &[usize]) -> RtdResult<()> {
    let n = spectrum.spectrum.ncols();
    let identity = index.len() == n && index.iter().enumerate().all(|(i, &u)| i == u);
    if index.is_empty() || identity {
        return Ok(());
    }
    if let Some(&bad) = index.iter().find(|&&u| u >= n) {
        return Err(RtdError::InvalidInput(format!(
            "oversampling bin {bad} outside a {n}-bin spectrum"
        )));
    }
    spectrum.spectrum = select_columns(&spectrum.spectrum, index);
    spectrum.frequency = select_columns(&spectrum.frequency, index);
    Ok(())
}

fn spectral_transform(data: &mut EngineData) -> RtdResult<()> {
    let EngineData {
        cycle,
        config,
        ledger,
        ..
    } = data;
    let combined = product(&cycle.combined, ledger)?;
    let mut spectrum = compute_data_fft(&combined.signal, &combined.opd, Direction::Forward)?;
    if config.process_oversampling {
        restrict(&mut spectrum, &config.oversampling_index)?;
    }
    cycle.spectrum.set(spectrum);
    Ok(())
}

fn piston_per_baseline(data: &mut EngineData, settings: &PipelineConfig) -> RtdResult<()> {
    let EngineData {
        cycle,
        persistent,
        config,
        ledger,
    } = data;
    let spectrum = product(&cycle.spectrum, ledger)?;
    let estimate = compute_opd_iota(
        spectrum,
        config.filter_in,
        config.filter_out,
        config.turbulence_strength,
        &mut persistent.psd_ring,
        settings.psd_buffer_size,
    )?;
    config.filter_in_rescaled = Some(estimate.filter_in_rescaled);
    cycle.baseline_piston.set(estimate.piston);
    Ok(())
}

fn piston_per_telescope(data: &mut EngineData) -> RtdResult<()> {
    let EngineData {
        cycle,
        config,
        ledger,
        ..
    } = data;
    let reduced = require_mapping(&config.mapping_reduced)?;
    let piston = product(&cycle.baseline_piston, ledger)?;
    let solution =
        compute_opl_matrix(&piston.position, &piston.snr, reduced, config.snr_min, false)?;
    debug!(
        tracked = solution.n_tracked(),
        position = ?solution.position.as_slice(),
        "telescope solution"
    );
    cycle.telescope.set(solution);
    Ok(())
}

fn filter_combined(data: &mut EngineData) -> RtdResult<()> {
    let EngineData {
        cycle,
        config,
        ledger,
        ..
    } = data;
    let spectrum = product(&cycle.spectrum, ledger)?;
    let round_trip = compute_data_fft(&spectrum.spectrum, &spectrum.frequency, Direction::Inverse)?;
    let filtered = compute_filtered(
        &spectrum.spectrum,
        &spectrum.frequency,
        FilterBand::Band(config.filter_in),
        config.turbulence_strength,
    )?;
    // the combined scan now matches the (possibly restricted) spectrum
    if let Some(combined) = cycle.combined.get_mut(ledger) {
        combined.signal = round_trip.spectrum;
        combined.opd = round_trip.frequency;
    }
    cycle.filtered.set(filtered);
    Ok(())
}

fn prepare_raw(data: &mut EngineData) -> RtdResult<()> {
    let EngineData {
        cycle,
        config,
        ledger,
        ..
    } = data;
    let mapping = require_mapping(&config.mapping)?;
    let frame = product(&cycle.frame, ledger)?;
    let n = mapping.len();
    if frame.sci.nrows() < n || frame.opd.nrows() < mapping.n_telescopes() {
        return Err(RtdError::InvalidInput(format!(
            "mapping needs {n} windows and {} telescopes, scan has {} and {}",
            mapping.n_telescopes(),
            frame.sci.nrows(),
            frame.opd.nrows()
        )));
    }
    let entries = mapping.entries();
    let opd = Array2::from_shape_fn((n, frame.opd.ncols()), |(w, j)| {
        let e = &entries[w];
        frame.opd[[e.tel2 - 1, j]] - frame.opd[[e.tel1 - 1, j]]
    });
    let signal = frame.sci.slice(s![..n, ..]).to_owned();
    cycle.raw.set(RawScan { signal, opd });
    Ok(())
}

fn spectral_transform_raw(data: &mut EngineData) -> RtdResult<()> {
    let EngineData {
        cycle,
        config,
        ledger,
        ..
    } = data;
    let raw = product(&cycle.raw, ledger)?;
    let mut spectrum = compute_data_fft(&to_complex(&raw.signal), &raw.opd, Direction::Forward)?;

    let mut resampled = None;
    if config.process_oversampling {
        restrict(&mut spectrum, &config.oversampling_index)?;
        let back = compute_data_fft(&spectrum.spectrum, &spectrum.frequency, Direction::Inverse)?;
        resampled = Some(RawScan {
            signal: back.spectrum.mapv(|c| c.re),
            opd: back.frequency,
        });
    }
    if let (Some(scan), Some(raw)) = (resampled, cycle.raw.get_mut(ledger)) {
        *raw = scan;
    }
    cycle.raw_spectrum.set(spectrum);
    Ok(())
}

fn flux(data: &mut EngineData) -> RtdResult<()> {
    let EngineData {
        cycle,
        config,
        ledger,
        ..
    } = data;
    let mapping = require_mapping(&config.mapping)?;
    let raw = product(&cycle.raw, ledger)?;
    let flux = flux_per_telescope(&raw.signal, mapping)?;
    cycle.flux.set(flux);
    Ok(())
}

fn normalize_combined(data: &mut EngineData) -> RtdResult<()> {
    let EngineData { cycle, ledger, .. } = data;
    let filtered = product(&cycle.filtered, ledger)?;
    let normalized = normalize_contrast(&filtered.signal, CONTRAST_FLOOR);
    cycle.normalized.set(normalized);
    Ok(())
}

/// No-op without a polarized mapping.
fn phase(data: &mut EngineData) -> RtdResult<()> {
    let EngineData {
        cycle,
        config,
        ledger,
        ..
    } = data;
    let Some(mapping) = config.mapping.as_deref() else {
        return Ok(());
    };
    if config.n_polar < 2 {
        return Ok(());
    }
    let normalized = product(&cycle.normalized, ledger)?;
    let phases = differential_phase(normalized, mapping)?;
    cycle.differential_phase.set(phases);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversampling_factor_from_baseline_step() {
        // steps 0.1 and -0.1 µm -> widest baseline step 0.2 µm
        let opd = Array2::from_shape_fn((2, 32), |(t, j)| (if t == 0 { 0.1 } else { -0.1 }) * j as f64);
        // 1 / 0.5 / 0.2 = 10 samples per fringe -> floor(10 / 3.5) = 2
        assert_eq!(oversampling_factor(&opd, [0.4, 0.6]), 2);
    }

    #[test]
    fn test_oversampling_factor_defaults_to_one() {
        assert_eq!(oversampling_factor(&Array2::zeros((4, 10)), [0.5, 0.7]), 1);
        assert_eq!(oversampling_factor(&Array2::zeros((4, 32)), [0.5, 0.7]), 1);
    }

    #[test]
    fn test_restrict_keeps_identity() {
        let mut spectrum = Spectrum {
            spectrum: Array2::zeros((2, 4)),
            frequency: Array2::zeros((2, 4)),
        };
        restrict(&mut spectrum, &[0, 1, 2, 3]).unwrap();
        assert_eq!(spectrum.spectrum.ncols(), 4);
        restrict(&mut spectrum, &[0, 3]).unwrap();
        assert_eq!(spectrum.frequency.ncols(), 2);
        assert!(restrict(&mut spectrum, &[5]).is_err());
    }
}
