// ─────────────────────────────────────────────────────────────────────
// Fringe RTD — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RtdError, RtdResult};

/// H band fringe filter [1/µm].
pub const FILTER_H: [f64; 2] = [0.515, 0.756];
/// Narrower H band variant.
pub const FILTER_HL: [f64; 2] = [0.45, 0.75];
/// Wide H band, used for the out-of-band noise estimate.
pub const FILTER_HW: [f64; 2] = [0.3, 0.9];

/// Spectral band selection for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterBand {
    /// 5%–45% of each baseline's maximum frequency.
    Wide,
    /// No filtering.
    All,
    /// Explicit [low, high] in spectral frequency units, rescaled per baseline.
    Band([f64; 2]),
}

/// Processing configuration of the reduction pipeline.
/// Every field has a default, so partial JSON files load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Band where the fringe signal lives.
    pub filter_in: [f64; 2],
    /// Band used to estimate the noise (the in-band part is excluded).
    pub filter_out: [f64; 2],
    /// Named filters an operator can pick from.
    pub filter_presets: BTreeMap<String, [f64; 2]>,
    /// Fallback SNR threshold when the instrument does not provide one.
    pub snr_min: f64,
    /// Widening of the filter for slowly scanned baselines, in [0, 1].
    pub turbulence_strength: f64,
    pub subtract_dark_windows: bool,
    pub n_tel: usize,
    /// Leading samples of a scan that are overwritten (detector settling).
    pub n_first_samples_to_clean: usize,
    pub compute_oversampling_factor: bool,
    /// Restrict spectra to the oversampling index set.
    pub process_oversampling: bool,
    /// Depth of the PSD ring buffer.
    pub psd_buffer_size: usize,
    pub receive_timeout_ms: u64,
    pub reset_lock_timeout_ms: u64,
    pub retry_backoff_ms: u64,
    pub send_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let filter_presets = [("H", FILTER_H), ("Hl", FILTER_HL), ("Hw", FILTER_HW)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        PipelineConfig {
            filter_in: FILTER_H,
            filter_out: FILTER_HW,
            filter_presets,
            snr_min: 2.0,
            turbulence_strength: 0.13,
            subtract_dark_windows: true,
            n_tel: 4,
            n_first_samples_to_clean: 3,
            compute_oversampling_factor: false,
            process_oversampling: true,
            psd_buffer_size: 10,
            receive_timeout_ms: 1000,
            reset_lock_timeout_ms: 5000,
            retry_backoff_ms: 2000,
            send_timeout_ms: 1000,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file and validate.
    pub fn from_file(path: &str) -> RtdResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RtdResult<()> {
        check_band("filter_in", self.filter_in)?;
        check_band("filter_out", self.filter_out)?;
        for (name, band) in &self.filter_presets {
            check_band(name, *band)?;
        }
        if !(0.0..=1.0).contains(&self.turbulence_strength) {
            return Err(RtdError::Configuration(format!(
                "turbulence_strength must be in [0, 1], got {}",
                self.turbulence_strength
            )));
        }
        if !self.snr_min.is_finite() || self.snr_min < 0.0 {
            return Err(RtdError::Configuration(
                "snr_min must be finite and >= 0".to_string(),
            ));
        }
        if self.psd_buffer_size == 0 {
            return Err(RtdError::Configuration(
                "psd_buffer_size must be >= 1".to_string(),
            ));
        }
        if self.n_tel == 0 {
            return Err(RtdError::Configuration("n_tel must be >= 1".to_string()));
        }
        Ok(())
    }

    /// Switch the in-band filter to a named preset.
    pub fn select_filter(&mut self, preset: &str) -> RtdResult<()> {
        let band = self
            .filter_presets
            .get(preset)
            .copied()
            .ok_or_else(|| RtdError::Configuration(format!("unknown filter preset {preset:?}")))?;
        self.filter_in = band;
        Ok(())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn reset_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_lock_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

fn check_band(name: &str, band: [f64; 2]) -> RtdResult<()> {
    if !band[0].is_finite() || !band[1].is_finite() || band[0] < 0.0 || band[0] > band[1] {
        return Err(RtdError::Configuration(format!(
            "filter {name} must satisfy 0 <= low <= high, got {band:?}"
        )));
    }
    Ok(())
}
