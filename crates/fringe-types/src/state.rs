// ─────────────────────────────────────────────────────────────────────
// Fringe RTD — State
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use std::sync::Arc;

use ndarray::{Array1, Array2};
use num_complex::Complex64;

use crate::config::PipelineConfig;
use crate::constants::TRACK_HISTORY_DEPTH;
use crate::mapping::MappingTable;
use crate::step::{Step, StepLedger};

/// Raw scan of one cycle, split by detector role.
#[derive(Debug, Clone)]
pub struct ScanFrame {
    pub opd: Array2<f64>,          // [n_tel, n_opl]
    pub sci: Array2<f64>,          // [n_win_sci, n_opl]
    pub dark: Option<Array2<f64>>, // [n_win_dark, n_opl], None without dark windows
    pub mjd: f64,
    /// Seconds since the previous frame, 0 for the first one.
    pub elapsed_s: f64,
    /// Window or sample count differs from the previous frame.
    pub shape_changed: bool,
}

/// Per-baseline complex fringe signal and its opd axis.
#[derive(Debug, Clone)]
pub struct CombinedScan {
    pub signal: Array2<Complex64>, // [n_base, n_opl]
    pub opd: Array2<f64>,          // [n_base, n_opl]
}

/// Spectrum along the sample axis and its spectral-frequency axis.
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub spectrum: Array2<Complex64>,
    pub frequency: Array2<f64>,
}

/// Unfiltered per-window signal and opd.
#[derive(Debug, Clone)]
pub struct RawScan {
    pub signal: Array2<f64>, // [n_win_sci, n_opl]
    pub opd: Array2<f64>,    // [n_win_sci, n_opl]
}

/// IOTA estimate for each baseline.
#[derive(Debug, Clone)]
pub struct BaselinePiston {
    pub position: Array1<f64>,
    pub snr: Array1<f64>,
    /// SNR of the PSD averaged over the ring buffer.
    pub snr_mean: Array1<f64>,
}

/// Telescope-level solution of the baseline pistons.
#[derive(Debug, Clone, PartialEq)]
pub struct TelescopeSolution {
    pub position: Array1<f64>,
    pub snr: Array1<f64>,
    /// Baseline pistons implied by the telescope pistons.
    pub baseline_position: Array1<f64>,
    pub tracking: Vec<bool>,
}

impl TelescopeSolution {
    /// Solution with nothing tracked.
    pub fn invalid(n_tel: usize, n_base: usize) -> Self {
        TelescopeSolution {
            position: Array1::zeros(n_tel),
            snr: Array1::zeros(n_tel),
            baseline_position: Array1::zeros(n_base),
            tracking: vec![false; n_tel],
        }
    }

    pub fn n_tracked(&self) -> usize {
        self.tracking.iter().filter(|&&t| t).count()
    }

    pub fn all_tracking(&self) -> bool {
        !self.tracking.is_empty() && self.tracking.iter().all(|&t| t)
    }
}

/// A cycle value tagged with the step that produces it.
///
/// Reads go through the ledger: a value is visible only while its step is
/// marked done for the current cycle.
#[derive(Debug, Clone)]
pub struct Tagged<T> {
    step: Step,
    value: Option<T>,
}

impl<T> Tagged<T> {
    pub const fn new(step: Step) -> Self {
        Tagged { step, value: None }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn set(&mut self, value: T) {
        self.value = Some(value);
    }

    pub fn get(&self, ledger: &StepLedger) -> Option<&T> {
        if ledger.is_done(self.step) {
            self.value.as_ref()
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, ledger: &StepLedger) -> Option<&mut T> {
        if ledger.is_done(self.step) {
            self.value.as_mut()
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.value = None;
    }
}

/// Data derived from one scan. Cleared wholesale by intake.
#[derive(Debug, Clone)]
pub struct CycleState {
    pub frame: Tagged<ScanFrame>,
    pub combined: Tagged<CombinedScan>,
    pub spectrum: Tagged<Spectrum>,
    pub baseline_piston: Tagged<BaselinePiston>,
    pub telescope: Tagged<TelescopeSolution>,
    pub filtered: Tagged<CombinedScan>,
    pub raw: Tagged<RawScan>,
    pub raw_spectrum: Tagged<Spectrum>,
    pub flux: Tagged<Array1<f64>>,
    pub normalized: Tagged<Array2<Complex64>>,
    pub differential_phase: Tagged<Array1<f64>>,
}

impl CycleState {
    pub fn new() -> Self {
        CycleState {
            frame: Tagged::new(Step::Intake),
            combined: Tagged::new(Step::Combine),
            spectrum: Tagged::new(Step::SpectralTransform),
            baseline_piston: Tagged::new(Step::PistonPerBaseline),
            telescope: Tagged::new(Step::PistonPerTelescope),
            filtered: Tagged::new(Step::FilterCombined),
            raw: Tagged::new(Step::PrepareRaw),
            raw_spectrum: Tagged::new(Step::SpectralTransformRaw),
            flux: Tagged::new(Step::Flux),
            normalized: Tagged::new(Step::NormalizeCombined),
            differential_phase: Tagged::new(Step::DifferentialPhase),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl Default for CycleState {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-depth ring of power spectra, one [n_base, n_freq] slot per cycle.
#[derive(Debug, Clone)]
pub struct PsdRing {
    slots: Vec<Array2<f64>>,
    index: usize,
    filled: usize,
}

impl PsdRing {
    pub fn new(capacity: usize, shape: (usize, usize)) -> Self {
        let capacity = capacity.max(1);
        PsdRing {
            slots: vec![Array2::zeros(shape); capacity],
            index: capacity - 1,
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.slots[0].dim()
    }

    /// Number of slots written so far, at most the capacity.
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Slot of the most recent write.
    pub fn index(&self) -> Option<usize> {
        (self.filled > 0).then_some(self.index)
    }

    /// Overwrite the slot after the current index.
    pub fn push(&mut self, psd: &Array2<f64>) {
        self.index = (self.index + 1) % self.capacity();
        self.slots[self.index].assign(psd);
        if self.filled < self.capacity() {
            self.filled += 1;
        }
    }

    /// Mean over the written slots.
    pub fn mean(&self) -> Array2<f64> {
        let mut acc = Array2::zeros(self.shape());
        if self.filled == 0 {
            return acc;
        }
        for slot in self.slots.iter().take(self.filled) {
            acc += slot;
        }
        acc / self.filled as f64
    }
}

/// Rolling history of offset-dispatch timestamps, oldest first.
#[derive(Debug, Clone)]
pub struct TimestampHistory {
    data: Vec<f64>,
    head: usize,
    count: usize,
}

impl TimestampHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity.max(1)],
            head: 0,
            count: 0,
        }
    }

    pub fn push(&mut self, value: f64) {
        let capacity = self.data.len();
        self.data[self.head] = value;
        self.head = (self.head + 1) % capacity;
        if self.count < capacity {
            self.count += 1;
        }
    }

    /// Timestamps in chronological order.
    pub fn view(&self) -> Vec<f64> {
        if self.count < self.data.len() {
            self.data[..self.count].to_vec()
        } else {
            let mut result = self.data[self.head..].to_vec();
            result.extend_from_slice(&self.data[..self.head]);
            result
        }
    }

    pub fn latest(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let capacity = self.data.len();
        Some(self.data[(self.head + capacity - 1) % capacity])
    }

    /// Mean interval between consecutive dispatches [s].
    pub fn mean_period(&self) -> Option<f64> {
        let view = self.view();
        if view.len() < 2 {
            return None;
        }
        Some((view[view.len() - 1] - view[0]) / (view.len() - 1) as f64)
    }
}

/// Dark and science frames captured on operator demand.
#[derive(Debug, Clone)]
pub struct Background {
    pub sci: Array2<f64>,
    pub dark: Option<Array2<f64>>,
}

/// State carried across cycles.
#[derive(Debug, Clone)]
pub struct PersistentState {
    pub psd_ring: Option<PsdRing>,
    pub data_counter: u64,
    pub config_counter: u64,
    pub background: Option<Background>,
    pub track_history: TimestampHistory,
}

impl Default for PersistentState {
    fn default() -> Self {
        PersistentState {
            psd_ring: None,
            data_counter: 0,
            config_counter: 0,
            background: None,
            track_history: TimestampHistory::new(TRACK_HISTORY_DEPTH),
        }
    }
}

/// Instrument configuration as seen by the pipeline.
///
/// Refreshed only when the scan shape changes.
#[derive(Debug, Clone)]
pub struct ConfigurationSnapshot {
    pub n_win_sci: usize,
    pub n_win_dark: usize,
    pub n_opl: usize,
    pub n_tel: usize,
    pub n_polar: usize,
    pub n_base: usize,
    pub instrument: String,
    pub mapping: Option<Arc<MappingTable>>,
    /// One entry per baseline, sorted.
    pub mapping_reduced: Option<Arc<MappingTable>>,
    pub delay_lines: Vec<u32>,
    pub snr_min: f64,
    pub filter_in: [f64; 2],
    pub filter_out: [f64; 2],
    /// In-band filter per baseline as actually used by the last IOTA run.
    pub filter_in_rescaled: Option<Array2<f64>>,
    pub turbulence_strength: f64,
    pub freq_max: usize,
    pub oversampling_index: Vec<usize>,
    pub subtract_dark_windows: bool,
    pub process_oversampling: bool,
    /// Set by intake on a shape change, cleared once a refresh succeeds.
    pub refresh_pending: bool,
}

impl ConfigurationSnapshot {
    pub fn from_config(config: &PipelineConfig) -> Self {
        ConfigurationSnapshot {
            n_win_sci: 0,
            n_win_dark: 0,
            n_opl: 0,
            n_tel: config.n_tel,
            n_polar: 1,
            n_base: 0,
            instrument: String::new(),
            mapping: None,
            mapping_reduced: None,
            delay_lines: vec![0; config.n_tel],
            snr_min: config.snr_min,
            filter_in: config.filter_in,
            filter_out: config.filter_out,
            filter_in_rescaled: None,
            turbulence_strength: config.turbulence_strength,
            freq_max: 0,
            oversampling_index: Vec::new(),
            subtract_dark_windows: config.subtract_dark_windows,
            process_oversampling: config.process_oversampling,
            refresh_pending: false,
        }
    }

    pub fn has_mapping(&self) -> bool {
        self.mapping.is_some()
    }
}
