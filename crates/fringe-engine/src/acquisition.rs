// ─────────────────────────────────────────────────────────────────────
// Fringe RTD — Acquisition Interface
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Boundary between the pipeline and the instrument.
//!
//! Transport, database and delay-line control live behind this trait; the
//! pipeline only sees frames, settings and send calls.

use std::sync::Arc;
use std::time::Duration;

use fringe_types::error::RtdResult;
use fringe_types::mapping::MappingTable;
use ndarray::{Array1, Array2};

pub trait Acquisition: Send {
    /// Connect to `host`. Connecting an open backend is a no-op.
    fn open(&mut self, host: &str) -> RtdResult<()>;

    fn is_open(&self) -> bool;

    /// `(channel count, samples per scan)` of the next frame. Channels are
    /// the telescope opd rows followed by the detector windows.
    fn scan_shape(&mut self) -> RtdResult<(usize, usize)>;

    /// Block for the next frame, one row per channel.
    ///
    /// Timeouts and protocol errors surface as `RtdError::Communication`.
    fn receive_frame(&mut self, shape: (usize, usize), timeout: Duration)
        -> RtdResult<Array2<f64>>;

    /// Modified Julian date of the last frame.
    fn timestamp_mjd(&self) -> f64;

    fn instrument_config_name(&mut self) -> RtdResult<String>;

    fn find_mapping(&self, config_name: &str, window_count: usize) -> Option<Arc<MappingTable>>;

    fn delay_line_numbers(&mut self) -> RtdResult<Vec<u32>>;

    /// Operator SNR threshold, `None` to keep the configured one.
    fn snr_min_setting(&mut self) -> Option<f64>;

    fn tracking_enabled(&self) -> bool;

    fn send_offsets(
        &mut self,
        delay_lines: &[u32],
        offsets: &Array1<f64>,
        timeout: Duration,
    ) -> RtdResult<()>;

    fn send_differential_phase(&mut self, phases: &Array1<f64>) -> RtdResult<()>;

    fn save_background_requested(&self) -> bool;

    fn clear_save_background(&mut self);

    fn subtract_background_requested(&self) -> bool;
}
