// ─────────────────────────────────────────────────────────────────────
// Fringe RTD — Instrument Simulator
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Simulated four-telescope scanning combiner.
//!
//! Each telescope scans its delay line back and forth at a fixed speed.
//! Broadband fringes are formed through the window mapping, with photon
//! noise per spectral channel and read noise on the dark windows.

use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use fringe_types::error::{RtdError, RtdResult};
use fringe_types::mapping::{MappingRegistry, MappingTable, Polarization, ABCD_H};
use ndarray::{Array1, Array2};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::debug;

use crate::acquisition::Acquisition;
use crate::flags::ControlFlags;

/// MJD of the first simulated frame.
const START_MJD: f64 = 60000.0;

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub n_tel: usize,
    pub n_win_sci: usize,
    pub n_win_dark: usize,
    pub n_opl: usize,
    /// Scan stroke per telescope [µm].
    pub strokes: Vec<f64>,
    /// Scan speed per telescope [µm/s].
    pub speeds: Vec<f64>,
    pub signs: Vec<f64>,
    /// [Hz]
    pub frame_rate: f64,
    pub instrument: String,
    /// Noise per spectral channel, in flux units.
    pub amplitude_noise: f64,
    pub read_noise: f64,
    pub fluxes: Vec<f64>,
    /// Band edges [µm] and channel count of the simulated spectrum.
    pub wavelength_range: [f64; 2],
    pub n_wave: usize,
    /// Per-telescope phase between the two polarizations [deg].
    pub phase_diff_deg: Vec<f64>,
    /// Peak-to-peak random piston per scan [µm].
    pub piston_jitter: f64,
    /// Peak-to-peak per-sample position error, as a fraction of the stroke.
    pub stretch_strength: f64,
    pub snr_min: Option<f64>,
    pub delay_lines: Vec<u32>,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            n_tel: 4,
            n_win_sci: 48,
            n_win_dark: 2,
            n_opl: 512,
            strokes: vec![-40.0, -120.0, 40.0, 120.0],
            speeds: vec![156.25, 468.75, 156.25, 468.75],
            signs: vec![-1.0, -1.0, 1.0, 1.0],
            frame_rate: 2000.0,
            instrument: ABCD_H.to_string(),
            amplitude_noise: 0.1,
            read_noise: 1.0,
            fluxes: vec![200.0; 4],
            wavelength_range: [1.4, 1.8],
            n_wave: 32,
            phase_diff_deg: vec![-70.0, 0.0, 0.0, 10.0],
            piston_jitter: 10.0,
            stretch_strength: 1.0 / 150.0,
            snr_min: Some(2.0),
            delay_lines: vec![1, 2, 3, 4],
            seed: 42,
        }
    }
}

impl SimulatorConfig {
    /// No piston jitter and exact scan positions.
    pub fn quiet() -> Self {
        SimulatorConfig {
            piston_jitter: 0.0,
            stretch_strength: 0.0,
            ..Default::default()
        }
    }

    /// Same combiner without the Wollaston.
    pub fn natural(mut self) -> Self {
        self.n_win_sci = 24;
        self.phase_diff_deg = vec![0.0; self.n_tel];
        self
    }

    fn validate(&self) -> RtdResult<()> {
        let n = self.n_tel;
        let per_tel = [
            ("strokes", self.strokes.len()),
            ("speeds", self.speeds.len()),
            ("signs", self.signs.len()),
            ("fluxes", self.fluxes.len()),
            ("phase_diff_deg", self.phase_diff_deg.len()),
            ("delay_lines", self.delay_lines.len()),
        ];
        if let Some((name, len)) = per_tel.iter().find(|(_, len)| *len != n) {
            return Err(RtdError::Configuration(format!(
                "simulator {name} has {len} values for {n} telescopes"
            )));
        }
        if self.n_opl < 3 || self.n_wave == 0 || self.frame_rate <= 0.0 {
            return Err(RtdError::Configuration(
                "simulator needs >= 3 samples, >= 1 wavelength and a positive frame rate"
                    .to_string(),
            ));
        }
        if self.wavelength_range[0] <= 0.0 || self.wavelength_range[0] > self.wavelength_range[1] {
            return Err(RtdError::Configuration(format!(
                "bad wavelength range {:?}",
                self.wavelength_range
            )));
        }
        Ok(())
    }
}

/// In-process stand-in for the instrument, records what the pipeline sends.
pub struct SimulatedInstrument {
    config: SimulatorConfig,
    flags: Arc<ControlFlags>,
    registry: MappingRegistry,
    mapping: Arc<MappingTable>,
    wavelengths: Array1<f64>,
    rng: StdRng,
    open: bool,
    scan_positions: Vec<f64>,
    scan_counter: u64,
    mjd: f64,
    pending_failures: usize,
    pending_config_failures: usize,
    failing_sends: bool,
    sent_offsets: Vec<Array1<f64>>,
    sent_phases: Vec<Array1<f64>>,
}

impl SimulatedInstrument {
    pub fn new(config: SimulatorConfig, flags: Arc<ControlFlags>) -> RtdResult<Self> {
        config.validate()?;
        let registry = MappingRegistry::builtin();
        let mapping = registry
            .lookup(&config.instrument, config.n_win_sci)
            .ok_or_else(|| {
                RtdError::Configuration(format!(
                    "no mapping for {} with {} windows",
                    config.instrument, config.n_win_sci
                ))
            })?;
        let wavelengths = if config.n_wave == 1 {
            Array1::from_elem(1, config.wavelength_range[0])
        } else {
            Array1::linspace(
                config.wavelength_range[0],
                config.wavelength_range[1],
                config.n_wave,
            )
        };
        let scan_positions = config.strokes.iter().map(|s| -s / 2.0).collect();
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(SimulatedInstrument {
            config,
            flags,
            registry,
            mapping,
            wavelengths,
            rng,
            open: false,
            scan_positions,
            scan_counter: 0,
            mjd: START_MJD,
            pending_failures: 0,
            pending_config_failures: 0,
            failing_sends: false,
            sent_offsets: Vec::new(),
            sent_phases: Vec::new(),
        })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn flags(&self) -> &Arc<ControlFlags> {
        &self.flags
    }

    /// Register an extra mapping table for lookups by the pipeline.
    pub fn register_mapping(&mut self, config_name: &str, table: MappingTable) {
        self.registry.insert(config_name, table);
    }

    /// Make the next `count` frame requests time out.
    pub fn fail_next_receives(&mut self, count: usize) {
        self.pending_failures = count;
    }

    /// Make the next `count` instrument configuration queries fail.
    pub fn fail_next_config_queries(&mut self, count: usize) {
        self.pending_config_failures = count;
    }

    pub fn set_failing_sends(&mut self, failing: bool) {
        self.failing_sends = failing;
    }

    pub fn sent_offsets(&self) -> &[Array1<f64>] {
        &self.sent_offsets
    }

    pub fn sent_phases(&self) -> &[Array1<f64>] {
        &self.sent_phases
    }

    pub fn scans_generated(&self) -> u64 {
        self.scan_counter
    }

    fn shape(&self) -> (usize, usize) {
        let c = &self.config;
        (c.n_tel + c.n_win_sci + c.n_win_dark, c.n_opl)
    }

    fn uniform(&mut self, width: f64) -> f64 {
        if width > 0.0 {
            self.rng.gen_range(-0.5 * width..0.5 * width)
        } else {
            0.0
        }
    }

    fn normal(&mut self, sigma: f64) -> f64 {
        self.rng.sample::<f64, _>(StandardNormal) * sigma
    }

    /// One scan, rows: telescope opd [m], science windows, dark windows.
    fn generate_scan(&mut self) -> Array2<f64> {
        let (n_data, n_opl) = self.shape();
        let n_tel = self.config.n_tel;
        let n_wave = self.wavelengths.len();
        let direction = if self.scan_counter % 2 == 0 { 1.0 } else { -1.0 };
        self.scan_counter += 1;

        let mut frame = Array2::<f64>::zeros((n_data, n_opl));
        for t in 0..n_tel {
            let speed = self.config.signs[t] * self.config.speeds[t] * direction;
            let start = self.scan_positions[t];
            for j in 0..n_opl {
                frame[[t, j]] = start + speed * j as f64 / self.config.frame_rate;
            }
            self.scan_positions[t] = frame[[t, n_opl - 1]];
        }

        // complex amplitude per telescope, channel and sample
        let spectral_weight = 1.0 / n_wave as f64;
        let mut beams = ndarray::Array3::<Complex64>::zeros((n_tel, n_wave, n_opl));
        for t in 0..n_tel {
            let piston = self.uniform(self.config.piston_jitter);
            let stretch = self.config.strokes[t].abs() * self.config.stretch_strength;
            let amplitude = self.config.fluxes[t] * spectral_weight;
            for j in 0..n_opl {
                let x = frame[[t, j]] + piston + self.uniform(stretch);
                for w in 0..n_wave {
                    let a = amplitude + self.normal(self.config.amplitude_noise);
                    let phase = 2.0 * PI * x / self.wavelengths[w];
                    beams[[t, w, j]] = Complex64::from_polar(a, phase);
                }
            }
        }

        let mapping = Arc::clone(&self.mapping);
        for entry in mapping.entries() {
            let (t1, t2) = (entry.tel1 - 1, entry.tel2 - 1);
            let half1 = self.config.phase_diff_deg[t1].to_radians() / 2.0;
            let half2 = self.config.phase_diff_deg[t2].to_radians() / 2.0;
            let polar = match entry.polarization {
                Polarization::Up => half1 - half2,
                _ => half2 - half1,
            };
            let rotation = Complex64::from_polar(0.25, polar - entry.reference_phase);
            let row = n_tel + entry.window - 1;
            for j in 0..n_opl {
                let mut intensity = 0.0;
                for w in 0..n_wave {
                    intensity += (beams[[t1, w, j]] * 0.25 + beams[[t2, w, j]] * rotation).norm_sqr();
                }
                frame[[row, j]] = intensity;
            }
        }

        let dark_start = n_tel + self.config.n_win_sci;
        for row in dark_start..n_data {
            for j in 0..n_opl {
                frame[[row, j]] = self.normal(self.config.read_noise);
            }
        }

        for t in 0..n_tel {
            for j in 0..n_opl {
                frame[[t, j]] *= 1e-6;
            }
        }
        frame
    }
}

impl Acquisition for SimulatedInstrument {
    fn open(&mut self, _host: &str) -> RtdResult<()> {
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn scan_shape(&mut self) -> RtdResult<(usize, usize)> {
        Ok(self.shape())
    }

    fn receive_frame(
        &mut self,
        shape: (usize, usize),
        timeout: Duration,
    ) -> RtdResult<Array2<f64>> {
        if self.pending_failures > 0 {
            self.pending_failures -= 1;
            return Err(RtdError::Communication(format!(
                "no scan within {} ms",
                timeout.as_millis()
            )));
        }
        if shape != self.shape() {
            return Err(RtdError::Communication(format!(
                "requested {shape:?}, producing {:?}",
                self.shape()
            )));
        }
        let frame = self.generate_scan();
        self.mjd += self.config.n_opl as f64 / self.config.frame_rate / 86400.0;
        debug!(scan = self.scan_counter, "simulated scan");
        Ok(frame)
    }

    fn timestamp_mjd(&self) -> f64 {
        self.mjd
    }

    fn instrument_config_name(&mut self) -> RtdResult<String> {
        if self.pending_config_failures > 0 {
            self.pending_config_failures -= 1;
            return Err(RtdError::Communication(
                "instrument database not answering".to_string(),
            ));
        }
        Ok(self.config.instrument.clone())
    }

    fn find_mapping(&self, config_name: &str, window_count: usize) -> Option<Arc<MappingTable>> {
        self.registry.lookup(config_name, window_count)
    }

    fn delay_line_numbers(&mut self) -> RtdResult<Vec<u32>> {
        Ok(self.config.delay_lines.clone())
    }

    fn snr_min_setting(&mut self) -> Option<f64> {
        self.config.snr_min
    }

    fn tracking_enabled(&self) -> bool {
        self.flags.tracking()
    }

    fn send_offsets(
        &mut self,
        delay_lines: &[u32],
        offsets: &Array1<f64>,
        _timeout: Duration,
    ) -> RtdResult<()> {
        if self.failing_sends {
            return Err(RtdError::Communication(format!(
                "delay lines {delay_lines:?} not responding"
            )));
        }
        self.sent_offsets.push(offsets.clone());
        Ok(())
    }

    fn send_differential_phase(&mut self, phases: &Array1<f64>) -> RtdResult<()> {
        self.sent_phases.push(phases.clone());
        Ok(())
    }

    fn save_background_requested(&self) -> bool {
        self.flags.save_background()
    }

    fn clear_save_background(&mut self) {
        self.flags.clear_save_background();
    }

    fn subtract_background_requested(&self) -> bool {
        self.flags.subtract_background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument(config: SimulatorConfig) -> SimulatedInstrument {
        SimulatedInstrument::new(config, Arc::new(ControlFlags::default())).unwrap()
    }

    #[test]
    fn test_scan_layout() {
        let mut sim = instrument(SimulatorConfig::quiet());
        let shape = sim.scan_shape().unwrap();
        assert_eq!(shape, (54, 512));
        let frame = sim.receive_frame(shape, Duration::from_millis(10)).unwrap();
        // telescope 0 starts at +20 µm and moves toward -20 µm, in metres
        assert!((frame[[0, 0]] - 20e-6).abs() < 1e-12);
        assert!(frame[[0, 511]] < frame[[0, 0]]);
        // science windows carry positive intensity
        assert!(frame.row(4).iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_scan_direction_alternates() {
        let mut sim = instrument(SimulatorConfig::quiet());
        let shape = sim.scan_shape().unwrap();
        let first = sim.receive_frame(shape, Duration::ZERO).unwrap();
        let second = sim.receive_frame(shape, Duration::ZERO).unwrap();
        let slope1 = first[[0, 1]] - first[[0, 0]];
        let slope2 = second[[0, 1]] - second[[0, 0]];
        assert!(slope1 * slope2 < 0.0);
        assert!((second[[0, 0]] - first[[0, 511]]).abs() < 1e-12);
    }

    #[test]
    fn test_same_seed_same_scan() {
        let mut a = instrument(SimulatorConfig::default());
        let mut b = instrument(SimulatorConfig::default());
        let shape = a.scan_shape().unwrap();
        assert_eq!(
            a.receive_frame(shape, Duration::ZERO).unwrap(),
            b.receive_frame(shape, Duration::ZERO).unwrap()
        );
    }

    #[test]
    fn test_scripted_failures() {
        let mut sim = instrument(SimulatorConfig::quiet());
        sim.fail_next_receives(1);
        let shape = sim.scan_shape().unwrap();
        assert!(matches!(
            sim.receive_frame(shape, Duration::ZERO),
            Err(RtdError::Communication(_))
        ));
        assert!(sim.receive_frame(shape, Duration::ZERO).is_ok());
    }

    #[test]
    fn test_rejects_inconsistent_config() {
        let config = SimulatorConfig {
            speeds: vec![1.0; 3],
            ..Default::default()
        };
        assert!(SimulatedInstrument::new(config, Arc::new(ControlFlags::default())).is_err());
    }
}
