// ─────────────────────────────────────────────────────────────────────
// Fringe RTD — Pipeline Engine
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Stateful reduction engine.
//!
//! One [`Pipeline`] per instrument connection. The cycle data lives behind a
//! `parking_lot::RwLock`; readers get it through a [`PipelineHandle`] and
//! intake takes the write side before clearing it, so a reader never sees a
//! half-cleared cycle.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use fringe_types::config::PipelineConfig;
use fringe_types::constants::{DARK_WINDOW_MODULUS, SECONDS_PER_DAY};
use fringe_types::error::{RtdError, RtdResult};
use fringe_types::state::{
    ConfigurationSnapshot, CycleState, PersistentState, ScanFrame,
};
use fringe_types::step::{Step, StepLedger};
use ndarray::{s, Array2};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

use crate::acquisition::Acquisition;
use crate::recipe::{Recipe, RecipeBook};
use crate::steps;

/// Everything the engine owns, guarded as one unit.
#[derive(Debug, Clone)]
pub struct EngineData {
    pub cycle: CycleState,
    pub persistent: PersistentState,
    pub config: ConfigurationSnapshot,
    pub ledger: StepLedger,
}

impl EngineData {
    pub fn new(settings: &PipelineConfig) -> Self {
        EngineData {
            cycle: CycleState::new(),
            persistent: PersistentState::default(),
            config: ConfigurationSnapshot::from_config(settings),
            ledger: StepLedger::new(),
        }
    }

    pub fn is_intake_valid(&self) -> bool {
        self.ledger.is_done(Step::Intake)
    }

    pub fn is_cycle_ready(&self, step: Step) -> bool {
        self.ledger.is_done(step)
    }

    fn reset_cycle(&mut self) {
        self.cycle.clear();
        self.ledger.reset();
    }
}

/// What intake does when a reader holds the data past the reset timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetPolicy {
    /// Fail with `RtdError::DataLocked`.
    #[default]
    Wait,
    /// Keep waiting without bound. Only for callers that know no reader is
    /// left, e.g. at shutdown.
    Force,
}

fn lock_for_reset(
    data: &RwLock<EngineData>,
    timeout: Duration,
    policy: ResetPolicy,
) -> RtdResult<RwLockWriteGuard<'_, EngineData>> {
    if let Some(guard) = data.try_write_for(timeout) {
        return Ok(guard);
    }
    match policy {
        ResetPolicy::Wait => Err(RtdError::DataLocked {
            timeout_ms: timeout.as_millis() as u64,
        }),
        ResetPolicy::Force => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "cycle data still locked, forcing reset"
            );
            Ok(data.write())
        }
    }
}

/// Cloneable read access for consumer threads.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    data: Arc<RwLock<EngineData>>,
    recipes: RecipeBook,
}

impl PipelineHandle {
    /// Scoped read of the whole engine state. Intake blocks until the guard
    /// is dropped.
    pub fn read(&self) -> RwLockReadGuard<'_, EngineData> {
        self.data.read()
    }

    /// Read with a bound on the wait.
    pub fn try_read_for(&self, timeout: Duration) -> Option<RwLockReadGuard<'_, EngineData>> {
        self.data.try_read_for(timeout)
    }

    /// Takes the read lock. A caller already holding a guard from `read()`
    /// asks the guard instead, since a queued intake would block this call.
    pub fn is_intake_valid(&self) -> bool {
        self.data.read().is_intake_valid()
    }

    /// Takes the read lock, see `is_intake_valid`.
    pub fn is_cycle_ready(&self, step: Step) -> bool {
        self.data.read().is_cycle_ready(step)
    }

    pub fn data_counter(&self) -> u64 {
        self.data.read().persistent.data_counter
    }

    pub fn recipes(&self) -> &RecipeBook {
        &self.recipes
    }

    pub fn enable_recipe(&self, name: &str) -> RtdResult<()> {
        self.recipes.enable(name.parse::<Recipe>()?);
        Ok(())
    }

    pub fn disable_recipe(&self, name: &str) -> RtdResult<()> {
        self.recipes.disable(name.parse::<Recipe>()?);
        Ok(())
    }
}

/// Reduction engine bound to one acquisition backend.
pub struct Pipeline<A: Acquisition> {
    acquisition: A,
    host: String,
    settings: PipelineConfig,
    data: Arc<RwLock<EngineData>>,
    recipes: RecipeBook,
}

impl<A: Acquisition> Pipeline<A> {
    pub fn new(acquisition: A, host: &str, settings: PipelineConfig) -> RtdResult<Self> {
        settings.validate()?;
        let data = EngineData::new(&settings);
        Ok(Pipeline {
            acquisition,
            host: host.to_string(),
            settings,
            data: Arc::new(RwLock::new(data)),
            recipes: RecipeBook::default(),
        })
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            data: Arc::clone(&self.data),
            recipes: self.recipes.clone(),
        }
    }

    pub fn settings(&self) -> &PipelineConfig {
        &self.settings
    }

    pub fn recipes(&self) -> &RecipeBook {
        &self.recipes
    }

    pub fn acquisition(&self) -> &A {
        &self.acquisition
    }

    pub fn acquisition_mut(&mut self) -> &mut A {
        &mut self.acquisition
    }

    pub fn open(&mut self) -> RtdResult<()> {
        self.acquisition.open(&self.host)?;
        info!(host = %self.host, "acquisition opened");
        Ok(())
    }

    fn receive(&mut self, n_tel: usize) -> RtdResult<Array2<f64>> {
        if !self.acquisition.is_open() {
            self.open()?;
        }
        let shape = self.acquisition.scan_shape()?;
        if shape.0 == 0 || shape.1 == 0 {
            return Err(RtdError::Communication(format!(
                "zero sized scan {shape:?}"
            )));
        }
        let raw = self
            .acquisition
            .receive_frame(shape, self.settings.receive_timeout())?;
        if raw.dim() != shape {
            return Err(RtdError::Communication(format!(
                "frame {:?} does not match announced shape {shape:?}",
                raw.dim()
            )));
        }
        if shape.0 < n_tel {
            return Err(RtdError::Communication(format!(
                "frame has {} channels, fewer than {n_tel} telescopes",
                shape.0
            )));
        }
        Ok(raw)
    }

    /// Acquire a new scan and replace the cycle with it.
    ///
    /// The frame is received before the lock is taken. On failure the cycle
    /// is still cleared and the error is returned.
    pub fn intake(&mut self, policy: ResetPolicy) -> RtdResult<()> {
        let (n_tel, previous_shape) = {
            let d = self.data.read();
            (d.config.n_tel, (d.config.n_win_sci + d.config.n_win_dark, d.config.n_opl))
        };
        let received = self.receive(n_tel);
        let mjd = self.acquisition.timestamp_mjd();

        let mut d = lock_for_reset(&self.data, self.settings.reset_lock_timeout(), policy)?;
        let previous_mjd = d.cycle.frame.get(&d.ledger).map(|f| f.mjd);
        d.reset_cycle();

        let raw = match received {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "scan intake failed");
                return Err(err);
            }
        };

        let (n_data, n_opl) = raw.dim();
        let n_win = n_data - n_tel;
        let n_dark = if n_win > DARK_WINDOW_MODULUS {
            n_win % DARK_WINDOW_MODULUS
        } else {
            0
        };
        let n_sci = n_win - n_dark;

        let opd = raw.slice(s![..n_tel, ..]).to_owned();
        let sci = raw.slice(s![n_tel..n_tel + n_sci, ..]).to_owned();
        let dark = (n_dark > 0).then(|| raw.slice(s![n_tel + n_sci.., ..]).to_owned());

        let shape_changed = previous_shape != (n_win, n_opl);
        if shape_changed {
            d.config.refresh_pending = true;
        }
        d.config.n_win_sci = n_sci;
        d.config.n_win_dark = n_dark;
        d.config.n_opl = n_opl;

        let elapsed_s = previous_mjd
            .map(|prev| (mjd - prev) * SECONDS_PER_DAY)
            .unwrap_or(0.0);

        d.cycle.frame.set(ScanFrame {
            opd,
            sci,
            dark,
            mjd,
            elapsed_s,
            shape_changed,
        });
        d.ledger.begin(Step::Intake);
        d.ledger.finish(Step::Intake);
        d.persistent.data_counter += 1;
        debug!(
            cycle = d.persistent.data_counter,
            windows = n_sci,
            dark_windows = n_dark,
            samples = n_opl,
            shape_changed,
            elapsed_s,
            "scan received"
        );
        Ok(())
    }

    /// Run one step of the current cycle.
    ///
    /// A step already done is a no-op. A step whose dependency has not run
    /// fails with `RtdError::Precondition`.
    pub fn run_step(&mut self, step: Step) -> RtdResult<()> {
        if step == Step::Intake {
            if self.data.read().ledger.is_done(Step::Intake) {
                return Ok(());
            }
            return self.intake(ResetPolicy::Wait);
        }

        let mut guard = self.data.write();
        let d = &mut *guard;
        if d.ledger.is_done(step) {
            return Ok(());
        }
        if let Some(requires) = step.requires() {
            if !d.ledger.is_done(requires) {
                return Err(RtdError::Precondition { step, requires });
            }
        }

        d.ledger.begin(step);
        match steps::execute(step, d, &mut self.acquisition, &self.settings) {
            Ok(()) => {
                d.ledger.finish(step);
                debug!(
                    step = %step,
                    elapsed_us = d.ledger.elapsed(step).map_or(0, |t| t.as_micros() as u64),
                    "step done"
                );
                Ok(())
            }
            Err(err) => {
                d.ledger.abort(step);
                Err(err)
            }
        }
    }

    /// Send the per-telescope pistons to the delay lines.
    ///
    /// Skipped when tracking is off. Transport failures are logged only.
    pub fn send_offsets(&mut self) -> RtdResult<()> {
        let (offsets, delay_lines) = {
            let mut guard = self.data.write();
            let d = &mut *guard;
            let solution = d
                .cycle
                .telescope
                .get(&d.ledger)
                .ok_or(RtdError::NotComputed(Step::PistonPerTelescope))?;
            let offsets = solution.position.clone();
            d.persistent.track_history.push(wall_clock_seconds());
            (offsets, d.config.delay_lines.clone())
        };

        if !self.acquisition.tracking_enabled() {
            return Ok(());
        }
        let started = Instant::now();
        match self
            .acquisition
            .send_offsets(&delay_lines, &offsets, self.settings.send_timeout())
        {
            Ok(()) => debug!(
                offsets = ?offsets.as_slice(),
                elapsed_us = started.elapsed().as_micros() as u64,
                "offsets sent"
            ),
            Err(err) if err.is_retryable() => {
                warn!(error = %err, offsets = ?offsets.as_slice(), "offset dispatch failed")
            }
            Err(err) => error!(error = %err, "offset dispatch rejected"),
        }
        Ok(())
    }

    /// Send the differential phases, only while every telescope tracks.
    pub fn send_differential_phase(&mut self) -> RtdResult<()> {
        let phases = {
            let d = self.data.read();
            if d.config.n_polar < 2 || d.config.mapping.is_none() {
                return Ok(());
            }
            let phases = d
                .cycle
                .differential_phase
                .get(&d.ledger)
                .ok_or(RtdError::NotComputed(Step::DifferentialPhase))?;
            let tracking = d
                .cycle
                .telescope
                .get(&d.ledger)
                .is_some_and(|t| t.all_tracking());
            if !tracking {
                return Ok(());
            }
            phases.clone()
        };
        if let Err(err) = self.acquisition.send_differential_phase(&phases) {
            warn!(error = %err, "differential phase dispatch failed");
        }
        Ok(())
    }
}

fn wall_clock_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_for_reset_times_out() {
        let data = RwLock::new(EngineData::new(&PipelineConfig::default()));
        let _reader = data.read();
        let result = lock_for_reset(&data, Duration::from_millis(20), ResetPolicy::Wait);
        assert!(matches!(result, Err(RtdError::DataLocked { timeout_ms: 20 })));
    }

    #[test]
    fn test_lock_for_reset_free_lock() {
        let data = RwLock::new(EngineData::new(&PipelineConfig::default()));
        assert!(lock_for_reset(&data, Duration::from_millis(20), ResetPolicy::Wait).is_ok());
    }

    #[test]
    fn test_guard_answers_readiness_while_writer_waits() {
        let data = Arc::new(RwLock::new(EngineData::new(&PipelineConfig::default())));
        data.write().ledger.begin(Step::Intake);
        data.write().ledger.finish(Step::Intake);

        let guard = data.read();
        let writer = {
            let data = Arc::clone(&data);
            std::thread::spawn(move || {
                lock_for_reset(&data, Duration::from_millis(200), ResetPolicy::Wait).is_ok()
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(guard.is_intake_valid());
        assert!(!guard.is_cycle_ready(Step::Prepare));
        drop(guard);
        assert!(writer.join().unwrap());
    }

    #[test]
    fn test_reset_cycle_keeps_persistent_state() {
        let mut data = EngineData::new(&PipelineConfig::default());
        data.persistent.data_counter = 7;
        data.ledger.begin(Step::Intake);
        data.ledger.finish(Step::Intake);
        data.reset_cycle();
        assert!(!data.ledger.is_done(Step::Intake));
        assert_eq!(data.ledger.executions(Step::Intake), 1);
        assert_eq!(data.persistent.data_counter, 7);
    }
}
