// ─────────────────────────────────────────────────────────────────────
// Fringe RTD — Steps
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Processing steps, their dependency table and the per-cycle ledger.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Step {
    Intake,
    Prepare,
    Combine,
    SpectralTransform,
    PistonPerBaseline,
    PistonPerTelescope,
    FilterCombined,
    PrepareRaw,
    SpectralTransformRaw,
    Flux,
    NormalizeCombined,
    DifferentialPhase,
}

impl Step {
    pub const ALL: [Step; 12] = [
        Step::Intake,
        Step::Prepare,
        Step::Combine,
        Step::SpectralTransform,
        Step::PistonPerBaseline,
        Step::PistonPerTelescope,
        Step::FilterCombined,
        Step::PrepareRaw,
        Step::SpectralTransformRaw,
        Step::Flux,
        Step::NormalizeCombined,
        Step::DifferentialPhase,
    ];

    /// Direct dependency. Only intake has none.
    pub fn requires(self) -> Option<Step> {
        match self {
            Step::Intake => None,
            Step::Prepare => Some(Step::Intake),
            Step::Combine => Some(Step::Prepare),
            Step::SpectralTransform => Some(Step::Combine),
            Step::PistonPerBaseline => Some(Step::SpectralTransform),
            Step::PistonPerTelescope => Some(Step::PistonPerBaseline),
            Step::FilterCombined => Some(Step::SpectralTransform),
            Step::PrepareRaw => Some(Step::Prepare),
            Step::SpectralTransformRaw => Some(Step::PrepareRaw),
            Step::Flux => Some(Step::PrepareRaw),
            Step::NormalizeCombined => Some(Step::FilterCombined),
            Step::DifferentialPhase => Some(Step::NormalizeCombined),
        }
    }

    /// All transitive dependencies, nearest first.
    pub fn ancestors(self) -> Vec<Step> {
        let mut out = Vec::new();
        let mut cur = self.requires();
        while let Some(step) = cur {
            out.push(step);
            cur = step.requires();
        }
        out
    }

    pub fn name(self) -> &'static str {
        match self {
            Step::Intake => "intake",
            Step::Prepare => "prepare",
            Step::Combine => "combine",
            Step::SpectralTransform => "spectralTransform",
            Step::PistonPerBaseline => "pistonPerBaseline",
            Step::PistonPerTelescope => "pistonPerTelescope",
            Step::FilterCombined => "filterCombined",
            Step::PrepareRaw => "prepareRaw",
            Step::SpectralTransformRaw => "spectralTransformRaw",
            Step::Flux => "flux",
            Step::NormalizeCombined => "normalizeCombined",
            Step::DifferentialPhase => "differentialPhase",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepStatus {
    #[default]
    NotRun,
    Running,
    Done,
}

/// Completion ledger for the current cycle.
///
/// Status and timings are wiped by [`StepLedger::reset`] when intake replaces
/// the cycle; execution counters are cumulative over the engine lifetime.
#[derive(Debug, Clone, Default)]
pub struct StepLedger {
    status: [StepStatus; 12],
    started: [Option<Instant>; 12],
    elapsed: [Option<Duration>; 12],
    executions: [u64; 12],
}

impl StepLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, step: Step) -> StepStatus {
        self.status[step.index()]
    }

    pub fn is_done(&self, step: Step) -> bool {
        self.status(step) == StepStatus::Done
    }

    pub fn begin(&mut self, step: Step) {
        let i = step.index();
        self.status[i] = StepStatus::Running;
        self.started[i] = Some(Instant::now());
        self.elapsed[i] = None;
    }

    pub fn finish(&mut self, step: Step) {
        let i = step.index();
        self.status[i] = StepStatus::Done;
        self.elapsed[i] = self.started[i].take().map(|t| t.elapsed());
        self.executions[i] += 1;
    }

    /// Roll a failed step back so that it can be attempted again.
    pub fn abort(&mut self, step: Step) {
        let i = step.index();
        self.status[i] = StepStatus::NotRun;
        self.started[i] = None;
    }

    pub fn reset(&mut self) {
        self.status = [StepStatus::NotRun; 12];
        self.started = [None; 12];
        self.elapsed = [None; 12];
    }

    /// Wall-clock duration of the last completed run in this cycle.
    pub fn elapsed(&self, step: Step) -> Option<Duration> {
        self.elapsed[step.index()]
    }

    /// Number of completed runs since the ledger was created.
    pub fn executions(&self, step: Step) -> u64 {
        self.executions[step.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_step_reaches_intake() {
        for step in Step::ALL {
            if step == Step::Intake {
                assert!(step.ancestors().is_empty());
            } else {
                assert_eq!(step.ancestors().last(), Some(&Step::Intake), "{step}");
            }
        }
    }

    #[test]
    fn test_index_matches_all_order() {
        for (i, step) in Step::ALL.iter().enumerate() {
            assert_eq!(step.index(), i);
        }
    }

    #[test]
    fn test_differential_phase_chain() {
        assert_eq!(
            Step::DifferentialPhase.ancestors(),
            vec![
                Step::NormalizeCombined,
                Step::FilterCombined,
                Step::SpectralTransform,
                Step::Combine,
                Step::Prepare,
                Step::Intake
            ]
        );
    }

    #[test]
    fn test_ledger_lifecycle() {
        let mut ledger = StepLedger::new();
        assert_eq!(ledger.status(Step::Combine), StepStatus::NotRun);
        ledger.begin(Step::Combine);
        assert_eq!(ledger.status(Step::Combine), StepStatus::Running);
        assert!(!ledger.is_done(Step::Combine));
        ledger.finish(Step::Combine);
        assert!(ledger.is_done(Step::Combine));
        assert!(ledger.elapsed(Step::Combine).is_some());

        ledger.reset();
        assert_eq!(ledger.status(Step::Combine), StepStatus::NotRun);
        assert!(ledger.elapsed(Step::Combine).is_none());
        assert_eq!(ledger.executions(Step::Combine), 1);
    }

    #[test]
    fn test_abort_rolls_back() {
        let mut ledger = StepLedger::new();
        ledger.begin(Step::Flux);
        ledger.abort(Step::Flux);
        assert_eq!(ledger.status(Step::Flux), StepStatus::NotRun);
        assert_eq!(ledger.executions(Step::Flux), 0);
    }
}
