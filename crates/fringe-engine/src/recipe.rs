// ─────────────────────────────────────────────────────────────────────
// Fringe RTD — Recipes
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Named operating modes.
//!
//! A recipe is a list of target steps plus an optional send action. Steps
//! shared between recipes run once per cycle thanks to the ledger.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use fringe_types::error::{RtdError, RtdResult};
use fringe_types::step::Step;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::acquisition::Acquisition;
use crate::engine::{Pipeline, ResetPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recipe {
    /// Fresh intake followed by preparation.
    GetData,
    /// Like `GetData`, but acquisition trouble asks for a retry.
    GetDataSafe,
    /// Telescope pistons, then offsets to the delay lines.
    Track,
    Filter,
    FilterPsd,
    Flux,
    /// Telescope pistons without sending anything.
    Snr,
    Raw,
    /// Differential phase across the Wollaston, sent when all telescopes track.
    Niobate,
}

impl Recipe {
    pub const ALL: [Recipe; 9] = [
        Recipe::GetData,
        Recipe::GetDataSafe,
        Recipe::Track,
        Recipe::Filter,
        Recipe::FilterPsd,
        Recipe::Flux,
        Recipe::Snr,
        Recipe::Raw,
        Recipe::Niobate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Recipe::GetData => "getdata",
            Recipe::GetDataSafe => "getdatasafe",
            Recipe::Track => "track",
            Recipe::Filter => "filter",
            Recipe::FilterPsd => "filterPsd",
            Recipe::Flux => "flux",
            Recipe::Snr => "snr",
            Recipe::Raw => "raw",
            Recipe::Niobate => "niobate",
        }
    }

    /// Steps the recipe asks for; their dependencies are implied.
    pub fn targets(self) -> &'static [Step] {
        match self {
            Recipe::GetData | Recipe::GetDataSafe => &[Step::Prepare],
            Recipe::Track | Recipe::Snr => &[Step::PistonPerTelescope],
            Recipe::Filter | Recipe::FilterPsd => &[Step::PistonPerTelescope, Step::FilterCombined],
            Recipe::Flux => &[Step::Flux],
            Recipe::Raw => &[Step::SpectralTransformRaw, Step::Flux],
            Recipe::Niobate => &[Step::DifferentialPhase],
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Recipe {
    type Err = RtdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Recipe::ALL
            .into_iter()
            .find(|r| r.name() == s)
            .ok_or_else(|| RtdError::UnknownRecipe(s.to_string()))
    }
}

/// Execution order for `targets`: every step after its dependency, each
/// step once. Intake is left to the caller.
pub fn plan(targets: &[Step]) -> Vec<Step> {
    let mut order = Vec::new();
    for &target in targets {
        let mut chain = target.ancestors();
        chain.reverse();
        chain.push(target);
        for step in chain {
            if step != Step::Intake && !order.contains(&step) {
                order.push(step);
            }
        }
    }
    order
}

/// Enabled recipes, shared between the loop and its controllers.
#[derive(Debug, Clone)]
pub struct RecipeBook {
    enabled: Arc<Mutex<[bool; 9]>>,
}

impl Default for RecipeBook {
    fn default() -> Self {
        let mut enabled = [false; 9];
        enabled[Recipe::Niobate.index()] = true;
        RecipeBook {
            enabled: Arc::new(Mutex::new(enabled)),
        }
    }
}

impl RecipeBook {
    pub fn enable(&self, recipe: Recipe) {
        self.enabled.lock()[recipe.index()] = true;
    }

    pub fn disable(&self, recipe: Recipe) {
        self.enabled.lock()[recipe.index()] = false;
    }

    pub fn is_enabled(&self, recipe: Recipe) -> bool {
        self.enabled.lock()[recipe.index()]
    }

    /// Enabled recipes in declaration order.
    pub fn enabled(&self) -> Vec<Recipe> {
        let flags = *self.enabled.lock();
        Recipe::ALL
            .into_iter()
            .filter(|r| flags[r.index()])
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeOutcome {
    Completed,
    /// No usable scan this time; the backoff has already been slept.
    Retry,
}

impl<A: Acquisition> Pipeline<A> {
    pub fn run_recipe(&mut self, recipe: Recipe) -> RtdResult<RecipeOutcome> {
        debug!(recipe = %recipe, "running recipe");
        match recipe {
            Recipe::GetData => {
                self.intake(ResetPolicy::Wait)?;
                self.run_step(Step::Prepare)?;
            }
            Recipe::GetDataSafe => return Ok(self.get_data_safe()),
            _ => {
                for step in plan(recipe.targets()) {
                    self.run_step(step)?;
                }
                match recipe {
                    Recipe::Track => self.send_offsets()?,
                    Recipe::Niobate => self.send_differential_phase()?,
                    _ => {}
                }
            }
        }
        Ok(RecipeOutcome::Completed)
    }

    pub fn run_recipe_named(&mut self, name: &str) -> RtdResult<RecipeOutcome> {
        self.run_recipe(name.parse()?)
    }

    fn get_data_safe(&mut self) -> RecipeOutcome {
        let backoff = self.settings().retry_backoff();
        if let Err(err) = self.intake(ResetPolicy::Wait) {
            warn!(error = %err, backoff_ms = backoff.as_millis() as u64, "waiting for scan");
            std::thread::sleep(backoff);
            return RecipeOutcome::Retry;
        }
        if let Err(err) = self.run_step(Step::Prepare) {
            warn!(error = %err, backoff_ms = backoff.as_millis() as u64, "scan not usable, retrying");
            std::thread::sleep(backoff);
            return RecipeOutcome::Retry;
        }
        RecipeOutcome::Completed
    }

    /// Run every enabled recipe in order, stopping at the first retry.
    pub fn run_enabled_recipes(&mut self) -> RtdResult<RecipeOutcome> {
        for recipe in self.recipes().enabled() {
            if self.run_recipe(recipe)? == RecipeOutcome::Retry {
                return Ok(RecipeOutcome::Retry);
            }
        }
        Ok(RecipeOutcome::Completed)
    }
}
