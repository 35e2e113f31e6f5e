// ─────────────────────────────────────────────────────────────────────
// Fringe RTD — Track Loop
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Periodic intake and processing on a dedicated thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fringe_types::error::RtdResult;
use tracing::{debug, info, warn};

use crate::acquisition::Acquisition;
use crate::engine::{Pipeline, PipelineHandle};
use crate::flags::ControlFlags;
use crate::recipe::{Recipe, RecipeOutcome};

/// Counters of one loop run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackStats {
    pub iterations: u64,
    pub completed: u64,
    pub retries: u64,
    pub failures: u64,
}

/// Run the track loop on the calling thread.
///
/// Each iteration acquires a scan with `getdatasafe` and then runs the
/// enabled recipes. `track` is always enabled. Stops when the flags say so
/// or after `max_iterations`.
pub fn run_track_loop<A: Acquisition>(
    pipeline: &mut Pipeline<A>,
    flags: &ControlFlags,
    max_iterations: Option<u64>,
) -> TrackStats {
    pipeline.recipes().enable(Recipe::Track);
    let mut stats = TrackStats::default();
    info!(recipes = ?pipeline.recipes().enabled(), "track loop started");

    while flags.keep_running() && max_iterations.map_or(true, |max| stats.iterations < max) {
        stats.iterations += 1;
        match pipeline.run_recipe(Recipe::GetDataSafe) {
            Ok(RecipeOutcome::Completed) => {}
            Ok(RecipeOutcome::Retry) => {
                stats.retries += 1;
                continue;
            }
            Err(err) => {
                stats.failures += 1;
                warn!(error = %err, "scan acquisition failed");
                continue;
            }
        }
        match pipeline.run_enabled_recipes() {
            Ok(RecipeOutcome::Completed) => stats.completed += 1,
            Ok(RecipeOutcome::Retry) => stats.retries += 1,
            Err(err) => {
                stats.failures += 1;
                warn!(error = %err, "recipe failed");
            }
        }
        debug!(iteration = stats.iterations, "track iteration done");
    }

    info!(
        iterations = stats.iterations,
        completed = stats.completed,
        retries = stats.retries,
        failures = stats.failures,
        "track loop stopped"
    );
    stats
}

/// Track loop owning its pipeline on a named thread.
pub struct TrackLoop<A: Acquisition + 'static> {
    thread: JoinHandle<(Pipeline<A>, TrackStats)>,
    handle: PipelineHandle,
    flags: Arc<ControlFlags>,
}

impl<A: Acquisition + 'static> TrackLoop<A> {
    pub fn spawn(
        mut pipeline: Pipeline<A>,
        flags: Arc<ControlFlags>,
        max_iterations: Option<u64>,
    ) -> RtdResult<Self> {
        let handle = pipeline.handle();
        let loop_flags = Arc::clone(&flags);
        let thread = thread::Builder::new()
            .name("track".to_string())
            .spawn(move || {
                let stats = run_track_loop(&mut pipeline, &loop_flags, max_iterations);
                (pipeline, stats)
            })?;
        Ok(TrackLoop {
            thread,
            handle,
            flags,
        })
    }

    /// Read access to the pipeline while the loop runs.
    pub fn handle(&self) -> &PipelineHandle {
        &self.handle
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn request_stop(&self) {
        self.flags.request_quit();
    }

    /// Wait for the loop and get the pipeline back.
    pub fn join(self) -> thread::Result<(Pipeline<A>, TrackStats)> {
        self.thread.join()
    }
}
