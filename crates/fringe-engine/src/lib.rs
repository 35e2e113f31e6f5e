// ─────────────────────────────────────────────────────────────────────
// Fringe RTD — Fringe Engine
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Stateful side of the fringe tracker.
//!
//! The pipeline gates every processing step on its dependency, recipes
//! bundle steps into operating modes, and the track loop drives them
//! against an acquisition backend.

pub mod acquisition;
pub mod engine;
pub mod flags;
pub mod logging;
pub mod recipe;
pub mod simulator;
mod steps;
pub mod tracker;
