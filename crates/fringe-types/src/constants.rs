// ─────────────────────────────────────────────────────────────────────
// Fringe RTD — Constants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
/// The instrument reports opd in metres; the pipeline works in micrometres.
pub const METRES_TO_MICRONS: f64 = 1e6;

/// Seconds per day, for MJD differences.
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Science windows come in groups of 12; anything left over is a dark window.
/// NOTE: heuristic, see DESIGN.md.
pub const DARK_WINDOW_MODULUS: usize = 12;

/// Added to the out-of-band bin count before dividing.
pub const NOISE_BIN_EPS: f64 = 1e-10;

/// Floor applied to baseline weights in the telescope solve.
pub const SNR_WEIGHT_FLOOR: f64 = 1e-10;

/// Floor applied to the per-row maximum when normalising contrast.
pub const CONTRAST_FLOOR: f64 = 1e-9;

/// Magnitude above which a normalised sample belongs to the fringe envelope.
pub const ENVELOPE_THRESHOLD: f64 = 0.75;

/// Uniform weight given to every baseline in the differential-phase solve.
pub const EQUAL_BASELINE_WEIGHT: f64 = 100.0;

/// "wide" preset, as fractions of each baseline's max frequency.
pub const WIDE_FILTER_FRACTIONS: [f64; 2] = [0.05, 0.45];

/// Samples per fringe below which oversampling cannot be exploited.
pub const OVERSAMPLING_SAMPLES_PER_FRINGE: f64 = 3.5;

/// Depth of the offset-dispatch timestamp history.
pub const TRACK_HISTORY_DEPTH: usize = 10;
