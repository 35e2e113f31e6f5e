// ─────────────────────────────────────────────────────────────────────
// Fringe RTD — Mapping
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Detector window to telescope-pair mapping.
//!
//! A mapping table says, for every science window of the combiner, which
//! telescope pair it samples, which baseline it belongs to, its polarization
//! channel and the reference phase of that output (ABCD-like coding).

use std::collections::{BTreeMap, HashMap};
use std::f64::consts::PI;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{RtdError, RtdResult};

/// Name of the 4-telescope ABCD-H integrated-optics combiner.
pub const ABCD_H: &str = "4T-ABCD-H";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Polarization {
    Natural,
    Up,
    Down,
}

/// One detector window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Window number, starting from 1.
    pub window: usize,
    /// First telescope, starting from 1.
    pub tel1: usize,
    /// Second telescope, starting from 1.
    pub tel2: usize,
    /// Baseline number, starting from 1.
    pub baseline: usize,
    pub polarization: Polarization,
    /// Reference phase of this output [rad].
    pub reference_phase: f64,
    pub visibility: f64,
}

impl MappingEntry {
    pub fn new(
        window: usize,
        tel1: usize,
        tel2: usize,
        baseline: usize,
        polarization: Polarization,
        reference_phase: f64,
    ) -> Self {
        MappingEntry {
            window,
            tel1,
            tel2,
            baseline,
            polarization,
            reference_phase,
            visibility: 1.0,
        }
    }
}

/// Immutable, validated sequence of [`MappingEntry`].
///
/// Invariants checked at construction:
/// - all numbers are >= 1 and every window joins two distinct telescopes
/// - baseline numbers are contiguous starting at 1
/// - every baseline always joins the same telescope pair
/// - polarized tables map baselines 1..B to `Down` and B+1..2B to `Up`,
///   with matching telescope pairs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingTable {
    entries: Vec<MappingEntry>,
}

impl MappingTable {
    pub fn new(entries: Vec<MappingEntry>) -> RtdResult<Self> {
        if entries.is_empty() {
            return Err(RtdError::Configuration("mapping table is empty".to_string()));
        }

        let mut pairs: BTreeMap<usize, (usize, usize, Polarization)> = BTreeMap::new();
        for e in &entries {
            if e.window == 0 || e.tel1 == 0 || e.tel2 == 0 || e.baseline == 0 {
                return Err(RtdError::Configuration(format!(
                    "window {}: numbering must start at 1",
                    e.window
                )));
            }
            if e.tel1 == e.tel2 {
                return Err(RtdError::Configuration(format!(
                    "window {} joins telescope {} with itself",
                    e.window, e.tel1
                )));
            }
            if !e.reference_phase.is_finite() || !e.visibility.is_finite() {
                return Err(RtdError::Configuration(format!(
                    "window {} has a non-finite phase or visibility",
                    e.window
                )));
            }
            let key = (e.tel1, e.tel2, e.polarization);
            if *pairs.entry(e.baseline).or_insert(key) != key {
                return Err(RtdError::Configuration(format!(
                    "baseline {} is mapped to more than one telescope pair or polarization",
                    e.baseline
                )));
            }
        }

        let n_base = pairs.len();
        if pairs.keys().copied().ne(1..=n_base) {
            return Err(RtdError::Configuration(
                "baseline numbers must be contiguous starting at 1".to_string(),
            ));
        }

        let polarized = pairs.values().any(|&(_, _, p)| p != Polarization::Natural);
        if polarized {
            if n_base % 2 != 0 {
                return Err(RtdError::Configuration(
                    "polarized mapping needs an even number of baselines".to_string(),
                ));
            }
            let half = n_base / 2;
            for b in 1..=half {
                let (d1, d2, dp) = pairs[&b];
                let (u1, u2, up) = pairs[&(b + half)];
                if dp != Polarization::Down || up != Polarization::Up || (d1, d2) != (u1, u2) {
                    return Err(RtdError::Configuration(format!(
                        "baselines {} and {} must be the Down/Up channels of one pair",
                        b,
                        b + half
                    )));
                }
            }
        }

        Ok(MappingTable { entries })
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    /// Number of windows described by the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest baseline number, which is also the baseline count.
    pub fn n_baselines(&self) -> usize {
        self.entries.iter().map(|e| e.baseline).max().unwrap_or(0)
    }

    pub fn n_telescopes(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.tel1.max(e.tel2))
            .max()
            .unwrap_or(0)
    }

    /// Number of distinct polarization channels.
    pub fn n_polarizations(&self) -> usize {
        let mut seen: Vec<Polarization> = self.entries.iter().map(|e| e.polarization).collect();
        seen.sort();
        seen.dedup();
        seen.len()
    }

    pub fn is_polarized(&self) -> bool {
        self.n_polarizations() >= 2
    }

    /// Row indices of the windows belonging to `baseline`, in table order.
    pub fn windows_of(&self, baseline: usize) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.baseline == baseline)
            .map(|(i, _)| i)
            .collect()
    }

    /// One representative entry per baseline, sorted by ascending baseline.
    pub fn reduce_to_unique_baselines(&self) -> MappingTable {
        let mut first: BTreeMap<usize, &MappingEntry> = BTreeMap::new();
        for e in &self.entries {
            first.entry(e.baseline).or_insert(e);
        }
        MappingTable {
            entries: first.into_values().cloned().collect(),
        }
    }

    /// Duplicate a natural-polarization table behind a Wollaston prism.
    ///
    /// The original windows become the `Down` channel, the copies the `Up`
    /// channel with windows and baselines shifted past the originals.
    pub fn with_wollaston(&self) -> RtdResult<MappingTable> {
        if self.entries.iter().any(|e| e.polarization != Polarization::Natural) {
            return Err(RtdError::Configuration(
                "mapping is already polarized".to_string(),
            ));
        }
        let n_win = self.entries.iter().map(|e| e.window).max().unwrap_or(0);
        let n_base = self.n_baselines();

        let down = self.entries.iter().map(|e| MappingEntry {
            polarization: Polarization::Down,
            ..e.clone()
        });
        let up = self.entries.iter().map(|e| MappingEntry {
            window: e.window + n_win,
            baseline: e.baseline + n_base,
            polarization: Polarization::Up,
            ..e.clone()
        });
        MappingTable::new(down.chain(up).collect())
    }
}

impl<'de> Deserialize<'de> for MappingTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            entries: Vec<MappingEntry>,
        }
        let raw = Raw::deserialize(deserializer)?;
        MappingTable::new(raw.entries).map_err(serde::de::Error::custom)
    }
}

/// The ABCD-H combiner: 24 windows, 6 baselines, 4 telescopes.
pub fn abcd_h() -> MappingTable {
    use Polarization::Natural as N;
    // (window, tel1, tel2, baseline, phase / pi)
    const ROWS: [(usize, usize, usize, usize, f64); 24] = [
        (1, 1, 2, 1, 0.0),
        (2, 1, 2, 1, 1.0),
        (3, 1, 2, 1, 1.6),
        (4, 1, 2, 1, 0.6),
        (5, 2, 3, 2, 0.0),
        (6, 2, 3, 2, 1.0),
        (7, 1, 3, 3, 0.0),
        (8, 1, 3, 3, 1.0),
        (9, 1, 3, 3, 1.6),
        (10, 1, 3, 3, 0.6),
        (11, 1, 4, 4, 0.0),
        (12, 1, 4, 4, 1.0),
        (13, 1, 4, 4, 1.83),
        (14, 1, 4, 4, 0.83),
        (15, 2, 4, 5, 0.0),
        (16, 2, 4, 5, 1.0),
        (17, 2, 4, 5, 1.6),
        (18, 2, 4, 5, 0.6),
        (19, 2, 3, 2, 1.6),
        (20, 2, 3, 2, 0.6),
        (21, 3, 4, 6, 0.0),
        (22, 3, 4, 6, 1.0),
        (23, 3, 4, 6, 1.6),
        (24, 3, 4, 6, 0.6),
    ];
    let entries = ROWS
        .iter()
        .map(|&(w, t1, t2, b, phi)| MappingEntry::new(w, t1, t2, b, N, phi * PI))
        .collect();
    MappingTable { entries }
}

/// Lookup of mapping tables by (instrument configuration name, window count).
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    tables: HashMap<(String, usize), Arc<MappingTable>>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the ABCD-H combiner with and without Wollaston.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let natural = abcd_h();
        if let Ok(polarized) = natural.with_wollaston() {
            registry.insert(ABCD_H, polarized);
        }
        registry.insert(ABCD_H, natural);
        registry
    }

    /// Register `table` under its own window count.
    pub fn insert(&mut self, config_name: &str, table: MappingTable) {
        self.tables
            .insert((config_name.to_string(), table.len()), Arc::new(table));
    }

    pub fn lookup(&self, config_name: &str, window_count: usize) -> Option<Arc<MappingTable>> {
        self.tables
            .get(&(config_name.to_string(), window_count))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abcd_h_is_valid() {
        let table = MappingTable::new(abcd_h().entries().to_vec()).unwrap();
        assert_eq!(table.len(), 24);
        assert_eq!(table.n_baselines(), 6);
        assert_eq!(table.n_telescopes(), 4);
        assert_eq!(table.n_polarizations(), 1);
        assert!(!table.is_polarized());
    }

    #[test]
    fn test_baseline_2_windows_are_split() {
        // Baseline 2 uses windows 5, 6, 19 and 20.
        let table = abcd_h();
        assert_eq!(table.windows_of(2), vec![4, 5, 18, 19]);
    }

    #[test]
    fn test_reduce_keeps_first_entry_sorted() {
        let reduced = abcd_h().reduce_to_unique_baselines();
        let bases: Vec<usize> = reduced.entries().iter().map(|e| e.baseline).collect();
        assert_eq!(bases, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(reduced.entries()[1].window, 5);
        assert_eq!((reduced.entries()[5].tel1, reduced.entries()[5].tel2), (3, 4));
    }

    #[test]
    fn test_wollaston_layout() {
        let pol = abcd_h().with_wollaston().unwrap();
        assert_eq!(pol.len(), 48);
        assert_eq!(pol.n_baselines(), 12);
        assert_eq!(pol.n_polarizations(), 2);
        let reduced = pol.reduce_to_unique_baselines();
        for e in &reduced.entries()[..6] {
            assert_eq!(e.polarization, Polarization::Down);
        }
        for (down, up) in reduced.entries()[..6].iter().zip(&reduced.entries()[6..]) {
            assert_eq!(up.polarization, Polarization::Up);
            assert_eq!((down.tel1, down.tel2), (up.tel1, up.tel2));
            assert_eq!(up.baseline, down.baseline + 6);
        }
        assert!(pol.with_wollaston().is_err());
    }

    #[test]
    fn test_rejects_gap_in_baselines() {
        let entries = vec![
            MappingEntry::new(1, 1, 2, 1, Polarization::Natural, 0.0),
            MappingEntry::new(2, 1, 3, 3, Polarization::Natural, 0.0),
        ];
        assert!(MappingTable::new(entries).is_err());
    }

    #[test]
    fn test_rejects_inconsistent_pair() {
        let entries = vec![
            MappingEntry::new(1, 1, 2, 1, Polarization::Natural, 0.0),
            MappingEntry::new(2, 1, 3, 1, Polarization::Natural, 0.0),
        ];
        assert!(MappingTable::new(entries).is_err());
    }

    #[test]
    fn test_rejects_mismatched_polar_halves() {
        let entries = vec![
            MappingEntry::new(1, 1, 2, 1, Polarization::Down, 0.0),
            MappingEntry::new(2, 1, 3, 2, Polarization::Up, 0.0),
        ];
        assert!(MappingTable::new(entries).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = MappingRegistry::builtin();
        assert_eq!(registry.lookup(ABCD_H, 24).unwrap().len(), 24);
        assert!(registry.lookup(ABCD_H, 48).unwrap().is_polarized());
        assert!(registry.lookup(ABCD_H, 12).is_none());
        assert!(registry.lookup("2T-AC", 24).is_none());
    }

    #[test]
    fn test_json_roundtrip_validates() {
        let json = serde_json::to_string(&abcd_h()).unwrap();
        let back: MappingTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, abcd_h());

        let bad = r#"{"entries":[{"window":1,"tel1":1,"tel2":1,"baseline":1,
            "polarization":"Natural","reference_phase":0.0,"visibility":1.0}]}"#;
        assert!(serde_json::from_str::<MappingTable>(bad).is_err());
    }
}
