// ─────────────────────────────────────────────────────────────────────
// Fringe RTD — Property-Based Tests (proptest) for fringe-math
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for fringe-math using proptest.
//!
//! Covers: unitary FFT, filter scaling, baseline combination, telescope
//! solve.

use fringe_math::combine::combine_baselines;
use fringe_math::fft::{transform_rows, Direction};
use fringe_math::filter::scale_filter;
use fringe_math::opl::{compute_opl_matrix, BaselineSystem};
use fringe_types::mapping::{abcd_h, MappingTable};
use fringe_types::state::TelescopeSolution;
use ndarray::{s, Array1, Array2};
use num_complex::Complex64;
use proptest::prelude::*;

fn incidence(mapping: &MappingTable) -> Array2<f64> {
    let reduced = mapping.reduce_to_unique_baselines();
    let mut m = Array2::zeros((reduced.n_telescopes(), reduced.n_baselines()));
    for (i, e) in reduced.entries().iter().enumerate() {
        m[[e.tel1 - 1, i]] = 1.0;
        m[[e.tel2 - 1, i]] = -1.0;
    }
    m
}

// ── FFT Properties ───────────────────────────────────────────────────

proptest! {
    /// Forward then inverse reproduces the input for any length.
    #[test]
    fn fft_roundtrip(rows in 1usize..5, n in 1usize..64, seed in 0.0f64..10.0) {
        let input = Array2::from_shape_fn((rows, n), |(i, j)| {
            Complex64::new((seed + (i * n + j) as f64).sin(), (seed * j as f64).cos())
        });
        let back = transform_rows(&transform_rows(&input, Direction::Forward), Direction::Inverse);
        for (a, b) in input.iter().zip(back.iter()) {
            prop_assert!((a - b).norm() < 1e-9);
        }
    }
}

// ── Filter Scaling Properties ────────────────────────────────────────

proptest! {
    /// Scaled edges stay ordered and inside [0, max|f|].
    #[test]
    fn scale_filter_within_bounds(
        tops in prop::collection::vec(0.5f64..20.0, 1..8),
        lo in 0.0f64..3.0,
        width in 0.0f64..3.0,
        turbulence in 0.0f64..=1.0,
    ) {
        let n = 32;
        let freq = Array2::from_shape_fn((tops.len(), n), |(b, j)| tops[b] * j as f64 / (n - 1) as f64);
        let max_f = tops.iter().cloned().fold(0.0, f64::max);
        let bounds = scale_filter(&freq, [lo, lo + width], turbulence);
        for row in bounds.rows() {
            prop_assert!(row[0] >= 0.0 && row[1] <= max_f + 1e-12);
            prop_assert!(row[0] <= row[1], "{} > {}", row[0], row[1]);
        }
    }
}

// ── Combination Properties ───────────────────────────────────────────

proptest! {
    /// Scanning the same fringes backwards gives the same combined rows.
    #[test]
    fn combine_direction_invariant(
        speeds in prop::collection::vec(0.1f64..2.0, 4),
        n in 3usize..40,
        seed in 0.0f64..5.0,
    ) {
        let map = abcd_h();
        let opd = Array2::from_shape_fn((4, n), |(t, j)| speeds[t] * (t as f64 + 1.0) * j as f64);
        let sci = Array2::from_shape_fn((map.len(), n), |(w, j)| (seed + w as f64 * 0.7 + j as f64).cos());
        let forward = combine_baselines(&sci, &opd, Some(&map)).unwrap();

        let opd_rev = opd.slice(s![.., ..;-1]).to_owned();
        let sci_rev = sci.slice(s![.., ..;-1]).to_owned();
        let backward = combine_baselines(&sci_rev, &opd_rev, Some(&map)).unwrap();

        // skip baselines with a flat start, direction is ambiguous there
        for b in 0..map.n_baselines() {
            let d0 = forward.opd[[b, 1]] - forward.opd[[b, 0]];
            if d0.abs() < 1e-9 { continue; }
            for k in 0..n {
                prop_assert!((forward.signal[[b, k]] - backward.signal[[b, k]]).norm() < 1e-9);
                prop_assert!((forward.opd[[b, k]] - backward.opd[[b, k]]).abs() < 1e-9);
            }
            prop_assert!(forward.opd[[b, n - 1]] >= forward.opd[[b, 0]]);
        }
    }
}

// ── Telescope Solve Properties ───────────────────────────────────────

proptest! {
    /// Consistent baseline pistons are recovered relative to the pivot.
    #[test]
    fn solve_recovers_for_every_pivot(
        truth in prop::collection::vec(-5.0f64..5.0, 4),
        snr in prop::collection::vec(5.0f64..50.0, 6),
    ) {
        let map = abcd_h();
        let truth = Array1::from(truth);
        let b = incidence(&map).t().dot(&truth);
        let system = BaselineSystem::new(&b, &Array1::from(snr), &map, 2.0, false).unwrap();
        for pivot in 0..4 {
            let sol = system.solve_with_pivot(pivot).unwrap();
            prop_assert_eq!(sol.n_tracked(), 4);
            for t in 0..4 {
                prop_assert!((sol.position[t] - (truth[t] - truth[pivot])).abs() < 1e-6);
            }
        }
    }

    /// Uniform SNR keeps the first telescope as reference.
    #[test]
    fn uniform_snr_references_first_telescope(
        truth in prop::collection::vec(-5.0f64..5.0, 4),
        level in 5.0f64..100.0,
    ) {
        let map = abcd_h();
        let truth = Array1::from(truth);
        let b = incidence(&map).t().dot(&truth);
        let sol = compute_opl_matrix(&b, &Array1::from_elem(6, level), &map, 2.0, false).unwrap();
        prop_assert_eq!(&sol.tracking, &vec![true; 4]);
        for t in 0..4 {
            prop_assert!((sol.position[t] - (truth[t] - truth[0])).abs() < 1e-6);
        }
    }

    /// At most one baseline above threshold never yields a solution.
    #[test]
    fn too_few_baselines_is_invalid(
        pos in prop::collection::vec(-5.0f64..5.0, 6),
        strong in 0usize..7,
        level in 2.5f64..100.0,
    ) {
        let map = abcd_h();
        let snr = Array1::from_iter((0..6).map(|i| if i == strong { level } else { 1.0 }));
        let sol = compute_opl_matrix(&Array1::from(pos), &snr, &map, 2.0, false).unwrap();
        prop_assert_eq!(sol, TelescopeSolution::invalid(4, 6));
    }
}
