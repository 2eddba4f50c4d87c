/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Redistribution properties: every ordered scheme-pair conversion is
//! value-preserving, round trips are bit-exact, and shape mismatches are
//! detected from metadata on every process.

mod common;

use common::{on_grid, pseudo, seeded, GRID_SHAPES};
use gridla::{copy_into, transpose_into, DistMatrix, DistPair, Error};

/// Copy `src` into a fresh matrix under `pair` with the given alignments.
fn redistributed(src: &DistMatrix, pair: DistPair, aligns: (usize, usize)) -> DistMatrix {
    let grid = src.grid().clone();
    let mut dst = DistMatrix::new(grid.clone(), pair).unwrap();
    let row_stride = pair.row.stride(&grid);
    let col_stride = pair.col.stride(&grid);
    dst.set_aligns(aligns.0 % row_stride, aligns.1 % col_stride)
        .unwrap();
    dst.resize(src.height(), src.width()).unwrap();
    copy_into(&src.as_view(), &mut dst.as_view_mut()).unwrap();
    dst
}

#[test]
fn every_pair_preserves_values() {
    for (height, width) in GRID_SHAPES {
        let failures = on_grid(height, width, |grid| {
            let a = seeded(&grid, 11, 9, 7);
            let mut bad = 0usize;
            for pair in DistPair::all() {
                let b = redistributed(&a, pair, (0, 0));
                let gathered = b.to_replicated().unwrap();
                for j in 0..7 {
                    for i in 0..9 {
                        if gathered[(i, j)] != pseudo(11, i, j) {
                            bad += 1;
                        }
                    }
                }
            }
            bad
        });
        assert!(
            failures.iter().all(|&bad| bad == 0),
            "value corruption on a {height}x{width} grid: {failures:?}"
        );
    }
}

#[test]
fn round_trips_are_bit_exact() {
    // A -> S -> T -> S must reproduce the S-form bit for bit, for every
    // ordered pair of schemes.
    for (height, width) in GRID_SHAPES {
        let failures = on_grid(height, width, |grid| {
            let a = seeded(&grid, 23, 8, 10);
            let mut bad = Vec::new();
            for s in DistPair::all() {
                let in_s = redistributed(&a, s, (0, 0));
                for t in DistPair::all() {
                    let in_t = redistributed(&in_s, t, (0, 0));
                    let back = redistributed(&in_t, s, (0, 0));
                    if back.local().as_slice() != in_s.local().as_slice() {
                        bad.push((s, t));
                    }
                }
            }
            bad
        });
        for bad in failures {
            assert!(
                bad.is_empty(),
                "round trip not bit-exact on {height}x{width} for pairs {bad:?}"
            );
        }
    }
}

#[test]
fn alignments_round_trip() {
    let failures = on_grid(2, 3, |grid| {
        let a = seeded(&grid, 5, 7, 7);
        let mut bad = 0usize;
        for pair in DistPair::all() {
            for aligns in [(1, 2), (1, 0), (0, 2)] {
                let shifted = redistributed(&a, pair, aligns);
                let back = redistributed(&shifted, DistPair::STANDARD, (0, 0));
                if back.local().as_slice() != a.local().as_slice() {
                    bad += 1;
                }
            }
        }
        bad
    });
    assert!(failures.iter().all(|&bad| bad == 0), "{failures:?}");
}

#[test]
fn transpose_moves_every_entry() {
    for (height, width) in GRID_SHAPES {
        let ok = on_grid(height, width, |grid| {
            let a = seeded(&grid, 31, 6, 11);
            let mut at = DistMatrix::with_shape(grid, DistPair::STANDARD, 11, 6).unwrap();
            transpose_into(&a.as_view(), &mut at.as_view_mut()).unwrap();
            let gathered = at.to_replicated().unwrap();
            (0..11).all(|i| (0..6).all(|j| gathered[(i, j)] == pseudo(31, j, i)))
        });
        assert!(ok.iter().all(|&ok| ok), "transpose broken on {height}x{width}");
    }
}

#[test]
fn panels_redistribute_like_matrices() {
    let ok = on_grid(2, 3, |grid| {
        let a = seeded(&grid, 47, 10, 9);
        // A mid-matrix panel with non-trivial effective alignments.
        let mut panel = DistMatrix::new(grid, DistPair::new(gridla::Dist::Repl, gridla::Dist::MatCol)).unwrap();
        panel.resize(4, 5).unwrap();
        copy_into(&a.view(3..7, 2..7), &mut panel.as_view_mut()).unwrap();
        let gathered = panel.to_replicated().unwrap();
        (0..4).all(|i| (0..5).all(|j| gathered[(i, j)] == pseudo(47, i + 3, j + 2)))
    });
    assert!(ok.iter().all(|&ok| ok));
}

#[test]
fn writing_into_a_panel_lands_in_the_parent() {
    let ok = on_grid(2, 3, |grid| {
        let a = seeded(&grid, 53, 8, 8);
        let mut b = seeded(&grid, 99, 8, 8);
        // Overwrite the middle block of b with the matching block of a.
        copy_into(&a.view(2..6, 1..5), &mut b.view_mut(2..6, 1..5)).unwrap();
        let gathered = b.to_replicated().unwrap();
        (0..8).all(|i| {
            (0..8).all(|j| {
                let inside = (2..6).contains(&i) && (1..5).contains(&j);
                let want = if inside { pseudo(53, i, j) } else { pseudo(99, i, j) };
                gathered[(i, j)] == want
            })
        })
    });
    assert!(ok.iter().all(|&ok| ok));
}

#[test]
fn empty_shapes_redistribute() {
    let ok = on_grid(2, 3, |grid| {
        for (m, n) in [(0, 5), (5, 0), (0, 0), (1, 1)] {
            let a = seeded(&grid, 3, m, n);
            for pair in DistPair::all() {
                let b = redistributed(&a, pair, (0, 0));
                assert_eq!(b.height(), m);
                assert_eq!(b.width(), n);
            }
            let mut at =
                DistMatrix::with_shape(grid.clone(), DistPair::STANDARD, n, m).unwrap();
            transpose_into(&a.as_view(), &mut at.as_view_mut()).unwrap();
        }
        true
    });
    assert!(ok.iter().all(|&ok| ok));
}

#[test]
fn shape_mismatch_fails_identically_before_communication() {
    // Every rank must return the same error without entering a
    // collective; a partial entry would deadlock this test.
    let errors = on_grid(2, 3, |grid| {
        let a = seeded(&grid, 7, 4, 4);
        let mut b = DistMatrix::with_shape(grid, DistPair::STANDARD, 5, 4).unwrap();
        copy_into(&a.as_view(), &mut b.as_view_mut()).unwrap_err()
    });
    for err in errors {
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                op: "redistribute",
                left_rows: 4,
                right_rows: 5,
                ..
            }
        ));
    }
}

#[test]
fn single_process_grid_matches_formula() {
    let ok = on_grid(1, 1, |grid| {
        let a = seeded(&grid, 61, 5, 5);
        let gathered = a.to_replicated().unwrap();
        (0..5).all(|i| (0..5).all(|j| gathered[(i, j)] == pseudo(61, i, j)))
    });
    assert!(ok[0]);
}
