/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! SUMMA multiply properties: the three variants agree with each other
//! and with a dense reference, for awkward shapes, both transposes, and
//! the alpha/beta edge contracts.

mod common;

use common::{max_abs, max_abs_diff, on_grid, reference_gemm, seeded};
use gridla::{gemm, gemm_variant, select_variant, GemmVariant, TuningConfig};
use gridla_linalg::Transpose;
use gridla_utils::Matrix;

const VARIANTS: [GemmVariant; 3] = [
    GemmVariant::StationaryA,
    GemmVariant::StationaryB,
    GemmVariant::StationaryC,
];

fn tolerance(scale: f64) -> f64 {
    1e-12 * scale.max(1.0)
}

#[test]
fn forced_variants_match_reference_on_awkward_shape() {
    // The canonical skinny case: m=37, k=501, n=5 on a 2x3 grid, checked
    // against a single-process dense reference.
    let (m, k, n) = (37, 501, 5);
    let cfg = TuningConfig::default().with_block_size(13);

    for variant in VARIANTS {
        let diffs = on_grid(2, 3, |grid| {
            let a = seeded(&grid, 1, m, k);
            let b = seeded(&grid, 2, k, n);
            let mut c = seeded(&grid, 3, m, n);

            let a_full = a.to_replicated().unwrap();
            let b_full = b.to_replicated().unwrap();
            let mut want = c.to_replicated().unwrap();

            gemm_variant(
                &cfg,
                variant,
                Transpose::None,
                Transpose::None,
                0.75,
                &a,
                &b,
                -1.25,
                &mut c,
            )
            .unwrap();

            reference_gemm(0.75, &a_full, &b_full, -1.25, &mut want);
            let got = c.to_replicated().unwrap();
            (max_abs_diff(&got, &want), max_abs(&want))
        });
        for (diff, scale) in diffs {
            assert!(
                diff <= tolerance(scale * k as f64),
                "variant {variant:?} drifted: {diff} vs scale {scale}"
            );
        }
    }
}

#[test]
fn variants_agree_with_each_other() {
    let (m, k, n) = (17, 23, 19);
    let cfg = TuningConfig::default().with_block_size(7);
    let results = on_grid(2, 3, |grid| {
        let a = seeded(&grid, 4, m, k);
        let b = seeded(&grid, 5, k, n);
        VARIANTS.map(|variant| {
            let mut c = seeded(&grid, 6, m, n);
            gemm_variant(
                &cfg,
                variant,
                Transpose::None,
                Transpose::None,
                1.0,
                &a,
                &b,
                0.5,
                &mut c,
            )
            .unwrap();
            c.to_replicated().unwrap()
        })
    });
    for [ca, cb, cc] in results {
        let scale = max_abs(&cc) * k as f64;
        assert!(max_abs_diff(&ca, &cc) <= tolerance(scale));
        assert!(max_abs_diff(&cb, &cc) <= tolerance(scale));
    }
}

#[test]
fn transposed_operands_match_reference() {
    let (m, k, n) = (11, 9, 13);
    let cfg = TuningConfig::default().with_block_size(4);
    for ta in [Transpose::None, Transpose::Ordinary] {
        for tb in [Transpose::None, Transpose::Ordinary] {
            let diffs = on_grid(2, 3, |grid| {
                // Store the operands in their untransposed shapes.
                let a = match ta {
                    Transpose::None => seeded(&grid, 7, m, k),
                    Transpose::Ordinary => seeded(&grid, 7, k, m),
                };
                let b = match tb {
                    Transpose::None => seeded(&grid, 8, k, n),
                    Transpose::Ordinary => seeded(&grid, 8, n, k),
                };
                let mut c = seeded(&grid, 9, m, n);

                let a_full = a.to_replicated().unwrap();
                let b_full = b.to_replicated().unwrap();
                let op_a = match ta {
                    Transpose::None => a_full,
                    Transpose::Ordinary => {
                        Matrix::from_fn(m, k, |i, j| a_full[(j, i)])
                    }
                };
                let op_b = match tb {
                    Transpose::None => b_full,
                    Transpose::Ordinary => {
                        Matrix::from_fn(k, n, |i, j| b_full[(j, i)])
                    }
                };
                let mut want = c.to_replicated().unwrap();

                gemm(&cfg, ta, tb, 2.0, &a, &b, 1.0, &mut c).unwrap();
                reference_gemm(2.0, &op_a, &op_b, 1.0, &mut want);

                let got = c.to_replicated().unwrap();
                (max_abs_diff(&got, &want), max_abs(&want))
            });
            for (diff, scale) in diffs {
                assert!(diff <= tolerance(scale * k as f64), "{ta:?} x {tb:?}: {diff}");
            }
        }
    }
}

#[test]
fn selector_follows_the_smallest_dimension() {
    let cfg = TuningConfig::default();
    // n smallest: A stays put.
    assert_eq!(select_variant(&cfg, 100, 3, 50), GemmVariant::StationaryA);
    // m smallest: B stays put.
    assert_eq!(select_variant(&cfg, 3, 100, 50), GemmVariant::StationaryB);
    // k smallest: C stays put.
    assert_eq!(select_variant(&cfg, 100, 100, 10), GemmVariant::StationaryC);
    // Ties break toward the C-stationary variant.
    assert_eq!(select_variant(&cfg, 10, 10, 10), GemmVariant::StationaryC);
    // The weight rescales k before the comparison.
    let heavy = TuningConfig {
        gemm_dim_weight: 4.0,
        ..cfg
    };
    assert_eq!(select_variant(&heavy, 30, 20, 10), GemmVariant::StationaryA);
}

#[test]
fn zero_alpha_never_reads_the_operands() {
    // With alpha = 0 the call degenerates to a local scale of C; poisoned
    // operands must not leak in (and no panel may be communicated).
    let results = on_grid(2, 3, |grid| {
        let cfg = TuningConfig::default();
        let mut a = seeded(&grid, 10, 6, 6);
        let mut b = seeded(&grid, 11, 6, 6);
        a.fill_with(|_, _| f64::NAN);
        b.fill_with(|_, _| f64::NAN);
        let mut c = seeded(&grid, 12, 6, 6);
        gemm(
            &cfg,
            Transpose::None,
            Transpose::None,
            0.0,
            &a,
            &b,
            2.0,
            &mut c,
        )
        .unwrap();
        c.to_replicated().unwrap()
    });
    for got in results {
        for j in 0..6 {
            for i in 0..6 {
                assert_eq!(got[(i, j)], 2.0 * common::pseudo(12, i, j));
            }
        }
    }
}

#[test]
fn zero_beta_overwrites_stale_data() {
    for variant in VARIANTS {
        let results = on_grid(2, 3, |grid| {
            let cfg = TuningConfig::default();
            let a = seeded(&grid, 13, 5, 4);
            let b = seeded(&grid, 14, 4, 5);
            // C starts poisoned; beta = 0 must produce a clean overwrite.
            let mut c = gridla::DistMatrix::with_shape(
                grid.clone(),
                gridla::DistPair::STANDARD,
                5,
                5,
            )
            .unwrap();
            c.fill_with(|_, _| f64::NAN);

            let a_full = a.to_replicated().unwrap();
            let b_full = b.to_replicated().unwrap();
            let mut want = Matrix::new(0.0, 5, 5);
            reference_gemm(1.0, &a_full, &b_full, 0.0, &mut want);

            gemm_variant(
                &cfg,
                variant,
                Transpose::None,
                Transpose::None,
                1.0,
                &a,
                &b,
                0.0,
                &mut c,
            )
            .unwrap();
            (c.to_replicated().unwrap(), want)
        });
        for (got, want) in results {
            assert!(got.as_slice().iter().all(|v| v.is_finite()));
            assert!(max_abs_diff(&got, &want) <= tolerance(max_abs(&want) * 4.0));
        }
    }
}

#[test]
fn degenerate_shapes_multiply() {
    let ok = on_grid(2, 3, |grid| {
        let cfg = TuningConfig::default();
        for (m, k, n) in [(0, 4, 3), (4, 0, 3), (4, 3, 0), (1, 1, 1)] {
            let a = seeded(&grid, 15, m, k);
            let b = seeded(&grid, 16, k, n);
            let mut c = seeded(&grid, 17, m, n);
            gemm(
                &cfg,
                Transpose::None,
                Transpose::None,
                1.0,
                &a,
                &b,
                1.0,
                &mut c,
            )
            .unwrap();
            assert_eq!(c.height(), m);
            assert_eq!(c.width(), n);
            if k == 0 {
                // No summation terms: C must still be exactly beta * C.
                let got = c.to_replicated().unwrap();
                for j in 0..n {
                    for i in 0..m {
                        assert_eq!(got[(i, j)], common::pseudo(17, i, j));
                    }
                }
            }
        }
        true
    });
    assert!(ok.iter().all(|&ok| ok));
}

#[test]
fn mismatched_shapes_fail_identically() {
    let errors = on_grid(2, 3, |grid| {
        let cfg = TuningConfig::default();
        let a = seeded(&grid, 18, 4, 5);
        let b = seeded(&grid, 19, 6, 3);
        let mut c = seeded(&grid, 20, 4, 3);
        gemm(
            &cfg,
            Transpose::None,
            Transpose::None,
            1.0,
            &a,
            &b,
            1.0,
            &mut c,
        )
        .unwrap_err()
    });
    for err in errors {
        assert!(matches!(err, gridla::Error::DimensionMismatch { op: "gemm", .. }));
    }
}
