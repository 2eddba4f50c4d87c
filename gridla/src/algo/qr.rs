/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Column-pivoted Householder QR with maintained column norms.
//!
//! The classic Businger–Golub sweep: pick the remaining column of largest
//! maintained norm, swap it into place, annihilate it below the diagonal,
//! push the reflector through the trailing matrix, and downdate every
//! other column's norm by the one-pass identity — recomputing exactly
//! only when the ratio-of-norms test says the running estimate has
//! drifted. Norms live with the column teams that own the columns; pivot
//! selection is one max-location reduction across each row team.

use gridla_linalg::{ger, reflector_from_norm};
use tracing::debug;

use crate::config::TuningConfig;
use crate::dist::{self, DistPair};
use crate::error::{Error, Result};
use crate::matrix::DistMatrix;

/// The outputs of [`pivoted_qr`]; the reflector vectors are packed below
/// the diagonal of the overwritten input.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotedQr {
    /// Where each original column ended: column `j` of the input sits at
    /// position `perm_inv[j]` of the factored matrix.
    pub perm_inv: Vec<usize>,
    /// Per-step diagonal signs: `signs[k] * R[k][k] >= 0`, the convention
    /// for rescaling R to non-negative diagonal.
    pub signs: Vec<f64>,
    /// Householder scalars, one per completed step.
    pub taus: Vec<f64>,
    /// Completed steps; `min(m, n)` unless the early-stop tolerance hit.
    pub steps: usize,
}

/// Factor `A P = Q R` in place with column pivoting.
///
/// Stops early when the best remaining column norm falls below
/// `tolerance` times the initial largest column norm; a negative
/// `tolerance` never stops early and always runs `min(m, n)` steps.
///
/// A synchronization point for every in-grid process at every step.
/// Non-participating processes return immediately with an empty
/// factorization.
pub fn pivoted_qr(
    cfg: &TuningConfig,
    a: &mut DistMatrix,
    tolerance: f64,
) -> Result<PivotedQr> {
    if a.pair() != DistPair::STANDARD {
        return Err(Error::Distribution {
            row: a.pair().row,
            col: a.pair().col,
        });
    }

    let grid = a.grid().clone();
    let (m, n) = (a.height(), a.width());
    let kmax = m.min(n);
    let mut perm: Vec<usize> = (0..n).collect();
    let mut taus = Vec::with_capacity(kmax);
    let mut signs = Vec::with_capacity(kmax);

    let Some((p, q)) = grid.coord() else {
        return Ok(PivotedQr {
            perm_inv: perm,
            signs,
            taus,
            steps: 0,
        });
    };
    let row_team = grid.row_team().expect("in-grid process").clone();
    let col_team = grid.col_team().expect("in-grid process").clone();

    let rstride = grid.height();
    let cstride = grid.width();
    let row_align = a.row_align();
    let col_align = a.col_align();
    let row_shift = dist::shift(p, rstride, row_align);
    let col_shift = dist::shift(q, cstride, col_align);
    let (lh, lw) = (a.local_height(), a.local_width());
    let mut local = a.local_mut();

    // Maintained and reference norms for the locally owned columns,
    // identical on every member of this column team.
    let mut sq = vec![0.0; lw];
    for (lj, dst) in sq.iter_mut().enumerate() {
        *dst = local.as_view().col(lj).iter().map(|v| v * v).sum();
    }
    col_team.all_reduce_sum(&mut sq);
    let mut norms: Vec<f64> = sq.into_iter().map(f64::sqrt).collect();
    let mut orig = norms.clone();

    let mut buf = [norms.iter().cloned().fold(0.0, f64::max)];
    row_team.all_reduce_max(&mut buf);
    let initial_max = buf[0];

    let mut steps = 0;
    for k in 0..kmax {
        // Pivot: the remaining column of largest maintained norm, ties to
        // the lowest index. Local max first, then one max-location
        // reduction across the row team.
        let first_lj = dist::local_len(k, col_shift, cstride);
        let (mut best, mut best_j) = (f64::NEG_INFINITY, n);
        for lj in first_lj..lw {
            let j = dist::local_to_global(lj, col_shift, cstride);
            if norms[lj] > best || (norms[lj] == best && j < best_j) {
                best = norms[lj];
                best_j = j;
            }
        }
        let (pivot_norm, pivot_j) = row_team.all_reduce_max_loc(best, best_j);

        if tolerance >= 0.0 && pivot_norm < tolerance * initial_max {
            debug!(step = k, pivot_norm, "pivoted qr stopped early");
            break;
        }

        // Swap column pivot_j into position k. Cross-team pivots exchange
        // the column segment and its norm bookkeeping pairwise; the
        // permutation record updates everywhere.
        if pivot_j != k {
            let q_k = dist::owner(k, cstride, col_align);
            let q_p = dist::owner(pivot_j, cstride, col_align);
            if q_k == q_p {
                if q == q_k {
                    let lk = dist::global_to_local(k, col_shift, cstride);
                    let lp = dist::global_to_local(pivot_j, col_shift, cstride);
                    for li in 0..lh {
                        let tmp = local[(li, lk)];
                        local[(li, lk)] = local[(li, lp)];
                        local[(li, lp)] = tmp;
                    }
                    norms.swap(lk, lp);
                    orig.swap(lk, lp);
                }
            } else if q == q_k || q == q_p {
                let lj = if q == q_k {
                    dist::global_to_local(k, col_shift, cstride)
                } else {
                    dist::global_to_local(pivot_j, col_shift, cstride)
                };
                let peer = if q == q_k { q_p } else { q_k };
                let mut payload = Vec::with_capacity(lh + 2);
                payload.extend_from_slice(local.as_view().col(lj));
                payload.push(norms[lj]);
                payload.push(orig[lj]);
                let recv = row_team.sendrecv(peer, payload);
                local.col_mut(lj).copy_from_slice(&recv[..lh]);
                norms[lj] = recv[lh];
                orig[lj] = recv[lh + 1];
            }
            perm.swap(k, pivot_j);
        }

        // Reflector annihilating column k below the diagonal: the owning
        // column team reduces the tail norm, learns the head, and scales
        // its segments.
        let q_k = dist::owner(k, cstride, col_align);
        let p_k = dist::owner(k, rstride, row_align);
        let tail_start = dist::local_len(k + 1, row_shift, rstride);
        let seg_len = lh - tail_start;

        let mut head = [0.0; 2];
        if q == q_k {
            let lk = dist::global_to_local(k, col_shift, cstride);
            let mut tail_sq = [local.as_view().col(lk)[tail_start..]
                .iter()
                .map(|v| v * v)
                .sum::<f64>()];
            col_team.all_reduce_sum(&mut tail_sq);

            let mut alpha = vec![if p == p_k {
                local[(dist::global_to_local(k, row_shift, rstride), lk)]
            } else {
                0.0
            }];
            col_team.broadcast(p_k, &mut alpha);

            let (tau, beta, scale) = reflector_from_norm(alpha[0], tail_sq[0].sqrt());
            for li in tail_start..lh {
                local[(li, lk)] *= scale;
            }
            if p == p_k {
                local[(dist::global_to_local(k, row_shift, rstride), lk)] = beta;
            }
            head = [tau, beta];
        }

        // One row-team broadcast carries tau, beta, and this grid row's
        // reflector segment to every column team.
        let mut payload = Vec::with_capacity(2 + seg_len);
        if q == q_k {
            let lk = dist::global_to_local(k, col_shift, cstride);
            payload.extend_from_slice(&head);
            payload.extend_from_slice(&local.as_view().col(lk)[tail_start..]);
        } else {
            payload.resize(2 + seg_len, 0.0);
        }
        row_team.broadcast(q_k, &mut payload);
        let tau = payload[0];
        let beta = payload[1];
        let v_tail = payload[2..].to_vec();
        taus.push(tau);
        signs.push(if beta < 0.0 { -1.0 } else { 1.0 });

        // Apply the reflector to the trailing columns: local partial
        // products, one column-team reduction, then the rank-1 update.
        let first_upd = dist::local_len(k + 1, col_shift, cstride);
        let local_row_k =
            (p == p_k).then(|| dist::global_to_local(k, row_shift, rstride));
        let mut w = vec![0.0; lw - first_upd];
        for (wi, lj) in (first_upd..lw).enumerate() {
            let mut acc = match local_row_k {
                Some(lr) => local[(lr, lj)],
                None => 0.0,
            };
            let col = local.as_view();
            for (vi, li) in (tail_start..lh).enumerate() {
                acc += v_tail[vi] * col[(li, lj)];
            }
            w[wi] = acc;
        }
        col_team.all_reduce_sum(&mut w);
        if let Some(lr) = local_row_k {
            for (wi, lj) in (first_upd..lw).enumerate() {
                local[(lr, lj)] -= tau * w[wi];
            }
        }
        if seg_len > 0 && first_upd < lw {
            // The tail block update is one rank-1 kernel call.
            let offset = tail_start + first_upd * lh;
            ger(
                seg_len,
                lw - first_upd,
                -tau,
                &v_tail,
                &w,
                &mut local.as_mut_slice()[offset..],
                lh,
            );
        }

        // Downdate the maintained norms from the updated row k, flagging
        // drifted columns. The flag set is identical on every member of
        // the column team, so the batched recomputation below can never
        // desynchronize.
        let mut row_k = vec![0.0; lw - first_upd];
        if let Some(lr) = local_row_k {
            for (wi, lj) in (first_upd..lw).enumerate() {
                row_k[wi] = local[(lr, lj)];
            }
        }
        col_team.broadcast(p_k, &mut row_k);

        let mut drifted: Vec<usize> = Vec::new();
        for (wi, lj) in (first_upd..lw).enumerate() {
            if norms[lj] == 0.0 {
                continue;
            }
            let ratio = row_k[wi].abs() / norms[lj];
            let temp = (1.0 - ratio * ratio).max(0.0);
            let rel = norms[lj] / orig[lj];
            if temp * rel * rel <= cfg.qr_drift_tol {
                drifted.push(lj);
            } else {
                norms[lj] *= temp.sqrt();
            }
        }
        if !drifted.is_empty() {
            debug!(step = k, count = drifted.len(), "recomputing drifted column norms");
            let mut sums = vec![0.0; drifted.len()];
            for (dst, &lj) in sums.iter_mut().zip(&drifted) {
                *dst = local.as_view().col(lj)[tail_start..]
                    .iter()
                    .map(|v| v * v)
                    .sum();
            }
            col_team.all_reduce_sum(&mut sums);
            for (&lj, sum) in drifted.iter().zip(sums) {
                norms[lj] = sum.sqrt();
                orig[lj] = norms[lj];
            }
        }

        steps += 1;
    }

    let mut perm_inv = vec![0; n];
    for (pos, &original) in perm.iter().enumerate() {
        perm_inv[original] = pos;
    }
    Ok(PivotedQr {
        perm_inv,
        signs,
        taus,
        steps,
    })
}
