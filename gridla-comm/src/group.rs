/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::sync::Arc;

use crate::transport::Transport;

/// Tags for the collective families. A mismatch aborts the run (see
/// [`Transport::recv`]), which is the diagnostic for a desynchronized
/// schedule.
mod tag {
    pub const POINT: u64 = 1;
    pub const EXCHANGE: u64 = 2;
    pub const BROADCAST: u64 = 3;
    pub const GATHER: u64 = 4;
    pub const REDUCE: u64 = 5;
    pub const SCATTER: u64 = 6;
    pub const BARRIER: u64 = 7;
    pub const ALLTOALL: u64 = 8;
}

/// An ordered subset of world ranks that communicates collectively.
///
/// Member order is the team order: all-gather results concatenate in it,
/// reductions fold in it, and member indices (not world ranks) address
/// peers. A process may hold groups it is not a member of (its index is
/// `None`); calling a collective on such a group is a programming error.
///
/// Every collective here is a fixed schedule over point-to-point
/// messages. Because the underlying channels are unbounded and FIFO per
/// pair, a schedule in which every member completes all its sends before
/// its receives cannot deadlock, and two collectives issued back-to-back
/// on the same group cannot interleave.
#[derive(Clone)]
pub struct ProcessGroup {
    transport: Arc<dyn Transport>,
    ranks: Vec<usize>,
    index: Option<usize>,
}

impl std::fmt::Debug for ProcessGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessGroup")
            .field("ranks", &self.ranks)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl ProcessGroup {
    /// Build a group over `ranks` (world ranks, in team order).
    ///
    /// Purely local: every process can construct the same group from the
    /// same metadata without communication.
    ///
    /// # Panics
    ///
    /// Panics if `ranks` contains a duplicate or an out-of-world rank.
    pub fn new(transport: Arc<dyn Transport>, ranks: Vec<usize>) -> Self {
        let world = transport.world_size();
        for (i, &r) in ranks.iter().enumerate() {
            assert!(r < world, "rank {r} is outside a world of {world}");
            assert!(
                !ranks[..i].contains(&r),
                "rank {r} appears twice in a process group"
            );
        }
        let index = ranks.iter().position(|&r| r == transport.world_rank());
        Self {
            transport,
            ranks,
            index,
        }
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.ranks.len()
    }

    /// This process's member index, or `None` if it is not a member.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn is_member(&self) -> bool {
        self.index.is_some()
    }

    /// The world rank of member `i`.
    pub fn member_rank(&self, i: usize) -> usize {
        self.ranks[i]
    }

    /// The member indices, as world ranks, in team order.
    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    fn me(&self) -> usize {
        self.index
            .expect("collective called on a group this process does not belong to")
    }

    /// Send `payload` to member `to`.
    pub fn send(&self, to: usize, payload: Vec<f64>) {
        self.me();
        self.transport.send(self.ranks[to], tag::POINT, payload);
    }

    /// Receive the next point-to-point message from member `from`.
    pub fn recv(&self, from: usize) -> Vec<f64> {
        self.me();
        self.transport.recv(self.ranks[from], tag::POINT)
    }

    /// Simultaneously send to and receive from member `peer`.
    ///
    /// Blocking and pairwise: both sides must call it, and both proceed
    /// once the exchange completes.
    pub fn sendrecv(&self, peer: usize, payload: Vec<f64>) -> Vec<f64> {
        let me = self.me();
        if peer == me {
            return payload;
        }
        self.transport.send(self.ranks[peer], tag::EXCHANGE, payload);
        self.transport.recv(self.ranks[peer], tag::EXCHANGE)
    }

    /// Broadcast `buf` from member `root` to every member.
    pub fn broadcast(&self, root: usize, buf: &mut Vec<f64>) {
        let me = self.me();
        if me == root {
            for i in 0..self.size() {
                if i != me {
                    self.transport
                        .send(self.ranks[i], tag::BROADCAST, buf.clone());
                }
            }
        } else {
            *buf = self.transport.recv(self.ranks[root], tag::BROADCAST);
        }
    }

    /// Gather every member's `mine` onto every member, indexed in team
    /// order. Concatenating the result reproduces team order exactly.
    pub fn all_gather(&self, mine: &[f64]) -> Vec<Vec<f64>> {
        let me = self.me();
        for i in 0..self.size() {
            if i != me {
                self.transport.send(self.ranks[i], tag::GATHER, mine.to_vec());
            }
        }
        (0..self.size())
            .map(|i| {
                if i == me {
                    mine.to_vec()
                } else {
                    self.transport.recv(self.ranks[i], tag::GATHER)
                }
            })
            .collect()
    }

    /// Element-wise sum of `buf` across the team, in place on every
    /// member. Contributions fold in team order, so the result is
    /// bit-identical on every member.
    pub fn all_reduce_sum(&self, buf: &mut [f64]) {
        self.all_reduce_with(buf, |acc, v| {
            for (a, b) in acc.iter_mut().zip(v) {
                *a += b;
            }
        });
    }

    /// Element-wise max of `buf` across the team, in place on every member.
    pub fn all_reduce_max(&self, buf: &mut [f64]) {
        self.all_reduce_with(buf, |acc, v| {
            for (a, b) in acc.iter_mut().zip(v) {
                if b > *a {
                    *a = b;
                }
            }
        });
    }

    /// Max with location: every member contributes `(value, loc)` and all
    /// members learn the largest value and its location. Ties break toward
    /// the smallest location, so the answer is unique and identical
    /// everywhere.
    pub fn all_reduce_max_loc(&self, value: f64, loc: usize) -> (f64, usize) {
        let mut buf = [value, loc as f64];
        self.all_reduce_with(&mut buf, |acc, v| {
            if v[0] > acc[0] || (v[0] == acc[0] && v[1] < acc[1]) {
                acc[0] = v[0];
                acc[1] = v[1];
            }
        });
        (buf[0], buf[1] as usize)
    }

    /// Reduce-then-scatter: member `j` receives the team-order sum of
    /// every member's `parts[j]`.
    ///
    /// # Panics
    ///
    /// Panics if `parts.len() != self.size()`.
    pub fn reduce_scatter(&self, parts: Vec<Vec<f64>>) -> Vec<f64> {
        let me = self.me();
        assert_eq!(
            parts.len(),
            self.size(),
            "reduce_scatter needs one part per team member"
        );
        let mut parts = parts;
        for (j, part) in parts.iter().enumerate() {
            if j != me {
                self.transport.send(self.ranks[j], tag::SCATTER, part.clone());
            }
        }
        let mut acc: Option<Vec<f64>> = None;
        for s in 0..self.size() {
            let v = if s == me {
                std::mem::take(&mut parts[me])
            } else {
                self.transport.recv(self.ranks[s], tag::SCATTER)
            };
            match &mut acc {
                None => acc = Some(v),
                Some(acc) => {
                    for (a, b) in acc.iter_mut().zip(v) {
                        *a += b;
                    }
                }
            }
        }
        acc.unwrap_or_default()
    }

    /// Personalized all-to-all: member `j` receives `sends[j]` from every
    /// member, indexed in team order.
    ///
    /// # Panics
    ///
    /// Panics if `sends.len() != self.size()`.
    pub fn all_to_all(&self, sends: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
        let me = self.me();
        assert_eq!(
            sends.len(),
            self.size(),
            "all_to_all needs one payload per team member"
        );
        let mut sends = sends;
        for (j, payload) in sends.iter().enumerate() {
            if j != me {
                self.transport
                    .send(self.ranks[j], tag::ALLTOALL, payload.clone());
            }
        }
        (0..self.size())
            .map(|s| {
                if s == me {
                    std::mem::take(&mut sends[me])
                } else {
                    self.transport.recv(self.ranks[s], tag::ALLTOALL)
                }
            })
            .collect()
    }

    /// Block until every member has arrived.
    pub fn barrier(&self) {
        let me = self.me();
        for i in 0..self.size() {
            if i != me {
                self.transport.send(self.ranks[i], tag::BARRIER, Vec::new());
            }
        }
        for i in 0..self.size() {
            if i != me {
                let _ = self.transport.recv(self.ranks[i], tag::BARRIER);
            }
        }
    }
}

impl ProcessGroup {
    fn all_reduce_with<F>(&self, buf: &mut [f64], mut fold: F)
    where
        F: FnMut(&mut [f64], Vec<f64>),
    {
        let me = self.me();
        // Fold at member 0 in team order, then fan the result back out.
        if me == 0 {
            for s in 1..self.size() {
                let v = self.transport.recv(self.ranks[s], tag::REDUCE);
                fold(buf, v);
            }
            for s in 1..self.size() {
                self.transport.send(self.ranks[s], tag::REDUCE, buf.to_vec());
            }
        } else {
            self.transport.send(self.ranks[0], tag::REDUCE, buf.to_vec());
            let v = self.transport.recv(self.ranks[0], tag::REDUCE);
            buf.copy_from_slice(&v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::run_on_ranks;
    use crate::transport::SingleProcess;

    #[test]
    fn singleton_group() {
        let g = ProcessGroup::new(Arc::new(SingleProcess::new()), vec![0]);
        assert_eq!(g.size(), 1);
        assert_eq!(g.index(), Some(0));

        let mut buf = vec![3.0];
        g.broadcast(0, &mut buf);
        g.all_reduce_sum(&mut buf);
        assert_eq!(buf, vec![3.0]);
        assert_eq!(g.all_gather(&buf), vec![vec![3.0]]);
        assert_eq!(g.all_reduce_max_loc(7.0, 4), (7.0, 4));
        g.barrier();
    }

    #[test]
    fn broadcast_reaches_everyone() {
        let results = run_on_ranks(4, |t| {
            let g = ProcessGroup::new(t, vec![0, 1, 2, 3]);
            let mut buf = if g.index() == Some(2) {
                vec![1.0, 2.0, 3.0]
            } else {
                Vec::new()
            };
            g.broadcast(2, &mut buf);
            buf
        });
        for r in results {
            assert_eq!(r, vec![1.0, 2.0, 3.0]);
        }
    }

    #[test]
    fn all_gather_is_team_ordered() {
        let results = run_on_ranks(3, |t| {
            let g = ProcessGroup::new(t, vec![2, 0, 1]);
            let me = g.index().unwrap() as f64;
            g.all_gather(&[me])
        });
        for r in results {
            assert_eq!(r, vec![vec![0.0], vec![1.0], vec![2.0]]);
        }
    }

    #[test]
    fn all_reduce_sum_and_max() {
        let results = run_on_ranks(4, |t| {
            let g = ProcessGroup::new(t, (0..4).collect());
            let me = g.index().unwrap() as f64;
            let mut sum = vec![me, 1.0];
            g.all_reduce_sum(&mut sum);
            let mut max = vec![me];
            g.all_reduce_max(&mut max);
            (sum, max)
        });
        for (sum, max) in results {
            assert_eq!(sum, vec![6.0, 4.0]);
            assert_eq!(max, vec![3.0]);
        }
    }

    #[test]
    fn max_loc_breaks_ties_low() {
        let results = run_on_ranks(4, |t| {
            let g = ProcessGroup::new(t, (0..4).collect());
            // Ranks 1 and 3 tie on the value; location 10 must win over 30.
            let (value, loc) = match g.index().unwrap() {
                1 => (5.0, 10),
                3 => (5.0, 30),
                i => (0.0, i),
            };
            g.all_reduce_max_loc(value, loc)
        });
        for r in results {
            assert_eq!(r, (5.0, 10));
        }
    }

    #[test]
    fn reduce_scatter_sums_per_slot() {
        let results = run_on_ranks(3, |t| {
            let g = ProcessGroup::new(t, (0..3).collect());
            let me = g.index().unwrap() as f64;
            // parts[j] = [me + j]; member j should end with sum over me.
            let parts = (0..3).map(|j| vec![me + j as f64]).collect();
            g.reduce_scatter(parts)
        });
        assert_eq!(results[0], vec![0.0 + 1.0 + 2.0]);
        assert_eq!(results[1], vec![3.0 + 3.0]);
        assert_eq!(results[2], vec![6.0 + 3.0]);
    }

    #[test]
    fn all_to_all_routes_payloads() {
        let results = run_on_ranks(3, |t| {
            let g = ProcessGroup::new(t, (0..3).collect());
            let me = g.index().unwrap();
            let sends = (0..3).map(|j| vec![(10 * me + j) as f64]).collect();
            g.all_to_all(sends)
        });
        for (j, r) in results.into_iter().enumerate() {
            let expected: Vec<Vec<f64>> =
                (0..3).map(|s| vec![(10 * s + j) as f64]).collect();
            assert_eq!(r, expected);
        }
    }

    #[test]
    fn subgroup_excludes_nonmembers() {
        let results = run_on_ranks(4, |t| {
            let g = ProcessGroup::new(t, vec![1, 3]);
            if g.is_member() {
                let mut buf = vec![1.0];
                g.all_reduce_sum(&mut buf);
                Some(buf[0])
            } else {
                None
            }
        });
        assert_eq!(results, vec![None, Some(2.0), None, Some(2.0)]);
    }

    #[test]
    fn sendrecv_is_pairwise() {
        let results = run_on_ranks(2, |t| {
            let g = ProcessGroup::new(t, vec![0, 1]);
            let me = g.index().unwrap();
            g.sendrecv(1 - me, vec![me as f64])
        });
        assert_eq!(results[0], vec![1.0]);
        assert_eq!(results[1], vec![0.0]);
    }

    #[test]
    #[should_panic(expected = "does not belong")]
    fn collective_on_foreign_group_panics() {
        let g = ProcessGroup::new(Arc::new(SingleProcess::new()), vec![]);
        g.barrier();
    }

    #[test]
    #[should_panic(expected = "appears twice")]
    fn duplicate_rank_panics() {
        let _ = ProcessGroup::new(Arc::new(SingleProcess::new()), vec![0, 0]);
    }
}
