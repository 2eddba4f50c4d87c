/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use tracing::debug;

use crate::transport::{Envelope, Transport};

/// An in-process world of ranks wired through unbounded channels.
///
/// Each ordered pair of ranks gets its own channel, so delivery is FIFO
/// per pair and sends never block. One [`LocalTransport`] endpoint is
/// handed to each rank's thread.
pub struct LocalFabric;

impl LocalFabric {
    /// Create the endpoints for a world of `size` ranks.
    pub fn create(size: usize) -> Vec<LocalTransport> {
        assert!(size > 0, "a world needs at least one rank");
        debug!(size, "wiring in-process rank fabric");

        // chans[src][dst] carries messages from src to dst.
        let mut chans: Vec<Vec<Option<(Sender<Envelope>, Receiver<Envelope>)>>> = (0..size)
            .map(|_| (0..size).map(|_| Some(unbounded())).collect())
            .collect();

        (0..size)
            .map(|rank| {
                let senders = (0..size)
                    .map(|dst| chans[rank][dst].as_ref().unwrap().0.clone())
                    .collect();
                let receivers = (0..size)
                    .map(|src| chans[src][rank].take().unwrap().1)
                    .collect();
                LocalTransport {
                    rank,
                    size,
                    senders,
                    receivers,
                }
            })
            .collect()
    }
}

/// One rank's endpoint into a [`LocalFabric`] world.
pub struct LocalTransport {
    rank: usize,
    size: usize,
    senders: Vec<Sender<Envelope>>,
    receivers: Vec<Receiver<Envelope>>,
}

impl Transport for LocalTransport {
    fn world_rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.size
    }

    fn send(&self, dst: usize, tag: u64, payload: Vec<f64>) {
        self.senders[dst]
            .send((tag, payload))
            .expect("peer rank hung up before the schedule completed");
    }

    fn recv(&self, src: usize, tag: u64) -> Vec<f64> {
        let (got, payload) = self.receivers[src]
            .recv()
            .expect("peer rank hung up before the schedule completed");
        assert_eq!(
            got, tag,
            "communication schedule desynchronized between ranks {} and {}: \
             expected tag {tag}, got {got}",
            src, self.rank
        );
        payload
    }
}

/// Run `f` once per rank of a `size`-rank world, each on its own thread,
/// and collect the results in rank order.
///
/// This is the test harness for everything collective: the closure
/// receives this rank's transport and behaves exactly like one process of
/// a distributed run.
///
/// # Panics
///
/// Panics if any rank's thread panics (the panic is propagated).
pub fn run_on_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(Arc<dyn Transport>) -> T + Sync,
{
    let endpoints = LocalFabric::create(size);
    let f = &f;
    std::thread::scope(|scope| {
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|endpoint| scope.spawn(move || f(Arc::new(endpoint))))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}
