/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::collections::VecDeque;
use std::sync::Mutex;

/// A tagged message in flight between two ranks.
pub type Envelope = (u64, Vec<f64>);

/// Point-to-point transport between the ranks of a world.
///
/// Delivery between any ordered pair of ranks is FIFO. `recv` blocks until
/// a message from `src` arrives; there is no timeout — a receive that never
/// completes is a deadlock to be diagnosed externally, not a recoverable
/// error. The tag exists to catch mismatched communication schedules: an
/// implementation must treat a tag mismatch on the next FIFO message as a
/// fatal error rather than reordering around it.
pub trait Transport: Send + Sync {
    /// This process's rank within the world.
    fn world_rank(&self) -> usize;

    /// Total number of ranks in the world.
    fn world_size(&self) -> usize;

    /// Send `payload` to `dst`. Never blocks.
    fn send(&self, dst: usize, tag: u64, payload: Vec<f64>);

    /// Receive the next message from `src`, blocking until it arrives.
    ///
    /// # Panics
    ///
    /// Panics if the next message from `src` carries a different tag: the
    /// communication schedule has desynchronized and no recovery is
    /// possible.
    fn recv(&self, src: usize, tag: u64) -> Vec<f64>;
}

/// The one-rank world: sends to self are queued, everything else is a
/// programming error.
pub struct SingleProcess {
    queue: Mutex<VecDeque<Envelope>>,
}

impl SingleProcess {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl Default for SingleProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SingleProcess {
    fn world_rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn send(&self, dst: usize, tag: u64, payload: Vec<f64>) {
        assert_eq!(dst, 0, "single-process transport has only rank 0");
        self.queue.lock().unwrap().push_back((tag, payload));
    }

    fn recv(&self, src: usize, tag: u64) -> Vec<f64> {
        assert_eq!(src, 0, "single-process transport has only rank 0");
        let (got, payload) = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .expect("receive from self with no message queued");
        assert_eq!(
            got, tag,
            "communication schedule desynchronized: expected tag {tag}, got {got}"
        );
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_process_roundtrip() {
        let t = SingleProcess::new();
        assert_eq!(t.world_rank(), 0);
        assert_eq!(t.world_size(), 1);
        t.send(0, 7, vec![1.0, 2.0]);
        assert_eq!(t.recv(0, 7), vec![1.0, 2.0]);
    }

    #[test]
    #[should_panic(expected = "desynchronized")]
    fn single_process_tag_mismatch() {
        let t = SingleProcess::new();
        t.send(0, 7, vec![]);
        let _ = t.recv(0, 8);
    }
}
