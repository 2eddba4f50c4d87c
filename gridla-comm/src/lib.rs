/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! The message-passing substrate for the distributed matrix stack.
//!
//! Everything above this crate talks to a [`Transport`]: tagged
//! point-to-point send/recv over a world of ranks. Collectives are built
//! on top of that in [`ProcessGroup`], deterministically and in member
//! order, so that a given program issues an identical communication
//! schedule on every rank.
//!
//! Two transports ship in-tree: [`local::LocalFabric`] wires a world of
//! ranks through in-process channels (one thread per rank; this is how
//! the test suites run real grids), and [`transport::SingleProcess`] is
//! the degenerate one-rank world. An MPI-backed transport would implement
//! the same four methods.

pub mod group;
pub mod local;
pub mod transport;

pub use group::ProcessGroup;
pub use local::{run_on_ranks, LocalFabric, LocalTransport};
pub use transport::{SingleProcess, Transport};
