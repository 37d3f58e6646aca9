//! Communication substrate, wire records and mesh generation.

pub mod communicator;
pub mod meshgen;
pub mod wire;

pub use communicator::{Communicator, NoComm, ThreadComm, run_ranks};
pub use meshgen::{GridPartition, partitioned_grid};
