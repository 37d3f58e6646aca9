#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-decomposition
//!
//! mesh-decomposition tracks how a global finite-element mesh is split across the
//! ranks of a distributed run and keeps that split self-consistent. Every rank runs
//! the same code (SPMD) against its own local mesh and a shared communicator.
//!
//! ## Features
//! - Neighbour and interface discovery from the skin of each subdomain
//! - Element correspondence maps across no-overlap interfaces and overlap layers
//! - Global node numbering, identical on every copy of a shared node
//! - Pluggable communication backends: serial, in-process threads, MPI
//! - Positional dumps of global numbers and JSON interface reports
//!
//! ## Determinism
//!
//! Exchanges always visit neighbours in ascending rank order and ownership ties go
//! to the lowest rank, so a run is reproducible for a given decomposition. The grid
//! generator shuffles local numbering with seeded `SmallRng`s only.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-decomposition = "0.3"
//! # features = ["mpi-support"]
//! ```
//!
//! Matching is purely geometric: two entities correspond when their barycenters
//! coincide within the tolerance. Distinct, non-corresponding boundary entities must
//! never share a coincident barycenter.

pub mod algs;
pub mod debug_invariants;
pub mod decomposition;
pub mod geometry;
pub mod io;
pub mod mesh_error;
pub mod topology;

pub use debug_invariants::DebugInvariants;
pub use decomposition::DomainTracker;
pub use mesh_error::DecompositionError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{
        CommTag, Communicator, NoComm, ThreadComm, TrackerCommTags, run_ranks,
    };
    pub use crate::algs::meshgen::{GridPartition, PartitionedMesh, partitioned_grid};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::decomposition::DomainTracker;
    pub use crate::decomposition::connectivity::{ConnectivityState, OverlapInterface};
    pub use crate::decomposition::diagnostics::{BufferSink, DiagnosticSink, LogSink};
    pub use crate::decomposition::discovery::DiscoveryConfig;
    pub use crate::decomposition::global_numbering::NO_GLOBAL_ID;
    pub use crate::decomposition::interface_map::CorrespondenceMap;
    pub use crate::io::{GlobalNumberFormat, InterfaceReport};
    pub use crate::mesh_error::{DecompositionError, ErrorKind};
    pub use crate::topology::{DomainMesh, ElementSelection, ElementType, InMemoryMesh, RegionId};
}
