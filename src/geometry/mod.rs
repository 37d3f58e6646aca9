//! Geometry utilities for decomposition matching.
//!
//! Cross-rank identification of mesh entities is purely geometric: an entity is
//! recognised on another rank by the coordinates of its barycenter.

pub mod coincidence;

pub use coincidence::{BarycenterIndex, coincidence_tolerance, coincident};
