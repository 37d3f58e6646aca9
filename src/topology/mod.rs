//! Mesh-side types: element metadata, the mesh contract, and an in-memory mesh.

pub mod element_type;
pub mod in_memory;
pub mod mesh;

pub use element_type::ElementType;
pub use in_memory::InMemoryMesh;
pub use mesh::{DomainMesh, ElementSelection, RegionId};
