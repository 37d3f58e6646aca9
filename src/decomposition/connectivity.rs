//! Connectivity of one rank: neighbour set, no-overlap interface table and
//! overlap declaration.
//!
//! The state is written once during setup and only read afterwards.

use crate::debug_invariants::{DebugInvariants, check_strictly_ascending};
use crate::mesh_error::DecompositionError;
use crate::topology::mesh::RegionId;
use itertools::Itertools;

/// Number of interface dimensions tracked per neighbour (points, lines, faces).
pub const INTERFACE_DIMENSIONS: usize = 3;

/// Overlap regions shared with one neighbour.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OverlapInterface {
    pub neighbour: usize,
    /// Elements of this rank duplicated on the neighbour.
    pub inner: RegionId,
    /// This rank's copies of the neighbour's elements.
    pub outer: RegionId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectivityState {
    rank: usize,
    size: usize,
    neighbours: Vec<usize>,
    is_neighbour: Vec<bool>,
    /// Entry `3 * r + d`: interface of `d`-dimensional elements with rank `r`.
    nooverlap_interfaces: Vec<Option<RegionId>>,
    overlap_layers: usize,
    /// Parallel to `neighbours` once the overlap regime is declared.
    overlap_interfaces: Vec<OverlapInterface>,
}

impl ConnectivityState {
    /// Build the state from an unsorted neighbour list and its interface table
    /// (3 entries per neighbour, in the order of `neighbours`).
    pub fn new(
        rank: usize,
        size: usize,
        neighbours: &[usize],
        interfaces: &[Option<RegionId>],
    ) -> Result<Self, DecompositionError> {
        const OP: &str = "set_connectivity";
        if interfaces.len() != INTERFACE_DIMENSIONS * neighbours.len() {
            return Err(DecompositionError::configuration(
                rank,
                OP,
                format!(
                    "interface table has {} entries, expected {} for {} neighbours",
                    interfaces.len(),
                    INTERFACE_DIMENSIONS * neighbours.len(),
                    neighbours.len()
                ),
            ));
        }
        if let Some(&bad) = neighbours.iter().find(|&&n| n >= size) {
            return Err(DecompositionError::configuration(
                rank,
                OP,
                format!("neighbour {bad} outside a run of {size} ranks"),
            ));
        }
        if neighbours.contains(&rank) {
            return Err(DecompositionError::configuration(
                rank,
                OP,
                "a rank cannot be its own neighbour",
            ));
        }
        if let Some(dup) = neighbours.iter().duplicates().next() {
            return Err(DecompositionError::configuration(
                rank,
                OP,
                format!("neighbour {dup} listed twice"),
            ));
        }

        let mut is_neighbour = vec![false; size];
        let mut table = vec![None; INTERFACE_DIMENSIONS * size];
        for (i, &n) in neighbours.iter().enumerate() {
            is_neighbour[n] = true;
            table[INTERFACE_DIMENSIONS * n..INTERFACE_DIMENSIONS * (n + 1)].copy_from_slice(
                &interfaces[INTERFACE_DIMENSIONS * i..INTERFACE_DIMENSIONS * (i + 1)],
            );
        }
        let state = Self {
            rank,
            size,
            neighbours: neighbours.iter().copied().sorted_unstable().collect(),
            is_neighbour,
            nooverlap_interfaces: table,
            overlap_layers: 0,
            overlap_interfaces: Vec::new(),
        };
        state.debug_assert_invariants();
        Ok(state)
    }

    /// Declare the overlap regime. Every neighbour must be listed exactly once.
    pub fn set_overlap(
        &mut self,
        layers: usize,
        interfaces: &[OverlapInterface],
    ) -> Result<(), DecompositionError> {
        const OP: &str = "set_overlap";
        if layers == 0 {
            return Err(DecompositionError::configuration(
                self.rank,
                OP,
                "the overlap regime needs at least one layer",
            ));
        }
        if self.overlap_layers > 0 {
            return Err(DecompositionError::configuration(
                self.rank,
                OP,
                "overlap already declared",
            ));
        }
        let listed: Vec<usize> = interfaces
            .iter()
            .map(|oi| oi.neighbour)
            .sorted_unstable()
            .collect();
        if listed != self.neighbours {
            return Err(DecompositionError::configuration(
                self.rank,
                OP,
                format!(
                    "overlap interfaces cover ranks {listed:?}, neighbours are {:?}",
                    self.neighbours
                ),
            ));
        }
        self.overlap_interfaces = interfaces
            .iter()
            .copied()
            .sorted_unstable_by_key(|oi| oi.neighbour)
            .collect();
        self.overlap_layers = layers;
        Ok(())
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn count_neighbours(&self) -> usize {
        self.neighbours.len()
    }

    pub fn neighbours(&self) -> &[usize] {
        &self.neighbours
    }

    pub fn neighbour(&self, index: usize) -> Result<usize, DecompositionError> {
        self.neighbours.get(index).copied().ok_or_else(|| {
            DecompositionError::bounds(self.rank, "get_neighbour", index, self.neighbours.len())
        })
    }

    /// Position of `rank` in the sorted neighbour list.
    pub fn neighbour_index(&self, rank: usize) -> Option<usize> {
        self.neighbours.binary_search(&rank).ok()
    }

    pub fn is_neighbour(&self, rank: usize) -> Result<bool, DecompositionError> {
        self.is_neighbour
            .get(rank)
            .copied()
            .ok_or_else(|| DecompositionError::bounds(self.rank, "is_neighbour", rank, self.size))
    }

    pub fn nooverlap_interface(
        &self,
        rank: usize,
        dim: usize,
    ) -> Result<Option<RegionId>, DecompositionError> {
        if rank >= self.size {
            return Err(DecompositionError::bounds(
                self.rank,
                "get_nooverlap_interface",
                rank,
                self.size,
            ));
        }
        if dim >= INTERFACE_DIMENSIONS {
            return Err(DecompositionError::bounds(
                self.rank,
                "get_nooverlap_interface",
                dim,
                INTERFACE_DIMENSIONS,
            ));
        }
        Ok(self.nooverlap_interfaces[INTERFACE_DIMENSIONS * rank + dim])
    }

    /// All defined no-overlap interface regions.
    pub fn defined_interfaces(&self) -> impl Iterator<Item = (usize, usize, RegionId)> + '_ {
        self.neighbours.iter().flat_map(move |&n| {
            (0..INTERFACE_DIMENSIONS).filter_map(move |d| {
                self.nooverlap_interfaces[INTERFACE_DIMENSIONS * n + d].map(|r| (n, d, r))
            })
        })
    }

    pub fn overlap_layers(&self) -> usize {
        self.overlap_layers
    }

    pub fn is_overlap(&self) -> bool {
        self.overlap_layers > 0
    }

    /// Overlap regions, parallel to [`Self::neighbours`]; empty without overlap.
    pub fn overlap_interfaces(&self) -> &[OverlapInterface] {
        &self.overlap_interfaces
    }
}

impl DebugInvariants for ConnectivityState {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "ConnectivityState");
    }

    fn validate_invariants(&self) -> Result<(), DecompositionError> {
        let fail = |detail: String| {
            Err(DecompositionError::consistency(
                self.rank,
                "ConnectivityState::validate_invariants",
                detail,
            ))
        };
        check_strictly_ascending(
            self.rank,
            "ConnectivityState::validate_invariants",
            "neighbours",
            &self.neighbours,
        )?;
        if self.neighbours.contains(&self.rank) {
            return fail("self listed as neighbour".into());
        }
        let flagged = self.is_neighbour.iter().filter(|&&b| b).count();
        if flagged != self.neighbours.len()
            || self.neighbours.iter().any(|&n| !self.is_neighbour[n])
        {
            return fail("membership table disagrees with the neighbour list".into());
        }
        if self.nooverlap_interfaces.len() != INTERFACE_DIMENSIONS * self.size {
            return fail(format!(
                "interface table has {} slots for {} ranks",
                self.nooverlap_interfaces.len(),
                self.size
            ));
        }
        for (slot, region) in self.nooverlap_interfaces.iter().enumerate() {
            let owner = slot / INTERFACE_DIMENSIONS;
            if region.is_some() && !self.is_neighbour[owner] {
                return fail(format!("interface defined with non-neighbour {owner}"));
            }
        }
        Ok(())
    }
}
