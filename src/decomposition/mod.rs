//! Domain-decomposition tracking.
//!
//! [`DomainTracker`] binds one rank's mesh and communicator and drives the
//! setup stages in order:
//!
//! 1. connectivity, given by [`DomainTracker::set_connectivity`] (plus
//!    [`DomainTracker::set_overlap`]) or found by
//!    [`DomainTracker::discover_connectivity`];
//! 2. correspondence maps, [`DomainTracker::map_interfaces`];
//! 3. global node numbers, [`DomainTracker::create_global_node_numbers`].
//!
//! Every stage is collective: all ranks must call it. A failure on any rank is
//! fatal to the run: the tracker aborts the communicator before returning the
//! error, so peers waiting in a collective return [`DecompositionError::Aborted`].

pub mod connectivity;
pub mod diagnostics;
pub mod discovery;
pub mod global_numbering;
pub mod interface_map;

use crate::algs::communicator::{Communicator, TrackerCommTags};
use crate::decomposition::connectivity::{
    ConnectivityState, INTERFACE_DIMENSIONS, OverlapInterface,
};
use crate::decomposition::diagnostics::{DiagnosticSink, LogSink};
use crate::decomposition::discovery::{DiscoveryConfig, discover_interfaces};
use crate::decomposition::interface_map::CorrespondenceMap;
use crate::geometry::coincidence::coincidence_tolerance;
use crate::io::{GlobalNumberFormat, InterfaceEntry, InterfaceReport};
use crate::mesh_error::DecompositionError;
use crate::topology::element_type::ElementType;
use crate::topology::mesh::{DomainMesh, RegionId};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::{Arc, Weak};

fn missing_connectivity(rank: usize, operation: &'static str) -> DecompositionError {
    DecompositionError::configuration(rank, operation, "connectivity has not been set")
}

/// Decomposition state of one rank, bound to an externally owned mesh.
pub struct DomainTracker<M: DomainMesh, C: Communicator> {
    mesh: Weak<RwLock<M>>,
    comm: C,
    tags: TrackerCommTags,
    tolerance: Option<f64>,
    connectivity: Option<ConnectivityState>,
    map: Option<CorrespondenceMap>,
    global_node_numbers: Option<Vec<i64>>,
}

impl<M: DomainMesh, C: Communicator> std::fmt::Debug for DomainTracker<M, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainTracker")
            .field("rank", &self.comm.rank())
            .field("size", &self.comm.size())
            .field("mesh_alive", &(self.mesh.strong_count() > 0))
            .field("connectivity", &self.connectivity)
            .field("mapped", &self.map.as_ref().map(CorrespondenceMap::mapped_count))
            .field("numbered", &self.global_node_numbers.is_some())
            .finish()
    }
}

impl<M: DomainMesh, C: Communicator> DomainTracker<M, C> {
    /// Bind to `mesh` without keeping it alive.
    pub fn new(mesh: &Arc<RwLock<M>>, comm: C) -> Self {
        Self {
            mesh: Arc::downgrade(mesh),
            comm,
            tags: TrackerCommTags::default(),
            tolerance: None,
            connectivity: None,
            map: None,
            global_node_numbers: None,
        }
    }

    pub fn with_tags(mut self, tags: TrackerCommTags) -> Self {
        self.tags = tags;
        self
    }

    /// Fix the absolute coincidence tolerance instead of deriving it from the
    /// global bounding box.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    /// Tear the run down on fatal errors before handing them back.
    fn escalate<T>(&self, result: Result<T, DecompositionError>) -> Result<T, DecompositionError> {
        if let Err(err) = &result
            && err.is_fatal()
            && !matches!(err, DecompositionError::Aborted { .. })
        {
            log::error!("{err}");
            self.comm.abort(&err.to_string());
        }
        result
    }

    fn upgrade(&self) -> Result<Arc<RwLock<M>>, DecompositionError> {
        self.mesh.upgrade().ok_or_else(|| {
            DecompositionError::configuration(
                self.rank(),
                "mesh",
                "the bound mesh no longer exists",
            )
        })
    }

    /// The bound mesh, if it is still alive.
    pub fn mesh(&self) -> Result<Arc<RwLock<M>>, DecompositionError> {
        self.escalate(self.upgrade())
    }

    fn match_tolerance(&self, mesh: &M) -> Result<f64, DecompositionError> {
        if let Some(tol) = self.tolerance {
            return Ok(tol);
        }
        let gathered = self
            .comm
            .all_gather(self.tags.discovery, &mesh.bounding_extent().to_le_bytes())?;
        let mut extent = 0.0f64;
        for (r, bytes) in gathered.iter().enumerate() {
            let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                DecompositionError::Communication {
                    rank: self.rank(),
                    peer: r,
                    detail: format!("bounding extent of {} bytes", bytes.len()),
                }
            })?;
            extent = extent.max(f64::from_le_bytes(raw));
        }
        Ok(coincidence_tolerance(extent))
    }

    fn connectivity_state(
        &self,
        operation: &'static str,
    ) -> Result<&ConnectivityState, DecompositionError> {
        self.connectivity
            .as_ref()
            .ok_or_else(|| missing_connectivity(self.rank(), operation))
    }

    fn check_unset(&self, operation: &'static str) -> Result<(), DecompositionError> {
        if self.connectivity.is_some() {
            return Err(DecompositionError::configuration(
                self.rank(),
                operation,
                "connectivity is already set",
            ));
        }
        Ok(())
    }

    fn check_regions(
        &self,
        operation: &'static str,
        regions: impl IntoIterator<Item = RegionId>,
    ) -> Result<(), DecompositionError> {
        let mesh = self.upgrade()?;
        let mesh = mesh.read();
        match regions.into_iter().find(|&r| !mesh.region_exists(r)) {
            None => Ok(()),
            Some(r) => Err(DecompositionError::configuration(
                self.rank(),
                operation,
                format!("region {r} does not exist in the mesh"),
            )),
        }
    }

    fn set_connectivity_inner(
        &mut self,
        neighbours: &[usize],
        interfaces: &[Option<RegionId>],
    ) -> Result<(), DecompositionError> {
        const OP: &str = "set_connectivity";
        self.check_unset(OP)?;
        let state = ConnectivityState::new(self.rank(), self.size(), neighbours, interfaces)?;
        self.check_regions(OP, interfaces.iter().flatten().copied())?;
        log::info!(
            "rank {}: connectivity set with neighbours {:?}",
            self.rank(),
            state.neighbours()
        );
        self.connectivity = Some(state);
        Ok(())
    }

    /// Store the neighbour list and its interface table: 3 entries per
    /// neighbour, in the order of `neighbours`, one per element dimension.
    pub fn set_connectivity(
        &mut self,
        neighbours: &[usize],
        interfaces: &[Option<RegionId>],
    ) -> Result<(), DecompositionError> {
        let result = self.set_connectivity_inner(neighbours, interfaces);
        self.escalate(result)
    }

    fn set_overlap_inner(
        &mut self,
        layers: usize,
        interfaces: &[OverlapInterface],
    ) -> Result<(), DecompositionError> {
        const OP: &str = "set_overlap";
        self.connectivity_state(OP)?;
        self.check_regions(OP, interfaces.iter().flat_map(|oi| [oi.inner, oi.outer]))?;
        let rank = self.rank();
        let state = self
            .connectivity
            .as_mut()
            .ok_or_else(|| missing_connectivity(rank, OP))?;
        state.set_overlap(layers, interfaces)?;
        self.map = None;
        self.global_node_numbers = None;
        Ok(())
    }

    /// Switch to the overlap regime with `layers` duplicated layers.
    pub fn set_overlap(
        &mut self,
        layers: usize,
        interfaces: &[OverlapInterface],
    ) -> Result<(), DecompositionError> {
        let result = self.set_overlap_inner(layers, interfaces);
        self.escalate(result)
    }

    fn discover_inner(
        &mut self,
        interface_region: RegionId,
        config: &DiscoveryConfig,
        sink: &dyn DiagnosticSink,
    ) -> Result<(), DecompositionError> {
        const OP: &str = "discover_connectivity";
        self.check_unset(OP)?;
        let mesh = self.upgrade()?;
        let found = {
            let guard = mesh.read();
            let tolerance = self.match_tolerance(&guard)?;
            discover_interfaces(
                &*guard,
                &self.comm,
                &self.tags,
                interface_region,
                config,
                tolerance,
                sink,
            )?
        };

        let neighbours = found.neighbours();
        let mut table = Vec::with_capacity(INTERFACE_DIMENSIONS * neighbours.len());
        {
            let mut guard = mesh.write();
            for sels in found.interfaces.values() {
                for sel in sels {
                    table.push((!sel.is_empty()).then(|| guard.create_region(sel)));
                }
            }
        }
        self.connectivity = Some(ConnectivityState::new(
            self.rank(),
            self.size(),
            &neighbours,
            &table,
        )?);
        Ok(())
    }

    /// Find neighbours and interfaces from the skin elements in `interface_region`
    /// and record one mesh region per non-empty `(neighbour, dimension)` interface.
    pub fn discover_connectivity(
        &mut self,
        interface_region: RegionId,
        config: &DiscoveryConfig,
    ) -> Result<(), DecompositionError> {
        self.discover_connectivity_with_sink(interface_region, config, &LogSink)
    }

    pub fn discover_connectivity_with_sink(
        &mut self,
        interface_region: RegionId,
        config: &DiscoveryConfig,
        sink: &dyn DiagnosticSink,
    ) -> Result<(), DecompositionError> {
        let result = self.discover_inner(interface_region, config, sink);
        self.escalate(result)
    }

    fn map_inner(&mut self) -> Result<(), DecompositionError> {
        let connectivity = self.connectivity_state("map_interfaces")?;
        let mesh = self.upgrade()?;
        let guard = mesh.read();
        let tolerance = self.match_tolerance(&guard)?;
        let map = if connectivity.is_overlap() {
            interface_map::map_overlap_interfaces(
                &*guard,
                &self.comm,
                self.tags.mapping,
                connectivity,
                tolerance,
            )?
        } else {
            interface_map::map_nooverlap_interfaces(
                &*guard,
                &self.comm,
                self.tags.mapping,
                connectivity,
                tolerance,
            )?
        };
        drop(guard);
        self.map = Some(map);
        self.global_node_numbers = None;
        Ok(())
    }

    /// Build the correspondence maps, from scratch, for the current regime.
    pub fn map_interfaces(&mut self) -> Result<(), DecompositionError> {
        let result = self.map_inner();
        self.escalate(result)
    }

    fn number_inner(&mut self) -> Result<(), DecompositionError> {
        const OP: &str = "create_global_node_numbers";
        let connectivity = self.connectivity_state(OP)?;
        let map = self.map.as_ref().ok_or_else(|| {
            DecompositionError::configuration(self.rank(), OP, "interfaces have not been mapped")
        })?;
        let mesh = self.upgrade()?;
        let guard = mesh.read();
        let tag = self.tags.numbering;
        let ids = if connectivity.is_overlap() {
            global_numbering::number_overlap(&*guard, &self.comm, tag, connectivity, map)?
        } else {
            global_numbering::number_nooverlap(&*guard, &self.comm, tag, connectivity, map)?
        };
        drop(guard);
        self.global_node_numbers = Some(ids);
        Ok(())
    }

    /// Assign global node ids, from scratch, for the current regime.
    pub fn create_global_node_numbers(&mut self) -> Result<(), DecompositionError> {
        let result = self.number_inner();
        self.escalate(result)
    }

    pub fn connectivity(&self) -> Result<&ConnectivityState, DecompositionError> {
        self.escalate(self.connectivity_state("connectivity"))
    }

    pub fn count_neighbours(&self) -> Result<usize, DecompositionError> {
        self.escalate(
            self.connectivity_state("count_neighbours")
                .map(ConnectivityState::count_neighbours),
        )
    }

    pub fn get_neighbours(&self) -> Result<&[usize], DecompositionError> {
        self.escalate(self.connectivity_state("get_neighbours").map(ConnectivityState::neighbours))
    }

    pub fn get_neighbour(&self, index: usize) -> Result<usize, DecompositionError> {
        self.escalate(
            self.connectivity_state("get_neighbour")
                .and_then(|c| c.neighbour(index)),
        )
    }

    pub fn is_neighbour(&self, rank: usize) -> Result<bool, DecompositionError> {
        self.escalate(
            self.connectivity_state("is_neighbour")
                .and_then(|c| c.is_neighbour(rank)),
        )
    }

    pub fn get_nooverlap_interface(
        &self,
        rank: usize,
        dim: usize,
    ) -> Result<Option<RegionId>, DecompositionError> {
        self.escalate(
            self.connectivity_state("get_nooverlap_interface")
                .and_then(|c| c.nooverlap_interface(rank, dim)),
        )
    }

    pub fn is_overlap(&self) -> Result<bool, DecompositionError> {
        self.escalate(self.connectivity_state("is_overlap").map(ConnectivityState::is_overlap))
    }

    pub fn overlap_layers(&self) -> Result<usize, DecompositionError> {
        self.escalate(
            self.connectivity_state("overlap_layers")
                .map(ConnectivityState::overlap_layers),
        )
    }

    pub fn get_map(&self) -> Result<&CorrespondenceMap, DecompositionError> {
        let map = self.map.as_ref().ok_or_else(|| {
            DecompositionError::configuration(
                self.rank(),
                "get_map",
                "interfaces have not been mapped",
            )
        });
        self.escalate(map)
    }

    pub fn get_global_node_numbers(&self) -> Result<&[i64], DecompositionError> {
        let ids = self.global_node_numbers.as_deref().ok_or_else(|| {
            DecompositionError::configuration(
                self.rank(),
                "get_global_node_numbers",
                "global node numbers have not been created",
            )
        });
        self.escalate(ids)
    }

    /// Dump the global node numbers of this rank, one per local node.
    pub fn write_global_node_numbers(
        &self,
        path: impl AsRef<Path>,
        format: GlobalNumberFormat,
    ) -> Result<(), DecompositionError> {
        let ids = self.get_global_node_numbers()?;
        self.escalate(crate::io::write_global_node_numbers(path, ids, format))
    }

    fn report_inner(&self) -> Result<InterfaceReport, DecompositionError> {
        let connectivity = self.connectivity_state("write_interfaces")?;
        let mesh = self.upgrade()?;
        let guard = mesh.read();
        let mut report = InterfaceReport::new(
            self.rank(),
            self.size(),
            connectivity.neighbours().to_vec(),
            connectivity.overlap_layers(),
        );
        for (neighbour, dimension, region) in connectivity.defined_interfaces() {
            let elements = ElementType::ALL
                .into_iter()
                .map(|ty| (ty, guard.region_elements(region, ty)))
                .filter(|(_, list)| !list.is_empty())
                .collect();
            report.interfaces.push(InterfaceEntry {
                neighbour,
                dimension,
                region,
                elements,
            });
        }
        Ok(report)
    }

    /// Neighbours and no-overlap interface regions of this rank.
    pub fn interface_report(&self) -> Result<InterfaceReport, DecompositionError> {
        self.escalate(self.report_inner())
    }

    /// Write [`Self::interface_report`] as JSON.
    pub fn write_interfaces(&self, path: impl AsRef<Path>) -> Result<(), DecompositionError> {
        let report = self.interface_report()?;
        self.escalate(report.write_json(path))
    }

    /// Human-readable neighbour and interface summary.
    pub fn print(&self, sink: &dyn DiagnosticSink) -> Result<(), DecompositionError> {
        let report = self.interface_report()?;
        sink.emit(&format!(
            "rank {}/{}: {} neighbours {:?}{}",
            report.rank,
            report.size,
            report.neighbours.len(),
            report.neighbours,
            if report.overlap_layers > 0 {
                format!(", {} overlap layers", report.overlap_layers)
            } else {
                String::new()
            }
        ));
        for entry in &report.interfaces {
            let counts: Vec<String> = entry
                .elements
                .iter()
                .map(|(ty, list)| format!("{} {ty}", list.len()))
                .collect();
            sink.emit(&format!(
                "  rank {} dim {}: region {} ({})",
                entry.neighbour,
                entry.dimension,
                entry.region,
                counts.join(", ")
            ));
        }
        if let Some(map) = &self.map {
            sink.emit(&format!("  {} mapped elements", map.mapped_count()));
        }
        if let Some(ids) = &self.global_node_numbers {
            let numbered = ids.iter().filter(|&&id| id >= 0).count();
            sink.emit(&format!("  {numbered} of {} nodes globally numbered", ids.len()));
        }
        Ok(())
    }
}
