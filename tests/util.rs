#![allow(dead_code)]
use mesh_decomposition::prelude::*;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One rank's generated mesh, shared the way an application would own it.
pub struct RankSetup {
    pub mesh: Arc<RwLock<InMemoryMesh>>,
    pub skin_region: RegionId,
    pub nooverlap: Vec<(usize, [Option<RegionId>; 3])>,
    pub overlap: Vec<OverlapInterface>,
    pub overlap_layers: usize,
    pub grid_point_of_node: Vec<Option<usize>>,
}

pub fn rank_setup(layout: &GridPartition, rank: usize) -> RankSetup {
    let pm = partitioned_grid(layout, rank).unwrap();
    RankSetup {
        mesh: Arc::new(RwLock::new(pm.mesh)),
        skin_region: pm.skin_region,
        nooverlap: pm.nooverlap,
        overlap: pm.overlap,
        overlap_layers: layout.overlap_layers,
        grid_point_of_node: pm.grid_point_of_node,
    }
}

/// Neighbour list and flat interface table in the layout `set_connectivity` takes.
/// Neighbours without a no-overlap entry get an all-`None` row.
pub fn interface_table(
    neighbours: &[usize],
    nooverlap: &[(usize, [Option<RegionId>; 3])],
) -> Vec<Option<RegionId>> {
    let rows: BTreeMap<usize, [Option<RegionId>; 3]> = nooverlap.iter().copied().collect();
    neighbours
        .iter()
        .flat_map(|n| rows.get(n).copied().unwrap_or([None; 3]))
        .collect()
}

/// Tracker with connectivity set from the generator's ground truth.
pub fn manual_tracker<C: Communicator>(
    setup: &RankSetup,
    comm: C,
) -> DomainTracker<InMemoryMesh, C> {
    let mut tracker = DomainTracker::new(&setup.mesh, comm);
    if setup.overlap.is_empty() {
        let neighbours: Vec<usize> = setup.nooverlap.iter().map(|(n, _)| *n).collect();
        let table = interface_table(&neighbours, &setup.nooverlap);
        tracker.set_connectivity(&neighbours, &table).unwrap();
    } else {
        let neighbours: Vec<usize> = setup.overlap.iter().map(|oi| oi.neighbour).collect();
        let table = interface_table(&neighbours, &setup.nooverlap);
        tracker.set_connectivity(&neighbours, &table).unwrap();
        tracker
            .set_overlap(setup.overlap_layers, &setup.overlap)
            .unwrap();
    }
    tracker
}

/// Grid point of every local point element.
pub fn point_grid_points(setup: &RankSetup) -> Vec<Option<usize>> {
    let mesh = setup.mesh.read();
    (0..mesh.element_count(ElementType::Point))
        .map(|p| setup.grid_point_of_node[mesh.point_node(p)])
        .collect()
}

/// Check that `(ids, grid_point_of_node)` of every rank describe one global
/// numbering: equal ids on every copy, distinct ids for distinct grid points,
/// ids covering exactly `0..N`, and `-1` on curvature nodes.
pub fn assert_consistent_numbering(
    layout: &GridPartition,
    per_rank: &[(Vec<i64>, Vec<Option<usize>>)],
) {
    let mut id_of_gp: BTreeMap<usize, i64> = BTreeMap::new();
    for (rank, (ids, gps)) in per_rank.iter().enumerate() {
        assert_eq!(ids.len(), gps.len(), "rank {rank}: one id per node");
        for (node, (&id, gp)) in ids.iter().zip(gps).enumerate() {
            match gp {
                None => assert_eq!(id, NO_GLOBAL_ID, "rank {rank}: curvature node {node}"),
                Some(gp) => {
                    assert!(id >= 0, "rank {rank}: node {node} has no id");
                    let prev = *id_of_gp.entry(*gp).or_insert(id);
                    assert_eq!(prev, id, "rank {rank}: grid point {gp} numbered twice");
                }
            }
        }
    }
    assert_eq!(id_of_gp.len(), layout.corner_node_count());
    let mut ids: Vec<i64> = id_of_gp.values().copied().collect();
    ids.sort_unstable();
    let expected: Vec<i64> = (0..layout.corner_node_count() as i64).collect();
    assert_eq!(ids, expected, "ids must be a permutation of 0..N");
}

/// Map the interfaces and number the nodes on every rank of `layout`, with
/// manually set connectivity.
pub fn number_manually(layout: &GridPartition) -> Vec<(Vec<i64>, Vec<Option<usize>>)> {
    run_ranks(layout.rank_count(), |comm| {
        let setup = rank_setup(layout, comm.rank());
        let mut tracker = manual_tracker(&setup, comm);
        tracker.map_interfaces().unwrap();
        tracker.create_global_node_numbers().unwrap();
        (
            tracker.get_global_node_numbers().unwrap().to_vec(),
            setup.grid_point_of_node.clone(),
        )
    })
}

/// Sorted members of `region` of type `ty`.
pub fn region_members(setup: &RankSetup, region: RegionId, ty: ElementType) -> Vec<usize> {
    setup.mesh.read().region_elements(region, ty)
}
