mod util;
use mesh_decomposition::prelude::*;
use std::collections::BTreeSet;
use util::*;

/// Grid points of the corners of a line element.
fn line_grid_points(setup: &RankSetup, line: usize) -> BTreeSet<usize> {
    let mesh = setup.mesh.read();
    mesh.element_nodes(ElementType::Line, line)[..2]
        .iter()
        .filter_map(|&node| setup.grid_point_of_node[node])
        .collect()
}

/// Every mapped point and line must name the same grid entity on both sides.
fn assert_map_matches_grid(layout: &GridPartition, setup: &RankSetup, map: &CorrespondenceMap) {
    let local_points = point_grid_points(setup);
    for (ni, &n) in map.neighbours().iter().enumerate() {
        let remote = rank_setup(layout, n);
        let remote_points = point_grid_points(&remote);
        for (theirs, mine) in map.mapped(ni, ElementType::Point).unwrap() {
            assert_eq!(remote_points[theirs], local_points[mine], "point from rank {n}");
        }
        for (theirs, mine) in map.mapped(ni, ElementType::Line).unwrap() {
            assert_eq!(line_grid_points(&remote, theirs), line_grid_points(setup, mine));
        }
    }
}

#[test]
fn nooverlap_maps_pair_identical_entities() {
    let layout = GridPartition::split(6, 4, 3, 2).with_shuffle(5);
    run_ranks(layout.rank_count(), |comm| {
        let setup = rank_setup(&layout, comm.rank());
        let mut tracker = manual_tracker(&setup, comm);
        tracker.map_interfaces().unwrap();
        let map = tracker.get_map().unwrap();
        assert_map_matches_grid(&layout, &setup, map);

        // Every interface element of every neighbour is matched exactly once.
        for (ni, (n, regions)) in setup.nooverlap.iter().enumerate() {
            assert_eq!(map.neighbours()[ni], *n);
            for (dim, ty) in [(0, ElementType::Point), (1, ElementType::Line)] {
                let expected: BTreeSet<usize> = regions[dim]
                    .map(|r| region_members(&setup, r, ty).into_iter().collect())
                    .unwrap_or_default();
                let mapped: BTreeSet<usize> =
                    map.mapped(ni, ty).unwrap().map(|(_, mine)| mine).collect();
                assert_eq!(mapped, expected, "{ty} with rank {n}");
            }
        }
        assert!(map.validate_invariants().is_ok());
    });
}

#[test]
fn remapping_is_idempotent() {
    let layout = GridPartition::split(4, 4, 2, 2).with_triangles().with_shuffle(2);
    run_ranks(layout.rank_count(), |comm| {
        let setup = rank_setup(&layout, comm.rank());
        let mut tracker = manual_tracker(&setup, comm);
        tracker.map_interfaces().unwrap();
        let first = tracker.get_map().unwrap().clone();
        tracker.map_interfaces().unwrap();
        assert_eq!(tracker.get_map().unwrap(), &first);
    });
}

#[test]
fn map_lookups_are_bounds_checked() {
    let layout = GridPartition::split(4, 2, 2, 1);
    run_ranks(2, |comm| {
        let setup = rank_setup(&layout, comm.rank());
        let mut tracker = manual_tracker(&setup, comm);
        tracker.map_interfaces().unwrap();
        let map = tracker.get_map().unwrap();
        assert_eq!(map.count_neighbours(), 1);
        assert_eq!(
            map.get(1, ElementType::Point, 0).unwrap_err().kind(),
            ErrorKind::Bounds
        );
        let points = map.slot(0, ElementType::Point).unwrap().len();
        assert_eq!(
            map.get(0, ElementType::Point, points).unwrap_err().kind(),
            ErrorKind::Bounds
        );
        // No cells lie on a no-overlap interface.
        assert_eq!(map.mapped(0, ElementType::Quadrangle).unwrap().count(), 0);
    });
}

#[test]
fn map_is_unavailable_before_mapping() {
    let layout = GridPartition::split(2, 2, 1, 1);
    let setup = rank_setup(&layout, 0);
    let mut tracker = manual_tracker(&setup, NoComm);
    assert_eq!(tracker.get_map().unwrap_err().kind(), ErrorKind::Configuration);
    tracker.map_interfaces().unwrap();
    assert_eq!(tracker.get_map().unwrap().count_neighbours(), 0);
    assert_eq!(tracker.get_map().unwrap().mapped_count(), 0);
}

fn assert_fatal_mismatch(results: &[ErrorKind]) {
    assert!(results.contains(&ErrorKind::Consistency), "{results:?}");
    assert!(
        results
            .iter()
            .all(|k| matches!(k, ErrorKind::Consistency | ErrorKind::Communication)),
        "{results:?}"
    );
}

#[test]
fn mismatched_interface_dimensions_are_detected() {
    let layout = GridPartition::split(4, 2, 2, 1);
    let kinds = run_ranks(2, |comm| {
        let rank = comm.rank();
        let setup = rank_setup(&layout, rank);
        let (n, mut regions) = setup.nooverlap[0];
        if rank == 1 {
            regions[0] = None;
        }
        let mut tracker = DomainTracker::new(&setup.mesh, comm).with_tolerance(1e-9);
        tracker.set_connectivity(&[n], &regions).unwrap();
        tracker.map_interfaces().unwrap_err().kind()
    });
    assert_fatal_mismatch(&kinds);
}

#[test]
fn unmatched_interface_element_is_detected() {
    let layout = GridPartition::split(4, 2, 2, 1);
    let kinds = run_ranks(2, |comm| {
        let rank = comm.rank();
        let setup = rank_setup(&layout, rank);
        let (n, mut regions) = setup.nooverlap[0];
        if rank == 0 {
            // Declare the whole skin as the line interface.
            regions[1] = Some(setup.skin_region);
        }
        let mut tracker = DomainTracker::new(&setup.mesh, comm).with_tolerance(1e-9);
        tracker.set_connectivity(&[n], &regions).unwrap();
        tracker.map_interfaces().unwrap_err().kind()
    });
    assert_fatal_mismatch(&kinds);
}

#[test]
fn overlap_zone_is_fully_mapped() {
    let layout = GridPartition::split(6, 6, 2, 2).with_overlap(1).with_shuffle(9);
    run_ranks(layout.rank_count(), |comm| {
        let setup = rank_setup(&layout, comm.rank());
        let mut tracker = manual_tracker(&setup, comm);
        tracker.map_interfaces().unwrap();
        let map = tracker.get_map().unwrap();
        assert_map_matches_grid(&layout, &setup, map);

        for (ni, oi) in setup.overlap.iter().enumerate() {
            assert_eq!(map.neighbours()[ni], oi.neighbour);
            for ty in [ElementType::Point, ElementType::Line, ElementType::Quadrangle] {
                let mapped: BTreeSet<usize> =
                    map.mapped(ni, ty).unwrap().map(|(_, mine)| mine).collect();
                for region in [oi.inner, oi.outer] {
                    for e in region_members(&setup, region, ty) {
                        assert!(
                            mapped.contains(&e),
                            "{ty} {e} of the overlap with rank {} is unmapped",
                            oi.neighbour
                        );
                    }
                }
            }
        }
    });
}

#[test]
fn declaring_overlap_discards_the_previous_map() {
    let layout = GridPartition::split(4, 2, 2, 1).with_overlap(1);
    run_ranks(2, |comm| {
        let setup = rank_setup(&layout, comm.rank());
        let neighbours: Vec<usize> = setup.overlap.iter().map(|oi| oi.neighbour).collect();
        let table = interface_table(&neighbours, &setup.nooverlap);
        let mut tracker = DomainTracker::new(&setup.mesh, comm);
        tracker.set_connectivity(&neighbours, &table).unwrap();
        tracker.map_interfaces().unwrap();
        let nooverlap_cells = tracker
            .get_map()
            .unwrap()
            .mapped(0, ElementType::Quadrangle)
            .unwrap()
            .count();
        assert_eq!(nooverlap_cells, 0);

        tracker.set_overlap(1, &setup.overlap).unwrap();
        assert!(format!("{tracker:?}").contains("mapped: None"));
        tracker.map_interfaces().unwrap();
        // Two owned columns of 2 cells each, one duplicated on each side.
        let overlap_cells = tracker
            .get_map()
            .unwrap()
            .mapped(0, ElementType::Quadrangle)
            .unwrap()
            .count();
        assert_eq!(overlap_cells, 4);
    });
}
