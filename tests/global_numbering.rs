mod util;
use mesh_decomposition::prelude::*;
use util::*;

#[test]
fn two_way_split_numbers_every_corner_once() {
    let layout = GridPartition::split(4, 4, 2, 1);
    assert_consistent_numbering(&layout, &number_manually(&layout));
}

#[test]
fn quadrants_agree_on_the_shared_centre() {
    let layout = GridPartition::split(4, 4, 2, 2).with_shuffle(17);
    let per_rank = number_manually(&layout);
    assert_consistent_numbering(&layout, &per_rank);

    // Rank 0 owns every node it holds, so its ids come first and in local order.
    let (ids, _) = &per_rank[0];
    let expected: Vec<i64> = (0..ids.len() as i64).collect();
    assert_eq!(ids, &expected);
}

#[test]
fn shuffled_triangles_on_six_ranks() {
    let layout = GridPartition::split(6, 4, 3, 2).with_triangles().with_shuffle(23);
    assert_consistent_numbering(&layout, &number_manually(&layout));
}

#[test]
fn curvature_nodes_stay_unnumbered() {
    let layout = GridPartition::split(4, 2, 2, 1).with_order(2).with_shuffle(1);
    let per_rank = number_manually(&layout);
    assert_consistent_numbering(&layout, &per_rank);
    for (ids, gps) in &per_rank {
        let curvature = gps.iter().filter(|gp| gp.is_none()).count();
        assert!(curvature > 0);
        assert_eq!(ids.iter().filter(|&&id| id == NO_GLOBAL_ID).count(), curvature);
    }
}

#[test]
fn ownership_goes_to_the_lowest_rank() {
    let layout = GridPartition::split(6, 2, 3, 1);
    let per_rank = number_manually(&layout);
    assert_consistent_numbering(&layout, &per_rank);
    // Rank 0 holds 3x3 corners, rank 1 gives away its left column, rank 2 too.
    let owned: Vec<usize> = vec![9, 6, 6];
    let mut first = 0i64;
    for ((ids, _), count) in per_rank.iter().zip(owned) {
        let mine = ids
            .iter()
            .filter(|&&id| id >= first && id < first + count as i64)
            .count();
        assert_eq!(mine, count);
        first += count as i64;
    }
}

#[test]
fn numbering_requires_a_map() {
    let layout = GridPartition::split(2, 2, 1, 1);
    let setup = rank_setup(&layout, 0);
    let mut tracker = manual_tracker(&setup, NoComm);
    let err = tracker.create_global_node_numbers().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    tracker.map_interfaces().unwrap();
    tracker.create_global_node_numbers().unwrap();
    let ids = tracker.get_global_node_numbers().unwrap();
    assert_eq!(ids, (0..9).collect::<Vec<i64>>().as_slice());
}

#[test]
fn remapping_discards_previous_numbers() {
    let layout = GridPartition::split(4, 2, 2, 1);
    run_ranks(2, |comm| {
        let setup = rank_setup(&layout, comm.rank());
        let mut tracker = manual_tracker(&setup, comm);
        tracker.map_interfaces().unwrap();
        tracker.create_global_node_numbers().unwrap();
        let first = tracker.get_global_node_numbers().unwrap().to_vec();
        tracker.map_interfaces().unwrap();
        assert!(format!("{tracker:?}").contains("numbered: false"));
        tracker.create_global_node_numbers().unwrap();
        assert_eq!(tracker.get_global_node_numbers().unwrap(), first.as_slice());
    });
}

#[test]
fn discovered_connectivity_numbers_consistently() {
    let layout = GridPartition::split(8, 6, 4, 3).with_triangles().with_shuffle(31);
    let per_rank = run_ranks(layout.rank_count(), |comm| {
        let setup = rank_setup(&layout, comm.rank());
        let mut tracker = DomainTracker::new(&setup.mesh, comm);
        tracker
            .discover_connectivity(setup.skin_region, &DiscoveryConfig::default())
            .unwrap();
        tracker.map_interfaces().unwrap();
        tracker.create_global_node_numbers().unwrap();
        (
            tracker.get_global_node_numbers().unwrap().to_vec(),
            setup.grid_point_of_node.clone(),
        )
    });
    assert_consistent_numbering(&layout, &per_rank);
}
