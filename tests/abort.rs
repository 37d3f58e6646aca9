mod util;
use mesh_decomposition::prelude::*;
use util::*;

#[test]
fn failing_rank_tears_down_its_peers() {
    let layout = GridPartition::split(6, 2, 3, 1);
    let results = run_ranks(3, |comm| {
        let rank = comm.rank();
        let setup = rank_setup(&layout, rank);
        let mut tracker = manual_tracker(&setup, comm);
        if rank == 1 {
            // Numbering before mapping is a local configuration error.
            return tracker.create_global_node_numbers().unwrap_err();
        }
        tracker.map_interfaces().and_then(|()| tracker.create_global_node_numbers()).unwrap_err()
    });

    assert_eq!(results[1].kind(), ErrorKind::Configuration);
    for rank in [0, 2] {
        match &results[rank] {
            DecompositionError::Aborted { rank: r, origin, .. } => {
                assert_eq!(*r, rank);
                assert_eq!(*origin, 1);
            }
            other => panic!("rank {rank}: expected an abort, got {other}"),
        }
    }
}

#[test]
fn panicking_rank_releases_blocked_peers() {
    let layout = GridPartition::split(4, 2, 2, 1);
    let outcome = std::panic::catch_unwind(|| {
        run_ranks(2, |comm| {
            let setup = rank_setup(&layout, comm.rank());
            let mut tracker = manual_tracker(&setup, comm);
            if tracker.rank() == 0 {
                panic!("rank 0 gives up");
            }
            tracker.map_interfaces()
        })
    });
    assert!(outcome.is_err());
}

#[test]
fn accessor_error_aborts_later_collectives() {
    let layout = GridPartition::split(4, 2, 2, 1);
    let origins = run_ranks(2, |comm| {
        let setup = rank_setup(&layout, comm.rank());
        let mut tracker = manual_tracker(&setup, comm).with_tolerance(1e-9);
        if tracker.rank() == 1 {
            assert_eq!(tracker.get_neighbour(5).unwrap_err().kind(), ErrorKind::Bounds);
        }
        match tracker.map_interfaces() {
            Err(DecompositionError::Aborted { origin, .. }) => origin,
            other => panic!("expected an abort, got {other:?}"),
        }
    });
    assert_eq!(origins, vec![1, 1]);
}
