use mesh_decomposition::prelude::*;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One hexahedron per rank, ranks laid out 2x2 in the xy plane. Every rank holds
/// the full closure of its cell and tags all six faces as its skin.
fn hex_column(rank: usize) -> (Arc<RwLock<InMemoryMesh>>, RegionId) {
    let (i, j) = ((rank % 2) as f64, (rank / 2) as f64);
    let corners: [[f64; 3]; 8] = [
        [i, j, 0.0],
        [i + 1.0, j, 0.0],
        [i + 1.0, j + 1.0, 0.0],
        [i, j + 1.0, 0.0],
        [i, j, 1.0],
        [i + 1.0, j, 1.0],
        [i + 1.0, j + 1.0, 1.0],
        [i, j + 1.0, 1.0],
    ];
    let mut mesh = InMemoryMesh::new(3).unwrap();
    // Local numbering differs per rank.
    let order: Vec<usize> = (0..8).map(|k| (k + 3 * rank) % 8).collect();
    let mut node_of = [0usize; 8];
    for &k in &order {
        node_of[k] = mesh.add_node(corners[k], false);
    }
    for &k in order.iter().rev() {
        mesh.add_element(ElementType::Point, vec![node_of[k]]).unwrap();
    }
    let hex = ElementType::Hexahedron;
    for e in hex.edges() {
        mesh.add_element(ElementType::Line, vec![node_of[e[0]], node_of[e[1]]])
            .unwrap();
    }
    let mut skin = ElementSelection::new();
    let faces: Vec<&[usize]> = if rank % 2 == 0 {
        hex.faces().to_vec()
    } else {
        hex.faces().iter().rev().copied().collect()
    };
    for f in faces {
        let nodes = f.iter().map(|&c| node_of[c]).collect();
        let q = mesh.add_element(ElementType::Quadrangle, nodes).unwrap();
        skin.insert(ElementType::Quadrangle, q);
    }
    mesh.add_element(hex, node_of.to_vec()).unwrap();
    let skin_region = mesh.add_region(skin).unwrap();
    (Arc::new(RwLock::new(mesh)), skin_region)
}

fn lattice_key(c: [f64; 3]) -> [i64; 3] {
    c.map(|x| x.round() as i64)
}

#[derive(Debug)]
struct RankOutcome {
    neighbours: Vec<usize>,
    /// Interface sizes per neighbour: (points, lines, quadrangles).
    interface_sizes: BTreeMap<usize, (usize, usize, usize)>,
    mapped_faces: BTreeMap<usize, usize>,
    mapped: usize,
    ids_by_position: Vec<([i64; 3], i64)>,
}

fn run_hex_columns() -> Vec<RankOutcome> {
    run_ranks(4, |comm| {
        let (mesh, skin_region) = hex_column(comm.rank());
        let mut tracker = DomainTracker::new(&mesh, comm);
        tracker
            .discover_connectivity(skin_region, &DiscoveryConfig::default())
            .unwrap();
        tracker.map_interfaces().unwrap();
        tracker.create_global_node_numbers().unwrap();

        let neighbours = tracker.get_neighbours().unwrap().to_vec();
        let guard = mesh.read();
        let count = |n: usize, dim: usize, ty: ElementType| {
            tracker
                .get_nooverlap_interface(n, dim)
                .unwrap()
                .map_or(0, |region| guard.region_elements(region, ty).len())
        };
        let interface_sizes = neighbours
            .iter()
            .map(|&n| {
                let sizes = (
                    count(n, 0, ElementType::Point),
                    count(n, 1, ElementType::Line),
                    count(n, 2, ElementType::Quadrangle),
                );
                (n, sizes)
            })
            .collect();
        let map = tracker.get_map().unwrap();
        let mapped_faces = neighbours
            .iter()
            .enumerate()
            .map(|(ni, &n)| (n, map.mapped(ni, ElementType::Quadrangle).unwrap().count()))
            .collect();
        let ids = tracker.get_global_node_numbers().unwrap();
        let ids_by_position = (0..guard.node_count())
            .map(|node| (lattice_key(guard.node_coordinates(node)), ids[node]))
            .collect();
        RankOutcome {
            neighbours,
            interface_sizes,
            mapped_faces,
            mapped: map.mapped_count(),
            ids_by_position,
        }
    })
}

#[test]
fn hexahedra_share_faces_edges_and_points() {
    let outcomes = run_hex_columns();
    for (rank, out) in outcomes.iter().enumerate() {
        let expected: Vec<usize> = (0..4).filter(|&r| r != rank).collect();
        assert_eq!(out.neighbours, expected, "rank {rank}");
        let diagonal = 3 - rank;
        for (&n, &sizes) in &out.interface_sizes {
            if n == diagonal {
                // Only the central vertical edge and its two end points.
                assert_eq!(sizes, (2, 1, 0), "rank {rank}: diagonal {n}");
                assert_eq!(out.mapped_faces[&n], 0);
            } else {
                assert_eq!(sizes, (4, 4, 1), "rank {rank}: face neighbour {n}");
                assert_eq!(out.mapped_faces[&n], 1);
            }
        }
        assert_eq!(out.mapped, 2 * (4 + 4 + 1) + (2 + 1), "rank {rank}");
    }
}

#[test]
fn diagonal_has_no_face_interface() {
    let diagonal = run_ranks(4, |comm| {
        let (mesh, skin_region) = hex_column(comm.rank());
        let mut tracker = DomainTracker::new(&mesh, comm);
        tracker
            .discover_connectivity(skin_region, &DiscoveryConfig::default())
            .unwrap();
        let opposite = 3 - tracker.rank();
        (
            tracker.get_nooverlap_interface(opposite, 1).unwrap().is_some(),
            tracker.get_nooverlap_interface(opposite, 2).unwrap().is_some(),
        )
    });
    assert!(diagonal.iter().all(|&(edge, face)| edge && !face));
}

#[test]
fn hexahedra_number_the_lattice_once() {
    let outcomes = run_hex_columns();
    let mut id_of: BTreeMap<[i64; 3], i64> = BTreeMap::new();
    for (rank, out) in outcomes.iter().enumerate() {
        for &(key, id) in &out.ids_by_position {
            let prev = *id_of.entry(key).or_insert(id);
            assert_eq!(prev, id, "rank {rank}: node at {key:?}");
        }
    }
    // 3 x 3 x 2 lattice nodes.
    let mut ids: Vec<i64> = id_of.values().copied().collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..18).collect::<Vec<i64>>());
}
