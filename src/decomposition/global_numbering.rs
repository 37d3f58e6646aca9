//! Cross-rank consistent global node numbering.
//!
//! Every physical corner node receives one id in `0..N`, identical on every rank
//! that holds a copy of it. Owned nodes are numbered inside a disjoint per-rank
//! range obtained from an exclusive prefix sum of the owned counts; copies learn
//! the owner's id through the correspondence maps. Curvature nodes have no
//! cross-rank identity and get [`NO_GLOBAL_ID`].
//!
//! A node shared by several ranks is owned by the lowest of them.

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{WireCount, WireHdr, WireKeyed, WireReader, WireWriter, kind};
use crate::decomposition::connectivity::ConnectivityState;
use crate::decomposition::interface_map::CorrespondenceMap;
use crate::mesh_error::DecompositionError;
use crate::topology::element_type::ElementType;
use crate::topology::mesh::DomainMesh;
use std::collections::BTreeSet;

/// Global id of a node without cross-rank identity.
pub const NO_GLOBAL_ID: i64 = -1;

/// Point element of every node, if the mesh holds one.
fn point_of_node<M: DomainMesh + ?Sized>(mesh: &M) -> Vec<Option<usize>> {
    let mut points = vec![None; mesh.node_count()];
    for p in 0..mesh.element_count(ElementType::Point) {
        points[mesh.point_node(p)] = Some(p);
    }
    points
}

/// Exclusive prefix sum of the owned counts of all ranks: `(first id, total)`.
fn owned_range<C: Communicator>(
    comm: &C,
    tag: CommTag,
    owned: usize,
) -> Result<(usize, usize), DecompositionError> {
    let mut w = WireWriter::new(WireHdr::new(kind::GLOBAL_IDS, 0));
    w.put(&[WireCount::new(owned)]);
    let gathered = comm.all_gather(tag, &w.finish())?;
    let mut counts = Vec::with_capacity(gathered.len());
    for (r, bytes) in gathered.iter().enumerate() {
        let (mut reader, _) = WireReader::open(bytes, kind::GLOBAL_IDS, comm.rank(), r)?;
        counts.push(reader.take_one::<WireCount>()?.get());
        reader.finish()?;
    }
    let first = counts[..comm.rank()].iter().sum();
    Ok((first, counts.iter().sum()))
}

/// Number the nodes of `ids` flagged as owned, in local node order, from `first`.
fn number_owned(ids: &mut [i64], owned: &[bool], first: usize) {
    let slots = ids.iter_mut().zip(owned).filter(|&(_, &o)| o);
    for ((id, _), next) in slots.zip(first as i64..) {
        *id = next;
    }
}

fn check_complete<M: DomainMesh + ?Sized>(
    mesh: &M,
    rank: usize,
    operation: &'static str,
    ids: &[i64],
) -> Result<(), DecompositionError> {
    match (0..ids.len()).find(|&n| !mesh.is_curvature_node(n) && ids[n] == NO_GLOBAL_ID) {
        None => Ok(()),
        Some(node) => Err(DecompositionError::consistency(
            rank,
            operation,
            format!(
                "node {node} at {:?} received no global id",
                mesh.node_coordinates(node)
            ),
        )),
    }
}

/// Decode one keyed message and translate its elements through the map slot of
/// neighbour index `ni`.
fn receive_keyed(
    reply: &[u8],
    expected: u16,
    map: &CorrespondenceMap,
    ni: usize,
    rank: usize,
    peer: usize,
    operation: &'static str,
) -> Result<Vec<(usize, i64)>, DecompositionError> {
    let (mut r, _) = WireReader::open(reply, expected, rank, peer)?;
    let records = r.take_counted::<WireKeyed>()?;
    r.finish()?;
    records
        .iter()
        .map(|rec| {
            map.get(ni, ElementType::Point, rec.element())?
                .map(|local| (local, rec.value()))
                .ok_or_else(|| {
                    DecompositionError::consistency(
                        rank,
                        operation,
                        format!("point {} of rank {peer} is not mapped", rec.element()),
                    )
                })
        })
        .collect()
}

/// Numbering for a decomposition whose ranks share only interface entities.
pub fn number_nooverlap<M, C>(
    mesh: &M,
    comm: &C,
    tag: CommTag,
    connectivity: &ConnectivityState,
    map: &CorrespondenceMap,
) -> Result<Vec<i64>, DecompositionError>
where
    M: DomainMesh + ?Sized,
    C: Communicator,
{
    const OP: &str = "create_global_node_numbers_nooverlap";
    let me = comm.rank();
    let neighbours = connectivity.neighbours();
    let node_point = point_of_node(mesh);

    // Co-owners of every point element, from the dimension-0 interfaces.
    let mut co_owners: Vec<BTreeSet<usize>> =
        vec![BTreeSet::new(); mesh.element_count(ElementType::Point)];
    for &n in neighbours {
        if let Some(region) = connectivity.nooverlap_interface(n, 0)? {
            for p in mesh.region_elements(region, ElementType::Point) {
                co_owners[p].insert(n);
            }
        }
    }
    let owner_of = |node: usize| {
        node_point[node]
            .and_then(|p| co_owners[p].first().copied())
            .map_or(me, |lowest| lowest.min(me))
    };

    let owned: Vec<bool> = (0..mesh.node_count())
        .map(|n| !mesh.is_curvature_node(n) && owner_of(n) == me)
        .collect();
    let (first, total) = owned_range(comm, tag, owned.iter().filter(|&&o| o).count())?;
    let mut ids = vec![NO_GLOBAL_ID; mesh.node_count()];
    number_owned(&mut ids, &owned, first);

    for (ni, &n) in neighbours.iter().enumerate() {
        let records: Vec<WireKeyed> = (0..co_owners.len())
            .filter(|&p| co_owners[p].contains(&n) && owned[mesh.point_node(p)])
            .map(|p| WireKeyed::new(p, ids[mesh.point_node(p)]))
            .collect();
        let mut w = WireWriter::new(WireHdr::new(kind::GLOBAL_IDS, 0));
        w.put_counted(&records);
        let reply = comm.exchange(n, tag, &w.finish())?;

        for (p, id) in receive_keyed(&reply, kind::GLOBAL_IDS, map, ni, me, n, OP)? {
            let node = mesh.point_node(p);
            let owner = owner_of(node);
            if owner != n {
                return Err(DecompositionError::consistency(
                    me,
                    OP,
                    format!("rank {n} numbered node {node}, which this rank assigns to rank {owner}"),
                ));
            }
            if ids[node] != NO_GLOBAL_ID && ids[node] != id {
                return Err(DecompositionError::consistency(
                    me,
                    OP,
                    format!("node {node} received ids {} and {id}", ids[node]),
                ));
            }
            ids[node] = id;
        }
    }
    check_complete(mesh, me, OP, &ids)?;
    log::info!(
        "rank {me}: numbered {} owned nodes of {total} (ids {first}..{})",
        owned.iter().filter(|&&o| o).count(),
        first + owned.iter().filter(|&&o| o).count()
    );
    Ok(ids)
}

/// Exchange one value per mapped point with every neighbour and fold the
/// received values into `values` with `merge`. Returns whether any value
/// changed on any rank.
fn propagate_round<M, C>(
    mesh: &M,
    comm: &C,
    tag: CommTag,
    message: u16,
    map: &CorrespondenceMap,
    values: &mut [i64],
    merge: &dyn Fn(usize, i64, i64) -> Result<Option<i64>, DecompositionError>,
) -> Result<bool, DecompositionError>
where
    M: DomainMesh + ?Sized,
    C: Communicator,
{
    const OP: &str = "create_global_node_numbers_overlap";
    let me = comm.rank();
    let mut received = Vec::new();
    for (ni, &n) in map.neighbours().iter().enumerate() {
        let shared: BTreeSet<usize> = map.mapped(ni, ElementType::Point)?.map(|(_, l)| l).collect();
        let records: Vec<WireKeyed> = shared
            .into_iter()
            .map(|p| WireKeyed::new(p, values[mesh.point_node(p)]))
            .collect();
        let mut w = WireWriter::new(WireHdr::new(message, 0));
        w.put_counted(&records);
        let reply = comm.exchange(n, tag, &w.finish())?;
        received.extend(receive_keyed(&reply, message, map, ni, me, n, OP)?);
    }

    let mut changed = false;
    for (p, value) in received {
        let node = mesh.point_node(p);
        if let Some(next) = merge(node, values[node], value)? {
            values[node] = next;
            changed = true;
        }
    }
    let flags = comm.all_gather(tag, &[u8::from(changed)])?;
    Ok(flags.iter().any(|f| f.first().copied().unwrap_or(0) != 0))
}

/// Numbering for a decomposition with duplicated overlap layers.
///
/// A node's owner is the lowest rank owning a cell that touches it. Owner
/// candidates and then ids are propagated to a fixed point through the maps,
/// so copies several layers away from the owner resolve transitively.
pub fn number_overlap<M, C>(
    mesh: &M,
    comm: &C,
    tag: CommTag,
    connectivity: &ConnectivityState,
    map: &CorrespondenceMap,
) -> Result<Vec<i64>, DecompositionError>
where
    M: DomainMesh + ?Sized,
    C: Communicator,
{
    const OP: &str = "create_global_node_numbers_overlap";
    let me = comm.rank();
    let cell_types: Vec<ElementType> = ElementType::of_dimension(mesh.dimension()).collect();

    let mut copied = vec![Vec::new(); ElementType::COUNT];
    for oi in connectivity.overlap_interfaces() {
        for &ty in &cell_types {
            copied[ty.index()].extend(mesh.region_elements(oi.outer, ty));
        }
    }
    for list in &mut copied {
        list.sort_unstable();
        list.dedup();
    }

    let mut candidate = vec![NO_GLOBAL_ID; mesh.node_count()];
    for &ty in &cell_types {
        for cell in 0..mesh.element_count(ty) {
            if copied[ty.index()].binary_search(&cell).is_ok() {
                continue;
            }
            for &node in &mesh.element_nodes(ty, cell)[..ty.corner_count()] {
                candidate[node] = me as i64;
            }
        }
    }

    let lowest = |_: usize, mine: i64, theirs: i64| -> Result<Option<i64>, DecompositionError> {
        Ok((theirs != NO_GLOBAL_ID && (mine == NO_GLOBAL_ID || theirs < mine)).then_some(theirs))
    };
    let mut rounds = 1;
    while propagate_round(
        mesh,
        comm,
        tag,
        kind::OWNER_CANDIDATES,
        map,
        &mut candidate,
        &lowest,
    )? {
        rounds += 1;
    }

    let owned: Vec<bool> = (0..mesh.node_count())
        .map(|n| !mesh.is_curvature_node(n) && candidate[n] == me as i64)
        .collect();
    let owned_count = owned.iter().filter(|&&o| o).count();
    let (first, total) = owned_range(comm, tag, owned_count)?;
    let mut ids = vec![NO_GLOBAL_ID; mesh.node_count()];
    number_owned(&mut ids, &owned, first);

    let agree = |node: usize, mine: i64, theirs: i64| -> Result<Option<i64>, DecompositionError> {
        match (mine, theirs) {
            (_, NO_GLOBAL_ID) => Ok(None),
            (NO_GLOBAL_ID, t) => Ok(Some(t)),
            (m, t) if m == t => Ok(None),
            (m, t) => Err(DecompositionError::consistency(
                me,
                OP,
                format!("node {node} received ids {m} and {t}"),
            )),
        }
    };
    while propagate_round(mesh, comm, tag, kind::GLOBAL_IDS, map, &mut ids, &agree)? {
        rounds += 1;
    }
    check_complete(mesh, me, OP, &ids)?;
    log::info!(
        "rank {me}: numbered {owned_count} owned nodes of {total} in {rounds} propagation rounds"
    );
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_nodes_take_consecutive_ids() {
        let mut ids = vec![NO_GLOBAL_ID; 5];
        number_owned(&mut ids, &[true, false, true, false, true], 10);
        assert_eq!(ids, vec![10, -1, 11, -1, 12]);
    }
}
