//! Element correspondence across rank interfaces.
//!
//! For every neighbour the [`CorrespondenceMap`] translates the neighbour's local
//! element numbers into this rank's local element numbers. Entries are only ever
//! defined for interface elements (no-overlap regime) or overlap-zone elements
//! (overlap regime). Matching is by barycenter coincidence, restricted to
//! elements of the same type.
//!
//! Every exchange visits neighbours in ascending rank order, so the pairwise
//! [`Communicator::exchange`] calls of two ranks always line up.

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{WireBary, WireCount, WireHdr, WireReader, WireWriter, kind};
use crate::debug_invariants::{DebugInvariants, check_injective};
use crate::decomposition::connectivity::{ConnectivityState, INTERFACE_DIMENSIONS};
use crate::geometry::coincidence::BarycenterIndex;
use crate::mesh_error::DecompositionError;
use crate::topology::element_type::ElementType;
use crate::topology::mesh::{DomainMesh, ElementSelection};
use std::collections::BTreeSet;

/// Elements of one rank indexed by barycenter, matched per type.
#[derive(Clone, Debug)]
pub struct ElementLocator {
    entries: Vec<(ElementType, usize)>,
    index: BarycenterIndex,
}

impl ElementLocator {
    pub fn new<M: DomainMesh + ?Sized>(
        mesh: &M,
        entries: Vec<(ElementType, usize)>,
        tolerance: f64,
    ) -> Self {
        let points = entries
            .iter()
            .map(|&(ty, e)| mesh.barycenter(ty, e))
            .collect();
        Self {
            entries,
            index: BarycenterIndex::new(points, tolerance),
        }
    }

    /// Locator over a selection, skipping point elements placed on curvature nodes.
    pub fn from_selection<M: DomainMesh + ?Sized>(
        mesh: &M,
        selection: &ElementSelection,
        tolerance: f64,
    ) -> Self {
        let entries = selection
            .iter()
            .filter(|&(ty, e)| {
                ty != ElementType::Point || !mesh.is_curvature_node(mesh.point_node(e))
            })
            .collect();
        Self::new(mesh, entries, tolerance)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, i: usize) -> (ElementType, usize) {
        self.entries[i]
    }

    pub fn entries(&self) -> &[(ElementType, usize)] {
        &self.entries
    }

    pub fn barycenter(&self, i: usize) -> [f64; 3] {
        self.index.point(i)
    }

    /// Position of the element of type `ty` whose barycenter coincides with `p`.
    pub fn find(&self, ty: ElementType, p: [f64; 3]) -> Option<usize> {
        self.index.find_where(p, |i| self.entries[i].0 == ty)
    }

    /// Positions of every entry coinciding with `p`, whatever its type.
    pub fn find_any(&self, p: [f64; 3]) -> Vec<usize> {
        self.index.find_all(p)
    }

    /// Wire record of entry `i`.
    pub fn record(&self, i: usize, flag: u32) -> WireBary {
        let (ty, e) = self.entries[i];
        WireBary::new(self.barycenter(i), e, ty.index(), flag)
    }

    /// Per-type entry counts.
    pub fn type_counts(&self) -> [usize; ElementType::COUNT] {
        let mut counts = [0; ElementType::COUNT];
        for &(ty, _) in &self.entries {
            counts[ty.index()] += 1;
        }
        counts
    }
}

/// Flat correspondence table keyed by `(neighbour index, type, neighbour element)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrespondenceMap {
    rank: usize,
    neighbours: Vec<usize>,
    /// Slot `ni * COUNT + ty` spans `offsets[slot]..offsets[slot + 1]`.
    offsets: Vec<usize>,
    entries: Vec<Option<usize>>,
}

impl CorrespondenceMap {
    /// Empty map sized by each neighbour's local element counts.
    pub fn with_counts(
        rank: usize,
        neighbours: &[usize],
        counts: &[[usize; ElementType::COUNT]],
    ) -> Self {
        let mut offsets = Vec::with_capacity(counts.len() * ElementType::COUNT + 1);
        offsets.push(0);
        for per_type in counts {
            for &c in per_type {
                offsets.push(offsets[offsets.len() - 1] + c);
            }
        }
        let total = offsets[offsets.len() - 1];
        Self {
            rank,
            neighbours: neighbours.to_vec(),
            offsets,
            entries: vec![None; total],
        }
    }

    pub fn neighbours(&self) -> &[usize] {
        &self.neighbours
    }

    pub fn count_neighbours(&self) -> usize {
        self.neighbours.len()
    }

    fn span(
        &self,
        ni: usize,
        ty: ElementType,
    ) -> Result<std::ops::Range<usize>, DecompositionError> {
        if ni >= self.neighbours.len() {
            return Err(DecompositionError::bounds(
                self.rank,
                "get_map",
                ni,
                self.neighbours.len(),
            ));
        }
        let slot = ni * ElementType::COUNT + ty.index();
        Ok(self.offsets[slot]..self.offsets[slot + 1])
    }

    /// Slot of neighbour index `ni` for type `ty`, indexed by the neighbour's
    /// element number.
    pub fn slot(&self, ni: usize, ty: ElementType) -> Result<&[Option<usize>], DecompositionError> {
        let span = self.span(ni, ty)?;
        Ok(&self.entries[span])
    }

    /// Local element matching element `element` of type `ty` on neighbour index `ni`.
    pub fn get(
        &self,
        ni: usize,
        ty: ElementType,
        element: usize,
    ) -> Result<Option<usize>, DecompositionError> {
        let slot = self.slot(ni, ty)?;
        slot.get(element)
            .copied()
            .ok_or_else(|| DecompositionError::bounds(self.rank, "get_map", element, slot.len()))
    }

    /// `(neighbour element, local element)` pairs of one slot, in neighbour order.
    pub fn mapped(
        &self,
        ni: usize,
        ty: ElementType,
    ) -> Result<impl Iterator<Item = (usize, usize)> + '_, DecompositionError> {
        Ok(self
            .slot(ni, ty)?
            .iter()
            .enumerate()
            .filter_map(|(remote, local)| local.map(|l| (remote, l))))
    }

    pub fn mapped_count(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    fn set(
        &mut self,
        ni: usize,
        ty: ElementType,
        remote: usize,
        local: usize,
        operation: &'static str,
    ) -> Result<(), DecompositionError> {
        let span = self.span(ni, ty)?;
        let len = span.len();
        let entry = self.entries[span]
            .get_mut(remote)
            .ok_or_else(|| DecompositionError::bounds(self.rank, operation, remote, len))?;
        match *entry {
            Some(prev) if prev != local => Err(DecompositionError::consistency(
                self.rank,
                operation,
                format!(
                    "{ty} {remote} of rank {} matched both local {prev} and {local}",
                    self.neighbours[ni]
                ),
            )),
            _ => {
                *entry = Some(local);
                Ok(())
            }
        }
    }
}

impl DebugInvariants for CorrespondenceMap {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "CorrespondenceMap");
    }

    fn validate_invariants(&self) -> Result<(), DecompositionError> {
        if self.offsets.len() != self.neighbours.len() * ElementType::COUNT + 1 {
            return Err(DecompositionError::consistency(
                self.rank,
                "CorrespondenceMap::validate_invariants",
                format!(
                    "{} slot offsets for {} neighbours",
                    self.offsets.len(),
                    self.neighbours.len()
                ),
            ));
        }
        for ni in 0..self.neighbours.len() {
            for ty in ElementType::ALL {
                check_injective(
                    self.rank,
                    "CorrespondenceMap::validate_invariants",
                    &format!("{ty} slot of rank {}", self.neighbours[ni]),
                    self.slot(ni, ty)?,
                )?;
            }
        }
        Ok(())
    }
}

fn local_counts<M: DomainMesh + ?Sized>(mesh: &M) -> Vec<WireCount> {
    ElementType::ALL
        .iter()
        .map(|&ty| WireCount::new(mesh.element_count(ty)))
        .collect()
}

fn read_counts(
    reader: &mut WireReader<'_>,
) -> Result<[usize; ElementType::COUNT], DecompositionError> {
    let raw = reader.take::<WireCount>(ElementType::COUNT)?;
    let mut counts = [0; ElementType::COUNT];
    for (c, r) in counts.iter_mut().zip(&raw) {
        *c = r.get();
    }
    Ok(counts)
}

fn record_type(
    rank: usize,
    peer: usize,
    record: &WireBary,
) -> Result<ElementType, DecompositionError> {
    ElementType::from_index(record.type_index()).ok_or_else(|| DecompositionError::Communication {
        rank,
        peer,
        detail: format!("unknown element type index {}", record.type_index()),
    })
}

/// Match the no-overlap interfaces of every neighbour.
///
/// Both sides must declare the same interface dimensions, hold the same number
/// of interface elements per type, and every received element must coincide
/// with one local interface element.
pub fn map_nooverlap_interfaces<M, C>(
    mesh: &M,
    comm: &C,
    tag: CommTag,
    connectivity: &ConnectivityState,
    tolerance: f64,
) -> Result<CorrespondenceMap, DecompositionError>
where
    M: DomainMesh + ?Sized,
    C: Communicator,
{
    const OP: &str = "map_nooverlap_interfaces";
    let me = comm.rank();
    let neighbours = connectivity.neighbours();
    let mut staged = Vec::with_capacity(neighbours.len());
    let mut counts = Vec::with_capacity(neighbours.len());

    for &n in neighbours {
        let mut mask = 0u32;
        let mut selection = ElementSelection::new();
        for dim in 0..INTERFACE_DIMENSIONS {
            if let Some(region) = connectivity.nooverlap_interface(n, dim)? {
                mask |= 1 << dim;
                for ty in ElementType::of_dimension(dim) {
                    selection.extend(ty, mesh.region_elements(region, ty));
                }
            }
        }
        if mask == 0 {
            log::warn!("rank {me}: neighbour {n} has no no-overlap interface region");
        }
        let locator = ElementLocator::from_selection(mesh, &selection, tolerance);
        let records: Vec<WireBary> = (0..locator.len()).map(|i| locator.record(i, 0)).collect();
        let mut w = WireWriter::new(WireHdr::new(kind::NOOVERLAP_MAP, mask));
        w.put(&local_counts(mesh)).put_counted(&records);
        let reply = comm.exchange(n, tag, &w.finish())?;

        let (mut r, hdr) = WireReader::open(&reply, kind::NOOVERLAP_MAP, me, n)?;
        if hdr.aux() != mask {
            return Err(DecompositionError::consistency(
                me,
                OP,
                format!(
                    "rank {n} declares interface dimensions {:#05b}, this rank {mask:#05b}",
                    hdr.aux()
                ),
            ));
        }
        let remote_counts = read_counts(&mut r)?;
        let remote_records = r.take_counted::<WireBary>()?;
        r.finish()?;
        counts.push(remote_counts);
        staged.push((n, locator, remote_records));
    }

    let mut map = CorrespondenceMap::with_counts(me, neighbours, &counts);
    for (ni, (n, locator, records)) in staged.into_iter().enumerate() {
        let mut received = [0usize; ElementType::COUNT];
        for rec in &records {
            let ty = record_type(me, n, rec)?;
            received[ty.index()] += 1;
            let hit = locator.find(ty, rec.coords()).ok_or_else(|| {
                DecompositionError::consistency(
                    me,
                    OP,
                    format!(
                        "{ty} {} of rank {n} at {:?} has no coincident interface element",
                        rec.element(),
                        rec.coords()
                    ),
                )
            })?;
            map.set(ni, ty, rec.element(), locator.entry(hit).1, OP)?;
        }
        let expected = locator.type_counts();
        if let Some(ty) = ElementType::ALL
            .into_iter()
            .find(|ty| received[ty.index()] != expected[ty.index()])
        {
            return Err(DecompositionError::consistency(
                me,
                OP,
                format!(
                    "interface with rank {n} holds {} {ty} elements there, {} here",
                    received[ty.index()],
                    expected[ty.index()]
                ),
            ));
        }
    }
    map.debug_assert_invariants();
    log::info!(
        "rank {me}: mapped {} no-overlap interface elements with {} neighbours",
        map.mapped_count(),
        neighbours.len()
    );
    Ok(map)
}

/// Match the overlap zones of every neighbour.
///
/// The zone is the union of all inner and outer overlap regions. Elements the
/// sender flags (its copies of the receiver's elements) must match; the others
/// are mapped when the receiver holds them too.
pub fn map_overlap_interfaces<M, C>(
    mesh: &M,
    comm: &C,
    tag: CommTag,
    connectivity: &ConnectivityState,
    tolerance: f64,
) -> Result<CorrespondenceMap, DecompositionError>
where
    M: DomainMesh + ?Sized,
    C: Communicator,
{
    const OP: &str = "map_overlap_interfaces";
    let me = comm.rank();
    let overlaps = connectivity.overlap_interfaces();
    if !connectivity.is_overlap() {
        return Err(DecompositionError::configuration(
            me,
            OP,
            "no overlap regime declared",
        ));
    }

    let mut zone = ElementSelection::new();
    for oi in overlaps {
        for region in [oi.inner, oi.outer] {
            for ty in ElementType::ALL {
                zone.extend(ty, mesh.region_elements(region, ty));
            }
        }
    }
    let locator = ElementLocator::from_selection(mesh, &zone, tolerance);
    let local = local_counts(mesh);

    let mut staged = Vec::with_capacity(overlaps.len());
    let mut counts = Vec::with_capacity(overlaps.len());
    for oi in overlaps {
        let n = oi.neighbour;
        let outer = mesh.region_selection(oi.outer);
        let records: Vec<WireBary> = (0..locator.len())
            .map(|i| {
                let (ty, e) = locator.entry(i);
                locator.record(i, u32::from(outer.contains(ty, e)))
            })
            .collect();
        let mut w = WireWriter::new(WireHdr::new(kind::OVERLAP_MAP, 0));
        w.put(&local).put_counted(&records);
        let reply = comm.exchange(n, tag, &w.finish())?;

        let (mut r, _) = WireReader::open(&reply, kind::OVERLAP_MAP, me, n)?;
        counts.push(read_counts(&mut r)?);
        let remote_records = r.take_counted::<WireBary>()?;
        r.finish()?;
        staged.push((n, remote_records));
    }

    let mut map = CorrespondenceMap::with_counts(me, connectivity.neighbours(), &counts);
    for (ni, (n, records)) in staged.into_iter().enumerate() {
        for rec in &records {
            let ty = record_type(me, n, rec)?;
            match locator.find(ty, rec.coords()) {
                Some(hit) => map.set(ni, ty, rec.element(), locator.entry(hit).1, OP)?,
                None if rec.flag() != 0 => {
                    return Err(DecompositionError::consistency(
                        me,
                        OP,
                        format!(
                            "rank {n} holds a copy of {ty} {} at {:?} that this rank does not have",
                            rec.element(),
                            rec.coords()
                        ),
                    ));
                }
                None => {}
            }
        }
    }
    map.debug_assert_invariants();
    log::info!(
        "rank {me}: mapped {} overlap elements with {} neighbours ({} layers)",
        map.mapped_count(),
        overlaps.len(),
        connectivity.overlap_layers()
    );
    Ok(map)
}

/// Lower-dimensional interface entities of one rank and the other ranks known
/// to hold them.
#[derive(Clone, Debug)]
pub struct CrossInterfaceState {
    locator: ElementLocator,
    sharers: Vec<BTreeSet<usize>>,
}

impl CrossInterfaceState {
    pub fn new(locator: ElementLocator) -> Self {
        let sharers = vec![BTreeSet::new(); locator.len()];
        Self { locator, sharers }
    }

    pub fn locator(&self) -> &ElementLocator {
        &self.locator
    }

    pub fn sharers(&self, i: usize) -> &BTreeSet<usize> {
        &self.sharers[i]
    }

    pub fn add_sharer(&mut self, i: usize, rank: usize) -> bool {
        self.sharers[i].insert(rank)
    }

    /// Every rank sharing at least one entity.
    pub fn peers(&self) -> BTreeSet<usize> {
        self.sharers.iter().flatten().copied().collect()
    }
}

/// One round of sharer propagation.
///
/// Every rank tells each peer, for the entities they share, which other ranks
/// hold them too. Returns `false` once a round added no sharer on any rank.
pub fn discover_cross_interfaces<C: Communicator>(
    comm: &C,
    tag: CommTag,
    state: &mut CrossInterfaceState,
) -> Result<bool, DecompositionError> {
    const OP: &str = "discover_cross_interfaces";
    let me = comm.rank();
    let mut updates: Vec<(usize, usize)> = Vec::new();

    for n in state.peers() {
        let mut records = Vec::new();
        let mut ranks = Vec::new();
        for i in 0..state.locator.len() {
            let sharers = &state.sharers[i];
            if !sharers.contains(&n) {
                continue;
            }
            let others: Vec<usize> = sharers
                .iter()
                .copied()
                .chain(std::iter::once(me))
                .filter(|&r| r != n)
                .collect();
            records.push(state.locator.record(i, others.len() as u32));
            ranks.extend(others.into_iter().map(WireCount::new));
        }
        let mut w = WireWriter::new(WireHdr::new(kind::SHARERS, 0));
        w.put_counted(&records).put_counted(&ranks);
        let reply = comm.exchange(n, tag, &w.finish())?;

        let (mut r, _) = WireReader::open(&reply, kind::SHARERS, me, n)?;
        let remote = r.take_counted::<WireBary>()?;
        let remote_ranks = r.take_counted::<WireCount>()?;
        r.finish()?;
        let mut cursor = 0;
        for rec in &remote {
            let ty = record_type(me, n, rec)?;
            let hit = state.locator.find(ty, rec.coords()).ok_or_else(|| {
                DecompositionError::consistency(
                    me,
                    OP,
                    format!(
                        "rank {n} shares {ty} {} at {:?} that is not on this rank's interfaces",
                        rec.element(),
                        rec.coords()
                    ),
                )
            })?;
            let end = cursor + rec.flag() as usize;
            let listed = remote_ranks.get(cursor..end).ok_or_else(|| {
                DecompositionError::Communication {
                    rank: me,
                    peer: n,
                    detail: format!("sharer list overruns {} entries", remote_ranks.len()),
                }
            })?;
            cursor = end;
            for rank in listed.iter().map(WireCount::get) {
                if rank != me && !state.sharers[hit].contains(&rank) {
                    updates.push((hit, rank));
                }
            }
        }
    }

    let mut changed = false;
    for (i, rank) in updates {
        changed |= state.add_sharer(i, rank);
    }
    let flags = comm.all_gather(tag, &[u8::from(changed)])?;
    let any = flags.iter().any(|f| f.first().copied().unwrap_or(0) != 0);
    log::debug!("rank {me}: cross-interface round, local change {changed}, global {any}");
    Ok(any)
}
