//! Automatic neighbour and interface discovery.
//!
//! Discovery works on the skin of each rank's subdomain (its elements of
//! dimension `cell - 1`) in synchronised sample-and-match rounds:
//!
//! 1. every rank samples unsettled skin elements, evenly spread, up to the
//!    current trial count, and all-gathers their barycenters;
//! 2. every rank matches the foreign samples against all of its skin
//!    barycenters; a coincidence makes the sample's owner a neighbour;
//! 3. found sets are all-gathered and made symmetric;
//! 4. each newly found pair of neighbours swaps every unassigned skin barycenter
//!    and assigns the coincident elements to each other;
//! 5. sampled elements are settled and the trial count doubles.
//!
//! The loop ends on the first round in which no rank contributes a sample.
//! Lower-dimensional interfaces are then seeded from the sub-elements of the
//! assigned skin elements and completed by cross-interface propagation.
//!
//! Precondition: distinct, non-corresponding boundary entities never share a
//! coincident barycenter. Entities that touch a rank only through the global
//! skin, with no chain of interfaces leading to them, are not discovered.

use crate::algs::communicator::{Communicator, TrackerCommTags};
use crate::algs::wire::{WireBary, WireCount, WireHdr, WireReader, WireWriter, kind};
use crate::decomposition::connectivity::INTERFACE_DIMENSIONS;
use crate::decomposition::diagnostics::DiagnosticSink;
use crate::decomposition::interface_map::{
    CrossInterfaceState, ElementLocator, discover_cross_interfaces,
};
use crate::mesh_error::DecompositionError;
use crate::topology::element_type::ElementType;
use crate::topology::mesh::{DomainMesh, ElementSelection, RegionId};
use std::collections::{BTreeMap, BTreeSet};

/// Tuning knobs of [`discover_interfaces`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Samples per rank in the first round; doubles every round.
    pub num_trial_elements: usize,
    /// 1 prints one line per round, 2 also the final summary.
    pub verbosity: u8,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            num_trial_elements: 10,
            verbosity: 0,
        }
    }
}

/// Interfaces found by discovery: per neighbour, one selection per dimension.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiscoveredInterfaces {
    pub interfaces: BTreeMap<usize, [ElementSelection; INTERFACE_DIMENSIONS]>,
    pub rounds: usize,
}

impl DiscoveredInterfaces {
    pub fn neighbours(&self) -> Vec<usize> {
        self.interfaces.keys().copied().collect()
    }
}

/// Skin elements of this rank and their assignment to neighbours.
#[derive(Clone, Debug)]
pub struct SkinCandidates {
    locator: ElementLocator,
    touching: Vec<Option<usize>>,
    settled: Vec<bool>,
    neighbours: BTreeSet<usize>,
}

impl SkinCandidates {
    pub fn new(locator: ElementLocator) -> Self {
        let n = locator.len();
        Self {
            locator,
            touching: vec![None; n],
            settled: vec![false; n],
            neighbours: BTreeSet::new(),
        }
    }

    pub fn touching(&self, i: usize) -> Option<usize> {
        self.touching[i]
    }

    pub fn neighbours(&self) -> &BTreeSet<usize> {
        &self.neighbours
    }

    fn unsettled(&self) -> Vec<usize> {
        (0..self.locator.len())
            .filter(|&i| !self.settled[i] && self.touching[i].is_none())
            .collect()
    }

    /// Up to `trial` unsettled elements, evenly spread over the candidate list.
    fn sample(&self, trial: usize) -> Vec<usize> {
        let candidates = self.unsettled();
        if candidates.len() <= trial {
            return candidates;
        }
        (0..trial)
            .map(|k| candidates[k * candidates.len() / trial])
            .collect()
    }

    fn unassigned_records(&self) -> Vec<WireBary> {
        (0..self.locator.len())
            .filter(|&i| self.touching[i].is_none())
            .map(|i| self.locator.record(i, 0))
            .collect()
    }
}

fn decode_records(
    bytes: &[u8],
    expected: u16,
    rank: usize,
    peer: usize,
) -> Result<Vec<WireBary>, DecompositionError> {
    let (mut r, _) = WireReader::open(bytes, expected, rank, peer)?;
    let records = r.take_counted::<WireBary>()?;
    r.finish()?;
    Ok(records)
}

/// One sample-and-match round with `trial` samples per rank.
///
/// Returns the number of samples every rank contributed, or an empty vector
/// once no rank had anything left to sample.
pub fn discover_some_neighbours<C: Communicator>(
    comm: &C,
    tags: &TrackerCommTags,
    skin: &mut SkinCandidates,
    trial: usize,
) -> Result<Vec<usize>, DecompositionError> {
    let me = comm.rank();
    let sampled = skin.sample(trial);
    let records: Vec<WireBary> = sampled.iter().map(|&i| skin.locator.record(i, 0)).collect();
    let mut w = WireWriter::new(WireHdr::new(kind::SAMPLES, 0));
    w.put_counted(&records);
    let gathered = comm.all_gather(tags.discovery, &w.finish())?;

    let mut counts = Vec::with_capacity(gathered.len());
    let mut found = BTreeSet::new();
    for (r, bytes) in gathered.iter().enumerate() {
        let samples = decode_records(bytes, kind::SAMPLES, me, r)?;
        counts.push(samples.len());
        if r == me {
            continue;
        }
        if samples.iter().any(|s| !skin.locator.find_any(s.coords()).is_empty()) {
            found.insert(r);
        }
    }
    if counts.iter().all(|&c| c == 0) {
        return Ok(Vec::new());
    }

    let found_list: Vec<WireCount> = found.iter().map(|&r| WireCount::new(r)).collect();
    let mut w = WireWriter::new(WireHdr::new(kind::FOUND_NEIGHBOURS, 0));
    w.put_counted(&found_list);
    let all_found = comm.all_gather(tags.discovery, &w.finish())?;
    for (r, bytes) in all_found.iter().enumerate() {
        let (mut reader, _) = WireReader::open(bytes, kind::FOUND_NEIGHBOURS, me, r)?;
        let listed = reader.take_counted::<WireCount>()?;
        reader.finish()?;
        if listed.iter().any(|c| c.get() == me) {
            found.insert(r);
        }
    }
    found.remove(&me);

    let fresh: Vec<usize> = found.difference(&skin.neighbours).copied().collect();
    for &n in &fresh {
        let mut w = WireWriter::new(WireHdr::new(kind::INTERFACE_BARYCENTERS, 0));
        w.put_counted(&skin.unassigned_records());
        let reply = comm.exchange(n, tags.interfaces, &w.finish())?;
        for rec in decode_records(&reply, kind::INTERFACE_BARYCENTERS, me, n)? {
            let Some(ty) = ElementType::from_index(rec.type_index()) else {
                return Err(DecompositionError::Communication {
                    rank: me,
                    peer: n,
                    detail: format!("unknown element type index {}", rec.type_index()),
                });
            };
            if let Some(hit) = skin.locator.find(ty, rec.coords()) {
                if skin.touching[hit].is_none() {
                    skin.touching[hit] = Some(n);
                }
            }
        }
        skin.neighbours.insert(n);
    }
    for i in sampled {
        skin.settled[i] = true;
    }
    log::debug!(
        "rank {me}: discovery round with {trial} trials, samples {counts:?}, new neighbours {fresh:?}"
    );
    Ok(counts)
}

/// Discover every neighbour and interface of the skin held in `interface_region`.
pub fn discover_interfaces<M, C>(
    mesh: &M,
    comm: &C,
    tags: &TrackerCommTags,
    interface_region: RegionId,
    config: &DiscoveryConfig,
    tolerance: f64,
    sink: &dyn DiagnosticSink,
) -> Result<DiscoveredInterfaces, DecompositionError>
where
    M: DomainMesh + ?Sized,
    C: Communicator,
{
    const OP: &str = "discover_connectivity";
    let me = comm.rank();
    if config.num_trial_elements == 0 {
        return Err(DecompositionError::configuration(
            me,
            OP,
            "num_trial_elements must be positive",
        ));
    }
    let cell_dim = mesh.dimension();
    if cell_dim == 0 {
        return Err(DecompositionError::configuration(
            me,
            OP,
            "a mesh of points has no skin",
        ));
    }
    if !mesh.region_exists(interface_region) {
        return Err(DecompositionError::configuration(
            me,
            OP,
            format!("interface region {interface_region} does not exist"),
        ));
    }
    let skin_dim = cell_dim - 1;

    let mut skin_elements = Vec::new();
    for ty in ElementType::of_dimension(skin_dim) {
        skin_elements.extend(
            mesh.region_elements(interface_region, ty)
                .into_iter()
                .map(|e| (ty, e)),
        );
    }
    let mut skin = SkinCandidates::new(ElementLocator::new(mesh, skin_elements, tolerance));

    let mut trial = config.num_trial_elements;
    let mut rounds = 0;
    loop {
        let counts = discover_some_neighbours(comm, tags, &mut skin, trial)?;
        if counts.is_empty() {
            break;
        }
        rounds += 1;
        if config.verbosity >= 1 {
            sink.emit(&format!(
                "rank {me}: round {rounds}: {} trial elements, {} samples gathered, {} neighbours",
                trial,
                counts.iter().sum::<usize>(),
                skin.neighbours.len()
            ));
        }
        trial = trial.saturating_mul(2);
    }

    // Seed the lower dimensions from the sub-elements of assigned skin elements.
    let mut seeds: BTreeMap<(ElementType, usize), BTreeSet<usize>> = BTreeMap::new();
    for i in 0..skin.locator.len() {
        let Some(n) = skin.touching[i] else { continue };
        let (ty, e) = skin.locator.entry(i);
        for dim in 0..skin_dim {
            for sub in ElementType::of_dimension(dim) {
                for s in mesh.subelements(ty, e, sub) {
                    seeds.entry((sub, s)).or_default().insert(n);
                }
            }
        }
    }
    let seed_entries: Vec<(ElementType, usize)> = seeds.keys().copied().collect();
    let mut cross = CrossInterfaceState::new(ElementLocator::new(mesh, seed_entries, tolerance));
    for (i, sharers) in seeds.values().enumerate() {
        for &n in sharers {
            cross.add_sharer(i, n);
        }
    }
    let mut cross_rounds = 1;
    while discover_cross_interfaces(comm, tags.cross_interfaces, &mut cross)? {
        cross_rounds += 1;
    }
    log::debug!("rank {me}: cross-interface propagation took {cross_rounds} rounds");

    let mut found = DiscoveredInterfaces {
        interfaces: BTreeMap::new(),
        rounds,
    };
    if skin_dim < INTERFACE_DIMENSIONS {
        for i in 0..skin.locator.len() {
            if let Some(n) = skin.touching[i] {
                let (ty, e) = skin.locator.entry(i);
                found.interfaces.entry(n).or_default()[skin_dim].insert(ty, e);
            }
        }
    }
    for i in 0..cross.locator().len() {
        let (ty, e) = cross.locator().entry(i);
        if ty.dimension() >= INTERFACE_DIMENSIONS {
            continue;
        }
        for &n in cross.sharers(i) {
            found.interfaces.entry(n).or_default()[ty.dimension()].insert(ty, e);
        }
    }

    let unmatched = (0..skin.locator.len())
        .filter(|&i| skin.touching[i].is_none())
        .count();
    log::info!(
        "rank {me}: discovered {} neighbours in {rounds} rounds ({unmatched} skin elements on the global boundary)",
        found.interfaces.len()
    );
    if found.interfaces.is_empty() && comm.size() > 1 {
        log::warn!("rank {me}: no neighbour found in a run of {} ranks", comm.size());
    }
    if config.verbosity >= 2 {
        for (n, sels) in &found.interfaces {
            let sizes: Vec<usize> = sels.iter().map(ElementSelection::len).collect();
            sink.emit(&format!(
                "rank {me}: interface with rank {n}: {sizes:?} elements per dimension"
            ));
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::in_memory::InMemoryMesh;

    fn skin_of(points: &[[f64; 3]]) -> SkinCandidates {
        let mut mesh = InMemoryMesh::new(1).unwrap();
        let entries = points
            .iter()
            .map(|&p| {
                let n = mesh.add_node(p, false);
                (
                    ElementType::Point,
                    mesh.add_element(ElementType::Point, vec![n]).unwrap(),
                )
            })
            .collect();
        SkinCandidates::new(ElementLocator::new(&mesh, entries, 1e-12))
    }

    #[test]
    fn samples_spread_evenly() {
        let pts: Vec<[f64; 3]> = (0..10).map(|i| [i as f64, 0.0, 0.0]).collect();
        let skin = skin_of(&pts);
        assert_eq!(skin.sample(4), vec![0, 2, 5, 7]);
        assert_eq!(skin.sample(20).len(), 10);
    }

    #[test]
    fn default_config() {
        let cfg: DiscoveryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, DiscoveryConfig::default());
        assert_eq!(cfg.num_trial_elements, 10);
    }
}
