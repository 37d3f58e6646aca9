//! `InMemoryMesh`: a vector-backed implementation of [`DomainMesh`].
//!
//! Elements are stored per type as node lists. Sub-element lookup goes through a
//! hash of sorted corner nodes, so a mesh only answers [`DomainMesh::subelements`]
//! for the lower-dimensional entities it explicitly holds.

use crate::mesh_error::DecompositionError;
use crate::topology::element_type::ElementType;
use crate::topology::mesh::{DomainMesh, ElementSelection, RegionId};
use hashbrown::HashMap;

#[derive(Clone, Debug)]
pub struct InMemoryMesh {
    dimension: usize,
    coords: Vec<[f64; 3]>,
    curvature: Vec<bool>,
    elements: [Vec<Vec<usize>>; ElementType::COUNT],
    regions: Vec<ElementSelection>,
    lookup: HashMap<(ElementType, Vec<usize>), usize>,
}

fn invalid(reason: String) -> DecompositionError {
    DecompositionError::configuration(0, "InMemoryMesh", reason)
}

fn corner_key(corners: &[usize]) -> Vec<usize> {
    let mut key = corners.to_vec();
    key.sort_unstable();
    key
}

impl InMemoryMesh {
    /// Empty mesh whose cells have dimension `dimension` (1, 2 or 3).
    pub fn new(dimension: usize) -> Result<Self, DecompositionError> {
        if !(1..=3).contains(&dimension) {
            return Err(invalid(format!("unsupported cell dimension {dimension}")));
        }
        Ok(Self {
            dimension,
            coords: Vec::new(),
            curvature: Vec::new(),
            elements: Default::default(),
            regions: Vec::new(),
            lookup: HashMap::new(),
        })
    }

    pub fn add_node(&mut self, coords: [f64; 3], curvature: bool) -> usize {
        self.coords.push(coords);
        self.curvature.push(curvature);
        self.coords.len() - 1
    }

    /// Add an element; `nodes` starts with the corners, curvature nodes follow.
    pub fn add_element(
        &mut self,
        ty: ElementType,
        nodes: Vec<usize>,
    ) -> Result<usize, DecompositionError> {
        if ty.dimension() > self.dimension {
            return Err(invalid(format!(
                "{ty} does not fit a {}D mesh",
                self.dimension
            )));
        }
        if nodes.len() < ty.corner_count() {
            return Err(invalid(format!(
                "{ty} needs {} corner nodes, got {}",
                ty.corner_count(),
                nodes.len()
            )));
        }
        if let Some(&bad) = nodes.iter().find(|&&n| n >= self.coords.len()) {
            return Err(invalid(format!("{ty} references missing node {bad}")));
        }
        if let Some(&curved) = nodes[..ty.corner_count()]
            .iter()
            .find(|&&n| self.curvature[n])
        {
            return Err(invalid(format!(
                "{ty} uses curvature node {curved} as a corner"
            )));
        }
        let key = corner_key(&nodes[..ty.corner_count()]);
        let list = &mut self.elements[ty.index()];
        let idx = list.len();
        if self.lookup.insert((ty, key), idx).is_some() {
            return Err(invalid(format!("duplicate {ty} over nodes {nodes:?}")));
        }
        list.push(nodes);
        Ok(idx)
    }

    pub fn add_region(
        &mut self,
        members: ElementSelection,
    ) -> Result<RegionId, DecompositionError> {
        for (ty, e) in members.iter() {
            if e >= self.element_count(ty) {
                return Err(invalid(format!("region references missing {ty} {e}")));
            }
        }
        self.regions.push(members);
        Ok(self.regions.len() - 1)
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Element of type `ty` whose corners are exactly `corners` (any order).
    pub fn find_element(&self, ty: ElementType, corners: &[usize]) -> Option<usize> {
        self.lookup.get(&(ty, corner_key(corners))).copied()
    }
}

impl DomainMesh for InMemoryMesh {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn node_count(&self) -> usize {
        self.coords.len()
    }

    fn node_coordinates(&self, node: usize) -> [f64; 3] {
        self.coords[node]
    }

    fn is_curvature_node(&self, node: usize) -> bool {
        self.curvature[node]
    }

    fn element_count(&self, ty: ElementType) -> usize {
        self.elements[ty.index()].len()
    }

    fn element_nodes(&self, ty: ElementType, element: usize) -> &[usize] {
        &self.elements[ty.index()][element]
    }

    fn subelements(&self, ty: ElementType, element: usize, sub: ElementType) -> Vec<usize> {
        if sub == ty {
            return vec![element];
        }
        let corners = &self.element_nodes(ty, element)[..ty.corner_count()];
        let mut found: Vec<usize> = match sub.dimension() {
            0 => corners
                .iter()
                .filter_map(|&n| self.find_element(sub, &[n]))
                .collect(),
            1 if ty.dimension() > 1 => ty
                .edges()
                .iter()
                .filter_map(|e| self.find_element(sub, &[corners[e[0]], corners[e[1]]]))
                .collect(),
            2 if ty.dimension() > 2 => ty
                .faces()
                .iter()
                .filter(|f| ElementType::face_type(f.len()) == Some(sub))
                .filter_map(|f| {
                    let nodes: Vec<usize> = f.iter().map(|&c| corners[c]).collect();
                    self.find_element(sub, &nodes)
                })
                .collect(),
            _ => Vec::new(),
        };
        found.sort_unstable();
        found.dedup();
        found
    }

    fn region_exists(&self, region: RegionId) -> bool {
        region < self.regions.len()
    }

    fn region_elements(&self, region: RegionId, ty: ElementType) -> Vec<usize> {
        self.regions
            .get(region)
            .map(|sel| sel.get(ty).to_vec())
            .unwrap_or_default()
    }

    fn create_region(&mut self, members: &ElementSelection) -> RegionId {
        self.regions.push(members.clone());
        self.regions.len() - 1
    }
}
