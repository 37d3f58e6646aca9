//! The mesh collaborator contract consumed by the decomposition tracker.
//!
//! The tracker only reads geometry through [`DomainMesh`]; the single write-back is
//! [`DomainMesh::create_region`], used by neighbour discovery to record the
//! interfaces it found.

use crate::topology::element_type::ElementType;

/// Identifier of a tagged region of the mesh.
pub type RegionId = usize;

/// A set of elements grouped by type. Lists are kept sorted and duplicate-free.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ElementSelection {
    by_type: [Vec<usize>; ElementType::COUNT],
}

impl ElementSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one element, keeping the list for its type sorted.
    pub fn insert(&mut self, ty: ElementType, element: usize) {
        let list = &mut self.by_type[ty.index()];
        if let Err(pos) = list.binary_search(&element) {
            list.insert(pos, element);
        }
    }

    pub fn extend(&mut self, ty: ElementType, elements: impl IntoIterator<Item = usize>) {
        let list = &mut self.by_type[ty.index()];
        list.extend(elements);
        list.sort_unstable();
        list.dedup();
    }

    pub fn get(&self, ty: ElementType) -> &[usize] {
        &self.by_type[ty.index()]
    }

    pub fn contains(&self, ty: ElementType, element: usize) -> bool {
        self.get(ty).binary_search(&element).is_ok()
    }

    pub fn len(&self) -> usize {
        self.by_type.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.iter().all(Vec::is_empty)
    }

    /// Iterate `(type, element)` pairs in type order, then element order.
    pub fn iter(&self) -> impl Iterator<Item = (ElementType, usize)> + '_ {
        ElementType::ALL
            .into_iter()
            .flat_map(move |ty| self.get(ty).iter().map(move |&e| (ty, e)))
    }
}

/// Per-rank mesh geometry and region tagging.
pub trait DomainMesh {
    /// Dimension of the cells (highest element dimension).
    fn dimension(&self) -> usize;

    fn node_count(&self) -> usize;
    fn node_coordinates(&self, node: usize) -> [f64; 3];
    /// Higher-order geometry node without cross-rank identity.
    fn is_curvature_node(&self, node: usize) -> bool;

    fn element_count(&self, ty: ElementType) -> usize;
    /// All nodes of an element; the first `ty.corner_count()` are its corners.
    fn element_nodes(&self, ty: ElementType, element: usize) -> &[usize];

    /// Sub-elements of type `sub` bounding `element` (or the element itself when
    /// `sub == ty`). Sub-elements the mesh does not hold are skipped.
    fn subelements(&self, ty: ElementType, element: usize, sub: ElementType) -> Vec<usize>;

    fn region_exists(&self, region: RegionId) -> bool;
    /// Elements of type `ty` in `region`, sorted ascending.
    fn region_elements(&self, region: RegionId, ty: ElementType) -> Vec<usize>;
    /// Register a new region holding `members`.
    fn create_region(&mut self, members: &ElementSelection) -> RegionId;

    /// Geometric centroid over the corner nodes.
    fn barycenter(&self, ty: ElementType, element: usize) -> [f64; 3] {
        let corners = &self.element_nodes(ty, element)[..ty.corner_count()];
        let mut acc = [0.0; 3];
        for &node in corners {
            let c = self.node_coordinates(node);
            for (a, x) in acc.iter_mut().zip(c) {
                *a += x;
            }
        }
        acc.map(|a| a / corners.len() as f64)
    }

    /// Node of a point element.
    fn point_node(&self, point: usize) -> usize {
        self.element_nodes(ElementType::Point, point)[0]
    }

    /// Largest side of the axis-aligned bounding box of all nodes.
    fn bounding_extent(&self) -> f64 {
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for node in 0..self.node_count() {
            let c = self.node_coordinates(node);
            for d in 0..3 {
                lo[d] = lo[d].min(c[d]);
                hi[d] = hi[d].max(c[d]);
            }
        }
        (0..3)
            .map(|d| hi[d] - lo[d])
            .filter(|w| w.is_finite())
            .fold(0.0, f64::max)
    }

    /// Region members as an [`ElementSelection`].
    fn region_selection(&self, region: RegionId) -> ElementSelection {
        let mut sel = ElementSelection::new();
        for ty in ElementType::ALL {
            sel.extend(ty, self.region_elements(region, ty));
        }
        sel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_stays_sorted() {
        let mut sel = ElementSelection::new();
        sel.insert(ElementType::Line, 5);
        sel.insert(ElementType::Line, 1);
        sel.insert(ElementType::Line, 5);
        sel.extend(ElementType::Point, [9, 2, 2]);
        assert_eq!(sel.get(ElementType::Line), &[1, 5]);
        assert_eq!(sel.get(ElementType::Point), &[2, 9]);
        assert_eq!(sel.len(), 4);
        assert!(sel.contains(ElementType::Point, 9));
        let pairs: Vec<_> = sel.iter().collect();
        assert_eq!(pairs[0], (ElementType::Point, 2));
    }
}
