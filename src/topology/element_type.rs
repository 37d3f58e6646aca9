//! Element type metadata for mesh entities.

/// The element types a decomposed mesh may hold, in their canonical order.
///
/// The order is part of the wire format: [`ElementType::index`] travels with
/// every exchanged barycenter.
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize,
)]
pub enum ElementType {
    /// 0D point, one per corner node.
    Point,
    /// 1D segment/edge.
    Line,
    /// 2D simplex.
    Triangle,
    /// 2D tensor-product cell.
    Quadrangle,
    /// 3D simplex.
    Tetrahedron,
    /// 3D tensor-product cell.
    Hexahedron,
    /// 3D wedge.
    Prism,
    /// 3D pyramid.
    Pyramid,
}

const LINE_EDGES: [[usize; 2]; 1] = [[0, 1]];
const TRIANGLE_EDGES: [[usize; 2]; 3] = [[0, 1], [1, 2], [2, 0]];
const QUADRANGLE_EDGES: [[usize; 2]; 4] = [[0, 1], [1, 2], [2, 3], [3, 0]];
const TETRAHEDRON_EDGES: [[usize; 2]; 6] = [[0, 1], [1, 2], [2, 0], [0, 3], [1, 3], [2, 3]];
const HEXAHEDRON_EDGES: [[usize; 2]; 12] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [3, 0],
    [4, 5],
    [5, 6],
    [6, 7],
    [7, 4],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];
const PRISM_EDGES: [[usize; 2]; 9] = [
    [0, 1],
    [1, 2],
    [2, 0],
    [3, 4],
    [4, 5],
    [5, 3],
    [0, 3],
    [1, 4],
    [2, 5],
];
const PYRAMID_EDGES: [[usize; 2]; 8] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [3, 0],
    [0, 4],
    [1, 4],
    [2, 4],
    [3, 4],
];

const TRIANGLE_FACES: [&[usize]; 1] = [&[0, 1, 2]];
const QUADRANGLE_FACES: [&[usize]; 1] = [&[0, 1, 2, 3]];
const TETRAHEDRON_FACES: [&[usize]; 4] = [&[0, 1, 2], &[0, 1, 3], &[1, 2, 3], &[0, 2, 3]];
const HEXAHEDRON_FACES: [&[usize]; 6] = [
    &[0, 1, 2, 3],
    &[4, 5, 6, 7],
    &[0, 1, 5, 4],
    &[1, 2, 6, 5],
    &[2, 3, 7, 6],
    &[3, 0, 4, 7],
];
const PRISM_FACES: [&[usize]; 5] = [
    &[0, 1, 2],
    &[3, 4, 5],
    &[0, 1, 4, 3],
    &[1, 2, 5, 4],
    &[2, 0, 3, 5],
];
const PYRAMID_FACES: [&[usize]; 5] = [
    &[0, 1, 2, 3],
    &[0, 1, 4],
    &[1, 2, 4],
    &[2, 3, 4],
    &[3, 0, 4],
];

impl ElementType {
    pub const COUNT: usize = 8;

    pub const ALL: [ElementType; Self::COUNT] = [
        ElementType::Point,
        ElementType::Line,
        ElementType::Triangle,
        ElementType::Quadrangle,
        ElementType::Tetrahedron,
        ElementType::Hexahedron,
        ElementType::Prism,
        ElementType::Pyramid,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Topological dimension.
    pub fn dimension(self) -> usize {
        match self {
            ElementType::Point => 0,
            ElementType::Line => 1,
            ElementType::Triangle | ElementType::Quadrangle => 2,
            ElementType::Tetrahedron
            | ElementType::Hexahedron
            | ElementType::Prism
            | ElementType::Pyramid => 3,
        }
    }

    /// Number of corner (non-curvature) nodes.
    pub fn corner_count(self) -> usize {
        match self {
            ElementType::Point => 1,
            ElementType::Line => 2,
            ElementType::Triangle => 3,
            ElementType::Quadrangle | ElementType::Tetrahedron => 4,
            ElementType::Hexahedron => 8,
            ElementType::Prism => 6,
            ElementType::Pyramid => 5,
        }
    }

    /// All types of the given dimension.
    pub fn of_dimension(dim: usize) -> impl Iterator<Item = ElementType> {
        Self::ALL.into_iter().filter(move |t| t.dimension() == dim)
    }

    /// Corner pairs of the edges, in local corner numbering.
    pub fn edges(self) -> &'static [[usize; 2]] {
        match self {
            ElementType::Point => &[],
            ElementType::Line => &LINE_EDGES,
            ElementType::Triangle => &TRIANGLE_EDGES,
            ElementType::Quadrangle => &QUADRANGLE_EDGES,
            ElementType::Tetrahedron => &TETRAHEDRON_EDGES,
            ElementType::Hexahedron => &HEXAHEDRON_EDGES,
            ElementType::Prism => &PRISM_EDGES,
            ElementType::Pyramid => &PYRAMID_EDGES,
        }
    }

    /// Corner lists of the 2D faces, in local corner numbering.
    pub fn faces(self) -> &'static [&'static [usize]] {
        match self {
            ElementType::Point | ElementType::Line => &[],
            ElementType::Triangle => &TRIANGLE_FACES,
            ElementType::Quadrangle => &QUADRANGLE_FACES,
            ElementType::Tetrahedron => &TETRAHEDRON_FACES,
            ElementType::Hexahedron => &HEXAHEDRON_FACES,
            ElementType::Prism => &PRISM_FACES,
            ElementType::Pyramid => &PYRAMID_FACES,
        }
    }

    /// The face type with `corners` corners.
    pub fn face_type(corners: usize) -> Option<ElementType> {
        match corners {
            3 => Some(ElementType::Triangle),
            4 => Some(ElementType::Quadrangle),
            _ => None,
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ElementType::Point => "point",
            ElementType::Line => "line",
            ElementType::Triangle => "triangle",
            ElementType::Quadrangle => "quadrangle",
            ElementType::Tetrahedron => "tetrahedron",
            ElementType::Hexahedron => "hexahedron",
            ElementType::Prism => "prism",
            ElementType::Pyramid => "pyramid",
        };
        f.write_str(name)
    }
}
