//! Partitioned structured grid generator.
//!
//! Builds the local mesh one rank holds when the rectangle
//! `[0, extent.x] × [0, extent.y]`, meshed with `cells.x × cells.y` quadrangles
//! (or twice as many triangles), is split into a `ranks.x × ranks.y` block
//! layout. Each local mesh carries every point, line and cell element it touches,
//! plus the regions a caller needs to drive the tracker:
//!
//! - the skin of the owned subdomain (input of neighbour discovery),
//! - the true no-overlap interfaces (input of manual connectivity),
//! - the inner/outer overlap regions when `overlap_layers > 0`.
//!
//! Local numbering can be shuffled with a seeded `SmallRng` so that the matching
//! algorithms never see identical numbering on two ranks.

use crate::decomposition::connectivity::OverlapInterface;
use crate::mesh_error::DecompositionError;
use crate::topology::element_type::ElementType;
use crate::topology::in_memory::InMemoryMesh;
use crate::topology::mesh::{ElementSelection, RegionId};
use itertools::Itertools;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, BTreeSet};

/// Block decomposition of a structured 2D grid.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GridPartition {
    pub cells: [usize; 2],
    pub ranks: [usize; 2],
    pub extent: [f64; 2],
    pub overlap_layers: usize,
    /// Geometric order: 2 adds one curvature node per edge.
    pub order: u8,
    /// Split every quadrangle into two triangles.
    pub triangles: bool,
    pub shuffle_seed: Option<u64>,
}

impl Default for GridPartition {
    fn default() -> Self {
        Self {
            cells: [4, 4],
            ranks: [1, 1],
            extent: [1.0, 1.0],
            overlap_layers: 0,
            order: 1,
            triangles: false,
            shuffle_seed: None,
        }
    }
}

/// One rank's share of a [`GridPartition`].
#[derive(Clone, Debug)]
pub struct PartitionedMesh {
    pub mesh: InMemoryMesh,
    /// Boundary lines of the owned subdomain, global skin included.
    pub skin_region: RegionId,
    /// Cells owned by this rank.
    pub owned_region: RegionId,
    /// True no-overlap interfaces: `(neighbour, region per dimension)`.
    pub nooverlap: Vec<(usize, [Option<RegionId>; 3])>,
    /// Overlap regions per neighbour; empty without overlap layers.
    pub overlap: Vec<OverlapInterface>,
    /// Global grid point of every local node (`None` for curvature nodes).
    pub grid_point_of_node: Vec<Option<usize>>,
}

type GridCell = (usize, usize);
type GridEdge = (usize, usize);

struct CellElement {
    ty: ElementType,
    corners: Vec<usize>,
    cell: GridCell,
}

fn invalid(reason: String) -> DecompositionError {
    DecompositionError::configuration(0, "partitioned_grid", reason)
}

impl GridPartition {
    pub fn split(cells_x: usize, cells_y: usize, ranks_x: usize, ranks_y: usize) -> Self {
        Self {
            cells: [cells_x, cells_y],
            ranks: [ranks_x, ranks_y],
            ..Self::default()
        }
    }

    pub fn with_overlap(mut self, layers: usize) -> Self {
        self.overlap_layers = layers;
        self
    }

    pub fn with_order(mut self, order: u8) -> Self {
        self.order = order;
        self
    }

    pub fn with_triangles(mut self) -> Self {
        self.triangles = true;
        self
    }

    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    pub fn rank_count(&self) -> usize {
        self.ranks[0] * self.ranks[1]
    }

    /// Number of distinct corner nodes of the whole grid.
    pub fn corner_node_count(&self) -> usize {
        (self.cells[0] + 1) * (self.cells[1] + 1)
    }

    fn block_of(&self, axis: usize, i: usize) -> usize {
        i * self.ranks[axis] / self.cells[axis]
    }

    pub fn cell_owner(&self, (i, j): GridCell) -> usize {
        self.block_of(0, i) + self.block_of(1, j) * self.ranks[0]
    }

    /// Chebyshev distance (in cells) from `cell` to the block owned by `rank`.
    fn distance_to_rank(&self, (i, j): GridCell, rank: usize) -> usize {
        let target = [rank % self.ranks[0], rank / self.ranks[0]];
        let mut dist = 0;
        for (axis, c) in [(0, i), (1, j)] {
            let (lo, hi) = (0..self.cells[axis])
                .filter(|&k| self.block_of(axis, k) == target[axis])
                .minmax()
                .into_option()
                .unwrap_or((0, 0));
            dist = dist.max(lo.saturating_sub(c)).max(c.saturating_sub(hi));
        }
        dist
    }

    fn grid_point(&self, x: usize, y: usize) -> usize {
        x + y * (self.cells[0] + 1)
    }

    fn grid_coords(&self, gp: usize) -> [f64; 3] {
        let (x, y) = (gp % (self.cells[0] + 1), gp / (self.cells[0] + 1));
        [
            self.extent[0] * x as f64 / self.cells[0] as f64,
            self.extent[1] * y as f64 / self.cells[1] as f64,
            0.0,
        ]
    }

    /// Grid cells touching a grid point.
    fn point_cells(&self, gp: usize) -> Vec<GridCell> {
        let (x, y) = (gp % (self.cells[0] + 1), gp / (self.cells[0] + 1));
        let mut out = Vec::with_capacity(4);
        let (xm, ym) = (x.wrapping_sub(1), y.wrapping_sub(1));
        for (i, j) in [(xm, ym), (x, ym), (xm, y), (x, y)] {
            if i < self.cells[0] && j < self.cells[1] {
                out.push((i, j));
            }
        }
        out
    }

    /// Grid cells whose elements contain the edge `(a, b)`.
    fn edge_cells(&self, (a, b): GridEdge) -> Vec<GridCell> {
        let ca: BTreeSet<_> = self.point_cells(a).into_iter().collect();
        self.point_cells(b)
            .into_iter()
            .filter(|c| ca.contains(c))
            .collect()
    }

    fn cell_elements(&self, (i, j): GridCell) -> Vec<CellElement> {
        let p = [
            self.grid_point(i, j),
            self.grid_point(i + 1, j),
            self.grid_point(i + 1, j + 1),
            self.grid_point(i, j + 1),
        ];
        if self.triangles {
            vec![
                CellElement {
                    ty: ElementType::Triangle,
                    corners: vec![p[0], p[1], p[2]],
                    cell: (i, j),
                },
                CellElement {
                    ty: ElementType::Triangle,
                    corners: vec![p[0], p[2], p[3]],
                    cell: (i, j),
                },
            ]
        } else {
            vec![CellElement {
                ty: ElementType::Quadrangle,
                corners: p.to_vec(),
                cell: (i, j),
            }]
        }
    }

    fn validate(&self, rank: usize) -> Result<(), DecompositionError> {
        for axis in 0..2 {
            if self.cells[axis] == 0 || self.ranks[axis] == 0 {
                return Err(invalid(format!("empty grid or rank layout: {self:?}")));
            }
            if self.ranks[axis] > self.cells[axis] {
                return Err(invalid(format!(
                    "{} ranks along axis {axis} for {} cells",
                    self.ranks[axis], self.cells[axis]
                )));
            }
        }
        if rank >= self.rank_count() {
            return Err(invalid(format!(
                "rank {rank} outside a layout of {} ranks",
                self.rank_count()
            )));
        }
        if !matches!(self.order, 1 | 2) {
            return Err(invalid(format!("unsupported order {}", self.order)));
        }
        Ok(())
    }
}

fn sorted_edge(a: usize, b: usize) -> GridEdge {
    (a.min(b), a.max(b))
}

/// Build the local mesh of `rank`.
pub fn partitioned_grid(
    layout: &GridPartition,
    rank: usize,
) -> Result<PartitionedMesh, DecompositionError> {
    layout.validate(rank)?;
    let all_cells = (0..layout.cells[1]).flat_map(|j| (0..layout.cells[0]).map(move |i| (i, j)));
    let mut local_cells: Vec<GridCell> = all_cells
        .filter(|&c| layout.distance_to_rank(c, rank) <= layout.overlap_layers)
        .collect();

    let mut rng = layout
        .shuffle_seed
        .map(|seed| SmallRng::seed_from_u64(seed ^ (rank as u64).wrapping_mul(0x9E37_79B9)));
    if let Some(rng) = rng.as_mut() {
        local_cells.shuffle(rng);
    }

    let cell_elems: Vec<CellElement> = local_cells
        .iter()
        .flat_map(|&c| layout.cell_elements(c))
        .collect();
    let mut grid_points: Vec<usize> = cell_elems
        .iter()
        .flat_map(|ce| ce.corners.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut edges: Vec<GridEdge> = cell_elems
        .iter()
        .flat_map(|ce| {
            ce.ty
                .edges()
                .iter()
                .map(|e| sorted_edge(ce.corners[e[0]], ce.corners[e[1]]))
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if let Some(rng) = rng.as_mut() {
        grid_points.shuffle(rng);
        edges.shuffle(rng);
    }

    let mut mesh = InMemoryMesh::new(2)?;
    let mut node_of_gp = BTreeMap::new();
    let mut grid_point_of_node = Vec::new();
    for &gp in &grid_points {
        node_of_gp.insert(gp, mesh.add_node(layout.grid_coords(gp), false));
        grid_point_of_node.push(Some(gp));
    }
    let mut mid_node = BTreeMap::new();
    if layout.order == 2 {
        for &(a, b) in &edges {
            let (pa, pb) = (layout.grid_coords(a), layout.grid_coords(b));
            let mid = [0, 1, 2].map(|d| 0.5 * (pa[d] + pb[d]));
            mid_node.insert((a, b), mesh.add_node(mid, true));
            grid_point_of_node.push(None);
        }
    }

    let mut point_of_gp = BTreeMap::new();
    for &gp in &grid_points {
        point_of_gp.insert(gp, mesh.add_element(ElementType::Point, vec![node_of_gp[&gp]])?);
    }
    let mut line_of_edge = BTreeMap::new();
    for &(a, b) in &edges {
        let mut nodes = vec![node_of_gp[&a], node_of_gp[&b]];
        nodes.extend(mid_node.get(&(a, b)));
        line_of_edge.insert((a, b), mesh.add_element(ElementType::Line, nodes)?);
    }
    let mut cell_ids = Vec::with_capacity(cell_elems.len());
    for ce in &cell_elems {
        let mut nodes: Vec<usize> = ce.corners.iter().map(|gp| node_of_gp[gp]).collect();
        for e in ce.ty.edges() {
            nodes.extend(mid_node.get(&sorted_edge(ce.corners[e[0]], ce.corners[e[1]])));
        }
        cell_ids.push(mesh.add_element(ce.ty, nodes)?);
    }

    // Selection of cell elements (and optionally their sub-elements) matching `keep`.
    let select = |keep: &dyn Fn(&CellElement) -> bool, closure: bool| {
        let mut sel = ElementSelection::new();
        for (ce, &id) in cell_elems.iter().zip(&cell_ids) {
            if !keep(ce) {
                continue;
            }
            sel.insert(ce.ty, id);
            if closure {
                for gp in &ce.corners {
                    sel.insert(ElementType::Point, point_of_gp[gp]);
                }
                for e in ce.ty.edges() {
                    let edge = sorted_edge(ce.corners[e[0]], ce.corners[e[1]]);
                    sel.insert(ElementType::Line, line_of_edge[&edge]);
                }
            }
        }
        sel
    };

    let owned = select(&|ce: &CellElement| layout.cell_owner(ce.cell) == rank, false);
    let owned_region = mesh.add_region(owned)?;

    let mut owned_uses: BTreeMap<GridEdge, usize> = BTreeMap::new();
    for ce in cell_elems.iter().filter(|ce| layout.cell_owner(ce.cell) == rank) {
        for e in ce.ty.edges() {
            *owned_uses
                .entry(sorted_edge(ce.corners[e[0]], ce.corners[e[1]]))
                .or_default() += 1;
        }
    }
    let mut skin = ElementSelection::new();
    skin.extend(
        ElementType::Line,
        owned_uses
            .iter()
            .filter(|&(_, &uses)| uses == 1)
            .map(|(edge, _)| line_of_edge[edge]),
    );
    let skin_region = mesh.add_region(skin)?;

    let owners_of = |cells: Vec<GridCell>| -> BTreeSet<usize> {
        cells.into_iter().map(|c| layout.cell_owner(c)).collect()
    };
    let mut nooverlap_sel: BTreeMap<usize, [ElementSelection; 3]> = BTreeMap::new();
    for (&gp, &pt) in &point_of_gp {
        let owners = owners_of(layout.point_cells(gp));
        if owners.contains(&rank) {
            for &q in owners.iter().filter(|&&q| q != rank) {
                nooverlap_sel.entry(q).or_default()[0].insert(ElementType::Point, pt);
            }
        }
    }
    for (&edge, &line) in &line_of_edge {
        let owners = owners_of(layout.edge_cells(edge));
        if owners.contains(&rank) {
            for &q in owners.iter().filter(|&&q| q != rank) {
                nooverlap_sel.entry(q).or_default()[1].insert(ElementType::Line, line);
            }
        }
    }
    let mut nooverlap = Vec::with_capacity(nooverlap_sel.len());
    for (q, sels) in nooverlap_sel {
        let mut regions = [None; 3];
        for (dim, sel) in sels.into_iter().enumerate() {
            if !sel.is_empty() {
                regions[dim] = Some(mesh.add_region(sel)?);
            }
        }
        nooverlap.push((q, regions));
    }

    let mut overlap = Vec::new();
    if layout.overlap_layers > 0 {
        for q in (0..layout.rank_count()).filter(|&q| q != rank) {
            let outer = select(&|ce: &CellElement| layout.cell_owner(ce.cell) == q, true);
            if outer.is_empty() {
                continue;
            }
            let inner = select(
                &|ce: &CellElement| {
                    layout.cell_owner(ce.cell) == rank
                        && layout.distance_to_rank(ce.cell, q) <= layout.overlap_layers
                },
                true,
            );
            overlap.push(OverlapInterface {
                neighbour: q,
                inner: mesh.add_region(inner)?,
                outer: mesh.add_region(outer)?,
            });
        }
    }

    log::debug!(
        "rank {rank}: generated {} cells, {} nodes, {} overlap neighbours",
        cell_elems.len(),
        grid_point_of_node.len(),
        overlap.len()
    );

    Ok(PartitionedMesh {
        mesh,
        skin_region,
        owned_region,
        nooverlap,
        overlap,
        grid_point_of_node,
    })
}
