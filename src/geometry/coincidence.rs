//! Barycenter coincidence matching.
//!
//! Two barycenters coincide when every coordinate differs by at most the
//! tolerance (an L∞ ball). Matching relies on the geometric precondition that
//! distinct, non-corresponding boundary entities never share a coincident
//! barycenter; nothing here can detect a violation of it.

/// Relative tolerance applied to the global bounding-box extent.
pub const DEFAULT_RELATIVE_TOLERANCE: f64 = 1e-10;

/// Absolute tolerance for a mesh whose largest bounding-box side is `extent`.
pub fn coincidence_tolerance(extent: f64) -> f64 {
    if extent > 0.0 && extent.is_finite() {
        DEFAULT_RELATIVE_TOLERANCE * extent
    } else {
        DEFAULT_RELATIVE_TOLERANCE
    }
}

pub fn coincident(a: [f64; 3], b: [f64; 3], tolerance: f64) -> bool {
    a.iter().zip(&b).all(|(x, y)| (x - y).abs() <= tolerance)
}

/// Sorted-by-x index answering "which stored points coincide with `p`".
#[derive(Clone, Debug)]
pub struct BarycenterIndex {
    points: Vec<[f64; 3]>,
    order: Vec<usize>,
    xs: Vec<f64>,
    tolerance: f64,
}

impl BarycenterIndex {
    pub fn new(points: Vec<[f64; 3]>, tolerance: f64) -> Self {
        let mut order: Vec<usize> = (0..points.len()).collect();
        order.sort_by(|&a, &b| points[a][0].total_cmp(&points[b][0]).then(a.cmp(&b)));
        let xs = order.iter().map(|&i| points[i][0]).collect();
        Self {
            points,
            order,
            xs,
            tolerance,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, i: usize) -> [f64; 3] {
        self.points[i]
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Indices of every stored point coinciding with `p`, ascending.
    pub fn find_all(&self, p: [f64; 3]) -> Vec<usize> {
        let lo = self.xs.partition_point(|&x| x < p[0] - self.tolerance);
        let mut hits: Vec<usize> = self.order[lo..]
            .iter()
            .zip(&self.xs[lo..])
            .take_while(|&(_, &x)| x <= p[0] + self.tolerance)
            .map(|(&i, _)| i)
            .filter(|&i| coincident(self.points[i], p, self.tolerance))
            .collect();
        hits.sort_unstable();
        hits
    }

    /// Lowest index coinciding with `p`.
    pub fn find(&self, p: [f64; 3]) -> Option<usize> {
        self.find_all(p).into_iter().next()
    }

    /// Lowest index coinciding with `p` that also satisfies `accept`.
    pub fn find_where(&self, p: [f64; 3], accept: impl Fn(usize) -> bool) -> Option<usize> {
        self.find_all(p).into_iter().find(|&i| accept(i))
    }
}
