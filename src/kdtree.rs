//! KD-tree over points whose dimensionality is only known at runtime.
//!
//! Point sets arrive as `N x D` arrays (3 columns for unit-sphere positions,
//! but any width is accepted), so the tree stores coordinates flat with a
//! stride of `dim` rather than as fixed-size arrays.

use ndarray::ArrayView2;

/// A point returned by a search: row index in the original array and the
/// squared Euclidean distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub dist_sq: f64,
}

impl Neighbor {
    pub fn dist(&self) -> f64 {
        self.dist_sq.sqrt()
    }
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        dim: usize,
        value: f64,
        left: usize,
        right: usize,
    },
    /// Range `[start..end)` into the permuted coordinate/index arrays.
    Leaf { start: usize, end: usize },
}

/// Maximum number of points held by a leaf.
const LEAF_SIZE: usize = 16;

/// Balanced KD-tree for radius and nearest-neighbour queries.
///
/// Rows containing a non-finite coordinate are left out of the tree: their
/// distance to anything is undefined, so they can never be a match.
pub struct KdTree {
    dim: usize,
    nodes: Vec<Node>,
    coords: Vec<f64>,
    indices: Vec<usize>,
}

impl KdTree {
    /// Build a tree over the rows of `points`. Returned indices refer to rows.
    pub fn build(points: ArrayView2<'_, f64>) -> Self {
        let dim = points.ncols();
        let mut coords = Vec::with_capacity(points.len());
        let mut indices = Vec::with_capacity(points.nrows());
        for (i, row) in points.rows().into_iter().enumerate() {
            if row.iter().all(|v| v.is_finite()) {
                coords.extend(row.iter().copied());
                indices.push(i);
            }
        }

        let mut tree = KdTree {
            dim,
            nodes: Vec::new(),
            coords,
            indices,
        };
        let n = tree.indices.len();
        if n == 0 {
            return tree;
        }

        let mut order: Vec<usize> = (0..n).collect();
        tree.build_recursive(&mut order, 0, n);

        let mut coords = Vec::with_capacity(tree.coords.len());
        let mut indices = Vec::with_capacity(n);
        for &old in &order {
            coords.extend_from_slice(tree.point(old));
            indices.push(tree.indices[old]);
        }
        tree.coords = coords;
        tree.indices = indices;
        tree
    }

    fn build_recursive(&mut self, order: &mut [usize], start: usize, end: usize) -> usize {
        let count = end - start;
        if count <= LEAF_SIZE || self.dim == 0 {
            let node_idx = self.nodes.len();
            self.nodes.push(Node::Leaf { start, end });
            return node_idx;
        }

        let split_dim = self.widest_dim(&order[start..end]);
        let half = count / 2;
        let median_pos = start + half;
        order[start..end].select_nth_unstable_by(half, |&a, &b| {
            self.coord(a, split_dim).total_cmp(&self.coord(b, split_dim))
        });
        let split_value = self.coord(order[median_pos], split_dim);

        let node_idx = self.nodes.len();
        self.nodes.push(Node::Leaf { start: 0, end: 0 });

        let left = self.build_recursive(order, start, median_pos);
        let right = self.build_recursive(order, median_pos, end);

        self.nodes[node_idx] = Node::Split {
            dim: split_dim,
            value: split_value,
            left,
            right,
        };
        node_idx
    }

    fn widest_dim(&self, order: &[usize]) -> usize {
        (0..self.dim)
            .map(|d| {
                let (lo, hi) =
                    order.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                        let v = self.coord(i, d);
                        (lo.min(v), hi.max(v))
                    });
                (d, hi - lo)
            })
            .fold((0, f64::NEG_INFINITY), |best, (d, spread)| {
                if spread > best.1 { (d, spread) } else { best }
            })
            .0
    }

    #[inline]
    fn point(&self, i: usize) -> &[f64] {
        &self.coords[i * self.dim..(i + 1) * self.dim]
    }

    #[inline]
    fn coord(&self, i: usize, d: usize) -> f64 {
        self.coords[i * self.dim + d]
    }

    /// All points within Euclidean distance `radius` (inclusive) of `query`.
    ///
    /// Results come back in traversal order. An infinite radius returns every
    /// point in the tree; a query with a NaN coordinate returns nothing.
    pub fn within(&self, query: &[f64], radius: f64) -> Vec<Neighbor> {
        debug_assert_eq!(query.len(), self.dim);
        let mut results = Vec::new();
        if !self.nodes.is_empty() {
            self.within_recursive(0, query, radius * radius, &mut results);
        }
        results
    }

    fn within_recursive(
        &self,
        node_idx: usize,
        query: &[f64],
        radius_sq: f64,
        results: &mut Vec<Neighbor>,
    ) {
        match self.nodes[node_idx] {
            Node::Leaf { start, end } => {
                for i in start..end {
                    let dsq = squared_distance(query, self.point(i));
                    if dsq <= radius_sq {
                        results.push(Neighbor {
                            index: self.indices[i],
                            dist_sq: dsq,
                        });
                    }
                }
            }
            Node::Split {
                dim,
                value,
                left,
                right,
            } => {
                let diff = query[dim] - value;
                let (near, far) = if query[dim] <= value {
                    (left, right)
                } else {
                    (right, left)
                };
                self.within_recursive(near, query, radius_sq, results);
                if diff * diff <= radius_sq {
                    self.within_recursive(far, query, radius_sq, results);
                }
            }
        }
    }

    /// The single nearest point, or `None` for an empty tree or NaN query.
    pub fn nearest(&self, query: &[f64]) -> Option<Neighbor> {
        debug_assert_eq!(query.len(), self.dim);
        if self.nodes.is_empty() {
            return None;
        }
        let mut best = Neighbor {
            index: 0,
            dist_sq: f64::INFINITY,
        };
        self.nearest_recursive(0, query, &mut best);
        best.dist_sq.is_finite().then_some(best)
    }

    fn nearest_recursive(&self, node_idx: usize, query: &[f64], best: &mut Neighbor) {
        match self.nodes[node_idx] {
            Node::Leaf { start, end } => {
                for i in start..end {
                    let dsq = squared_distance(query, self.point(i));
                    // ties resolve to the lower original index
                    if dsq < best.dist_sq || (dsq == best.dist_sq && self.indices[i] < best.index) {
                        best.dist_sq = dsq;
                        best.index = self.indices[i];
                    }
                }
            }
            Node::Split {
                dim,
                value,
                left,
                right,
            } => {
                let diff = query[dim] - value;
                let (near, far) = if query[dim] <= value {
                    (left, right)
                } else {
                    (right, left)
                };
                self.nearest_recursive(near, query, best);
                if diff * diff <= best.dist_sq {
                    self.nearest_recursive(far, query, best);
                }
            }
        }
    }

    /// Dimensionality of the indexed points.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of indexed (finite) points.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[inline]
fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
