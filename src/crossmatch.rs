//! Radius queries and angular cross-matching of two position sets.
//!
//! `radius_query` is the Euclidean primitive: build a KD-tree over the
//! reference set once, then ask it for every query row. `angular_crossmatch`
//! lifts RA/Dec degrees onto the unit sphere so the same primitive answers
//! "which sources lie within this many degrees", and optionally resolves the
//! chord of every matched pair back into an angle.

use ndarray::ArrayView2;
use thiserror::Error;
use tracing::debug;

use crate::geom::sphere::{angle_from_chord, chord_distance, chord_from_angle, project_radec};
use crate::kdtree::KdTree;

#[derive(Debug, Error, PartialEq)]
pub enum CrossmatchError {
    #[error(
        "point sets differ in dimensionality: reference has {reference} columns, query has {query}"
    )]
    DimensionMismatch { reference: usize, query: usize },

    #[error("expected (RA, Dec) pairs with 2 columns, got {columns}")]
    NotRaDec { columns: usize },

    #[error("search radius must be a non-negative number, got {0}")]
    InvalidRadius(f64),
}

pub type Result<T> = std::result::Result<T, CrossmatchError>;

/// Tunables for an angular cross-match.
#[derive(Debug, Clone)]
pub struct CrossmatchConfig {
    /// Search radius in arcseconds.
    pub radius_arcsec: f64,
    /// Whether to resolve angular separations for matched pairs.
    pub with_separations: bool,
}

impl Default for CrossmatchConfig {
    fn default() -> Self {
        Self {
            radius_arcsec: 1.0,
            with_separations: true,
        }
    }
}

impl CrossmatchConfig {
    pub fn radius_deg(&self) -> f64 {
        self.radius_arcsec / 3600.0
    }
}

/// Candidate matches for every left row, plus optional separations.
///
/// `indices[i]` lists right-table rows within the radius of left row `i`,
/// ascending by right index. When present, `separations[i]` holds the
/// angular distance in degrees for each of those indices in the same order,
/// or the single sentinel `f64::INFINITY` when the row has no match.
#[derive(Debug, Clone, PartialEq)]
pub struct Matches {
    pub indices: Vec<Vec<usize>>,
    pub separations: Option<Vec<Vec<f64>>>,
}

impl Matches {
    /// Number of left rows covered.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Matches found for each left row (0 for unmatched rows).
    pub fn counts(&self) -> Vec<usize> {
        self.indices.iter().map(Vec::len).collect()
    }

    /// Total number of matched (left, right) pairs.
    pub fn total_pairs(&self) -> usize {
        self.indices.iter().map(Vec::len).sum()
    }

    /// Number of left rows with at least one match.
    pub fn matched_rows(&self) -> usize {
        self.indices.iter().filter(|m| !m.is_empty()).count()
    }
}

fn check_radius(radius: f64) -> Result<()> {
    if radius.is_nan() || radius < 0.0 {
        return Err(CrossmatchError::InvalidRadius(radius));
    }
    Ok(())
}

/// For every row of `query`, the rows of `reference` within Euclidean
/// distance `radius` (inclusive), sorted by reference index.
///
/// Fails before any work is done if the two sets differ in width.
pub fn radius_query(
    reference: ArrayView2<'_, f64>,
    query: ArrayView2<'_, f64>,
    radius: f64,
) -> Result<Vec<Vec<usize>>> {
    if reference.ncols() != query.ncols() {
        return Err(CrossmatchError::DimensionMismatch {
            reference: reference.ncols(),
            query: query.ncols(),
        });
    }
    check_radius(radius)?;

    let tree = KdTree::build(reference);
    let mut buf = Vec::with_capacity(query.ncols());
    let lists = query
        .rows()
        .into_iter()
        .map(|row| {
            buf.clear();
            buf.extend(row.iter().copied());
            let mut idx: Vec<usize> =
                tree.within(&buf, radius).into_iter().map(|n| n.index).collect();
            idx.sort_unstable();
            idx
        })
        .collect();
    Ok(lists)
}

/// Cross-match two (RA, Dec) degree arrays within `max_radius_deg`.
pub fn angular_crossmatch(
    left: ArrayView2<'_, f64>,
    right: ArrayView2<'_, f64>,
    max_radius_deg: f64,
    want_separations: bool,
) -> Result<Matches> {
    if left.ncols() != right.ncols() {
        return Err(CrossmatchError::DimensionMismatch {
            reference: right.ncols(),
            query: left.ncols(),
        });
    }
    check_radius(max_radius_deg)?;

    let left_xyz = project_radec(left)?;
    let right_xyz = project_radec(right)?;
    let chord = chord_from_angle(max_radius_deg);
    let indices = radius_query(right_xyz.view(), left_xyz.view(), chord)?;

    let separations = want_separations.then(|| {
        indices
            .iter()
            .zip(left_xyz.rows())
            .map(|(idx, l)| {
                if idx.is_empty() {
                    return vec![f64::INFINITY];
                }
                let l = [l[0], l[1], l[2]];
                idx.iter()
                    .map(|&j| {
                        let r = right_xyz.row(j);
                        angle_from_chord(chord_distance(l, [r[0], r[1], r[2]]))
                    })
                    .collect()
            })
            .collect()
    });

    let matches = Matches { indices, separations };
    debug!(
        left = left.nrows(),
        right = right.nrows(),
        radius_deg = max_radius_deg,
        pairs = matches.total_pairs(),
        matched = matches.matched_rows(),
        "angular crossmatch"
    );
    Ok(matches)
}

/// Angular cross-match driven by a [`CrossmatchConfig`].
pub fn crossmatch_with(
    left: ArrayView2<'_, f64>,
    right: ArrayView2<'_, f64>,
    config: &CrossmatchConfig,
) -> Result<Matches> {
    angular_crossmatch(left, right, config.radius_deg(), config.with_separations)
}

/// Nearest right row for each left row within `max_radius_deg`, with its
/// separation in degrees.
pub fn nearest_neighbours(
    left: ArrayView2<'_, f64>,
    right: ArrayView2<'_, f64>,
    max_radius_deg: f64,
) -> Result<Vec<Option<(usize, f64)>>> {
    check_radius(max_radius_deg)?;
    let left_xyz = project_radec(left)?;
    let right_xyz = project_radec(right)?;
    let chord = chord_from_angle(max_radius_deg);
    let tree = KdTree::build(right_xyz.view());

    let nearest = left_xyz
        .rows()
        .into_iter()
        .map(|row| {
            let q = [row[0], row[1], row[2]];
            tree.nearest(&q)
                .filter(|n| n.dist() <= chord)
                .map(|n| (n.index, angle_from_chord(n.dist())))
        })
        .collect();
    Ok(nearest)
}
