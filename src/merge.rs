//! Turning candidate matches into tables, and collapsing them again.
//!
//! [`merge`] expands a left table against its candidate lists into one row
//! per (left, right) pair, keeping unmatched left rows once with empty right
//! cells. The reductions then pick what a catalog needs: [`best_match`]
//! keeps the first row per key, [`nearest_match`] sorts by separation first,
//! and [`inner_join`] drops rows without a partner.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::crossmatch::Matches;
use crate::table::{Column, ColumnData, DataType, Key, Table, TableError, Value};

/// Suffixes appended to column names present in both inputs.
pub const SUFFIXES: (&str, &str) = ("_1", "_2");
/// Name of the derived separation column (arcseconds).
pub const SEPARATION: &str = "Separation";
/// Name of the derived multiplicity column.
pub const COUNT: &str = "Count";
/// Separations below this many degrees are reported as exactly zero.
pub const SEPARATION_FLOOR_DEG: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Table(#[from] TableError),

    #[error("match list covers {matches} rows but the left table has {rows}")]
    RowCountMismatch { matches: usize, rows: usize },

    #[error("left row {row} refers to right row {index}, but the right table has {rows} rows")]
    IndexOutOfRange { row: usize, index: usize, rows: usize },

    #[error("separations for left row {row} do not line up with its matches")]
    SeparationShape { row: usize },

    #[error("{column}: expected {expected} entries (one per selector), found {found}")]
    CoalesceArity {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("{column}: cannot combine columns of types {types:?}")]
    IncompatibleTypes { column: String, types: Vec<DataType> },
}

pub type Result<T> = std::result::Result<T, MergeError>;

/// Expand `left` against `right` using the candidate lists in `matches`.
///
/// One output row per matched pair, grouped by left row in input order and
/// by candidate order within a group; a left row without candidates appears
/// once with null right-hand cells. When separations are present a
/// `Separation` column (arcsec, null when unmatched) is appended. A `Count`
/// column holding each left row's number of matches is appended whenever
/// some left row has zero or several matches.
pub fn merge(left: &Table, right: &Table, matches: &Matches) -> Result<Table> {
    Ok(merge_detailed(left, right, matches)?.table)
}

/// A merged table and the names its derived columns ended up with.
///
/// Chained stages already carry `Separation`/`Count` from earlier matches, in
/// which case the new columns are numbered (`Separation_1`, ...).
#[derive(Debug, Clone)]
pub struct Merged {
    pub table: Table,
    pub separation: Option<String>,
    pub count: Option<String>,
}

/// [`merge`], also reporting the derived column names.
pub fn merge_detailed(left: &Table, right: &Table, matches: &Matches) -> Result<Merged> {
    if matches.len() != left.num_rows() {
        return Err(MergeError::RowCountMismatch {
            matches: matches.len(),
            rows: left.num_rows(),
        });
    }
    if let Some(seps) = &matches.separations {
        if seps.len() != matches.len() {
            return Err(MergeError::SeparationShape { row: seps.len().min(matches.len()) });
        }
    }

    let capacity = matches.total_pairs() + matches.len() - matches.matched_rows();
    let mut left_rows = Vec::with_capacity(capacity);
    let mut right_rows = Vec::with_capacity(capacity);
    let mut counts = Vec::with_capacity(capacity);
    let mut separations = matches.separations.as_ref().map(|_| Vec::with_capacity(capacity));

    for (i, idx) in matches.indices.iter().enumerate() {
        let row_seps = match &matches.separations {
            Some(seps) => {
                let s = &seps[i];
                let expected = idx.len().max(1);
                if s.len() != expected {
                    return Err(MergeError::SeparationShape { row: i });
                }
                Some(s)
            }
            None => None,
        };

        if idx.is_empty() {
            left_rows.push(Some(i));
            right_rows.push(None);
            counts.push(Some(0));
            if let Some(out) = separations.as_mut() {
                out.push(f64::NAN);
            }
            continue;
        }

        for (k, &j) in idx.iter().enumerate() {
            if j >= right.num_rows() {
                return Err(MergeError::IndexOutOfRange {
                    row: i,
                    index: j,
                    rows: right.num_rows(),
                });
            }
            left_rows.push(Some(i));
            right_rows.push(Some(j));
            counts.push(Some(idx.len() as i64));
            if let (Some(out), Some(s)) = (separations.as_mut(), row_seps) {
                out.push(separation_arcsec(s[k]));
            }
        }
    }

    let mut merged = Table::hstack(left.take(&left_rows)?, right.take(&right_rows)?, SUFFIXES)?;

    let mut separation = None;
    if let Some(seps) = separations {
        let name = derived_name(&merged, SEPARATION);
        merged.push_column(Column::float(name.clone(), seps))?;
        separation = Some(name);
    }
    let mut count = None;
    if matches.indices.iter().any(|idx| idx.len() != 1) {
        let name = derived_name(&merged, COUNT);
        merged.push_column(Column::int(name.clone(), counts))?;
        count = Some(name);
    }

    debug!(
        left = left.num_rows(),
        right = right.num_rows(),
        pairs = matches.total_pairs(),
        rows = merged.num_rows(),
        "merged match table"
    );
    Ok(Merged {
        table: merged,
        separation,
        count,
    })
}

/// Degrees to arcseconds, with rounding noise at coincident positions
/// floored to zero and the no-match sentinel mapped to NaN (stored as null).
fn separation_arcsec(deg: f64) -> f64 {
    if !deg.is_finite() {
        f64::NAN
    } else if deg.abs() < SEPARATION_FLOOR_DEG {
        0.0
    } else {
        deg * 3600.0
    }
}

fn derived_name(table: &Table, base: &str) -> String {
    let name = table.free_name(base);
    if name != base {
        warn!(column = base, renamed = %name, "derived column name already taken");
    }
    name
}

/// Keep the first row for each distinct value of `key`, preserving order.
///
/// This is order-dependent on purpose: it does not look at separations. Use
/// [`nearest_match`] when the closest counterpart should win.
pub fn best_match(table: &Table, key: &str) -> Result<Table> {
    let col = table.column(key)?;
    let mut seen = HashSet::with_capacity(table.num_rows());
    let mask: Vec<bool> = (0..table.num_rows()).map(|i| seen.insert(col.get(i).key())).collect();
    Ok(table.filter(&mask)?)
}

/// Stable reorder so that, within each group of equal `key`, rows run from
/// smallest to largest `separation` (nulls last). Groups keep the position
/// of their first row.
pub fn sort_by_separation(table: &Table, key: &str, separation: &str) -> Result<Table> {
    let key_col = table.column(key)?;
    let seps = table.float_values(separation)?;

    let mut group_rank: HashMap<Key, usize> = HashMap::new();
    let ranks: Vec<usize> = (0..table.num_rows())
        .map(|i| {
            let next = group_rank.len();
            *group_rank.entry(key_col.get(i).key()).or_insert(next)
        })
        .collect();

    let mut order: Vec<usize> = (0..table.num_rows()).collect();
    order.sort_by(|&a, &b| {
        ranks[a].cmp(&ranks[b]).then_with(|| match (seps[a], seps[b]) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        })
    });
    let rows: Vec<Option<usize>> = order.into_iter().map(Some).collect();
    Ok(table.take(&rows)?)
}

/// Keep the closest counterpart per `key`: [`sort_by_separation`] followed
/// by [`best_match`].
pub fn nearest_match(table: &Table, key: &str, separation: &str) -> Result<Table> {
    best_match(&sort_by_separation(table, key, separation)?, key)
}

/// Drop rows whose `separation` is missing or non-finite.
pub fn inner_join(table: &Table, separation: &str) -> Result<Table> {
    let seps = table.float_values(separation)?;
    let mask: Vec<bool> = seps.iter().map(|s| s.is_some_and(f64::is_finite)).collect();
    Ok(table.filter(&mask)?)
}

/// Row selection for [`join_on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    /// Only rows whose key occurs on both sides.
    #[default]
    Inner,
    /// Every left row, with nulls where the right side has no partner.
    Left,
    /// Every row of both sides.
    Outer,
}

/// Relational join of two catalogs on key columns.
///
/// Output order is left rows in input order (each expanded by its partners
/// in right order), followed for [`JoinKind::Outer`] by right rows that
/// matched nothing. Null keys never match. When both key columns share a
/// name they are folded into one column.
pub fn join_on(
    left: &Table,
    right: &Table,
    left_key: &str,
    right_key: &str,
    how: JoinKind,
) -> Result<Table> {
    let lkey = left.column(left_key)?;
    let rkey = right.column(right_key)?;

    let mut by_key: HashMap<Key, Vec<usize>> = HashMap::new();
    for j in 0..right.num_rows() {
        let k = rkey.get(j).key();
        if k != Key::Null {
            by_key.entry(k).or_default().push(j);
        }
    }

    let mut left_rows = Vec::new();
    let mut right_rows = Vec::new();
    let mut used = vec![false; right.num_rows()];
    for i in 0..left.num_rows() {
        match by_key.get(&lkey.get(i).key()) {
            Some(partners) => {
                for &j in partners {
                    left_rows.push(Some(i));
                    right_rows.push(Some(j));
                    used[j] = true;
                }
            }
            None if how != JoinKind::Inner => {
                left_rows.push(Some(i));
                right_rows.push(None);
            }
            None => {}
        }
    }
    if how == JoinKind::Outer {
        for (j, _) in used.iter().enumerate().filter(|(_, u)| !**u) {
            left_rows.push(None);
            right_rows.push(Some(j));
        }
    }

    let left_part = left.take(&left_rows)?;
    let mut right_part = right.take(&right_rows)?;
    let shared_key = left_key == right_key;
    let folded_key = if shared_key {
        Some(right_part.drop_column(right_key)?)
    } else {
        None
    };

    let mut joined = Table::hstack(left_part, right_part, SUFFIXES)?;
    if let Some(right_keys) = folded_key {
        let mut columns = joined.into_columns();
        if let Some(col) = columns.iter_mut().find(|c| c.name == left_key) {
            let values: Vec<Value> = (0..col.len())
                .map(|i| match col.get(i) {
                    Value::Null => right_keys.get(i),
                    v => v,
                })
                .collect();
            let dtype = unify(left_key, &[col.dtype(), right_keys.dtype()])?;
            let data = column_from_values(dtype, &values);
            col.data = data;
        }
        joined = Table::new(columns)?;
    }

    debug!(
        left = left.num_rows(),
        right = right.num_rows(),
        rows = joined.num_rows(),
        ?how,
        "key join"
    );
    Ok(joined)
}

/// One derived column of a [`CoalesceSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoalesceOutput {
    /// Name of the new column.
    pub name: String,
    /// Source column for each selector, in the same order.
    pub sources: Vec<String>,
}

/// Optional label column recording which selector supplied a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoalesceLabel {
    pub name: String,
    /// One label per selector.
    pub values: Vec<String>,
}

/// Combine several catalogs' versions of a quantity into one column.
///
/// For each row the first selector column with a value wins, and every
/// output copies its source for that selector. This keeps a position and
/// its error bars from the same catalog, e.g. radio positions preferring
/// 3 GHz over 1.4 GHz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoalesceSpec {
    /// Columns whose presence decides the winning source, highest priority first.
    pub selectors: Vec<String>,
    pub outputs: Vec<CoalesceOutput>,
    #[serde(default)]
    pub label: Option<CoalesceLabel>,
}

/// Append the columns described by `spec` to a copy of `table`, replacing
/// any existing columns of the same names.
pub fn coalesce(table: &Table, spec: &CoalesceSpec) -> Result<Table> {
    let selectors = spec
        .selectors
        .iter()
        .map(|name| table.column(name))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let choice: Vec<Option<usize>> = (0..table.num_rows())
        .map(|i| selectors.iter().position(|c| !c.get(i).is_null()))
        .collect();

    let mut new_columns = Vec::with_capacity(spec.outputs.len() + 1);
    for output in &spec.outputs {
        if output.sources.len() != selectors.len() {
            return Err(MergeError::CoalesceArity {
                column: output.name.clone(),
                expected: selectors.len(),
                found: output.sources.len(),
            });
        }
        let sources = output
            .sources
            .iter()
            .map(|name| table.column(name))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let types: Vec<DataType> = sources.iter().map(|c| c.dtype()).collect();
        let dtype = unify(&output.name, &types)?;
        let values: Vec<Value> = choice
            .iter()
            .enumerate()
            .map(|(i, c)| c.map_or(Value::Null, |k| sources[k].get(i)))
            .collect();
        new_columns.push(Column::new(output.name.clone(), column_from_values(dtype, &values)));
    }

    if let Some(label) = &spec.label {
        if label.values.len() != selectors.len() {
            return Err(MergeError::CoalesceArity {
                column: label.name.clone(),
                expected: selectors.len(),
                found: label.values.len(),
            });
        }
        let values = choice.iter().map(|c| c.map(|k| label.values[k].clone()));
        new_columns.push(Column::text(label.name.clone(), values));
    }

    let mut out = table.clone();
    for col in new_columns {
        out.set_column(col)?;
    }
    Ok(out)
}

/// Common storage type for values drawn from columns of `types`.
fn unify(column: &str, types: &[DataType]) -> Result<DataType> {
    let has = |t| types.contains(&t);
    match (has(DataType::Int), has(DataType::Float), has(DataType::Text)) {
        (_, _, true) if types.iter().all(|t| *t == DataType::Text) => Ok(DataType::Text),
        (_, _, true) => Err(MergeError::IncompatibleTypes {
            column: column.to_string(),
            types: types.to_vec(),
        }),
        (_, true, false) => Ok(DataType::Float),
        _ => Ok(DataType::Int),
    }
}

fn column_from_values(dtype: DataType, values: &[Value]) -> ColumnData {
    match dtype {
        DataType::Int => ColumnData::Int(
            values
                .iter()
                .map(|v| match *v {
                    Value::Int(i) => Some(i),
                    _ => None,
                })
                .collect(),
        ),
        DataType::Float => ColumnData::Float(values.iter().map(Value::as_f64).collect()),
        DataType::Text => ColumnData::Text(
            values
                .iter()
                .map(|v| match *v {
                    Value::Text(s) => Some(s.to_string()),
                    _ => None,
                })
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    use crate::crossmatch::angular_crossmatch;

    fn left_table() -> Table {
        Table::new(vec![
            Column::int("id", vec![Some(1), Some(2)]),
            Column::float("RA", [10.0, 50.0]),
            Column::float("Dec", [20.0, 60.0]),
        ])
        .unwrap()
    }

    fn right_table() -> Table {
        Table::new(vec![
            Column::text("id", [Some("A"), Some("B")]),
            Column::float("RA", [10.0003, 100.0]),
            Column::float("Dec", [20.0, -10.0]),
            Column::float("flux", [1.5, 2.5]),
        ])
        .unwrap()
    }

    fn crossmatched(left: &Table, right: &Table, radius_arcsec: f64) -> Table {
        let m = angular_crossmatch(
            left.positions("RA", "Dec").unwrap().view(),
            right.positions("RA", "Dec").unwrap().view(),
            radius_arcsec / 3600.0,
            true,
        )
        .unwrap();
        merge(left, right, &m).unwrap()
    }

    #[test]
    fn concrete_scenario_one_match_one_miss() {
        let merged = crossmatched(&left_table(), &right_table(), 4.0);
        assert_eq!(
            merged.column_names(),
            vec!["id_1", "RA_1", "Dec_1", "id_2", "RA_2", "Dec_2", "flux", "Separation", "Count"]
        );
        assert_eq!(merged.num_rows(), 2);
        assert_eq!(merged.column("id_2").unwrap().get(0), Value::Text("A"));
        assert_eq!(merged.column("id_2").unwrap().get(1), Value::Null);
        assert_eq!(merged.column("flux").unwrap().get(1), Value::Null);

        let seps = merged.float_values("Separation").unwrap();
        assert_abs_diff_eq!(seps[0].unwrap(), 1.08 * 20f64.to_radians().cos(), epsilon = 1e-4);
        assert_eq!(seps[1], None);

        let counts = merged.column("Count").unwrap();
        assert_eq!((counts.get(0), counts.get(1)), (Value::Int(1), Value::Int(0)));
    }

    #[test]
    fn duplicate_matches_expand_and_reduce() {
        let left = left_table();
        let right = Table::new(vec![
            Column::text("id", [Some("A"), Some("B"), Some("C")]),
            Column::float("RA", [10.0006, 10.0001, 100.0]),
            Column::float("Dec", [20.0, 20.0, -10.0]),
        ])
        .unwrap();
        let merged = crossmatched(&left, &right, 4.0);

        assert_eq!(merged.num_rows(), 3);
        let count = merged.column("Count").unwrap();
        assert_eq!(count.get(0), Value::Int(2));
        assert_eq!(count.get(1), Value::Int(2));
        assert_eq!(count.get(2), Value::Int(0));
        assert_eq!(merged.column("id_1").unwrap().get(1), Value::Int(1));

        let best = best_match(&merged, "id_1").unwrap();
        assert_eq!(best.num_rows(), 2);
        // first encountered candidate wins, not the nearest
        assert_eq!(best.column("id_2").unwrap().get(0), Value::Text("A"));

        let nearest = nearest_match(&merged, "id_1", SEPARATION).unwrap();
        assert_eq!(nearest.num_rows(), 2);
        assert_eq!(nearest.column("id_2").unwrap().get(0), Value::Text("B"));
        assert_eq!(nearest.column("id_1").unwrap().get(1), Value::Int(2));

        let inner = inner_join(&merged, SEPARATION).unwrap();
        assert_eq!(inner.num_rows(), 2);
        assert_eq!(inner_join(&best, SEPARATION).unwrap().num_rows(), 1);
    }

    #[test]
    fn row_count_never_shrinks() {
        let left = left_table();
        let right = right_table();
        for (indices, expected_rows, has_count) in [
            (vec![vec![0], vec![1]], 2, false),
            (vec![vec![], vec![]], 2, true),
            (vec![vec![0, 1], vec![1]], 3, true),
        ] {
            let m = Matches {
                indices,
                separations: None,
            };
            let merged = merge(&left, &right, &m).unwrap();
            assert!(merged.num_rows() >= left.num_rows());
            assert_eq!(merged.num_rows(), expected_rows);
            assert_eq!(merged.has_column(COUNT), has_count);
            assert!(!merged.has_column(SEPARATION));
        }
    }

    #[test]
    fn coincident_positions_have_zero_separation() {
        let left = left_table();
        let merged = crossmatched(&left, &left, 1.0);
        let seps = merged.float_values(SEPARATION).unwrap();
        assert_eq!(seps, vec![Some(0.0), Some(0.0)]);
        assert!(!merged.has_column(COUNT));
    }

    #[test]
    fn derived_names_do_not_clobber_existing_columns() {
        let left = Table::new(vec![
            Column::float("Separation", [0.0]),
            Column::int("Count", vec![Some(7)]),
        ])
        .unwrap();
        let right = Table::new(vec![Column::float("x", [1.0])]).unwrap();
        let m = Matches {
            indices: vec![vec![]],
            separations: Some(vec![vec![f64::INFINITY]]),
        };
        let merged = merge_detailed(&left, &right, &m).unwrap();
        assert_eq!(merged.separation.as_deref(), Some("Separation_1"));
        assert_eq!(merged.count.as_deref(), Some("Count_1"));
        assert_eq!(
            merged.table.column_names(),
            vec!["Separation", "Count", "x", "Separation_1", "Count_1"]
        );
    }

    #[test]
    fn chained_suffixes_do_not_collide() {
        let left =
            Table::new(vec![Column::float("RA_1", [1.0]), Column::float("RA", [2.0])]).unwrap();
        let right = Table::new(vec![Column::float("RA", [3.0])]).unwrap();
        let m = Matches {
            indices: vec![vec![0]],
            separations: None,
        };
        let merged = merge(&left, &right, &m).unwrap();
        assert_eq!(merged.column_names(), vec!["RA_1", "RA_1_1", "RA_2"]);
        assert_eq!(merged.column("RA_1").unwrap().get(0), Value::Float(1.0));
        assert_eq!(merged.column("RA_1_1").unwrap().get(0), Value::Float(2.0));
    }

    #[test]
    fn malformed_match_lists_are_rejected() {
        let left = left_table();
        let right = right_table();
        let short = Matches {
            indices: vec![vec![0]],
            separations: None,
        };
        assert!(matches!(
            merge(&left, &right, &short),
            Err(MergeError::RowCountMismatch { matches: 1, rows: 2 })
        ));
        let oob = Matches {
            indices: vec![vec![0], vec![5]],
            separations: None,
        };
        assert!(matches!(
            merge(&left, &right, &oob),
            Err(MergeError::IndexOutOfRange { index: 5, .. })
        ));
        let ragged = Matches {
            indices: vec![vec![0], vec![1]],
            separations: Some(vec![vec![0.1], vec![]]),
        };
        assert!(matches!(
            merge(&left, &right, &ragged),
            Err(MergeError::SeparationShape { row: 1 })
        ));
    }

    #[test]
    fn best_match_is_idempotent_and_keeps_first() {
        let t = Table::new(vec![
            Column::text("k", [Some("a"), Some("b"), Some("a"), None, None, Some("c")]),
            Column::int("v", (0..6).map(Some).collect()),
        ])
        .unwrap();
        let once = best_match(&t, "k").unwrap();
        let twice = best_match(&once, "k").unwrap();
        assert_eq!(once, twice);
        let kept: Vec<Value> =
            (0..once.num_rows()).map(|i| once.column("v").unwrap().get(i)).collect();
        assert_eq!(kept, vec![Value::Int(0), Value::Int(1), Value::Int(3), Value::Int(5)]);
        assert!(best_match(&t, "missing").is_err());
    }

    #[test]
    fn inner_join_removes_only_missing_separations() {
        let t = Table::new(vec![
            Column::float("Separation", [0.5, f64::NAN, 0.0, 3.0]),
            Column::int("v", vec![Some(0), Some(1), Some(2), Some(3)]),
        ])
        .unwrap();
        let out = inner_join(&t, SEPARATION).unwrap();
        assert!(out.num_rows() <= t.num_rows());
        assert_eq!(out.float_values(SEPARATION).unwrap(), vec![Some(0.5), Some(0.0), Some(3.0)]);
        assert_eq!(out.column("v").unwrap().get(2), Value::Int(3));
    }

    #[test]
    fn sort_by_separation_keeps_group_order() {
        let t = Table::new(vec![
            Column::int("k", vec![Some(2), Some(1), Some(2), Some(1)]),
            Column::float("Separation", [3.0, f64::NAN, 1.0, 2.0]),
        ])
        .unwrap();
        let sorted = sort_by_separation(&t, "k", SEPARATION).unwrap();
        assert_eq!(
            sorted.float_values(SEPARATION).unwrap(),
            vec![Some(1.0), Some(3.0), Some(2.0), None]
        );
    }

    fn key_tables() -> (Table, Table) {
        let left = Table::new(vec![
            Column::int("ID", vec![Some(1), Some(2), None, Some(3)]),
            Column::float("flux", [1.0, 2.0, 3.0, 4.0]),
        ])
        .unwrap();
        let right = Table::new(vec![
            Column::float("ID", [3.0, 1.0, 9.0, 1.0]),
            Column::float("flux", [30.0, 10.0, 90.0, 11.0]),
        ])
        .unwrap();
        (left, right)
    }

    #[test]
    fn inner_key_join() {
        let (left, right) = key_tables();
        let j = join_on(&left, &right, "ID", "ID", JoinKind::Inner).unwrap();
        assert_eq!(j.column_names(), vec!["ID", "flux_1", "flux_2"]);
        assert_eq!(j.float_values("flux_2").unwrap(), vec![Some(10.0), Some(11.0), Some(30.0)]);
        assert_eq!(j.float_values("ID").unwrap(), vec![Some(1.0), Some(1.0), Some(3.0)]);
    }

    #[test]
    fn left_and_outer_key_joins() {
        let (left, right) = key_tables();
        let l = join_on(&left, &right, "ID", "ID", JoinKind::Left).unwrap();
        assert_eq!(l.num_rows(), 5);
        assert_eq!(l.float_values("flux_2").unwrap()[3], None);

        let o = join_on(&left, &right, "ID", "ID", JoinKind::Outer).unwrap();
        assert_eq!(o.num_rows(), 6);
        // unmatched right row comes last, with its key folded into ID
        assert_eq!(o.float_values("ID").unwrap()[5], Some(9.0));
        assert_eq!(o.float_values("flux_1").unwrap()[5], None);
    }

    #[test]
    fn join_on_differently_named_keys_keeps_both() {
        let (left, right) = key_tables();
        let right = right.with_suffix("_r");
        let j = join_on(&left, &right, "ID", "ID_r", JoinKind::Inner).unwrap();
        assert_eq!(j.column_names(), vec!["ID", "flux", "ID_r", "flux_r"]);
        assert_eq!(j.num_rows(), 3);
    }

    fn radio_table() -> Table {
        Table::new(vec![
            Column::float("ra_3GHz", [1.0, f64::NAN, f64::NAN]),
            Column::float("ra_err_3GHz", [0.1, f64::NAN, f64::NAN]),
            Column::float("RA_1d4GHz", [1.1, 2.0, f64::NAN]),
            Column::float("E_RA_1d4GHz", [0.2, f64::NAN, f64::NAN]),
        ])
        .unwrap()
    }

    #[test]
    fn coalesce_takes_all_outputs_from_the_selected_catalog() {
        let spec = CoalesceSpec {
            selectors: vec!["ra_3GHz".into(), "RA_1d4GHz".into()],
            outputs: vec![
                CoalesceOutput {
                    name: "ra_radio".into(),
                    sources: vec!["ra_3GHz".into(), "RA_1d4GHz".into()],
                },
                CoalesceOutput {
                    name: "ra_err_radio".into(),
                    sources: vec!["ra_err_3GHz".into(), "E_RA_1d4GHz".into()],
                },
            ],
            label: Some(CoalesceLabel {
                name: "radio_det".into(),
                values: vec!["3".into(), "1.4".into()],
            }),
        };
        let out = coalesce(&radio_table(), &spec).unwrap();
        assert_eq!(out.float_values("ra_radio").unwrap(), vec![Some(1.0), Some(2.0), None]);
        assert_eq!(out.float_values("ra_err_radio").unwrap(), vec![Some(0.1), None, None]);
        let det = out.column("radio_det").unwrap();
        assert_eq!(
            (det.get(0), det.get(1), det.get(2)),
            (Value::Text("3"), Value::Text("1.4"), Value::Null)
        );
    }

    #[test]
    fn coalesce_rerun_overwrites_its_outputs() {
        let spec = CoalesceSpec {
            selectors: vec!["ra_3GHz".into(), "RA_1d4GHz".into()],
            outputs: vec![CoalesceOutput {
                name: "ra_radio".into(),
                sources: vec!["ra_3GHz".into(), "RA_1d4GHz".into()],
            }],
            label: Some(CoalesceLabel {
                name: "radio_det".into(),
                values: vec!["3".into(), "1.4".into()],
            }),
        };
        let once = coalesce(&radio_table(), &spec).unwrap();
        let twice = coalesce(&once, &spec).unwrap();
        assert_eq!(twice, once);

        let mut reversed = spec.clone();
        reversed.selectors.reverse();
        reversed.outputs[0].sources.reverse();
        reversed.label = None;
        let swapped = coalesce(&once, &reversed).unwrap();
        assert_eq!(swapped.column_names(), once.column_names());
        assert_eq!(swapped.float_values("ra_radio").unwrap()[0], Some(1.1));
    }

    #[test]
    fn coalesce_validates_arity_and_types() {
        let mut spec = CoalesceSpec {
            selectors: vec!["ra_3GHz".into(), "RA_1d4GHz".into()],
            outputs: vec![CoalesceOutput {
                name: "ra".into(),
                sources: vec!["ra_3GHz".into()],
            }],
            label: None,
        };
        assert!(matches!(
            coalesce(&radio_table(), &spec),
            Err(MergeError::CoalesceArity { expected: 2, found: 1, .. })
        ));

        let mut t = radio_table();
        t.push_column(Column::text("name", [Some("x"), None, None])).unwrap();
        spec.outputs[0].sources = vec!["ra_3GHz".into(), "name".into()];
        assert!(matches!(coalesce(&t, &spec), Err(MergeError::IncompatibleTypes { .. })));
    }

    #[test]
    fn unify_rules() {
        assert_eq!(unify("c", &[DataType::Int, DataType::Int]).unwrap(), DataType::Int);
        assert_eq!(unify("c", &[DataType::Int, DataType::Float]).unwrap(), DataType::Float);
        assert_eq!(unify("c", &[DataType::Text]).unwrap(), DataType::Text);
        assert!(unify("c", &[DataType::Text, DataType::Int]).is_err());
    }
}
