//! Declarative multi-catalog matching.
//!
//! A [`PipelineConfig`] lists steps that each read tables from storage and
//! write their results back, so a later step can pick up an earlier step's
//! output as its left catalog. All locations come from the config; nothing
//! here reads global state.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::crossmatch::{CrossmatchError, angular_crossmatch};
use crate::merge::{
    CoalesceSpec, JoinKind, MergeError, best_match, coalesce, inner_join, join_on, merge_detailed,
    nearest_match,
};
use crate::table::{Table, TableError, read_table, write_table};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline config {}: {source}", path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid pipeline config: {0}")]
    ConfigFormat(#[from] serde_json::Error),

    #[error("failed to create output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: {source}", path.display())]
    Table {
        path: PathBuf,
        #[source]
        source: TableError,
    },

    #[error(transparent)]
    Crossmatch(#[from] CrossmatchError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("merged table has no columns to use as a best-match key")]
    NoKeyColumn,

    #[error("step {index} ({op}) failed: {source}")]
    Step {
        index: usize,
        op: &'static str,
        #[source]
        source: Box<PipelineError>,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Positional cross-match of two catalogs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossmatchStep {
    pub left: PathBuf,
    pub right: PathBuf,
    pub left_ra: String,
    pub left_dec: String,
    pub right_ra: String,
    pub right_dec: String,
    pub radius_arcsec: f64,
    /// Every candidate pair.
    #[serde(default)]
    pub all_match: Option<PathBuf>,
    /// One row per left source.
    #[serde(default)]
    pub best_match: Option<PathBuf>,
    /// One row per left source that has a counterpart.
    #[serde(default)]
    pub inner_join: Option<PathBuf>,
    /// Column identifying left sources; defaults to the first merged column.
    #[serde(default)]
    pub best_key: Option<String>,
    /// Prefer the closest counterpart instead of the first one.
    #[serde(default)]
    pub nearest: bool,
}

/// Relational join on key columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinStep {
    pub left: PathBuf,
    pub right: PathBuf,
    pub left_key: String,
    pub right_key: String,
    #[serde(default)]
    pub how: JoinKind,
    pub output: PathBuf,
}

/// Derive combined columns from several catalogs' versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoalesceStep {
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(flatten)]
    pub spec: CoalesceSpec,
}

/// Tag every column of a catalog with a survey suffix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameStep {
    pub input: PathBuf,
    pub output: PathBuf,
    pub suffix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Crossmatch(CrossmatchStep),
    Join(JoinStep),
    Coalesce(CoalesceStep),
    Rename(RenameStep),
}

impl Step {
    pub fn op(&self) -> &'static str {
        match self {
            Step::Crossmatch(_) => "crossmatch",
            Step::Join(_) => "join",
            Step::Coalesce(_) => "coalesce",
            Step::Rename(_) => "rename",
        }
    }
}

/// Where catalogs live and what to do with them.
///
/// Relative input paths resolve against `output_dir` when an earlier step
/// produced them (or they already exist there and not in `catalog_dir`),
/// otherwise against `catalog_dir`. Outputs always go to `output_dir`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub catalog_dir: PathBuf,
    #[serde(default)]
    pub output_dir: PathBuf,
    pub steps: Vec<Step>,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| PipelineError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|source| PipelineError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let mut w = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut w, self)?;
        w.flush().map_err(|source| PipelineError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Rows written by one step, per output file.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub index: usize,
    pub op: &'static str,
    pub outputs: Vec<(PathBuf, usize)>,
}

/// Run every step in order, stopping at the first failure.
pub fn run_pipeline(config: &PipelineConfig) -> Result<Vec<StepReport>> {
    if !config.output_dir.as_os_str().is_empty() && !config.output_dir.exists() {
        fs::create_dir_all(&config.output_dir).map_err(|source| PipelineError::OutputDir {
            path: config.output_dir.clone(),
            source,
        })?;
        info!(dir = %config.output_dir.display(), "created output directory");
    }

    let mut runner = Runner {
        config,
        produced: HashSet::new(),
    };
    let mut reports = Vec::with_capacity(config.steps.len());
    for (index, step) in config.steps.iter().enumerate() {
        info!(step = index, op = step.op(), "running step");
        let outputs = runner.run_step(step).map_err(|e| PipelineError::Step {
            index,
            op: step.op(),
            source: Box::new(e),
        })?;
        reports.push(StepReport {
            index,
            op: step.op(),
            outputs,
        });
    }
    Ok(reports)
}

struct Runner<'a> {
    config: &'a PipelineConfig,
    produced: HashSet<PathBuf>,
}

impl Runner<'_> {
    fn run_step(&mut self, step: &Step) -> Result<Vec<(PathBuf, usize)>> {
        match step {
            Step::Crossmatch(s) => self.crossmatch(s),
            Step::Join(s) => {
                let left = self.read(&s.left)?;
                let right = self.read(&s.right)?;
                let joined = join_on(&left, &right, &s.left_key, &s.right_key, s.how)?;
                info!(rows = joined.num_rows(), how = ?s.how, "key join");
                Ok(vec![self.write(&joined, &s.output)?])
            }
            Step::Coalesce(s) => {
                let table = coalesce(&self.read(&s.input)?, &s.spec)?;
                Ok(vec![self.write(&table, &s.output)?])
            }
            Step::Rename(s) => {
                let table = self.read(&s.input)?.with_suffix(&s.suffix);
                Ok(vec![self.write(&table, &s.output)?])
            }
        }
    }

    fn crossmatch(&mut self, s: &CrossmatchStep) -> Result<Vec<(PathBuf, usize)>> {
        if s.all_match.is_none() && s.best_match.is_none() && s.inner_join.is_none() {
            warn!(
                left = %s.left.display(),
                right = %s.right.display(),
                "crossmatch step writes no outputs"
            );
        }
        let left = self.read(&s.left)?;
        let right = self.read(&s.right)?;
        let left_pos = left.positions(&s.left_ra, &s.left_dec).map_err(|e| table_err(&s.left, e))?;
        let right_pos = right
            .positions(&s.right_ra, &s.right_dec)
            .map_err(|e| table_err(&s.right, e))?;

        let radius_deg = s.radius_arcsec / 3600.0;
        let matches = angular_crossmatch(left_pos.view(), right_pos.view(), radius_deg, true)?;
        let merged = merge_detailed(&left, &right, &matches)?;
        let all = merged.table;
        let separation = merged.separation.unwrap_or_else(|| crate::merge::SEPARATION.to_string());

        let key = match &s.best_key {
            Some(k) => k.clone(),
            None => all
                .column_names()
                .first()
                .map(|k| k.to_string())
                .ok_or(PipelineError::NoKeyColumn)?,
        };
        let best = if s.nearest {
            nearest_match(&all, &key, &separation)?
        } else {
            best_match(&all, &key)?
        };
        let inner = inner_join(&best, &separation)?;

        info!(
            radius_arcsec = s.radius_arcsec,
            all = all.num_rows(),
            best = best.num_rows(),
            inner = inner.num_rows(),
            "crossmatch"
        );

        let mut outputs = Vec::new();
        let targets = [(&all, &s.all_match), (&best, &s.best_match), (&inner, &s.inner_join)];
        for (table, path) in targets {
            if let Some(path) = path {
                outputs.push(self.write(table, path)?);
            }
        }
        Ok(outputs)
    }

    fn resolve_input(&self, name: &Path) -> PathBuf {
        let in_output = self.config.output_dir.join(name);
        if self.produced.contains(&in_output) {
            return in_output;
        }
        let in_catalog = self.config.catalog_dir.join(name);
        if !in_catalog.exists() && in_output.exists() {
            return in_output;
        }
        in_catalog
    }

    fn read(&self, name: &Path) -> Result<Table> {
        let path = self.resolve_input(name);
        let table = read_table(&path).map_err(|e| table_err(&path, e))?;
        debug!(
            path = %path.display(),
            rows = table.num_rows(),
            columns = table.num_columns(),
            "read table"
        );
        Ok(table)
    }

    fn write(&mut self, table: &Table, name: &Path) -> Result<(PathBuf, usize)> {
        let path = self.config.output_dir.join(name);
        write_table(table, &path).map_err(|e| table_err(&path, e))?;
        info!(path = %path.display(), rows = table.num_rows(), "saved table");
        self.produced.insert(path.clone());
        Ok((path, table.num_rows()))
    }
}

fn table_err(path: &Path, source: TableError) -> PipelineError {
    PipelineError::Table {
        path: path.to_path_buf(),
        source,
    }
}
