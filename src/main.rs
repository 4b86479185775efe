use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use skyjoin::merge::{CoalesceLabel, CoalesceOutput, CoalesceSpec, JoinKind};
use skyjoin::pipeline::{
    CoalesceStep, CrossmatchStep, JoinStep, PipelineConfig, RenameStep, Step, StepReport,
    run_pipeline,
};
use skyjoin::table::{read_table, write_table};

#[derive(Parser)]
#[command(name = "skyjoin", about = "Positional cross-matching of astronomical catalogs")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match every source of LEFT against RIGHT within a radius.
    Crossmatch {
        /// Left catalog (.csv or .skyt).
        left: PathBuf,

        /// Right catalog (.csv or .skyt).
        right: PathBuf,

        /// RA column of the left catalog (degrees).
        #[arg(long)]
        left_ra: String,

        /// Dec column of the left catalog (degrees).
        #[arg(long)]
        left_dec: String,

        /// RA column of the right catalog (degrees).
        #[arg(long)]
        right_ra: String,

        /// Dec column of the right catalog (degrees).
        #[arg(long)]
        right_dec: String,

        /// Search radius in arcseconds.
        #[arg(short, long, default_value = "1.0")]
        radius: f64,

        /// Output path for every candidate pair.
        #[arg(long)]
        all: Option<PathBuf>,

        /// Output path for one row per left source.
        #[arg(long)]
        best: Option<PathBuf>,

        /// Output path for one row per matched left source.
        #[arg(long)]
        inner: Option<PathBuf>,

        /// Column identifying left sources (default: first merged column).
        #[arg(long)]
        key: Option<String>,

        /// Keep the closest counterpart rather than the first.
        #[arg(long)]
        nearest: bool,
    },

    /// Join two catalogs on key columns.
    Join {
        left: PathBuf,
        right: PathBuf,

        #[arg(long)]
        left_key: String,

        #[arg(long)]
        right_key: String,

        #[arg(long, value_enum, default_value = "inner")]
        how: How,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Add a column taking the first available value among several columns.
    Coalesce {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Name of the combined column.
        #[arg(long)]
        column: String,

        /// Source columns in priority order (comma-separated).
        #[arg(long, value_delimiter = ',', required = true)]
        sources: Vec<String>,

        /// Name of a column recording which source was used.
        #[arg(long, requires = "labels")]
        label: Option<String>,

        /// One label per source (comma-separated).
        #[arg(long, value_delimiter = ',')]
        labels: Vec<String>,
    },

    /// Append a suffix to every column name.
    Rename {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        suffix: String,
    },

    /// Convert a catalog between CSV and the binary table format.
    Convert { input: PathBuf, output: PathBuf },

    /// Run a JSON pipeline description.
    Pipeline {
        /// Path to the pipeline config.
        config: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum How {
    Inner,
    Left,
    Outer,
}

impl From<How> for JoinKind {
    fn from(how: How) -> Self {
        match how {
            How::Inner => JoinKind::Inner,
            How::Left => JoinKind::Left,
            How::Outer => JoinKind::Outer,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run a single step with paths taken relative to the working directory.
fn run_single(step: Step) -> Result<()> {
    let config = PipelineConfig {
        steps: vec![step],
        ..Default::default()
    };
    let reports = run_pipeline(&config)?;
    print_reports(&reports);
    Ok(())
}

fn print_reports(reports: &[StepReport]) {
    for report in reports {
        for (path, rows) in &report.outputs {
            println!("{}\t{}\t{}", report.op, rows, path.display());
        }
    }
}

fn cmd_convert(input: &Path, output: &Path) -> Result<()> {
    let table = read_table(input).with_context(|| format!("reading {}", input.display()))?;
    write_table(&table, output).with_context(|| format!("writing {}", output.display()))?;
    info!(rows = table.num_rows(), columns = table.num_columns(), "converted {}", input.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Crossmatch {
            left,
            right,
            left_ra,
            left_dec,
            right_ra,
            right_dec,
            radius,
            all,
            best,
            inner,
            key,
            nearest,
        } => run_single(Step::Crossmatch(CrossmatchStep {
            left,
            right,
            left_ra,
            left_dec,
            right_ra,
            right_dec,
            radius_arcsec: radius,
            all_match: all,
            best_match: best,
            inner_join: inner,
            best_key: key,
            nearest,
        })),
        Commands::Join {
            left,
            right,
            left_key,
            right_key,
            how,
            output,
        } => run_single(Step::Join(JoinStep {
            left,
            right,
            left_key,
            right_key,
            how: how.into(),
            output,
        })),
        Commands::Coalesce {
            input,
            output,
            column,
            sources,
            label,
            labels,
        } => run_single(Step::Coalesce(CoalesceStep {
            input,
            output,
            spec: CoalesceSpec {
                selectors: sources.clone(),
                outputs: vec![CoalesceOutput { name: column, sources }],
                label: label.map(|name| CoalesceLabel { name, values: labels }),
            },
        })),
        Commands::Rename { input, output, suffix } => {
            run_single(Step::Rename(RenameStep { input, output, suffix }))
        }
        Commands::Convert { input, output } => cmd_convert(&input, &output),
        Commands::Pipeline { config } => {
            let config = PipelineConfig::load(&config)?;
            let reports = run_pipeline(&config)?;
            print_reports(&reports);
            Ok(())
        }
    }
}
