//! Command-line interface for the Strandline collection engine.
#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use strandline_collect::{
    ClientBuildError, OverpassClient, OverpassConfig, RatePacer, RecordSink, RegionSplitScheduler,
    SchedulerConfig, SinkError, SqliteRecordSink,
};
use strandline_core::{BoundingBox, BoundingBoxError, clean};

const ARG_REGIONS: &str = "regions";
const ARG_DATABASE: &str = "database";
const ENV_REGIONS: &str = "STRANDLINE_CMDS_COLLECT_REGIONS";
const ENV_DATABASE: &str = "STRANDLINE_CMDS_COLLECT_DATABASE";

/// Pause between top-level regions, so one run stays polite upstream.
const INTER_REGION_DELAY: Duration = Duration::from_secs(2);

/// Run the Strandline CLI with the current process arguments and environment.
///
/// # Errors
///
/// Returns [`CliError`] when argument parsing, configuration merging, or
/// the collection run itself fails.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Collect(args) => run_collect(args),
    }
}

fn run_collect(args: CollectArgs) -> Result<(), CliError> {
    let config = args.into_config()?;
    let regions = load_regions(&config.regions)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| CliError::Runtime { source })?;
    runtime.block_on(collect_all(&config, regions))
}

async fn collect_all(config: &CollectConfig, regions: Vec<BoundingBox>) -> Result<(), CliError> {
    let client = OverpassClient::with_config(
        OverpassConfig::new(config.overpass_url.clone())
            .with_selector(config.selector_key.clone(), config.selector_value.clone()),
    )?;
    let pacer = Arc::new(RatePacer::default());
    let scheduler_config = SchedulerConfig::default()
        .with_max_area_threshold(config.max_area)
        .with_min_area_floor(config.min_area)
        .with_geohash_precision(config.geohash_precision);
    let scheduler = RegionSplitScheduler::new(Arc::new(client), pacer, scheduler_config);
    let sink = SqliteRecordSink::open(&config.database)?;

    let mut total_records: u64 = 0;
    let mut total_failed_leaves: u64 = 0;
    let region_count = regions.len();
    for (index, region) in regions.into_iter().enumerate() {
        log::info!(
            "collecting {} ({}/{region_count})",
            region.display_name(),
            index + 1
        );
        let report = scheduler.collect(&region).await;
        let cleaned: Vec<_> = report
            .records
            .into_iter()
            .map(clean::clean_record)
            .collect();
        total_records += cleaned.len() as u64;
        total_failed_leaves += report.failed_leaves;
        sink.store_batch(&cleaned).await?;
        if report.failed_leaves > 0 {
            log::warn!(
                "{}: {} leaves failed permanently",
                region.display_name(),
                report.failed_leaves
            );
        }
        if index + 1 < region_count {
            tokio::time::sleep(INTER_REGION_DELAY).await;
        }
    }

    log::info!(
        "stored {total_records} records across {region_count} regions ({} in database, {total_failed_leaves} failed leaves)",
        sink.total_records()?
    );
    Ok(())
}

#[derive(Debug, Parser)]
#[command(
    name = "strandline",
    about = "Adaptive collection of spatial records into a local database",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Collect records for every region in a region file.
    Collect(CollectArgs),
}

/// CLI arguments for the `collect` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Collect spatial records for each region listed in a JSON \
                 region file. Options can come from CLI flags, configuration \
                 files, or environment variables.",
    about = "Collect spatial records for the regions in a region file"
)]
#[ortho_config(prefix = "STRANDLINE")]
struct CollectArgs {
    /// Path to the JSON region file.
    #[arg(long = ARG_REGIONS, value_name = "path")]
    #[serde(default)]
    regions: Option<PathBuf>,
    /// Path to the SQLite database to create or update.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    database: Option<PathBuf>,
    /// Split boxes larger than this many square degrees.
    #[arg(long, value_name = "sq-deg")]
    #[serde(default)]
    max_area: Option<f64>,
    /// Never split boxes smaller than this many square degrees.
    #[arg(long, value_name = "sq-deg")]
    #[serde(default)]
    min_area: Option<f64>,
    /// Geohash precision for stored records.
    #[arg(long, value_name = "chars")]
    #[serde(default)]
    geohash_precision: Option<usize>,
    /// Overpass endpoint to query.
    #[arg(long, value_name = "url")]
    #[serde(default)]
    overpass_url: Option<String>,
    /// Tag key the query selects on.
    #[arg(long, value_name = "key")]
    #[serde(default)]
    selector_key: Option<String>,
    /// Tag value the query selects on.
    #[arg(long, value_name = "value")]
    #[serde(default)]
    selector_value: Option<String>,
}

impl CollectArgs {
    fn into_config(self) -> Result<CollectConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        CollectConfig::try_from(merged)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CollectConfig {
    regions: PathBuf,
    database: PathBuf,
    max_area: f64,
    min_area: f64,
    geohash_precision: usize,
    overpass_url: String,
    selector_key: String,
    selector_value: String,
}

impl TryFrom<CollectArgs> for CollectConfig {
    type Error = CliError;

    fn try_from(args: CollectArgs) -> Result<Self, Self::Error> {
        let regions = args.regions.ok_or(CliError::MissingArgument {
            field: ARG_REGIONS,
            env: ENV_REGIONS,
        })?;
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_DATABASE,
        })?;
        let defaults = SchedulerConfig::default();
        let selector = OverpassConfig::default();
        Ok(Self {
            regions,
            database,
            max_area: args.max_area.unwrap_or(defaults.max_area_threshold),
            min_area: args.min_area.unwrap_or(defaults.min_area_floor),
            geohash_precision: args
                .geohash_precision
                .unwrap_or(defaults.geohash_precision),
            overpass_url: args
                .overpass_url
                .unwrap_or_else(|| strandline_collect::overpass::DEFAULT_BASE_URL.to_owned()),
            selector_key: args.selector_key.unwrap_or(selector.selector_key),
            selector_value: args.selector_value.unwrap_or(selector.selector_value),
        })
    }
}

/// One region in the region file.
#[derive(Debug, Deserialize)]
struct RegionSpec {
    name: Option<String>,
    south: f64,
    north: f64,
    west: f64,
    east: f64,
}

impl RegionSpec {
    fn into_region(self, index: usize) -> Result<BoundingBox, CliError> {
        let label = self
            .name
            .clone()
            .unwrap_or_else(|| format!("region {index}"));
        let region = BoundingBox::new(self.south, self.north, self.west, self.east)
            .map_err(|source| CliError::InvalidRegion {
                name: label.clone(),
                source,
            })?;
        Ok(match self.name {
            Some(name) => region.with_name(name),
            None => region,
        })
    }
}

fn load_regions(path: &Path) -> Result<Vec<BoundingBox>, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::RegionFile {
        path: path.to_path_buf(),
        source,
    })?;
    let specs: Vec<RegionSpec> =
        serde_json::from_str(&raw).map_err(|source| CliError::RegionParse {
            path: path.to_path_buf(),
            source,
        })?;
    if specs.is_empty() {
        return Err(CliError::EmptyRegionFile {
            path: path.to_path_buf(),
        });
    }
    specs
        .into_iter()
        .enumerate()
        .map(|(index, spec)| spec.into_region(index))
        .collect()
}

/// Errors emitted by the Strandline CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// The region file could not be read.
    #[error("failed to read region file {path:?}: {source}")]
    RegionFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The region file is not valid JSON.
    #[error("failed to parse region file {path:?}: {source}")]
    RegionParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// The region file contains no regions.
    #[error("region file {path:?} contains no regions")]
    EmptyRegionFile { path: PathBuf },
    /// A region in the region file has invalid bounds.
    #[error("invalid region {name}: {source}")]
    InvalidRegion {
        name: String,
        #[source]
        source: BoundingBoxError,
    },
    /// The async runtime failed to start.
    #[error("failed to start runtime: {source}")]
    Runtime {
        #[from]
        source: std::io::Error,
    },
    /// The query client could not be built.
    #[error(transparent)]
    Client(#[from] ClientBuildError),
    /// Persisting records failed.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[cfg(test)]
mod tests;
