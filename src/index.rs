//! Building of tabix indices for association and credible-set shards.

use std::{path::PathBuf, time::Instant};

use clap::Parser;

use crate::{
    common::noodles::{build_tbi, tbi_path, TsvColumns},
    query::locator::{CS_MERGED_COLUMNS, CS_SPLIT_COLUMNS, MERGED_COLUMNS, SPLIT_COLUMNS},
};

/// Layout of a shard to index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum ShardKind {
    /// Merged association shard, all studies and tissues.
    Merged,
    /// Association shard of one study and tissue.
    Split,
    /// Merged credible-set shard of one chromosome.
    CredibleSetsMerged,
    /// Purity-filtered credible-set shard of one study and tissue.
    CredibleSetsSplit,
}

impl ShardKind {
    /// Number of header lines and coordinate columns.
    pub fn layout(self) -> (usize, TsvColumns) {
        match self {
            ShardKind::Merged => (0, MERGED_COLUMNS),
            ShardKind::Split => (1, SPLIT_COLUMNS),
            ShardKind::CredibleSetsMerged => (0, CS_MERGED_COLUMNS),
            ShardKind::CredibleSetsSplit => (1, CS_SPLIT_COLUMNS),
        }
    }
}

/// Command line arguments for `index` sub command.
#[derive(Parser, Debug)]
#[command(about = "Build tabix index for a shard", long_about = None)]
pub struct Args {
    /// Path to the coordinate-sorted BGZF shard.
    #[arg(long, required = true)]
    pub path_input: PathBuf,
    /// Layout of the shard.
    #[arg(long, value_enum)]
    pub shard_kind: ShardKind,
    /// Path to the index, defaults to the input path with `.tbi` appended.
    #[arg(long)]
    pub path_output: Option<PathBuf>,
}

/// Main entry point for `index` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    let (header_skip, columns) = args.shard_kind.layout();
    let path_output = args
        .path_output
        .clone()
        .unwrap_or_else(|| tbi_path(&args.path_input));

    tracing::info!("Building index {:?}...", &path_output);
    let before_building = Instant::now();
    build_tbi(&args.path_input, &path_output, header_skip, columns)?;
    tracing::info!(
        "... done building index in {:?}",
        before_building.elapsed()
    );

    Ok(())
}
