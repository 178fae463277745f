//! Query eQTL associations of one data directory.

pub mod credible_sets;
pub mod finemap;
pub mod interpreter;
pub mod locator;
pub mod lookups;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod reducers;
pub mod schema;
pub mod summary;

use std::{
    io::{BufWriter, Write},
    path::PathBuf,
    time::Instant,
};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::{
    common::{io::open_write_maybe_gz, trace_rss_now, worker_version},
    conf::{Conf, DataLayout, FinemapSource},
    err::QueryError,
};

use self::{
    finemap::{CredibleSetFinemapStore, FinemapStore, SqliteFinemapStore},
    locator::{checked_chrom, Locator, QueryRegion},
    lookups::{
        is_inside_gene, tissue_system, GencodeGenes, GeneLocator, GeneSymbols, Lookups, TssTable,
        TISSUES_PER_STUDY, UNKNOWN_SYSTEM,
    },
    output::{
        try_write_json_lines, write_json_lines, BestVariantOutput, GeneOutput, TissueOutput,
        VariantInfoOutput, VariantOutput,
    },
    pipeline::{QueryEngine, QueryParams},
    reducers::{BestVariant, TopSignals},
    schema::{DataKind, VariantRecord},
    summary::{SqliteSummaryStore, SummaryQuery},
};

/// Command line arguments for `query` sub command.
#[derive(Parser, Debug)]
#[command(author, version, about = "Query eQTL associations", long_about = None)]
pub struct Args {
    /// Path to the data directory.
    #[arg(long, required = true)]
    pub path_data_dir: PathBuf,
    /// Path to the data layout configuration, defaults to `conf.toml` in the
    /// data directory.
    #[arg(long)]
    pub path_conf: Option<PathBuf>,
    /// Path to the output JSONL file, stdout if not given.
    #[arg(long)]
    pub path_output: Option<PathBuf>,

    /// The query to run.
    #[command(subcommand)]
    pub command: QueryCommands,
}

/// Filters shared by the association and credible set queries.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Study name, e.g., `GTEx`.
    #[arg(long)]
    pub study: Option<String>,
    /// Tissue name, e.g., `liver`.
    #[arg(long)]
    pub tissue: Option<String>,
    /// Gene ID, with or without version.
    #[arg(long)]
    pub gene_id: Option<String>,
    /// Data kind (ge, exon, tx, txrev, microarray), the configured default if
    /// not given.
    #[arg(long)]
    pub data_kind: Option<String>,
}

/// Arguments of the single-position queries.
#[derive(clap::Args, Debug, Clone)]
pub struct VariantArgs {
    /// Chromosome, with or without `chr` prefix.
    #[arg(long)]
    pub chrom: String,
    /// 1-based position.
    #[arg(long)]
    pub pos: u64,
    /// Molecular trait (transcript) ID.
    #[arg(long)]
    pub transcript: Option<String>,
    #[command(flatten)]
    pub filters: FilterArgs,
}

/// Arguments of the region queries.
#[derive(clap::Args, Debug, Clone)]
pub struct RegionArgs {
    /// Chromosome, with or without `chr` prefix.
    #[arg(long)]
    pub chrom: String,
    /// 1-based start position.
    #[arg(long)]
    pub start: u64,
    /// 1-based end position, inclusive.
    #[arg(long)]
    pub end: u64,
    /// Molecular trait (transcript) ID.
    #[arg(long)]
    pub transcript: Option<String>,
    /// Only fine-mapped, genome-wide significant associations.
    #[arg(long, default_value_t = false)]
    pub significant_only: bool,
    #[command(flatten)]
    pub filters: FilterArgs,
}

/// Arguments of the credible set listing.
#[derive(clap::Args, Debug, Clone)]
pub struct CredibleSetArgs {
    #[arg(long)]
    pub chrom: String,
    #[arg(long)]
    pub start: u64,
    /// End of the region, a single position is listed if not given.
    #[arg(long)]
    pub end: Option<u64>,
    #[command(flatten)]
    pub filters: FilterArgs,
}

/// Arguments of the summary store queries.
#[derive(clap::Args, Debug, Clone)]
pub struct SummaryArgs {
    #[arg(long)]
    pub chrom: String,
    /// Start of the region, the whole chromosome if not given.
    #[arg(long)]
    pub start: Option<u64>,
    #[arg(long, requires = "start")]
    pub end: Option<u64>,
    #[arg(long)]
    pub study: Option<String>,
    #[arg(long)]
    pub tissue: Option<String>,
    #[arg(long)]
    pub gene_id: Option<String>,
}

/// Arguments of `query region-genes`.
#[derive(clap::Args, Debug, Clone)]
pub struct RegionGenesArgs {
    #[arg(long)]
    pub chrom: String,
    #[arg(long)]
    pub start: u64,
    #[arg(long)]
    pub end: u64,
}

/// Arguments of `query variant-info`.
#[derive(clap::Args, Debug, Clone)]
pub struct VariantInfoArgs {
    #[arg(long)]
    pub chrom: String,
    #[arg(long)]
    pub pos: u64,
}

/// Arguments of `query tissues`.
#[derive(clap::Args, Debug, Clone)]
pub struct TissuesArgs {
    /// Only list the tissues of this study.
    #[arg(long)]
    pub study: Option<String>,
}

/// Enum supporting the parsing of "query *" sub commands.
#[derive(Debug, Subcommand)]
pub enum QueryCommands {
    /// Associations at one position.
    Variant(VariantArgs),
    /// Associations in a region.
    Region(RegionArgs),
    /// The strongest association in a region.
    Best(RegionArgs),
    /// The strongest independent signals in a region.
    Top(RegionArgs),
    /// Credible set rows in a region.
    CredibleSets(CredibleSetArgs),
    /// The strongest association from the summary store.
    BestSummary(SummaryArgs),
    /// Genes with associations in a region, from the summary store.
    RegionGenes(RegionGenesArgs),
    /// Genes at or nearest to a position.
    VariantInfo(VariantInfoArgs),
    /// Tissues of the catalogue and their organ systems.
    Tissues(TissuesArgs),
}

/// Load the gene symbol table.
fn load_symbols(layout: &DataLayout) -> Result<GeneSymbols, anyhow::Error> {
    tracing::info!("Loading gene symbols...");
    let before_loading = Instant::now();
    let symbols = GeneSymbols::from_path(&layout.gene_symbols())?;
    tracing::info!(
        "... done loading gene symbols in {:?}",
        before_loading.elapsed()
    );
    Ok(symbols)
}

/// Load all lookup tables used for building records.
fn load_lookups(layout: &DataLayout) -> Result<Lookups, anyhow::Error> {
    let symbols = load_symbols(layout)?;
    tracing::info!("Loading TSS table...");
    let before_loading = Instant::now();
    let tss = TssTable::from_path(&layout.tss())?;
    tracing::info!("... done loading TSS table in {:?}", before_loading.elapsed());
    trace_rss_now();
    Ok(Lookups { symbols, tss })
}

/// The configured fine-mapping store.
fn finemap_store<'a>(layout: &'a DataLayout, data_kind: DataKind) -> Box<dyn FinemapStore + 'a> {
    match &layout.conf.finemap {
        FinemapSource::Sqlite { path } => Box::new(SqliteFinemapStore::new(layout.resolve(path))),
        FinemapSource::CredibleSets => Box::new(CredibleSetFinemapStore::new(
            Locator::new(layout),
            data_kind,
        )),
    }
}

/// The queried data kind, falling back to the configured one.
fn data_kind(layout: &DataLayout, filters: &FilterArgs) -> Result<DataKind, anyhow::Error> {
    Ok(match filters.data_kind.as_deref() {
        Some(name) => DataKind::parse(name)?,
        None => layout.conf.data_kind,
    })
}

/// Build the pipeline parameters of a region command.
fn region_params(args: &RegionArgs, data_kind: DataKind) -> QueryParams {
    QueryParams {
        chrom: args.chrom.clone(),
        start: args.start,
        end: Some(args.end),
        study: args.filters.study.clone(),
        tissue: args.filters.tissue.clone(),
        gene_id: args.filters.gene_id.clone(),
        transcript: args.transcript.clone(),
        significant_only: args.significant_only,
        data_kind: Some(data_kind),
    }
}

/// Run one association query through the pipeline and hand the records to
/// `consume`.
fn with_records<F>(
    layout: &DataLayout,
    params: &QueryParams,
    cancel: CancellationToken,
    consume: F,
) -> Result<usize, anyhow::Error>
where
    F: FnOnce(
        &mut dyn Iterator<Item = Result<VariantRecord, QueryError>>,
    ) -> Result<usize, anyhow::Error>,
{
    // Reject parameters before loading anything.
    QueryRegion::new(&params.chrom, params.start, params.end)?;
    let data_kind = params.data_kind.unwrap_or(layout.conf.data_kind);

    let lookups = load_lookups(layout)?;
    let store = finemap_store(layout, data_kind);
    let engine = QueryEngine::new(layout, &lookups, store.as_ref());

    let before_query = Instant::now();
    let mut records = engine.query(params, cancel)?;
    let count = consume(&mut records)?;
    tracing::info!("query done in {:?}", before_query.elapsed());
    Ok(count)
}

/// Run the query `command`, writing JSON lines to `writer`.
///
/// Returns the number of lines written.
pub fn execute<W: Write>(
    layout: &DataLayout,
    command: &QueryCommands,
    writer: &mut W,
    cancel: CancellationToken,
) -> Result<usize, anyhow::Error> {
    match command {
        QueryCommands::Variant(args) => {
            let params = QueryParams {
                chrom: args.chrom.clone(),
                start: args.pos,
                end: None,
                study: args.filters.study.clone(),
                tissue: args.filters.tissue.clone(),
                gene_id: args.filters.gene_id.clone(),
                transcript: args.transcript.clone(),
                significant_only: false,
                data_kind: Some(data_kind(layout, &args.filters)?),
            };
            with_records(layout, &params, cancel, |records| {
                try_write_json_lines(
                    writer,
                    records.map(|record| record.map(|record| VariantOutput::from(&record))),
                )
            })
        }
        QueryCommands::Region(args) => {
            let params = region_params(args, data_kind(layout, &args.filters)?);
            with_records(layout, &params, cancel, |records| {
                try_write_json_lines(
                    writer,
                    records.map(|record| record.map(|record| VariantOutput::from(&record))),
                )
            })
        }
        QueryCommands::Best(args) => {
            let params = region_params(args, data_kind(layout, &args.filters)?);
            with_records(layout, &params, cancel, |records| {
                let mut best = BestVariant::default();
                for record in records {
                    best.push(record?);
                }
                let best = best.finish();
                if best.is_none() {
                    tracing::info!("no association in region");
                }
                write_json_lines(
                    writer,
                    best.map(|record| BestVariantOutput::from_record(&record)),
                )
            })
        }
        QueryCommands::Top(args) => {
            let params = region_params(args, data_kind(layout, &args.filters)?);
            with_records(layout, &params, cancel, |records| {
                let mut top = TopSignals::new();
                for record in records {
                    top.push(record?);
                }
                write_json_lines(writer, top.finish().iter().map(VariantOutput::from))
            })
        }
        QueryCommands::CredibleSets(args) => {
            let region = QueryRegion::new(&args.chrom, args.start, args.end)?;
            let shard = Locator::new(layout).credible_sets(
                &region.chrom,
                args.filters.study.as_deref(),
                args.filters.tissue.as_deref(),
                data_kind(layout, &args.filters)?,
            )?;
            let rows = credible_sets::read_region(
                &shard,
                &region,
                args.filters.gene_id.as_deref(),
                &cancel,
            )?;
            write_json_lines(writer, rows)
        }
        QueryCommands::BestSummary(args) => {
            let region = args
                .start
                .map(|start| QueryRegion::new(&args.chrom, start, args.end))
                .transpose()?;
            let query = SummaryQuery {
                chrom: checked_chrom(&args.chrom)?,
                region,
                study: args.study.clone(),
                tissue: args.tissue.clone(),
                gene_id: args.gene_id.clone(),
            };
            let best = SqliteSummaryStore::new(layout.summary()).select_best(&query)?;
            let symbols = load_symbols(layout)?;
            write_json_lines(
                writer,
                best.map(|row| BestVariantOutput::from_summary(&row, &symbols)),
            )
        }
        QueryCommands::RegionGenes(args) => {
            let region = QueryRegion::new(&args.chrom, args.start, Some(args.end))?;
            let genes = SqliteSummaryStore::new(layout.summary()).genes_in_region(&region)?;
            let symbols = load_symbols(layout)?;
            write_json_lines(
                writer,
                genes.into_iter().map(|gene_id| GeneOutput {
                    symbol: symbols.get_or_unknown(&gene_id).to_string(),
                    gene_id,
                }),
            )
        }
        QueryCommands::VariantInfo(args) => {
            let region = QueryRegion::new(&args.chrom, args.pos, None)?;
            let genes = GencodeGenes::from_path(&layout.genes())?;
            trace_rss_now();
            let nearest_genes = genes.at(&region.chrom, region.start)?;
            write_json_lines(
                writer,
                [VariantInfoOutput {
                    is_inside_gene: is_inside_gene(&nearest_genes, region.start),
                    chrom: region.chrom,
                    pos: region.start,
                    nearest_genes,
                }],
            )
        }
        QueryCommands::Tissues(args) => {
            let studies = TISSUES_PER_STUDY
                .iter()
                .filter(|(study, _)| args.study.as_deref().map_or(true, |s| s == *study))
                .collect::<Vec<_>>();
            if studies.is_empty() {
                anyhow::bail!("unknown study: {:?}", args.study.as_deref().unwrap_or(""));
            }
            write_json_lines(
                writer,
                studies.into_iter().flat_map(|(study, tissues)| {
                    tissues.iter().map(move |tissue| TissueOutput {
                        study: study.to_string(),
                        tissue: tissue.to_string(),
                        system: tissue_system(tissue).unwrap_or(UNKNOWN_SYSTEM).to_string(),
                    })
                }),
            )
        }
    }
}

/// Main entry point for `query` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("eqtl-server-worker {}", worker_version());
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    let conf = Conf::load(&args.path_data_dir, args.path_conf.as_deref())?;
    tracing::debug!("conf = {:?}", &conf);
    let layout = DataLayout::new(&args.path_data_dir, conf);

    let mut writer: Box<dyn Write> = match &args.path_output {
        Some(path) => open_write_maybe_gz(path)
            .map_err(|e| anyhow::anyhow!("could not create {:?}: {}", path, e))?,
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };
    let count = execute(&layout, &args.command, &mut writer, CancellationToken::new())?;
    writer.flush()?;
    tracing::info!("wrote {} result(s)", count);

    Ok(())
}
