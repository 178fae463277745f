//! Resolution of query parameters to the shards backing them.

use std::path::PathBuf;

use crate::{
    common::{
        build_chrom_map, canonicalize_chrom,
        noodles::{RegionRequest, TsvColumns},
        CHROMS,
    },
    conf::DataLayout,
    err::QueryError,
};

use super::{parser::SchemaHint, schema::DataKind};

/// Width of the position windows of the merged shards.
pub const WINDOW_SIZE: u64 = 1_000_000;

/// Coordinate columns of merged association shards.
pub const MERGED_COLUMNS: TsvColumns = TsvColumns { chrom: 3, pos: 4 };
/// Coordinate columns of per-study-per-tissue association shards.
pub const SPLIT_COLUMNS: TsvColumns = TsvColumns { chrom: 1, pos: 2 };
/// Coordinate columns of merged credible-set shards.
pub const CS_MERGED_COLUMNS: TsvColumns = TsvColumns { chrom: 4, pos: 5 };
/// Coordinate columns of per-study-per-tissue credible-set shards.
pub const CS_SPLIT_COLUMNS: TsvColumns = TsvColumns { chrom: 2, pos: 3 };

/// Validated chromosome and position range of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRegion {
    /// Canonical chromosome name.
    pub chrom: String,
    /// 1-based start position.
    pub start: u64,
    /// 1-based end position, inclusive; `None` for single-variant queries.
    pub end: Option<u64>,
}

/// Canonical name of `chrom`, rejecting unknown chromosomes.
pub fn checked_chrom(chrom: &str) -> Result<String, QueryError> {
    build_chrom_map()
        .get(canonicalize_chrom(chrom))
        .map(|idx| CHROMS[*idx].to_string())
        .ok_or_else(|| QueryError::InvalidChromosome(chrom.to_string()))
}

impl QueryRegion {
    /// Validate the parameters, rejecting unknown chromosomes and empty ranges.
    pub fn new(chrom: &str, start: u64, end: Option<u64>) -> Result<Self, QueryError> {
        let chrom = checked_chrom(chrom)?;
        let invalid_range = || QueryError::InvalidRange {
            start,
            end: end.unwrap_or(start),
        };
        if start == 0 {
            return Err(invalid_range());
        }
        if let Some(end) = end {
            if end < start {
                return Err(invalid_range());
            }
        }
        Ok(Self {
            chrom,
            start,
            end,
        })
    }

    /// Whether this is a single-variant query.
    pub fn is_single(&self) -> bool {
        self.end.is_none()
    }

    /// Last position of the range, inclusive.
    pub fn last(&self) -> u64 {
        self.end.unwrap_or(self.start)
    }

    /// The fetch window, 0-based half-open `[start - 1, last + 1)`.
    ///
    /// Single-variant queries may see the next position, too; it is removed by
    /// the exact-position filter.
    pub fn fetch_window(&self) -> (u64, u64) {
        (self.start - 1, self.last() + 1)
    }

    /// The region request for reading a shard with the given layout.
    pub fn request(&self, header_skip: usize, columns: TsvColumns) -> RegionRequest {
        let (begin, end) = self.fetch_window();
        RegionRequest {
            chrom: self.chrom.clone(),
            begin,
            end,
            header_skip,
            columns,
        }
    }
}

/// A resolved association shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub path: PathBuf,
    /// Number of header rows.
    pub header_skip: usize,
    pub columns: TsvColumns,
    /// How to parse the rows.
    pub hint: SchemaHint,
}

/// Layout of a credible-set shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredibleSetLayout {
    /// All studies and tissues of one chromosome.
    Merged,
    /// One tissue of one study, study and tissue are not in the rows.
    Split { study: String, tissue: String },
}

/// A resolved credible-set shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredibleSetShard {
    pub path: PathBuf,
    pub header_skip: usize,
    pub columns: TsvColumns,
    pub layout: CredibleSetLayout,
}

/// Study and tissue if both are given, `None` if neither is given.
fn study_tissue<'a>(
    study: Option<&'a str>,
    tissue: Option<&'a str>,
) -> Result<Option<(&'a str, &'a str)>, QueryError> {
    match (study, tissue) {
        (Some(study), Some(tissue)) => Ok(Some((study, tissue))),
        (None, None) => Ok(None),
        _ => Err(QueryError::StudyWithoutTissue),
    }
}

/// Maps query parameters to shard paths; does not touch the file system.
#[derive(Debug, Clone)]
pub struct Locator<'a> {
    layout: &'a DataLayout,
}

impl<'a> Locator<'a> {
    pub fn new(layout: &'a DataLayout) -> Self {
        Self { layout }
    }

    /// Resolve the association shards for `region`.
    ///
    /// With study and tissue, this is the single per-study-per-tissue shard.
    /// Otherwise, it is every merged megabase shard that overlaps the fetch
    /// window, in coordinate order.  A tissue without study is ignored since
    /// the merged shards contain all tissues.
    pub fn association(
        &self,
        region: &QueryRegion,
        study: Option<&str>,
        tissue: Option<&str>,
        data_kind: DataKind,
    ) -> Vec<Shard> {
        if let (Some(study), Some(tissue)) = (study, tissue) {
            let path = self
                .layout
                .association_original()
                .join(study)
                .join(data_kind.to_string())
                .join(format!("{}_{}_{}.all.tsv.gz", study, data_kind, tissue));
            return vec![Shard {
                path,
                header_skip: 1,
                columns: SPLIT_COLUMNS,
                hint: SchemaHint::Split {
                    study: study.to_string(),
                    tissue: tissue.to_string(),
                },
            }];
        }

        let (begin, end) = region.fetch_window();
        let base = self
            .layout
            .association_merged(data_kind)
            .join(&region.chrom);
        (begin / WINDOW_SIZE..=end / WINDOW_SIZE)
            .map(|window| {
                let window_start = window * WINDOW_SIZE + 1;
                let window_end = window_start + WINDOW_SIZE - 1;
                Shard {
                    path: base.join(format!(
                        "all.EBI.{}.data.chr{}.{}-{}.tsv.gz",
                        data_kind, &region.chrom, window_start, window_end
                    )),
                    header_skip: 0,
                    columns: MERGED_COLUMNS,
                    hint: SchemaHint::Merged,
                }
            })
            .collect()
    }

    /// Resolve the credible-set shard.
    ///
    /// With study and tissue, this is the purity-filtered per-study-per-tissue
    /// shard, otherwise the merged shard of the chromosome.
    pub fn credible_sets(
        &self,
        chrom: &str,
        study: Option<&str>,
        tissue: Option<&str>,
        data_kind: DataKind,
    ) -> Result<CredibleSetShard, QueryError> {
        let base = self.layout.credible_sets().join(data_kind.to_string());
        Ok(match study_tissue(study, tissue)? {
            Some((study, tissue)) => CredibleSetShard {
                path: base.join(study).join(format!(
                    "{}.{}_{}.purity_filtered.sorted.txt.gz",
                    study, tissue, data_kind
                )),
                header_skip: 1,
                columns: CS_SPLIT_COLUMNS,
                layout: CredibleSetLayout::Split {
                    study: study.to_string(),
                    tissue: tissue.to_string(),
                },
            },
            None => CredibleSetShard {
                path: base.join(format!(
                    "chr{}.{}.credible_set.tsv.gz",
                    canonicalize_chrom(chrom),
                    data_kind
                )),
                header_skip: 0,
                columns: CS_MERGED_COLUMNS,
                layout: CredibleSetLayout::Merged,
            },
        })
    }
}
