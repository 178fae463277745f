//! Parsing of association rows into `VariantRecord`s.
//!
//! Merged shards carry study and tissue in their first two columns, the
//! per-study-per-tissue shards omit them.  Both layouts are parsed into fixed
//! structs first and then converted by one constructor.

use std::str::FromStr;

use crate::{common::GenomeRelease, err::RecordError};

use super::{
    lookups::{tissue_system, Lookups, UNKNOWN_SYSTEM},
    schema::{parse_pvalue_to_neg_log10, Coordinate, VariantRecord},
};

/// Number of columns of a merged association row.
pub const MERGED_COLUMNS: usize = 21;
/// Number of columns of a per-study-per-tissue association row.
pub const SPLIT_COLUMNS: usize = 19;

/// The association columns shared by both layouts.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationFields {
    pub molecular_trait_id: String,
    pub chrom: String,
    pub pos: u64,
    pub ref_allele: String,
    pub alt_allele: String,
    /// Variant name as written in the source, e.g., `chr19_960996_C_T`.
    pub variant: String,
    pub ma_samples: u32,
    pub maf: f64,
    /// Negative log10 p-value.
    pub log_pvalue: f64,
    pub beta: f64,
    pub stderr_beta: f64,
    pub vartype: String,
    pub ac: u32,
    pub an: u32,
    pub r2: Option<f64>,
    pub molecular_trait_object_id: String,
    pub gene_id: String,
    pub median_tpm: Option<f64>,
    pub rsid: String,
}

/// Row of a merged (multi-study, multi-tissue) shard.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    pub study: String,
    pub tissue: String,
    pub fields: AssociationFields,
}

/// Row of a per-study-per-tissue shard.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitRow {
    pub fields: AssociationFields,
}

/// How to interpret the columns of a raw line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaHint {
    /// Study and tissue are the first two columns.
    Merged,
    /// Study and tissue are given by the caller.
    Split { study: String, tissue: String },
}

/// A parsed row of either layout.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRow {
    Merged(MergedRow),
    Split {
        study: String,
        tissue: String,
        row: SplitRow,
    },
}

impl RawRow {
    /// Parse `line` as described by `hint`.
    pub fn parse(line: &str, hint: &SchemaHint) -> Result<Self, RecordError> {
        match hint {
            SchemaHint::Merged => parse_merged(line).map(RawRow::Merged),
            SchemaHint::Split { study, tissue } => parse_split(line).map(|row| RawRow::Split {
                study: study.clone(),
                tissue: tissue.clone(),
                row,
            }),
        }
    }
}

pub(crate) fn parse_int<T>(column: &'static str, value: &str) -> Result<T, RecordError>
where
    T: FromStr<Err = std::num::ParseIntError>,
{
    value.parse::<T>().map_err(|source| RecordError::InvalidInt {
        column,
        value: value.to_string(),
        source,
    })
}

pub(crate) fn parse_float(column: &'static str, value: &str) -> Result<f64, RecordError> {
    value.parse::<f64>().map_err(|source| RecordError::InvalidFloat {
        column,
        value: value.to_string(),
        source,
    })
}

/// Fields that are `NA` in the source for missing values.
fn parse_float_or_na(column: &'static str, value: &str) -> Result<Option<f64>, RecordError> {
    if value == "NA" {
        Ok(None)
    } else {
        parse_float(column, value).map(Some)
    }
}

/// Parse the 19 association columns.
fn parse_fields(fields: &[&str]) -> Result<AssociationFields, RecordError> {
    if fields.len() != SPLIT_COLUMNS {
        return Err(RecordError::ColumnCount {
            expected: SPLIT_COLUMNS,
            actual: fields.len(),
        });
    }
    Ok(AssociationFields {
        molecular_trait_id: fields[0].to_string(),
        chrom: fields[1].to_string(),
        pos: parse_int("position", fields[2])?,
        ref_allele: fields[3].to_string(),
        alt_allele: fields[4].to_string(),
        variant: fields[5].to_string(),
        ma_samples: parse_int("ma_samples", fields[6])?,
        maf: parse_float("maf", fields[7])?,
        log_pvalue: parse_pvalue_to_neg_log10(fields[8])?,
        beta: parse_float("beta", fields[9])?,
        stderr_beta: parse_float("se", fields[10])?,
        vartype: fields[11].to_string(),
        ac: parse_int("ac", fields[12])?,
        an: parse_int("an", fields[13])?,
        // Imputation quality is optional in all studies, anything that is not a
        // number counts as missing.
        r2: fields[14].parse::<f64>().ok(),
        molecular_trait_object_id: fields[15].to_string(),
        gene_id: fields[16].to_string(),
        median_tpm: parse_float_or_na("median_tpm", fields[17])?,
        rsid: fields[18].to_string(),
    })
}

/// Parse a line of a merged shard.
pub fn parse_merged(line: &str) -> Result<MergedRow, RecordError> {
    let fields = line.split('\t').collect::<Vec<_>>();
    if fields.len() != MERGED_COLUMNS {
        return Err(RecordError::ColumnCount {
            expected: MERGED_COLUMNS,
            actual: fields.len(),
        });
    }
    Ok(MergedRow {
        study: fields[0].to_string(),
        tissue: fields[1].to_string(),
        fields: parse_fields(&fields[2..])?,
    })
}

/// Parse a line of a per-study-per-tissue shard.
pub fn parse_split(line: &str) -> Result<SplitRow, RecordError> {
    let fields = line.split('\t').collect::<Vec<_>>();
    Ok(SplitRow {
        fields: parse_fields(&fields)?,
    })
}

/// Builds `VariantRecord`s, the lookup tables are loaded once by the caller.
#[derive(Debug, Clone, Copy)]
pub struct RecordParser<'a> {
    lookups: &'a Lookups,
    release: GenomeRelease,
}

impl<'a> RecordParser<'a> {
    pub fn new(lookups: &'a Lookups) -> Self {
        Self {
            lookups,
            release: GenomeRelease::default(),
        }
    }

    /// Parse `line` and build the record.
    pub fn parse(&self, line: &str, hint: &SchemaHint) -> Result<VariantRecord, RecordError> {
        RawRow::parse(line, hint).map(|row| self.build(row))
    }

    /// Build the record from a parsed row, filling the derived fields.
    pub fn build(&self, row: RawRow) -> VariantRecord {
        let (study, tissue, fields) = match row {
            RawRow::Merged(MergedRow {
                study,
                tissue,
                fields,
            }) => (study, tissue, fields),
            RawRow::Split { study, tissue, row } => (study, tissue, row.fields),
        };

        let coordinate = Coordinate::new(
            &fields.chrom,
            fields.pos,
            &fields.ref_allele,
            &fields.alt_allele,
        );
        let symbol = self.lookups.symbols.get_or_unknown(&fields.gene_id).to_string();
        let tss_distance = self.lookups.tss.distance(&fields.gene_id, fields.pos);
        let system = tissue_system(&tissue).unwrap_or(UNKNOWN_SYSTEM).to_string();

        VariantRecord {
            variant_id: coordinate.variant_id(),
            coordinate,
            study,
            tissue,
            molecular_trait_id: fields.molecular_trait_id,
            ma_samples: fields.ma_samples,
            maf: fields.maf,
            log_pvalue: fields.log_pvalue,
            beta: fields.beta,
            stderr_beta: fields.stderr_beta,
            vartype: fields.vartype,
            ac: fields.ac,
            an: fields.an,
            r2: fields.r2,
            molecular_trait_object_id: fields.molecular_trait_object_id,
            gene_id: fields.gene_id,
            median_tpm: fields.median_tpm,
            rsid: fields.rsid,
            build: self.release.name(),
            tss_distance,
            symbol,
            system,
            samples: fields.an as f64 / 2.0,
            finemap: None,
        }
    }
}
