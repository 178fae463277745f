//! Data structures for eQTL association records.

use serde::{Deserialize, Serialize};

use crate::{
    common::canonicalize_chrom,
    err::{QueryError, RecordError},
};

/// Negative log10 p-value at the conventional genome-wide significance
/// threshold of `5e-8`.
pub const GENOME_WIDE_SIGNIFICANCE: f64 = 7.30103;

/// Quantification method of the catalogue data.
#[derive(
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Debug,
    Default,
    Hash,
    strum::EnumString,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DataKind {
    /// Gene expression.
    #[default]
    Ge,
    /// Exon expression.
    Exon,
    /// Transcript usage.
    Tx,
    /// Transcriptional event usage (txrevise).
    Txrev,
    /// Microarray gene expression.
    Microarray,
}

impl DataKind {
    /// Parse a data kind given as query parameter.
    pub fn parse(name: &str) -> Result<Self, QueryError> {
        name.parse()
            .map_err(|_| QueryError::UnknownDataKind(name.to_string()))
    }
}

/// A genomic coordinate with alleles.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coordinate {
    /// Chromosome name, without `chr` prefix.
    pub chrom: String,
    /// 1-based position.
    pub pos: u64,
    /// Reference allele.
    pub ref_allele: String,
    /// Alternate allele.
    pub alt_allele: String,
}

impl Coordinate {
    /// Construct, canonicalizing the chromosome name.
    pub fn new(chrom: &str, pos: u64, ref_allele: &str, alt_allele: &str) -> Self {
        Self {
            chrom: canonicalize_chrom(chrom).to_string(),
            pos,
            ref_allele: ref_allele.to_string(),
            alt_allele: alt_allele.to_string(),
        }
    }

    /// Variant identifier in `chrom:pos_ref/alt` format.
    pub fn variant_id(&self) -> String {
        format!(
            "{}:{}_{}/{}",
            self.chrom, self.pos, self.ref_allele, self.alt_allele
        )
    }
}

/// Fine-mapping annotation of one record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Finemap {
    /// Credible set / cluster label, `-` if the variant is in no credible set.
    pub cluster: String,
    /// Number of variants in the credible set.
    pub cs_size: u32,
    /// Posterior inclusion probability.
    pub pip: f64,
}

impl Default for Finemap {
    /// The annotation of variants without fine-mapping data.
    fn default() -> Self {
        Self {
            cluster: String::from("-"),
            cs_size: 0,
            pip: 0.0,
        }
    }
}

/// Parse a p-value into its negative log10.
///
/// An exact `0` becomes infinity.  Values that underflow `f64` (e.g., `1e-400`)
/// are computed from mantissa and exponent.
pub fn parse_pvalue_to_neg_log10(value: &str) -> Result<f64, RecordError> {
    let invalid = || RecordError::InvalidPValue(value.to_string());
    let pvalue = value.parse::<f64>().map_err(|_| invalid())?;
    if !(0.0..=1.0).contains(&pvalue) {
        return Err(invalid());
    }
    if pvalue > 0.0 {
        return Ok(-pvalue.log10());
    }

    match value.to_ascii_lowercase().split_once('e') {
        Some((mantissa, exponent)) => {
            let mantissa = mantissa.parse::<f64>().map_err(|_| invalid())?;
            let exponent = exponent.parse::<f64>().map_err(|_| invalid())?;
            if mantissa == 0.0 {
                Ok(f64::INFINITY)
            } else {
                Ok(-(mantissa.log10() + exponent))
            }
        }
        None => Ok(f64::INFINITY),
    }
}

/// Convert a negative log10 p-value back to the p-value.
///
/// Infinity stands for an exact `p = 0` and converts back to exactly `0.0`.
pub fn neg_log10_to_pvalue(neg_log10: f64) -> f64 {
    if neg_log10.is_infinite() {
        0.0
    } else {
        10f64.powf(-neg_log10)
    }
}

/// One eQTL association as it flows through the query pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    pub study: String,
    pub tissue: String,
    /// Gene or transcript ID the association is measured on.
    pub molecular_trait_id: String,
    pub coordinate: Coordinate,
    /// Number of samples carrying the minor allele.
    pub ma_samples: u32,
    /// Minor allele frequency.
    pub maf: f64,
    /// Negative log10 of the nominal p-value.
    pub log_pvalue: f64,
    pub beta: f64,
    pub stderr_beta: f64,
    pub vartype: String,
    /// Allele count.
    pub ac: u32,
    /// Total number of alleles.
    pub an: u32,
    /// Imputation quality, `None` if not available.
    pub r2: Option<f64>,
    pub molecular_trait_object_id: String,
    /// Gene ID with version.
    pub gene_id: String,
    /// Median TPM, `None` if not available.
    pub median_tpm: Option<f64>,
    pub rsid: String,

    /// Genome build label.
    pub build: &'static str,
    /// Signed distance to the gene's TSS, NaN for genes without TSS.
    pub tss_distance: f64,
    pub symbol: String,
    /// Organ system of the tissue.
    pub system: String,
    /// Canonical variant identifier `chrom:pos_ref/alt`.
    pub variant_id: String,
    /// Number of samples, `an / 2`.
    pub samples: f64,

    /// Set exactly once when the fine-mapping annotation is joined in.
    pub finemap: Option<Finemap>,
}

impl VariantRecord {
    /// Nominal p-value.
    pub fn pvalue(&self) -> f64 {
        neg_log10_to_pvalue(self.log_pvalue)
    }

    /// Gene ID without the version suffix.
    pub fn gene_id_unversioned(&self) -> &str {
        strip_version(&self.gene_id)
    }

    /// Posterior inclusion probability, `0.0` if not annotated.
    pub fn pip(&self) -> f64 {
        self.finemap.as_ref().map(|f| f.pip).unwrap_or(0.0)
    }

    /// Credible set label, `-` if not annotated.
    pub fn cluster(&self) -> &str {
        self.finemap.as_ref().map(|f| f.cluster.as_str()).unwrap_or("-")
    }

    /// Credible set size, `0` if not annotated.
    pub fn cs_size(&self) -> u32 {
        self.finemap.as_ref().map(|f| f.cs_size).unwrap_or(0)
    }
}

/// Strip the version suffix (`.N`) from an ENSEMBL ID.
pub fn strip_version(id: &str) -> &str {
    id.split('.').next().unwrap_or(id)
}
