//! Serialization of query results.

use std::{convert::Infallible, io::Write};

use serde::Serialize;
use thousands::Separable;

use super::{
    lookups::{GeneFeature, GeneSymbols},
    schema::{Coordinate, VariantRecord},
    summary::SummaryRow,
};

/// Variant identifier with thousands separators, for display only.
pub fn display_variant_id(coordinate: &Coordinate) -> String {
    format!(
        "{}:{}_{}/{}",
        coordinate.chrom,
        coordinate.pos.separate_with_commas(),
        coordinate.ref_allele,
        coordinate.alt_allele
    )
}

/// Serialized form of a `VariantRecord`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VariantOutput {
    pub study: String,
    pub tissue: String,
    pub molecular_trait_id: String,
    pub chromosome: String,
    pub position: u64,
    pub ref_allele: String,
    pub alt_allele: String,
    pub variant_id: String,
    pub ma_samples: u32,
    pub maf: f64,
    /// `null` for `p = 0`.
    pub log_pvalue: Option<f64>,
    pub pvalue: f64,
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
    pub build: String,
    /// `null` for genes without TSS.
    pub tss_distance: Option<f64>,
    pub symbol: String,
    pub system: String,
    pub samples: f64,
    pub cs_label: String,
    pub cs_size: u32,
    pub pip: f64,
}

impl From<&VariantRecord> for VariantOutput {
    fn from(record: &VariantRecord) -> Self {
        Self {
            study: record.study.clone(),
            tissue: record.tissue.clone(),
            molecular_trait_id: record.molecular_trait_id.clone(),
            chromosome: record.coordinate.chrom.clone(),
            position: record.coordinate.pos,
            ref_allele: record.coordinate.ref_allele.clone(),
            alt_allele: record.coordinate.alt_allele.clone(),
            variant_id: record.variant_id.clone(),
            ma_samples: record.ma_samples,
            maf: record.maf,
            log_pvalue: Some(record.log_pvalue).filter(|v| v.is_finite()),
            pvalue: record.pvalue(),
            beta: record.beta,
            stderr_beta: record.stderr_beta,
            vartype: record.vartype.clone(),
            ac: record.ac,
            an: record.an,
            r2: record.r2,
            molecular_trait_object_id: record.molecular_trait_object_id.clone(),
            gene_id: record.gene_id.clone(),
            median_tpm: record.median_tpm,
            rsid: record.rsid.clone(),
            build: record.build.to_string(),
            tss_distance: Some(record.tss_distance).filter(|v| !v.is_nan()),
            symbol: record.symbol.clone(),
            system: record.system.clone(),
            samples: record.samples,
            cs_label: record.cluster().to_string(),
            cs_size: record.cs_size(),
            pip: record.pip(),
        }
    }
}

/// The strongest signal of a region.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BestVariantOutput {
    pub chrom: String,
    pub pos: u64,
    #[serde(rename = "ref")]
    pub ref_allele: String,
    #[serde(rename = "alt")]
    pub alt_allele: String,
    pub study: String,
    pub tissue: String,
    pub gene_id: String,
    pub symbol: String,
    pub pip: f64,
    pub pvalue: f64,
}

impl BestVariantOutput {
    pub fn from_record(record: &VariantRecord) -> Self {
        Self {
            chrom: record.coordinate.chrom.clone(),
            pos: record.coordinate.pos,
            ref_allele: record.coordinate.ref_allele.clone(),
            alt_allele: record.coordinate.alt_allele.clone(),
            study: record.study.clone(),
            tissue: record.tissue.clone(),
            gene_id: record.gene_id.clone(),
            symbol: record.symbol.clone(),
            pip: record.pip(),
            pvalue: record.pvalue(),
        }
    }

    pub fn from_summary(row: &SummaryRow, symbols: &GeneSymbols) -> Self {
        Self {
            chrom: row.coordinate.chrom.clone(),
            pos: row.coordinate.pos,
            ref_allele: row.coordinate.ref_allele.clone(),
            alt_allele: row.coordinate.alt_allele.clone(),
            study: row.study.clone(),
            tissue: row.tissue.clone(),
            gene_id: row.gene_id.clone(),
            symbol: symbols.get_or_unknown(&row.gene_id).to_string(),
            pip: row.pip,
            pvalue: row.pvalue,
        }
    }
}

/// A gene of a region with its symbol.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GeneOutput {
    pub gene_id: String,
    pub symbol: String,
}

/// Nearest genes of a variant.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VariantInfoOutput {
    pub chrom: String,
    pub pos: u64,
    pub nearest_genes: Vec<GeneFeature>,
    pub is_inside_gene: bool,
}

/// A tissue of the catalogue.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TissueOutput {
    pub study: String,
    pub tissue: String,
    pub system: String,
}

/// Write `items` as JSON lines, stopping at the first error.
///
/// Returns the number of lines written.
pub fn try_write_json_lines<W, T, E, I>(writer: &mut W, items: I) -> Result<usize, anyhow::Error>
where
    W: Write,
    T: Serialize,
    E: Into<anyhow::Error>,
    I: IntoIterator<Item = Result<T, E>>,
{
    let mut count = 0;
    for item in items {
        let item = item.map_err(Into::into)?;
        serde_json::to_writer(&mut *writer, &item)?;
        writeln!(writer)?;
        count += 1;
    }
    Ok(count)
}

/// Write `items` as JSON lines.
pub fn write_json_lines<W, T, I>(writer: &mut W, items: I) -> Result<usize, anyhow::Error>
where
    W: Write,
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    try_write_json_lines(writer, items.into_iter().map(Ok::<_, Infallible>))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::query::schema::{test::record, Finemap};

    #[rstest::rstest]
    #[case(960996, "19:960,996_C/T")]
    #[case(100, "19:100_C/T")]
    #[case(109_397_918, "19:109,397,918_C/T")]
    fn display_variant_id(#[case] pos: u64, #[case] expected: &str) {
        let coordinate = Coordinate::new("chr19", pos, "C", "T");
        assert_eq!(expected, super::display_variant_id(&coordinate));
        assert!(!coordinate.variant_id().contains(','));
    }

    #[test]
    fn variant_output_defaults_and_non_finite() -> Result<(), anyhow::Error> {
        let mut rec = record("liver", "ENSG1.2", 960996);
        rec.log_pvalue = f64::INFINITY;
        let output = VariantOutput::from(&rec);
        assert_eq!(None, output.log_pvalue);
        assert_eq!(0.0, output.pvalue);
        assert_eq!(None, output.tss_distance);
        assert_eq!("-", output.cs_label);
        assert_eq!(0, output.cs_size);
        assert_eq!(0.0, output.pip);

        let value = serde_json::to_value(&output)?;
        assert_eq!(serde_json::Value::Null, value["log_pvalue"]);
        assert_eq!("19:960996_A/G", value["variant_id"]);
        assert_eq!(500.0, value["samples"]);
        Ok(())
    }

    #[test]
    fn best_variant_output() -> Result<(), anyhow::Error> {
        let mut rec = record("liver", "ENSG1.2", 100);
        rec.log_pvalue = 0.0;
        rec.finemap = Some(Finemap {
            cluster: "L1".into(),
            cs_size: 2,
            pip: 0.8,
        });
        let value = serde_json::to_value(BestVariantOutput::from_record(&rec))?;
        assert_eq!(
            serde_json::json!({
                "chrom": "19",
                "pos": 100,
                "ref": "A",
                "alt": "G",
                "study": "GTEx",
                "tissue": "liver",
                "gene_id": "ENSG1.2",
                "symbol": "Unknown_Gene",
                "pip": 0.8,
                "pvalue": 1.0,
            }),
            value
        );
        Ok(())
    }

    #[test]
    fn json_lines() -> Result<(), anyhow::Error> {
        let mut buf = Vec::new();
        let count = write_json_lines(
            &mut buf,
            vec![
                GeneOutput {
                    gene_id: "ENSG1".into(),
                    symbol: "A".into(),
                },
                GeneOutput {
                    gene_id: "ENSG2".into(),
                    symbol: "B".into(),
                },
            ],
        )?;
        assert_eq!(2, count);
        assert_eq!(
            "{\"gene_id\":\"ENSG1\",\"symbol\":\"A\"}\n{\"gene_id\":\"ENSG2\",\"symbol\":\"B\"}\n",
            String::from_utf8(buf)?
        );
        Ok(())
    }

    #[test]
    fn json_lines_stop_at_error() {
        let mut buf = Vec::new();
        let items = vec![
            Ok(1),
            Err(anyhow::anyhow!("broken shard")),
            Ok(3),
        ];
        let err = try_write_json_lines(&mut buf, items).unwrap_err();
        assert_eq!("broken shard", err.to_string());
        assert_eq!(b"1\n".to_vec(), buf);
    }
}
