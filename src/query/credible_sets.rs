//! Credible-set shards: row parsing and region listing.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{common::noodles::open_region, err::QueryError, err::RecordError};

use super::{
    interpreter::gene_matches,
    locator::{CredibleSetLayout, CredibleSetShard, QueryRegion},
    parser::{parse_float, parse_int},
    schema::Coordinate,
};

/// Number of columns of merged credible-set rows.
pub const MERGED_COLUMNS: usize = 19;
/// Number of columns of per-study-per-tissue credible-set rows.
pub const SPLIT_COLUMNS: usize = 17;

/// One variant of a credible set.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CredibleSetRow {
    pub study: String,
    pub tissue: String,
    /// Molecular trait, the gene ID for gene expression.
    pub phenotype_id: String,
    /// Variant name as written in the source.
    pub variant: String,
    pub coordinate: Coordinate,
    pub cs_id: String,
    /// Credible set label within the phenotype, e.g., `L1`.
    pub cs_index: String,
    pub finemapped_region: String,
    pub pip: f64,
    pub z: f64,
    pub cs_min_r2: f64,
    pub cs_avg_r2: f64,
    pub cs_size: u32,
    pub posterior_mean: f64,
    pub posterior_sd: f64,
    pub cs_log10bf: f64,
}

impl CredibleSetRow {
    /// Canonical variant identifier.
    pub fn variant_id(&self) -> String {
        self.coordinate.variant_id()
    }
}

/// Parse one row of a credible-set shard with the given layout.
pub fn parse_row(line: &str, layout: &CredibleSetLayout) -> Result<CredibleSetRow, RecordError> {
    let fields = line.split('\t').collect::<Vec<_>>();
    let (study, tissue, fields) = match layout {
        CredibleSetLayout::Merged => {
            if fields.len() != MERGED_COLUMNS {
                return Err(RecordError::ColumnCount {
                    expected: MERGED_COLUMNS,
                    actual: fields.len(),
                });
            }
            (fields[0].to_string(), fields[1].to_string(), &fields[2..])
        }
        CredibleSetLayout::Split { study, tissue } => {
            if fields.len() != SPLIT_COLUMNS {
                return Err(RecordError::ColumnCount {
                    expected: SPLIT_COLUMNS,
                    actual: fields.len(),
                });
            }
            (study.clone(), tissue.clone(), &fields[..])
        }
    };

    Ok(CredibleSetRow {
        study,
        tissue,
        phenotype_id: fields[0].to_string(),
        variant: fields[1].to_string(),
        coordinate: Coordinate::new(fields[2], parse_int("pos", fields[3])?, fields[4], fields[5]),
        cs_id: fields[6].to_string(),
        cs_index: fields[7].to_string(),
        finemapped_region: fields[8].to_string(),
        pip: parse_float("pip", fields[9])?,
        z: parse_float("z", fields[10])?,
        cs_min_r2: parse_float("cs_min_r2", fields[11])?,
        cs_avg_r2: parse_float("cs_avg_r2", fields[12])?,
        cs_size: parse_int("cs_size", fields[13])?,
        posterior_mean: parse_float("posterior_mean", fields[14])?,
        posterior_sd: parse_float("posterior_sd", fields[15])?,
        cs_log10bf: parse_float("cs_log10bf", fields[16])?,
    })
}

/// Read the rows of `shard` in `region`, optionally only those of one gene.
///
/// A missing shard yields no rows, malformed rows are skipped.
pub fn read_region(
    shard: &CredibleSetShard,
    region: &QueryRegion,
    gene_id: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Vec<CredibleSetRow>, QueryError> {
    let what = || format!("credible sets {:?}", &shard.path);
    let Some(lines) = open_region(&shard.path, &region.request(shard.header_skip, shard.columns))
        .map_err(|e| QueryError::storage(what(), e))?
    else {
        return Ok(Vec::new());
    };

    let mut result = Vec::new();
    for line in lines {
        if cancel.is_cancelled() {
            tracing::debug!("credible set listing cancelled");
            break;
        }
        let line = line.map_err(|e| QueryError::storage(what(), e))?;
        let row = match parse_row(&line, &shard.layout) {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!("skipping malformed row in {:?}: {}", &shard.path, e);
                continue;
            }
        };
        if row.coordinate.pos < region.start || row.coordinate.pos > region.last() {
            continue;
        }
        if gene_id.map_or(true, |gene_id| gene_matches(gene_id, &row.phenotype_id)) {
            result.push(row);
        }
    }
    tracing::debug!("read {} credible set rows from {:?}", result.len(), &shard.path);

    Ok(result)
}

#[cfg(test)]
pub(crate) mod test {
    use std::{io::Write, path::Path};

    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        common::io::open_write_maybe_gz,
        conf::{Conf, DataLayout},
        query::{locator::Locator, schema::DataKind},
    };

    /// Merged credible-set line.
    pub fn merged_line(
        study: &str,
        tissue: &str,
        gene_id: &str,
        pos: u64,
        cs_index: &str,
        cs_size: u32,
        pip: f64,
    ) -> String {
        format!(
            "{}\t{}\t{}",
            study,
            tissue,
            split_line(gene_id, pos, cs_index, cs_size, pip)
        )
    }

    /// Per-study-per-tissue credible-set line on chr19.
    pub fn split_line(gene_id: &str, pos: u64, cs_index: &str, cs_size: u32, pip: f64) -> String {
        format!(
            "{gene}\tchr19_{pos}_C_T\t19\t{pos}\tC\tT\t{gene}_{cs}\t{cs}\t19:1-2000000\t{pip}\t5.1\t0.8\t0.9\t{size}\t0.2\t0.05\t12.5",
            gene = gene_id,
            pos = pos,
            cs = cs_index,
            pip = pip,
            size = cs_size,
        )
    }

    /// Write `lines` to the gzip file at `path`, creating parent directories.
    pub fn write_lines(path: &Path, lines: &[String]) -> Result<(), anyhow::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = open_write_maybe_gz(path)?;
        for line in lines {
            writeln!(f, "{}", line)?;
        }
        f.flush()?;
        Ok(())
    }

    #[test]
    fn parse_merged_and_split_rows() -> Result<(), anyhow::Error> {
        let merged = parse_row(
            &merged_line("GTEx", "liver", "ENSG1", 100, "L1", 3, 0.75),
            &CredibleSetLayout::Merged,
        )?;
        let split = parse_row(
            &split_line("ENSG1", 100, "L1", 3, 0.75),
            &CredibleSetLayout::Split {
                study: "GTEx".into(),
                tissue: "liver".into(),
            },
        )?;
        assert_eq!(merged, split);
        assert_eq!("19:100_C/T", merged.variant_id());
        assert_eq!("L1", merged.cs_index);
        assert_eq!(3, merged.cs_size);
        assert_eq!(0.75, merged.pip);
        Ok(())
    }

    #[test]
    fn parse_row_wrong_layout() {
        assert_eq!(
            Err(RecordError::ColumnCount {
                expected: 19,
                actual: 17
            }),
            parse_row(
                &split_line("ENSG1", 100, "L1", 3, 0.75),
                &CredibleSetLayout::Merged
            )
        );
    }

    #[tracing_test::traced_test]
    #[rstest::rstest]
    #[case(None, None, vec![100, 150, 150])]
    #[case(Some(150), None, vec![150, 150])]
    #[case(None, Some("ENSG2"), vec![150])]
    fn read_region_merged(
        #[case] single: Option<u64>,
        #[case] gene_id: Option<&str>,
        #[case] expected: Vec<u64>,
    ) -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let layout = DataLayout::new(&*tmp_dir, Conf::default());
        let shard = Locator::new(&layout).credible_sets("chr19", None, None, DataKind::Ge)?;
        write_lines(
            &shard.path,
            &[
                merged_line("GTEx", "liver", "ENSG1.1", 50, "L1", 1, 0.9),
                merged_line("GTEx", "liver", "ENSG1.1", 100, "L1", 2, 0.4),
                "garbage".to_string(),
                merged_line("GTEx", "liver", "ENSG1.1", 150, "L1", 2, 0.6),
                merged_line("GTEx", "lung", "ENSG2.4", 150, "L2", 1, 0.99),
                merged_line("GTEx", "lung", "ENSG2.4", 300, "L2", 1, 0.99),
            ],
        )?;

        let region = match single {
            Some(pos) => QueryRegion::new("19", pos, None)?,
            None => QueryRegion::new("19", 100, Some(200))?,
        };
        let rows = read_region(&shard, &region, gene_id, &CancellationToken::new())?;
        assert_eq!(
            expected,
            rows.iter().map(|row| row.coordinate.pos).collect::<Vec<_>>()
        );
        assert!(logs_contain("skipping malformed row"));

        Ok(())
    }

    #[rstest::rstest]
    #[case(QueryRegion::new("19", 100, Some(200)), vec![100, 200])]
    #[case(QueryRegion::new("19", 200, None), vec![200])]
    #[case(QueryRegion::new("19", 201, Some(300)), vec![201])]
    fn read_region_trims_fetch_window(
        #[case] region: Result<QueryRegion, QueryError>,
        #[case] expected: Vec<u64>,
    ) -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let layout = DataLayout::new(&*tmp_dir, Conf::default());
        let shard = Locator::new(&layout).credible_sets("19", None, None, DataKind::Ge)?;
        write_lines(
            &shard.path,
            &[
                merged_line("GTEx", "liver", "ENSG1.1", 99, "L1", 1, 0.1),
                merged_line("GTEx", "liver", "ENSG1.1", 100, "L1", 1, 0.2),
                merged_line("GTEx", "liver", "ENSG1.1", 200, "L1", 1, 0.3),
                merged_line("GTEx", "liver", "ENSG1.1", 201, "L1", 1, 0.4),
            ],
        )?;

        let rows = read_region(&shard, &region?, None, &CancellationToken::new())?;
        assert_eq!(
            expected,
            rows.iter().map(|row| row.coordinate.pos).collect::<Vec<_>>()
        );

        Ok(())
    }

    #[test]
    fn read_region_missing_shard() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let layout = DataLayout::new(&*tmp_dir, Conf::default());
        let shard = Locator::new(&layout).credible_sets(
            "19",
            Some("GTEx"),
            Some("liver"),
            DataKind::Ge,
        )?;
        let region = QueryRegion::new("19", 1, Some(1000))?;
        assert_eq!(
            Vec::<CredibleSetRow>::new(),
            read_region(&shard, &region, None, &CancellationToken::new())?
        );
        Ok(())
    }

    #[test]
    fn read_region_cancelled() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let layout = DataLayout::new(&*tmp_dir, Conf::default());
        let shard = Locator::new(&layout).credible_sets("19", None, None, DataKind::Ge)?;
        write_lines(
            &shard.path,
            &[merged_line("GTEx", "liver", "ENSG1.1", 100, "L1", 2, 0.4)],
        )?;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let region = QueryRegion::new("19", 1, Some(1000))?;
        assert!(read_region(&shard, &region, None, &cancel)?.is_empty());
        Ok(())
    }
}
