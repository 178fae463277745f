//! The query pipeline: shards, parser, fine-mapping join, and filter chain
//! composed into one lazy sequence of records.

use tokio_util::sync::CancellationToken;

use crate::{
    common::noodles::{open_region, RegionRows},
    conf::DataLayout,
    err::QueryError,
};

use super::{
    finemap::{AnnotationIndex, FinemapQuery, FinemapStore},
    interpreter::{QueryFilters, QueryInterpreter},
    locator::{Locator, QueryRegion, Shard},
    lookups::Lookups,
    parser::RecordParser,
    schema::{DataKind, VariantRecord},
};

/// Parameters of one association query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    /// Chromosome, with or without `chr` prefix.
    pub chrom: String,
    /// 1-based start position, or the position of a single-variant query.
    pub start: u64,
    /// 1-based end position, inclusive; `None` for single-variant queries.
    pub end: Option<u64>,
    pub study: Option<String>,
    pub tissue: Option<String>,
    /// Gene ID, with or without version.
    pub gene_id: Option<String>,
    /// Molecular trait ID, e.g., a transcript.
    pub transcript: Option<String>,
    /// Keep only fine-mapped, genome-wide significant records.
    pub significant_only: bool,
    /// Data kind, the configured default if `None`.
    pub data_kind: Option<DataKind>,
}

/// Runs association queries against one data directory.
///
/// Holds only read-only state, every query builds its own index and reader.
pub struct QueryEngine<'a> {
    layout: &'a DataLayout,
    lookups: &'a Lookups,
    finemap: &'a dyn FinemapStore,
}

impl<'a> QueryEngine<'a> {
    pub fn new(layout: &'a DataLayout, lookups: &'a Lookups, finemap: &'a dyn FinemapStore) -> Self {
        Self {
            layout,
            lookups,
            finemap,
        }
    }

    /// Start the query described by `params`.
    ///
    /// Parameters are validated before any storage access.  Missing shards
    /// yield no records, the sequence ends early once `cancel` fires.
    pub fn query(
        &self,
        params: &QueryParams,
        cancel: CancellationToken,
    ) -> Result<VariantStream<'a>, QueryError> {
        let region = QueryRegion::new(&params.chrom, params.start, params.end)?;
        let data_kind = params.data_kind.unwrap_or(self.layout.conf.data_kind);

        let shards = Locator::new(self.layout).association(
            &region,
            params.study.as_deref(),
            params.tissue.as_deref(),
            data_kind,
        );
        tracing::debug!(
            "query {}:{}-{} resolves to {} shard(s)",
            &region.chrom,
            region.start,
            region.last(),
            shards.len()
        );

        let index = AnnotationIndex::build(
            self.finemap,
            &FinemapQuery {
                region: region.clone(),
                study: params.study.clone(),
                tissue: params.tissue.clone(),
                gene_id: params.gene_id.clone(),
            },
        )?;

        let interpreter = QueryInterpreter::new(QueryFilters {
            study: params.study.clone(),
            tissue: params.tissue.clone(),
            gene_id: params.gene_id.clone(),
            transcript: params.transcript.clone(),
            position: region.end.is_none().then_some(region.start),
            significant_only: params.significant_only,
        });

        Ok(VariantStream {
            parser: RecordParser::new(self.lookups),
            index,
            interpreter,
            region,
            shards: shards.into_iter(),
            current: None,
            cancel,
            done: false,
        })
    }
}

/// Lazy sequence of the annotated records passing all filters.
///
/// Malformed rows are skipped with a warning; failing storage ends the
/// sequence with an error item.
pub struct VariantStream<'a> {
    parser: RecordParser<'a>,
    index: AnnotationIndex,
    interpreter: QueryInterpreter,
    region: QueryRegion,
    shards: std::vec::IntoIter<Shard>,
    /// Shard being read and its rows.
    current: Option<(Shard, RegionRows)>,
    cancel: CancellationToken,
    done: bool,
}

impl VariantStream<'_> {
    /// Open the next existing shard, `Ok(false)` if there is none.
    fn advance_shard(&mut self) -> Result<bool, QueryError> {
        for shard in self.shards.by_ref() {
            let request = self.region.request(shard.header_skip, shard.columns);
            match open_region(&shard.path, &request) {
                Ok(Some(rows)) => {
                    tracing::trace!("reading shard {:?}", &shard.path);
                    self.current = Some((shard, rows));
                    return Ok(true);
                }
                Ok(None) => continue,
                Err(e) => return Err(QueryError::storage(format!("shard {:?}", &shard.path), e)),
            }
        }
        Ok(false)
    }
}

impl Iterator for VariantStream<'_> {
    type Item = Result<VariantRecord, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.cancel.is_cancelled() {
                tracing::debug!("query cancelled");
                self.done = true;
                break;
            }

            if self.current.is_none() {
                match self.advance_shard() {
                    Ok(true) => (),
                    Ok(false) => {
                        self.done = true;
                        break;
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }
            let Some((shard, rows)) = self.current.as_mut() else {
                break;
            };

            let line = match rows.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(QueryError::storage(
                        format!("shard {:?}", &shard.path),
                        e,
                    )));
                }
                None => {
                    self.current = None;
                    continue;
                }
            };

            let record = match self.parser.parse(&line, &shard.hint) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("skipping malformed row in {:?}: {}", &shard.path, e);
                    continue;
                }
            };
            let record = self.index.annotate(record);
            if self.interpreter.passes(&record) {
                return Some(Ok(record));
            }
        }
        None
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::{collections::HashMap, path::Path};

    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        common::noodles::{build_tbi, tbi_path, test::write_bgzf},
        conf::Conf,
        query::{
            finemap::{test::MemoryFinemapStore, AnnotationKey, FinemapRow, SqliteFinemapStore},
            locator::{Locator, QueryRegion},
            lookups::{GeneSymbols, TssTable},
            parser::test::{merged_line, split_line},
            schema::{Coordinate, Finemap},
        },
    };

    /// Write `lines` to the merged shard of `chrom:pos`, BGZF and indexed.
    pub fn write_merged_shard(
        layout: &DataLayout,
        chrom: &str,
        pos: u64,
        lines: &[String],
    ) -> Result<(), anyhow::Error> {
        let region = QueryRegion::new(chrom, pos, None)?;
        let shards = Locator::new(layout).association(&region, None, None, DataKind::Ge);
        let path = &shards[0].path;
        write_shard(path, lines)?;
        build_tbi(path, tbi_path(path), 0, crate::query::locator::MERGED_COLUMNS)?;
        Ok(())
    }

    fn write_shard(path: &Path, lines: &[String]) -> Result<(), anyhow::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_bgzf(path, &lines.iter().map(String::as_str).collect::<Vec<_>>())
    }

    pub fn lookups() -> Lookups {
        Lookups {
            symbols: GeneSymbols::from(HashMap::from([(
                "ENSG00000134243".to_string(),
                "SORT1".to_string(),
            )])),
            tss: TssTable::from(HashMap::from([(
                "ENSG00000134243".to_string(),
                -109397918.0,
            )])),
        }
    }

    /// Data directory with merged shards on chr19 and a fine-mapping store.
    pub fn fixture(tmp_dir: &Path) -> Result<DataLayout, anyhow::Error> {
        let layout = DataLayout::new(tmp_dir, Conf::default());
        write_merged_shard(
            &layout,
            "19",
            1,
            &[
                merged_line("GTEx", "liver", "ENSG00000134243.7", "19", 100, "1e-10"),
                merged_line("GTEx", "lung", "ENSG00000134243.7", "19", 100, "1e-3"),
                merged_line("GTEx", "liver", "ENSG00000134243.7", "19", 101, "1e-9"),
                merged_line("GTEx", "liver", "ENSG00000099999.1", "19", 500, "1e-12"),
                merged_line("GTEx", "liver", "ENSG00000134243.7", "19", 960996, "1e-20"),
            ],
        )?;
        write_merged_shard(
            &layout,
            "19",
            1_000_001,
            &[merged_line("GTEx", "liver", "ENSG00000134243.7", "19", 1_000_050, "0")],
        )?;
        crate::query::finemap::test::write_finemap_db(
            &layout.resolve("finemapping.sqlite3.db"),
            &[
                ("19", 100, "C", "T", "GTEx", "liver", "ENSG00000134243.7", "1", 4, 0.2),
                ("chr19", 500, "C", "T", "GTEx", "liver", "ENSG00000099999.1", "2", 1, 0.9),
                ("19", 960996, "C", "T", "GTEx", "liver", "ENSG00000134243.7", "1", 4, 0.3),
                ("19", 1_000_050, "C", "T", "GTEx", "liver", "ENSG00000134243.7", "3", 1, 0.5),
            ],
        )?;
        Ok(layout)
    }

    fn run(
        layout: &DataLayout,
        params: &QueryParams,
    ) -> Result<Vec<VariantRecord>, anyhow::Error> {
        let lookups = lookups();
        let store = SqliteFinemapStore::new(layout.resolve("finemapping.sqlite3.db"));
        let engine = QueryEngine::new(layout, &lookups, &store);
        Ok(engine
            .query(params, CancellationToken::new())?
            .collect::<Result<Vec<_>, _>>()?)
    }

    fn positions(records: &[VariantRecord]) -> Vec<(u64, String)> {
        records
            .iter()
            .map(|r| (r.coordinate.pos, r.tissue.clone()))
            .collect()
    }

    #[test]
    fn single_variant_exact_position() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let layout = fixture(&tmp_dir)?;
        let records = run(
            &layout,
            &QueryParams {
                chrom: "chr19".into(),
                start: 100,
                ..Default::default()
            },
        )?;
        assert_eq!(
            vec![(100, "liver".to_string()), (100, "lung".to_string())],
            positions(&records)
        );
        assert_eq!("SORT1", records[0].symbol);
        assert_eq!(0.2, records[0].pip());
        assert_eq!("1", records[0].cluster());
        assert_eq!(Some(Finemap::default()), records[1].finemap);
        Ok(())
    }

    #[test]
    fn single_variant_absent_position_is_empty() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let layout = fixture(&tmp_dir)?;
        for (chrom, pos) in [("19", 12345), ("19", 55_000_000), ("1", 100)] {
            let records = run(
                &layout,
                &QueryParams {
                    chrom: chrom.into(),
                    start: pos,
                    ..Default::default()
                },
            )?;
            assert!(records.is_empty());
        }
        Ok(())
    }

    #[test]
    fn region_across_shards() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let layout = fixture(&tmp_dir)?;
        let records = run(
            &layout,
            &QueryParams {
                chrom: "19".into(),
                start: 400,
                end: Some(2_000_000),
                ..Default::default()
            },
        )?;
        assert_eq!(
            vec![500, 960996, 1_000_050],
            records.iter().map(|r| r.coordinate.pos).collect::<Vec<_>>()
        );
        assert_eq!(0.0, records[2].pvalue());
        assert_eq!(0.5, records[2].pip());
        Ok(())
    }

    #[test]
    fn unversioned_gene_matches() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let layout = fixture(&tmp_dir)?;
        let records = run(
            &layout,
            &QueryParams {
                chrom: "19".into(),
                start: 1,
                end: Some(960996),
                gene_id: Some("ENSG00000134243".into()),
                ..Default::default()
            },
        )?;
        assert_eq!(
            vec![100, 100, 101, 960996],
            records.iter().map(|r| r.coordinate.pos).collect::<Vec<_>>()
        );
        assert!(records.iter().all(|r| r.gene_id == "ENSG00000134243.7"));
        Ok(())
    }

    #[test]
    fn significant_only() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let layout = fixture(&tmp_dir)?;
        let records = run(
            &layout,
            &QueryParams {
                chrom: "19".into(),
                start: 1,
                end: Some(2_000_000),
                significant_only: true,
                ..Default::default()
            },
        )?;
        // 101 is significant but not fine-mapped, the lung record has PIP 0.
        assert_eq!(
            vec![100, 500, 960996, 1_000_050],
            records.iter().map(|r| r.coordinate.pos).collect::<Vec<_>>()
        );
        Ok(())
    }

    #[test]
    fn tissue_filter_on_merged_shards() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let layout = fixture(&tmp_dir)?;
        let records = run(
            &layout,
            &QueryParams {
                chrom: "19".into(),
                start: 1,
                end: Some(1000),
                tissue: Some("lung".into()),
                ..Default::default()
            },
        )?;
        assert_eq!(vec![(100, "lung".to_string())], positions(&records));
        Ok(())
    }

    #[test]
    #[tracing_test::traced_test]
    fn study_tissue_shard_with_malformed_row() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let layout = DataLayout::new(&*tmp_dir, Conf::default());
        let region = QueryRegion::new("19", 1, Some(1000))?;
        let shard = Locator::new(&layout)
            .association(&region, Some("TwinsUK"), Some("skin"), DataKind::Ge)
            .remove(0);
        let mut bad = split_line("ENSG00000134243.7", "19", 150, "0.01");
        bad = bad.replace("\t140\t", "\tmany\t");
        write_shard(
            &shard.path,
            &[
                "molecular_trait_id\tchromosome\tposition".to_string(),
                split_line("ENSG00000134243.7", "19", 100, "0.01"),
                bad,
                split_line("ENSG00000134243.7", "19", 200, "0.01"),
            ],
        )?;

        let records = run(
            &layout,
            &QueryParams {
                chrom: "19".into(),
                start: 1,
                end: Some(1000),
                study: Some("TwinsUK".into()),
                tissue: Some("skin".into()),
                ..Default::default()
            },
        )?;
        assert_eq!(
            vec![(100, "skin".to_string()), (200, "skin".to_string())],
            positions(&records)
        );
        assert!(records.iter().all(|r| r.study == "TwinsUK" && r.system == "Skin"));
        assert!(logs_contain("skipping malformed row"));
        Ok(())
    }

    #[test]
    fn rejected_before_storage_access() {
        let layout = DataLayout::new("/does/not/exist", Conf::default());
        let lookups = lookups();
        let store = MemoryFinemapStore(vec![]);
        let engine = QueryEngine::new(&layout, &lookups, &store);
        for (chrom, start, end) in [("chrZ", 1, None), ("1", 0, None), ("1", 10, Some(5))] {
            let params = QueryParams {
                chrom: chrom.into(),
                start,
                end,
                ..Default::default()
            };
            assert!(engine.query(&params, CancellationToken::new()).is_err());
        }
    }

    #[test]
    fn cancelled_query_ends_early() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let layout = fixture(&tmp_dir)?;
        let lookups = lookups();
        let store = MemoryFinemapStore(vec![]);
        let engine = QueryEngine::new(&layout, &lookups, &store);
        let cancel = CancellationToken::new();
        let mut stream = engine.query(
            &QueryParams {
                chrom: "19".into(),
                start: 1,
                end: Some(2_000_000),
                ..Default::default()
            },
            cancel.clone(),
        )?;
        assert!(stream.next().is_some());
        cancel.cancel();
        assert!(stream.next().is_none());
        Ok(())
    }

    #[test]
    fn memory_store_join() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let layout = fixture(&tmp_dir)?;
        let lookups = lookups();
        let store = MemoryFinemapStore(vec![FinemapRow {
            key: AnnotationKey::new(
                Coordinate::new("19", 100, "C", "T"),
                "GTEx",
                "lung",
                "ENSG00000134243",
            ),
            finemap: Finemap {
                cluster: "7".into(),
                cs_size: 2,
                pip: 0.7,
            },
        }]);
        let engine = QueryEngine::new(&layout, &lookups, &store);
        let records = engine
            .query(
                &QueryParams {
                    chrom: "19".into(),
                    start: 100,
                    ..Default::default()
                },
                CancellationToken::new(),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(
            vec![0.0, 0.7],
            records.iter().map(|r| r.pip()).collect::<Vec<_>>()
        );
        Ok(())
    }

    #[rstest::rstest]
    #[case(true)]
    #[case(false)]
    fn mitochondrial_shard(#[case] indexed: bool) -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let layout = DataLayout::new(&*tmp_dir, Conf::default());
        write_merged_shard(
            &layout,
            "chrM",
            100,
            &[
                merged_line("GTEx", "liver", "ENSG00000198888.2", "chrM", 100, "1e-5"),
                merged_line("GTEx", "liver", "ENSG00000198888.2", "chrM", 200, "1e-6"),
            ],
        )?;
        if !indexed {
            let shards = Locator::new(&layout).association(
                &QueryRegion::new("MT", 100, None)?,
                None,
                None,
                DataKind::Ge,
            );
            std::fs::remove_file(tbi_path(&shards[0].path))?;
        }
        crate::query::finemap::test::write_finemap_db(
            &layout.resolve("finemapping.sqlite3.db"),
            &[("chrM", 100, "C", "T", "GTEx", "liver", "ENSG00000198888.2", "1", 1, 0.8)],
        )?;

        let records = run(
            &layout,
            &QueryParams {
                chrom: "chrM".into(),
                start: 100,
                ..Default::default()
            },
        )?;
        assert_eq!(1, records.len());
        assert_eq!(Coordinate::new("MT", 100, "C", "T"), records[0].coordinate);
        assert_eq!(0.8, records[0].pip());

        Ok(())
    }
}
