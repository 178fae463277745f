//! The best-per-variant summary store.

use std::path::{Path, PathBuf};

use rusqlite::OptionalExtension;
use serde::Serialize;

use crate::err::QueryError;

use super::{
    finemap::{open_sqlite, SqlFilter},
    locator::QueryRegion,
    schema::Coordinate,
};

/// Row of the summary table `sig`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub pip: f64,
    pub study: String,
    pub tissue: String,
    pub gene_id: String,
    pub coordinate: Coordinate,
    pub cs_index: String,
    pub cs_size: u32,
    pub pvalue: f64,
}

/// Scope of a summary lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryQuery {
    /// Canonical chromosome name.
    pub chrom: String,
    /// Position or range, the whole chromosome if `None`.
    pub region: Option<QueryRegion>,
    pub study: Option<String>,
    pub tissue: Option<String>,
    /// Gene ID, with or without version.
    pub gene_id: Option<String>,
}

/// Summary store backed by the SQLite table `sig`.
#[derive(Debug, Clone)]
pub struct SqliteSummaryStore {
    path: PathBuf,
}

impl SqliteSummaryStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn what(&self) -> String {
        format!("summary database {:?}", &self.path)
    }

    /// The row with the highest PIP, ties broken by lower p-value.
    pub fn select_best(&self, query: &SummaryQuery) -> Result<Option<SummaryRow>, QueryError> {
        let Some(conn) = open_sqlite(&self.path)? else {
            return Ok(None);
        };

        let mut filter = SqlFilter::default();
        filter.chrom(&query.chrom);
        if let Some(region) = &query.region {
            filter.region(region);
        }
        filter
            .eq("study", query.study.as_deref())
            .eq("tissue", query.tissue.as_deref())
            .gene(query.gene_id.as_deref());
        let sql = format!(
            "SELECT pip, study, tissue, gene_id, chrom, pos, ref, alt, \
                    CAST(cs_index AS TEXT), cs_size, pvalue \
             FROM sig {} ORDER BY pip DESC, pvalue ASC LIMIT 1",
            filter.where_clause()
        );
        tracing::trace!("summary query: {}", &sql);

        conn.query_row(&sql, rusqlite::params_from_iter(filter.params()), |row| {
            let chrom: String = row.get(4)?;
            let pos: i64 = row.get(5)?;
            let ref_allele: String = row.get(6)?;
            let alt_allele: String = row.get(7)?;
            Ok(SummaryRow {
                pip: row.get(0)?,
                study: row.get(1)?,
                tissue: row.get(2)?,
                gene_id: row.get(3)?,
                coordinate: Coordinate::new(&chrom, pos as u64, &ref_allele, &alt_allele),
                cs_index: row.get(8)?,
                cs_size: row.get(9)?,
                pvalue: row.get(10)?,
            })
        })
        .optional()
        .map_err(|e| QueryError::storage(self.what(), e))
    }

    /// Distinct gene IDs with summary rows in `region`, sorted.
    pub fn genes_in_region(&self, region: &QueryRegion) -> Result<Vec<String>, QueryError> {
        let Some(conn) = open_sqlite(&self.path)? else {
            return Ok(Vec::new());
        };

        let mut filter = SqlFilter::default();
        filter.chrom(&region.chrom).region(region);
        let sql = format!(
            "SELECT DISTINCT gene_id FROM sig {} ORDER BY gene_id",
            filter.where_clause()
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| QueryError::storage(self.what(), e))?;
        let genes = stmt
            .query_map(rusqlite::params_from_iter(filter.params()), |row| row.get(0))
            .map_err(|e| QueryError::storage(self.what(), e))?
            .collect::<Result<Vec<String>, _>>()
            .map_err(|e| QueryError::storage(self.what(), e))?;
        Ok(genes)
    }
}
