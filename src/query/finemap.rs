//! Fine-mapping stores and the join of their annotations into records.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use rusqlite::{types::Value, Connection, OpenFlags};
use tokio_util::sync::CancellationToken;

use crate::{
    common::{canonicalize_chrom, contig_names},
    err::QueryError,
};

use super::{
    credible_sets::read_region,
    locator::{Locator, QueryRegion},
    schema::{strip_version, Coordinate, DataKind, Finemap, VariantRecord},
};

/// Scope of one bounded fine-mapping lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinemapQuery {
    pub region: QueryRegion,
    pub study: Option<String>,
    pub tissue: Option<String>,
    /// Gene ID, with or without version.
    pub gene_id: Option<String>,
}

/// Phenotype that the annotations of a store are keyed on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinOn {
    /// Gene ID without version.
    #[default]
    Gene,
    /// Molecular trait ID as stored, e.g. a transcript or exon.
    MolecularTrait,
}

/// Join key of fine-mapping annotations.
///
/// Gene keys are stored without version, so versioned and unversioned IDs in
/// the stores join alike.  Molecular trait keys are compared verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnotationKey {
    pub coordinate: Coordinate,
    pub study: String,
    pub tissue: String,
    pub phenotype_id: String,
}

impl AnnotationKey {
    /// Key on the gene.
    pub fn new(coordinate: Coordinate, study: &str, tissue: &str, gene_id: &str) -> Self {
        Self {
            coordinate,
            study: study.to_string(),
            tissue: tissue.to_string(),
            phenotype_id: strip_version(gene_id).to_string(),
        }
    }

    /// Key on the molecular trait.
    pub fn for_trait(
        coordinate: Coordinate,
        study: &str,
        tissue: &str,
        molecular_trait_id: &str,
    ) -> Self {
        Self {
            coordinate,
            study: study.to_string(),
            tissue: tissue.to_string(),
            phenotype_id: molecular_trait_id.to_string(),
        }
    }

    /// The key of `record`.
    pub fn of(record: &VariantRecord, join_on: JoinOn) -> Self {
        let coordinate = record.coordinate.clone();
        match join_on {
            JoinOn::Gene => Self::new(coordinate, &record.study, &record.tissue, &record.gene_id),
            JoinOn::MolecularTrait => Self::for_trait(
                coordinate,
                &record.study,
                &record.tissue,
                &record.molecular_trait_id,
            ),
        }
    }
}

/// One annotation returned by a fine-mapping store.
#[derive(Debug, Clone, PartialEq)]
pub struct FinemapRow {
    pub key: AnnotationKey,
    pub finemap: Finemap,
}

/// A store of fine-mapping annotations that supports bounded lookups.
pub trait FinemapStore {
    /// Annotations in the query's scope; an absent store yields none.
    fn select(&self, query: &FinemapQuery) -> Result<Vec<FinemapRow>, QueryError>;

    /// Phenotype that the keys of `select` refer to.
    fn join_on(&self) -> JoinOn {
        JoinOn::Gene
    }
}

/// Builder for `WHERE` clauses of the SQLite stores.
#[derive(Debug, Default)]
pub(crate) struct SqlFilter {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl SqlFilter {
    fn push(&mut self, clause: String, value: Value) -> usize {
        self.params.push(value);
        let idx = self.params.len();
        self.clauses.push(clause.replace('?', &format!("?{}", idx)));
        idx
    }

    /// Match the chromosome with and without `chr` prefix, and `chrM` for `MT`.
    pub fn chrom(&mut self, chrom: &str) -> &mut Self {
        let chrom = canonicalize_chrom(chrom).to_string();
        let aliases = contig_names(&chrom)
            .into_iter()
            .skip(2)
            .map(|name| format!(" OR chrom = '{}'", name))
            .collect::<String>();
        self.push(
            format!("(chrom = ? OR chrom = 'chr' || ?{})", aliases),
            Value::Text(chrom),
        );
        self
    }

    /// Match the position of a single-variant query or the range of a region.
    pub fn region(&mut self, region: &QueryRegion) -> &mut Self {
        match region.end {
            None => {
                self.push("pos = ?".into(), Value::Integer(region.start as i64));
            }
            Some(end) => {
                self.push("pos >= ?".into(), Value::Integer(region.start as i64));
                self.push("pos <= ?".into(), Value::Integer(end as i64));
            }
        }
        self
    }

    /// Match `column` exactly if `value` is given.
    pub fn eq(&mut self, column: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            self.push(format!("{} = ?", column), Value::Text(value.to_string()));
        }
        self
    }

    /// Match the gene, ignoring the stored version if the query has none.
    pub fn gene(&mut self, gene_id: Option<&str>) -> &mut Self {
        match gene_id {
            Some(gene_id) if gene_id.contains('.') => self.eq("gene_id", Some(gene_id)),
            Some(gene_id) => {
                self.push(
                    "(gene_id = ? OR gene_id LIKE ? || '.%')".into(),
                    Value::Text(gene_id.to_string()),
                );
                self
            }
            None => self,
        }
    }

    pub fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

/// Open the SQLite database at `path` read-only, `None` if it does not exist.
pub(crate) fn open_sqlite(path: &Path) -> Result<Option<Connection>, QueryError> {
    if !path.exists() {
        tracing::warn!("database {:?} does not exist, treating as empty", path);
        return Ok(None);
    }
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Connection::open_with_flags(path, flags)
        .map(Some)
        .map_err(|e| QueryError::storage(format!("database {:?}", path), e))
}

/// Fine-mapping store backed by the SQLite table `finemapping`.
#[derive(Debug, Clone)]
pub struct SqliteFinemapStore {
    path: PathBuf,
}

impl SqliteFinemapStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl FinemapStore for SqliteFinemapStore {
    fn select(&self, query: &FinemapQuery) -> Result<Vec<FinemapRow>, QueryError> {
        let Some(conn) = open_sqlite(&self.path)? else {
            return Ok(Vec::new());
        };
        let what = || format!("fine-mapping database {:?}", &self.path);

        let mut filter = SqlFilter::default();
        filter
            .chrom(&query.region.chrom)
            .region(&query.region)
            .eq("study", query.study.as_deref())
            .eq("tissue", query.tissue.as_deref())
            .gene(query.gene_id.as_deref());
        let sql = format!(
            "SELECT chrom, pos, ref, alt, study, tissue, gene_id, \
                    CAST(cs_index AS TEXT), cs_size, pip \
             FROM finemapping {}",
            filter.where_clause()
        );
        tracing::trace!("fine-mapping query: {}", &sql);

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| QueryError::storage(what(), e))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(filter.params()), |row| {
                let chrom: String = row.get(0)?;
                let pos: i64 = row.get(1)?;
                let ref_allele: String = row.get(2)?;
                let alt_allele: String = row.get(3)?;
                let study: String = row.get(4)?;
                let tissue: String = row.get(5)?;
                let gene_id: String = row.get(6)?;
                Ok(FinemapRow {
                    key: AnnotationKey::new(
                        Coordinate::new(&chrom, pos as u64, &ref_allele, &alt_allele),
                        &study,
                        &tissue,
                        &gene_id,
                    ),
                    finemap: Finemap {
                        cluster: row.get(7)?,
                        cs_size: row.get(8)?,
                        pip: row.get(9)?,
                    },
                })
            })
            .map_err(|e| QueryError::storage(what(), e))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| QueryError::storage(what(), e))
    }
}

/// Fine-mapping store backed by the credible-set shards.
#[derive(Debug, Clone)]
pub struct CredibleSetFinemapStore<'a> {
    locator: Locator<'a>,
    data_kind: DataKind,
}

impl<'a> CredibleSetFinemapStore<'a> {
    pub fn new(locator: Locator<'a>, data_kind: DataKind) -> Self {
        Self { locator, data_kind }
    }
}

impl CredibleSetFinemapStore<'_> {
    fn key(&self, coordinate: Coordinate, study: &str, tissue: &str, phenotype_id: &str) -> AnnotationKey {
        match self.join_on() {
            JoinOn::Gene => AnnotationKey::new(coordinate, study, tissue, phenotype_id),
            JoinOn::MolecularTrait => AnnotationKey::for_trait(coordinate, study, tissue, phenotype_id),
        }
    }
}

impl FinemapStore for CredibleSetFinemapStore<'_> {
    fn select(&self, query: &FinemapQuery) -> Result<Vec<FinemapRow>, QueryError> {
        let (study, tissue) = match (query.study.as_deref(), query.tissue.as_deref()) {
            (Some(study), Some(tissue)) => (Some(study), Some(tissue)),
            _ => (None, None),
        };
        let shard = self
            .locator
            .credible_sets(&query.region.chrom, study, tissue, self.data_kind)?;
        // Only gene expression shards carry the gene in the phenotype column.
        let gene_id = match self.join_on() {
            JoinOn::Gene => query.gene_id.as_deref(),
            JoinOn::MolecularTrait => None,
        };
        let rows = read_region(&shard, &query.region, gene_id, &CancellationToken::new())?;

        Ok(rows
            .into_iter()
            .filter(|row| query.study.as_ref().map_or(true, |study| study == &row.study))
            .filter(|row| query.tissue.as_ref().map_or(true, |tissue| tissue == &row.tissue))
            .map(|row| FinemapRow {
                key: self.key(row.coordinate, &row.study, &row.tissue, &row.phenotype_id),
                finemap: Finemap {
                    cluster: row.cs_index,
                    cs_size: row.cs_size,
                    pip: row.pip,
                },
            })
            .collect())
    }

    fn join_on(&self) -> JoinOn {
        match self.data_kind {
            DataKind::Ge => JoinOn::Gene,
            _ => JoinOn::MolecularTrait,
        }
    }
}

/// Fine-mapping annotations of one query window, keyed for the join.
#[derive(Debug, Default)]
pub struct AnnotationIndex {
    annotations: HashMap<AnnotationKey, Finemap>,
    join_on: JoinOn,
}

impl AnnotationIndex {
    /// Build with one bounded lookup in `store`.
    pub fn build(store: &dyn FinemapStore, query: &FinemapQuery) -> Result<Self, QueryError> {
        let rows = store.select(query)?;
        let mut annotations = HashMap::with_capacity(rows.len());
        for FinemapRow { key, finemap } in rows {
            annotations.insert(key, finemap);
        }
        let join_on = store.join_on();
        tracing::debug!(
            "fine-mapping index for {}:{}-{} has {} entries keyed on {:?}",
            &query.region.chrom,
            query.region.start,
            query.region.last(),
            annotations.len(),
            join_on
        );
        Ok(Self {
            annotations,
            join_on,
        })
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn get(&self, key: &AnnotationKey) -> Option<&Finemap> {
        self.annotations.get(key)
    }

    /// Attach the record's annotation, or the default one if there is none.
    pub fn annotate(&self, mut record: VariantRecord) -> VariantRecord {
        let finemap = self
            .get(&AnnotationKey::of(&record, self.join_on))
            .cloned()
            .unwrap_or_default();
        record.finemap = Some(finemap);
        record
    }
}
