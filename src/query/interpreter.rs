//! Apply the filter settings of one query to `VariantRecord`s.

use super::schema::{strip_version, VariantRecord, GENOME_WIDE_SIGNIFICANCE};

/// Filter settings of one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilters {
    /// Study, matched exactly.
    pub study: Option<String>,
    /// Tissue, matched exactly.
    pub tissue: Option<String>,
    /// Gene ID, with or without version.
    pub gene_id: Option<String>,
    /// Molecular trait (transcript) ID, matched exactly.
    pub transcript: Option<String>,
    /// Exact position, set for single-variant queries.
    pub position: Option<u64>,
    /// Keep only fine-mapped, genome-wide significant records.
    pub significant_only: bool,
}

/// Whether the record's gene ID `gene_id` matches the queried `query`.
///
/// Without a version in `query`, the version of `gene_id` is ignored.
pub fn gene_matches(query: &str, gene_id: &str) -> bool {
    if query.contains('.') {
        gene_id == query
    } else {
        strip_version(gene_id) == query
    }
}

/// Hold the filter settings for interpreting them on multiple records.
#[derive(Debug)]
pub struct QueryInterpreter {
    filters: QueryFilters,
}

impl QueryInterpreter {
    /// Construct new `QueryInterpreter` with the given filter settings.
    pub fn new(filters: QueryFilters) -> Self {
        QueryInterpreter { filters }
    }

    pub fn filters(&self) -> &QueryFilters {
        &self.filters
    }

    /// Determine whether this record belongs to the queried study and tissue;
    /// merged shards hold all of them.
    pub fn passes_study_tissue(&self, record: &VariantRecord) -> bool {
        let pass_study = self
            .filters
            .study
            .as_ref()
            .map_or(true, |study| study == &record.study);
        let pass_tissue = self
            .filters
            .tissue
            .as_ref()
            .map_or(true, |tissue| tissue == &record.tissue);
        pass_study && pass_tissue
    }

    /// Determine whether this record belongs to the queried gene.
    pub fn passes_gene(&self, record: &VariantRecord) -> bool {
        self.filters
            .gene_id
            .as_ref()
            .map_or(true, |gene_id| gene_matches(gene_id, &record.gene_id))
    }

    /// Determine whether this record belongs to the queried transcript.
    pub fn passes_transcript(&self, record: &VariantRecord) -> bool {
        self.filters
            .transcript
            .as_ref()
            .map_or(true, |transcript| transcript == &record.molecular_trait_id)
    }

    /// Determine whether this record is at the queried position; the row source
    /// also returns the next position for single-variant queries.
    pub fn passes_position(&self, record: &VariantRecord) -> bool {
        self.filters
            .position
            .map_or(true, |pos| pos == record.coordinate.pos)
    }

    /// Determine whether the record carries information, i.e., has `maf > 0`.
    pub fn passes_maf(&self, record: &VariantRecord) -> bool {
        record.maf > 0.0
    }

    /// Determine whether the record passes the significance criteria: it has a
    /// PIP and is genome-wide significant.  Requires the record to be
    /// annotated.
    pub fn passes_significance(&self, record: &VariantRecord) -> bool {
        !self.filters.significant_only
            || (record.pip() > 0.0 && record.log_pvalue > GENOME_WIDE_SIGNIFICANCE)
    }

    /// Determine whether the record passes all criteria.
    pub fn passes(&self, record: &VariantRecord) -> bool {
        self.passes_study_tissue(record)
            && self.passes_gene(record)
            && self.passes_transcript(record)
            && self.passes_position(record)
            && self.passes_maf(record)
            && self.passes_significance(record)
    }
}
