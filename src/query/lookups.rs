//! Read-only lookup tables used while building records: gene symbols, TSS
//! positions, tissue systems, and the nearest-gene provider.

use std::{collections::HashMap, path::Path, time::Instant};

use bio::data_structures::interval_tree::ArrayBackedIntervalTree;
use serde::{Deserialize, Serialize};

use crate::common::{canonicalize_chrom, io::open_read_maybe_gz};

use super::schema::strip_version;

/// Symbol reported for genes missing from the symbol table.
pub const UNKNOWN_GENE: &str = "Unknown_Gene";

/// System reported for tissues missing from the system table.
pub const UNKNOWN_SYSTEM: &str = "Unknown";

/// Mapping from gene ID (without version) to gene symbol.
#[derive(Debug, Default, Clone)]
pub struct GeneSymbols {
    symbols: HashMap<String, String>,
}

impl From<HashMap<String, String>> for GeneSymbols {
    fn from(symbols: HashMap<String, String>) -> Self {
        Self { symbols }
    }
}

impl GeneSymbols {
    /// Load from a (gzip-compressed) JSON object.
    #[tracing::instrument]
    pub fn from_path(path: &Path) -> Result<Self, anyhow::Error> {
        tracing::debug!("loading gene symbols from {:?}...", path);
        let before_loading = Instant::now();
        let reader = open_read_maybe_gz(path)
            .map_err(|e| anyhow::anyhow!("could not open {:?}: {}", path, e))?;
        let symbols: HashMap<String, String> = serde_json::from_reader(reader)
            .map_err(|e| anyhow::anyhow!("could not parse {:?}: {}", path, e))?;
        tracing::debug!(
            "... done loading {} gene symbols in {:?}",
            symbols.len(),
            before_loading.elapsed()
        );
        Ok(Self { symbols })
    }

    /// Symbol of the gene, the version suffix of `gene_id` is ignored.
    pub fn get(&self, gene_id: &str) -> Option<&str> {
        self.symbols.get(strip_version(gene_id)).map(String::as_str)
    }

    /// Symbol of the gene or `Unknown_Gene`.
    pub fn get_or_unknown(&self, gene_id: &str) -> &str {
        self.get(gene_id).unwrap_or(UNKNOWN_GENE)
    }
}

/// Mapping from gene ID (without version) to the TSS position.
///
/// The sign encodes the strand: positive for `+`, negative for `-`.
#[derive(Debug, Default, Clone)]
pub struct TssTable {
    positions: HashMap<String, f64>,
}

impl From<HashMap<String, f64>> for TssTable {
    fn from(positions: HashMap<String, f64>) -> Self {
        Self { positions }
    }
}

impl TssTable {
    /// Load from a (gzip-compressed) JSON object.
    #[tracing::instrument]
    pub fn from_path(path: &Path) -> Result<Self, anyhow::Error> {
        tracing::debug!("loading TSS positions from {:?}...", path);
        let before_loading = Instant::now();
        let reader = open_read_maybe_gz(path)
            .map_err(|e| anyhow::anyhow!("could not open {:?}: {}", path, e))?;
        let positions: HashMap<String, f64> = serde_json::from_reader(reader)
            .map_err(|e| anyhow::anyhow!("could not parse {:?}: {}", path, e))?;
        tracing::debug!(
            "... done loading {} TSS positions in {:?}",
            positions.len(),
            before_loading.elapsed()
        );
        Ok(Self { positions })
    }

    /// Signed TSS of the gene, the version suffix of `gene_id` is ignored.
    pub fn get(&self, gene_id: &str) -> Option<f64> {
        self.positions.get(strip_version(gene_id)).copied()
    }

    /// Signed distance of `pos` from the gene's TSS, NaN if the gene has no TSS.
    pub fn distance(&self, gene_id: &str, pos: u64) -> f64 {
        match self.get(gene_id) {
            Some(tss) => 1f64.copysign(tss) * (pos as f64 - tss.abs()),
            None => f64::NAN,
        }
    }
}

/// The lookup tables that record construction depends on.
#[derive(Debug, Default, Clone)]
pub struct Lookups {
    pub symbols: GeneSymbols,
    pub tss: TssTable,
}

/// Mapping of tissue names (across studies) to organ systems.
pub const TISSUES_TO_SYSTEMS: &[(&str, &str)] = &[
    ("adipose_naive", "Adipose"),
    ("adipose_subcutaneous", "Adipose"),
    ("adipose_visceral", "Adipose"),
    ("adrenal_gland", "Adrenal Gland"),
    ("artery_aorta", "Blood Vessel"),
    ("artery_coronary", "Blood Vessel"),
    ("artery_tibial", "Blood Vessel"),
    ("B-cell_naive", "Immune"),
    ("blood", "Blood"),
    ("brain", "Brain"),
    ("brain_amygdala", "Brain"),
    ("brain_anterior_cingulate_cortex", "Brain"),
    ("brain_caudate", "Brain"),
    ("brain_cerebellar_hemisphere", "Brain"),
    ("brain_cerebellum", "Brain"),
    ("brain_cortex", "Brain"),
    ("brain_frontal_cortex", "Brain"),
    ("brain_hippocampus", "Brain"),
    ("brain_hypothalamus", "Brain"),
    ("brain_naive", "Brain"),
    ("brain_nucleus_accumbens", "Brain"),
    ("brain_putamen", "Brain"),
    ("brain_spinal_cord", "Brain"),
    ("brain_substantia_nigra", "Brain"),
    ("breast", "Mammary"),
    ("CD4_T-cell_anti-CD3-CD28", "Immune"),
    ("CD4_T-cell_naive", "Immune"),
    ("CD8_T-cell_anti-CD3-CD28", "Immune"),
    ("CD8_T-cell_naive", "Immune"),
    ("colon_sigmoid", "Colon"),
    ("colon_transverse", "Colon"),
    ("esophagus_gastroesophageal_junction", "Esophagus"),
    ("esophagus_gej", "Esophagus"),
    ("esophagus_mucosa", "Esophagus"),
    ("esophagus_muscularis", "Esophagus"),
    ("fat", "Adipose"),
    ("fibroblast", "Skin"),
    ("heart_atrial_appendage", "Heart"),
    ("heart_left_ventricle", "Heart"),
    ("iPSC", "Cell Culture"),
    ("kidney_cortex", "Kidney"),
    ("LCL", "Cell Culture"),
    ("liver", "Liver"),
    ("lung", "Lung"),
    ("macrophage_IFNg", "Immune"),
    ("macrophage_IFNg+Salmonella", "Immune"),
    ("macrophage_Listeria", "Immune"),
    ("macrophage_naive", "Immune"),
    ("macrophage_Salmonella", "Immune"),
    ("minor_salivary_gland", "Minor Salivary Gland"),
    ("monocyte", "Immune"),
    ("monocyte_CD16_naive", "Immune"),
    ("monocyte_IAV", "Immune"),
    ("monocyte_LPS", "Immune"),
    ("monocyte_naive", "Immune"),
    ("monocyte_Pam3CSK4", "Immune"),
    ("monocyte_R848", "Immune"),
    ("muscle", "Muscle"),
    ("muscle_naive", "Muscle"),
    ("nerve_tibial", "Nerve"),
    ("neutrophil", "Immune"),
    ("NK-cell_naive", "Immune"),
    ("ovary", "Reproductive"),
    ("pancreas", "Pancreas"),
    ("pancreatic_islet", "Pancreas"),
    ("pituitary", "Pituitary"),
    ("prostate", "Reproductive"),
    ("sensory_neuron", "Nerve"),
    ("skin", "Skin"),
    ("skin_not_sun_exposed", "Skin"),
    ("skin_sun_exposed", "Skin"),
    ("small_intestine", "Small Intestine"),
    ("spleen", "Spleen"),
    ("stomach", "Stomach"),
    ("T-cell", "Immune"),
    ("testis", "Reproductive"),
    ("Tfh_memory", "Immune"),
    ("Th1-17_memory", "Immune"),
    ("Th17_memory", "Immune"),
    ("Th1_memory", "Immune"),
    ("Th2_memory", "Immune"),
    ("thyroid", "Thyroid"),
    ("Treg_memory", "Immune"),
    ("Treg_naive", "Immune"),
    ("uterus", "Reproductive"),
    ("vagina", "Reproductive"),
];

/// Tissue names available in each study.
pub const TISSUES_PER_STUDY: &[(&str, &[&str])] = &[
    (
        "Alasoo_2018",
        &[
            "macrophage_IFNg",
            "macrophage_IFNg+Salmonella",
            "macrophage_naive",
            "macrophage_Salmonella",
        ],
    ),
    ("BLUEPRINT", &["monocyte", "neutrophil", "T-cell"]),
    ("BrainSeq", &["brain"]),
    ("FUSION", &["adipose_naive", "muscle_naive"]),
    ("GENCORD", &["fibroblast", "LCL", "T-cell"]),
    ("GEUVADIS", &["LCL"]),
    (
        "GTEx",
        &[
            "adipose_subcutaneous",
            "adipose_visceral",
            "adrenal_gland",
            "artery_aorta",
            "artery_coronary",
            "artery_tibial",
            "blood",
            "brain_amygdala",
            "brain_anterior_cingulate_cortex",
            "brain_caudate",
            "brain_cerebellar_hemisphere",
            "brain_cerebellum",
            "brain_cortex",
            "brain_frontal_cortex",
            "brain_hippocampus",
            "brain_hypothalamus",
            "brain_nucleus_accumbens",
            "brain_putamen",
            "brain_spinal_cord",
            "brain_substantia_nigra",
            "breast",
            "colon_sigmoid",
            "colon_transverse",
            "esophagus_gej",
            "esophagus_mucosa",
            "esophagus_muscularis",
            "fibroblast",
            "heart_atrial_appendage",
            "heart_left_ventricle",
            "kidney_cortex",
            "LCL",
            "liver",
            "lung",
            "minor_salivary_gland",
            "muscle",
            "nerve_tibial",
            "ovary",
            "pancreas",
            "pituitary",
            "prostate",
            "skin_not_sun_exposed",
            "skin_sun_exposed",
            "small_intestine",
            "spleen",
            "stomach",
            "testis",
            "thyroid",
            "uterus",
            "vagina",
        ],
    ),
    ("HipSci", &["iPSC"]),
    ("Lepik_2017", &["blood"]),
    (
        "Nedelec_2016",
        &["macrophage_Listeria", "macrophage_naive", "macrophage_Salmonella"],
    ),
    (
        "Quach_2016",
        &[
            "monocyte_IAV",
            "monocyte_LPS",
            "monocyte_naive",
            "monocyte_Pam3CSK4",
            "monocyte_R848",
        ],
    ),
    ("ROSMAP", &["brain_naive"]),
    (
        "Schmiedel_2018",
        &[
            "B-cell_naive",
            "CD4_T-cell_anti-CD3-CD28",
            "CD4_T-cell_naive",
            "CD8_T-cell_anti-CD3-CD28",
            "CD8_T-cell_naive",
            "monocyte_CD16_naive",
            "monocyte_naive",
            "NK-cell_naive",
            "Tfh_memory",
            "Th1-17_memory",
            "Th17_memory",
            "Th1_memory",
            "Th2_memory",
            "Treg_memory",
            "Treg_naive",
        ],
    ),
    ("Schwartzentruber_2018", &["sensory_neuron"]),
    ("TwinsUK", &["blood", "fat", "LCL", "skin"]),
    ("van_de_Bunt_2015", &["pancreatic_islet"]),
];

/// Organ system of `tissue`, if known.
pub fn tissue_system(tissue: &str) -> Option<&'static str> {
    TISSUES_TO_SYSTEMS
        .iter()
        .find(|(name, _)| *name == tissue)
        .map(|(_, system)| *system)
}

/// Tissues of `study`, if the study is known.
pub fn study_tissues(study: &str) -> Option<&'static [&'static str]> {
    TISSUES_PER_STUDY
        .iter()
        .find(|(name, _)| *name == study)
        .map(|(_, tissues)| *tissues)
}

/// A gene feature as returned by the nearest-gene provider.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GeneFeature {
    pub chrom: String,
    /// 1-based start position.
    pub start: u64,
    /// 1-based end position, inclusive.
    pub end: u64,
    pub strand: String,
    /// Gene ID without version.
    pub gene_id: String,
    pub symbol: String,
}

/// Provider of the genes at or nearest to a position.
pub trait GeneLocator {
    /// Genes overlapping `pos`, or the nearest gene if none overlaps.  The
    /// result is empty if the chromosome carries no genes.
    fn at(&self, chrom: &str, pos: u64) -> Result<Vec<GeneFeature>, anyhow::Error>;
}

/// Whether `pos` lies inside a gene, given the provider result for `pos`.
///
/// More than one feature means overlapping genes; a single feature may be the
/// nearest gene only, so its span is checked.
pub fn is_inside_gene(features: &[GeneFeature], pos: u64) -> bool {
    match features {
        [] => false,
        [single] => single.start <= pos && pos <= single.end,
        _ => true,
    }
}

/// Alias for the interval tree that we use.
type IntervalTree = ArrayBackedIntervalTree<u64, usize>;

/// One row of the GENCODE gene table.
#[derive(Debug, Deserialize)]
struct GencodeRow {
    chrom: String,
    _source: String,
    _element: String,
    start: u64,
    end: u64,
    strand: String,
    gene_id: String,
    _datatype: String,
    symbol: String,
}

/// Nearest-gene provider backed by a GENCODE gene table.
#[derive(Default, Debug)]
pub struct GencodeGenes {
    /// Features, stored by canonical chromosome name and sorted by start.
    records: HashMap<String, Vec<GeneFeature>>,
    /// Interval trees over `records`.
    trees: HashMap<String, IntervalTree>,
}

impl GencodeGenes {
    /// Build from features.
    pub fn from_features<I: IntoIterator<Item = GeneFeature>>(features: I) -> Self {
        let mut records: HashMap<String, Vec<GeneFeature>> = HashMap::new();
        for mut feature in features {
            feature.chrom = canonicalize_chrom(&feature.chrom).to_string();
            records.entry(feature.chrom.clone()).or_default().push(feature);
        }

        let mut trees = HashMap::new();
        for (chrom, features) in records.iter_mut() {
            features.sort_by_key(|feature| (feature.start, feature.end));
            let mut tree = IntervalTree::new();
            for (i, feature) in features.iter().enumerate() {
                tree.insert((feature.start - 1)..feature.end, i);
            }
            tree.index();
            trees.insert(chrom.clone(), tree);
        }

        Self { records, trees }
    }

    /// Load from a (gzip-compressed) headerless TSV file.
    #[tracing::instrument]
    pub fn from_path(path: &Path) -> Result<Self, anyhow::Error> {
        tracing::debug!("loading GENCODE genes from {:?}...", path);
        let before_loading = Instant::now();
        let reader = open_read_maybe_gz(path)
            .map_err(|e| anyhow::anyhow!("could not open {:?}: {}", path, e))?;
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .comment(Some(b'#'))
            .from_reader(reader);

        let mut features = Vec::new();
        for row in csv_reader.deserialize() {
            let row: GencodeRow =
                row.map_err(|e| anyhow::anyhow!("problem reading {:?}: {}", path, e))?;
            if row.start == 0 || row.end < row.start {
                anyhow::bail!("invalid gene span {}-{} in {:?}", row.start, row.end, path);
            }
            features.push(GeneFeature {
                chrom: row.chrom,
                start: row.start,
                end: row.end,
                strand: row.strand,
                gene_id: strip_version(&row.gene_id).to_string(),
                symbol: row.symbol,
            });
        }
        let result = Self::from_features(features);
        tracing::debug!(
            "... done loading {} genes in {:?}",
            result.records.values().map(Vec::len).sum::<usize>(),
            before_loading.elapsed()
        );
        Ok(result)
    }
}

impl GeneLocator for GencodeGenes {
    fn at(&self, chrom: &str, pos: u64) -> Result<Vec<GeneFeature>, anyhow::Error> {
        let chrom = canonicalize_chrom(chrom);
        let (Some(records), Some(tree)) = (self.records.get(chrom), self.trees.get(chrom)) else {
            return Ok(Vec::new());
        };

        let start = pos.saturating_sub(1);
        let mut overlapping = tree
            .find(start..pos.max(1))
            .iter()
            .map(|entry| *entry.data())
            .collect::<Vec<_>>();
        if !overlapping.is_empty() {
            overlapping.sort_unstable();
            return Ok(overlapping
                .into_iter()
                .map(|i| records[i].clone())
                .collect());
        }

        let distance = |feature: &GeneFeature| {
            if pos < feature.start {
                feature.start - pos
            } else {
                pos - feature.end
            }
        };
        Ok(records
            .iter()
            .min_by_key(|feature| distance(feature))
            .cloned()
            .into_iter()
            .collect())
    }
}
