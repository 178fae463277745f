//! Code for supporting the data layout configuration file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::query::schema::DataKind;

/// Name of the configuration file looked for in the data directory.
pub const CONF_FILE_NAME: &str = "conf.toml";

/// Placeholder for the data kind in path templates.
const DATA_KIND_PLACEHOLDER: &str = "{datatype}";

/// Source of the fine-mapping annotations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum FinemapSource {
    /// SQLite database with table `finemapping`.
    Sqlite { path: String },
    /// The credible-set shards below `Conf::credible_sets`.
    CredibleSets,
}

impl Default for FinemapSource {
    fn default() -> Self {
        FinemapSource::Sqlite {
            path: "finemapping.sqlite3.db".into(),
        }
    }
}

/// Data layout; all paths are relative to the data directory unless absolute.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Conf {
    /// Directory of the merged shards, may contain `{datatype}`.
    pub association_merged: String,
    /// Directory of the per-study-per-tissue shards.
    pub association_original: String,
    /// Directory of the credible-set shards.
    pub credible_sets: String,
    /// Gene ID to symbol JSON map.
    pub gene_symbols: String,
    /// Gene ID to signed TSS JSON map.
    pub tss: String,
    /// GENCODE gene table for the nearest-gene provider.
    pub genes: String,
    /// Best-per-variant summary database.
    pub summary: String,
    /// Data kind used when a query does not name one.
    pub data_kind: DataKind,
    /// Tables go last in TOML.
    pub finemap: FinemapSource,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            association_merged: "ebi_{datatype}".into(),
            association_original: "ebi_original".into(),
            credible_sets: "credible_sets".into(),
            gene_symbols: "gene.id.symbol.map.json.gz".into(),
            tss: "gencode/tss.json.gz".into(),
            genes: "gencode/genes.tsv.gz".into(),
            summary: "pip.best.variant.summary.sorted.indexed.sqlite3.db".into(),
            data_kind: DataKind::default(),
            finemap: FinemapSource::default(),
        }
    }
}

impl Conf {
    /// Load from `path_conf` if given, else from `conf.toml` in the data
    /// directory if present, else use the defaults.
    pub fn load(path_data_dir: &Path, path_conf: Option<&Path>) -> Result<Self, anyhow::Error> {
        let path_conf = match path_conf {
            Some(path) => Some(path.to_path_buf()),
            None => Some(path_data_dir.join(CONF_FILE_NAME)).filter(|path| path.exists()),
        };
        if let Some(path_conf) = path_conf {
            tracing::info!("Reading data layout configuration from {:?}...", &path_conf);
            let conf_toml = std::fs::read_to_string(&path_conf)
                .map_err(|e| anyhow::anyhow!("could not read {:?}: {}", &path_conf, e))?;
            toml::from_str(&conf_toml)
                .map_err(|e| anyhow::anyhow!("could not parse {:?}: {}", &path_conf, e))
        } else {
            tracing::info!("Using default data layout configuration");
            Ok(Self::default())
        }
    }
}

/// A `Conf` bound to its data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    pub data_dir: PathBuf,
    pub conf: Conf,
}

impl DataLayout {
    pub fn new<P: AsRef<Path>>(data_dir: P, conf: Conf) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            conf,
        }
    }

    /// Resolve `path` against the data directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.data_dir.join(path)
    }

    pub fn association_merged(&self, data_kind: DataKind) -> PathBuf {
        self.resolve(
            &self
                .conf
                .association_merged
                .replace(DATA_KIND_PLACEHOLDER, &data_kind.to_string()),
        )
    }

    pub fn association_original(&self) -> PathBuf {
        self.resolve(&self.conf.association_original)
    }

    pub fn credible_sets(&self) -> PathBuf {
        self.resolve(&self.conf.credible_sets)
    }

    pub fn gene_symbols(&self) -> PathBuf {
        self.resolve(&self.conf.gene_symbols)
    }

    pub fn tss(&self) -> PathBuf {
        self.resolve(&self.conf.tss)
    }

    pub fn genes(&self) -> PathBuf {
        self.resolve(&self.conf.genes)
    }

    pub fn summary(&self) -> PathBuf {
        self.resolve(&self.conf.summary)
    }
}
