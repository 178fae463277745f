//! Common functionality.

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use indexmap::IndexMap;

pub mod io;
pub mod noodles;

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Helper to print the current memory resident set size via `tracing`.
pub fn trace_rss_now() {
    let rss = procfs::process::Process::myself()
        .and_then(|me| me.stat())
        .map(|stat| stat.rss * procfs::page_size());
    match rss {
        Ok(rss) => tracing::debug!("RSS now: {}", bytesize::ByteSize::b(rss)),
        Err(e) => tracing::debug!("could not determine RSS: {}", e),
    }
}

/// Definition of canonical chromosome names.
pub const CHROMS: &[&str] = &[
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17",
    "18", "19", "20", "21", "22", "X", "Y", "MT",
];

/// Build mapping of chromosome names to chromosome counts.
///
/// Only canonical names are used as keys, callers must pass names through
/// `canonicalize_chrom` first.
pub fn build_chrom_map() -> IndexMap<String, usize> {
    let mut result = IndexMap::new();
    for (i, &chrom_name) in CHROMS.iter().enumerate() {
        result.insert(chrom_name.to_owned(), i);
    }
    result.insert("x".to_owned(), 22);
    result.insert("y".to_owned(), 23);
    result.insert("mt".to_owned(), 24);
    result.insert("m".to_owned(), 24);
    result.insert("M".to_owned(), 24);
    result
}

/// Strip all leading `chr` prefixes from a chromosome name and map the
/// aliases of the sex and mitochondrial chromosomes to their names in `CHROMS`.
///
/// The data files mix `chr1`/`1` and `chrM`/`MT` naming, all comparisons and
/// joins use the result of this function.
pub fn canonicalize_chrom(chrom: &str) -> &str {
    let mut result = chrom.trim();
    while let Some(stripped) = result.strip_prefix("chr") {
        result = stripped;
    }
    match result {
        "M" | "m" | "mt" => "MT",
        "x" => "X",
        "y" => "Y",
        _ => result,
    }
}

/// Contig names under which the canonical `chrom` may be stored in a file.
pub fn contig_names(chrom: &str) -> Vec<String> {
    let mut result = vec![chrom.to_string(), format!("chr{}", chrom)];
    if chrom == "MT" {
        result.push("M".to_string());
        result.push("chrM".to_string());
    }
    result
}

/// Select the genome release to use.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    strum::Display,
    strum::EnumString,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GenomeRelease {
    /// GRCh38 / hg38, the only release that the catalogue is lifted to.
    #[default]
    Grch38,
}

impl GenomeRelease {
    pub fn name(&self) -> &'static str {
        match self {
            GenomeRelease::Grch38 => "GRCh38",
        }
    }
}

/// The version of `eqtl-server-worker` package.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Return the version of the `eqtl-server-worker` crate and `x.y.z` in tests.
pub fn worker_version() -> &'static str {
    if cfg!(test) {
        "x.y.z"
    } else {
        VERSION
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    #[test]
    fn trace_rss_now_smoke() {
        super::trace_rss_now();
    }

    #[rstest::rstest]
    #[case("1", "1")]
    #[case("chr1", "1")]
    #[case("chrchr19", "19")]
    #[case("chrX", "X")]
    #[case(" chr22 ", "22")]
    #[case("MT", "MT")]
    #[case("chrM", "MT")]
    #[case("M", "MT")]
    #[case("chrMT", "MT")]
    #[case("mt", "MT")]
    #[case("chrx", "X")]
    fn canonicalize_chrom(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(expected, super::canonicalize_chrom(raw));
    }

    #[rstest::rstest]
    #[case("19", &["19", "chr19"])]
    #[case("MT", &["MT", "chrMT", "M", "chrM"])]
    fn contig_names(#[case] chrom: &str, #[case] expected: &[&str]) {
        assert_eq!(expected.to_vec(), super::contig_names(chrom));
    }

    #[test]
    fn canonical_names_are_chrom_map_keys() {
        let map = super::build_chrom_map();
        for raw in ["chrM", "M", "chrMT", "chrX", "y"] {
            let chrom = super::canonicalize_chrom(raw);
            assert!(super::CHROMS.contains(&chrom), "{} -> {}", raw, chrom);
            assert!(map.contains_key(chrom));
        }
    }

    #[test]
    fn build_chrom_map_canonical_names() {
        let map = super::build_chrom_map();
        for (i, chrom) in super::CHROMS.iter().enumerate() {
            assert_eq!(Some(&i), map.get(*chrom));
        }
        assert_eq!(Some(&24), map.get("M"));
        assert_eq!(None, map.get("chr1"));
    }

    #[test]
    fn genome_release_name() {
        assert_eq!("GRCh38", super::GenomeRelease::Grch38.name());
        assert_eq!("grch38", super::GenomeRelease::Grch38.to_string());
    }

    #[test]
    fn worker_version_in_tests() {
        assert_eq!("x.y.z", super::worker_version());
    }
}
