//! Configuration Data Model
//!
//! Serde structures for the pipeline configuration file.
//!
//! # Example YAML Format
//!
//! ```yaml
//! results: results
//! libraries:
//!   liver_1:
//!     genome: hg19
//!     description: "Liver, donor 1"
//!     readgroups:
//!       liver_1_L1: [/data/liver_1_L1.1.fastq.gz, /data/liver_1_L1.2.fastq.gz]
//!       liver_1_L2: [/data/liver_1_L2.1.fastq.gz, /data/liver_1_L2.2.fastq.gz]
//! genomes:
//!   hg19:
//!     bwa_index: /ref/hg19/bwa/hg19
//!     tss: /ref/hg19/hg19.tss.refseq.bed.gz
//!     whitelists:
//!       - /ref/hg19/mappability.bed.gz
//!     blacklists:
//!       - /ref/hg19/wgEncodeDacMapabilityConsensusExcludable.bed.gz
//! resources:
//!   io: 1
//! ```

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;

use serde::de::{Deserializer, Error as _, MapAccess, Visitor};
use serde::Deserialize;

/// Root directory used when the config does not name one.
pub const DEFAULT_RESULTS_DIR: &str = "results";

/// The complete pipeline configuration.
#[derive(Deserialize, Debug, Clone)]
pub struct PipelineConfig {
    /// Directory under which every output is written
    #[serde(default = "default_results")]
    pub results: PathBuf,

    /// Libraries in declaration order
    #[serde(deserialize_with = "ordered_map", default)]
    pub libraries: Vec<(String, LibraryConfig)>,

    /// Reference assets keyed by genome identifier
    #[serde(default)]
    pub genomes: HashMap<String, GenomeConfig>,

    /// Concurrency caps per resource class
    #[serde(default)]
    pub resources: HashMap<String, usize>,
}

/// One library entry.
#[derive(Deserialize, Debug, Clone)]
pub struct LibraryConfig {
    /// Genome identifier; must be a key of `genomes`
    pub genome: String,

    /// Human-readable label for metrics; defaults to the library id
    #[serde(default)]
    pub description: Option<String>,

    /// Readgroup id -> ordered fastq paths, in declaration order
    #[serde(deserialize_with = "ordered_map", default)]
    pub readgroups: Vec<(String, Vec<PathBuf>)>,
}

/// Reference assets for one genome build.
#[derive(Deserialize, Debug, Clone)]
pub struct GenomeConfig {
    pub bwa_index: PathBuf,
    pub tss: PathBuf,
    #[serde(default)]
    pub whitelists: Option<Vec<PathBuf>>,
    #[serde(default)]
    pub blacklists: Option<Vec<PathBuf>>,
}

fn default_results() -> PathBuf {
    PathBuf::from(DEFAULT_RESULTS_DIR)
}

/// Deserializes a mapping into a vector of entries, keeping document order.
fn ordered_map<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct OrderedVisitor<V>(PhantomData<V>);

    impl<'de, V> Visitor<'de> for OrderedVisitor<V>
    where
        V: Deserialize<'de>,
    {
        type Value = Vec<(String, V)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a mapping")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, V>()? {
                if entries.iter().any(|(seen, _)| *seen == key) {
                    return Err(A::Error::custom(format!("duplicate key '{}'", key)));
                }
                entries.push((key, value));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(OrderedVisitor(PhantomData))
}
