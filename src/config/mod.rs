//! Pipeline Configuration Module
//!
//! Loading the configuration file and resolving identifiers against it.
//!
//! # Structure
//!
//! - [`model`]: Serde structures for the YAML configuration
//! - [`loader`]: Reading and parsing configuration files
//! - [`reference`]: Fixed per-genome lookup tables
//! - [`resolver`]: Identity lookups (library, readgroup, fastq, genome)

pub mod loader;
pub mod model;
pub mod reference;
pub mod resolver;

pub use loader::{load_config, parse_config};
pub use model::{GenomeConfig, LibraryConfig, PipelineConfig};
pub use reference::ReferenceTables;
pub use resolver::{Fastq, Genome, IdentityResolver, Library, Readgroup, WildcardDomain};

#[cfg(test)]
pub(crate) mod fixtures {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::*;

    fn pair(a: &str, b: &str) -> Vec<PathBuf> {
        vec![PathBuf::from(a), PathBuf::from(b)]
    }

    /// Three libraries on two genomes. `lib1` and `lib1-a` are named so
    /// that `{library}-{readgroup}` splits are ambiguous without domains.
    pub fn sample_config() -> PipelineConfig {
        let libraries = vec![
            (
                "lib1".to_string(),
                LibraryConfig {
                    genome: "hg19".to_string(),
                    description: None,
                    readgroups: vec![
                        (
                            "lib1-L1".to_string(),
                            pair("/data/lib1_L1.1.fastq.gz", "/data/lib1_L1.2.fastq.gz"),
                        ),
                        (
                            "lib1-L2".to_string(),
                            pair("/data/lib1_L2.1.fastq.gz", "/data/lib1_L2.2.fastq.gz"),
                        ),
                    ],
                },
            ),
            (
                "lib1-a".to_string(),
                LibraryConfig {
                    genome: "hg19".to_string(),
                    description: None,
                    readgroups: vec![(
                        "L1".to_string(),
                        pair("/data/lib1a_L1.1.fastq.gz", "/data/lib1a_L1.2.fastq.gz"),
                    )],
                },
            ),
            (
                "mouse1".to_string(),
                LibraryConfig {
                    genome: "mm10".to_string(),
                    description: Some("Mouse liver".to_string()),
                    readgroups: vec![(
                        "m1".to_string(),
                        pair("/data/mouse1.1.fq.gz", "/data/mouse1.2.fq.gz"),
                    )],
                },
            ),
        ];

        let mut genomes = HashMap::new();
        genomes.insert(
            "hg19".to_string(),
            GenomeConfig {
                bwa_index: PathBuf::from("/ref/hg19/bwa/hg19"),
                tss: PathBuf::from("/ref/hg19/hg19.tss.bed.gz"),
                whitelists: Some(vec![PathBuf::from("/ref/hg19/mappability.bed.gz")]),
                blacklists: Some(vec![
                    PathBuf::from("/ref/hg19/blacklist1.bed.gz"),
                    PathBuf::from("/ref/hg19/blacklist2.bed.gz"),
                ]),
            },
        );
        genomes.insert(
            "mm10".to_string(),
            GenomeConfig {
                bwa_index: PathBuf::from("/ref/mm10/bwa/mm10"),
                tss: PathBuf::from("/ref/mm10/mm10.tss.bed.gz"),
                whitelists: None,
                blacklists: None,
            },
        );

        PipelineConfig {
            results: PathBuf::from("/results"),
            libraries,
            genomes,
            resources: HashMap::new(),
        }
    }

    pub fn sample_resolver() -> IdentityResolver {
        IdentityResolver::new(&sample_config(), ReferenceTables::builtin())
            .expect("sample config is valid")
    }
}
