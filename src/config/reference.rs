//! Fixed reference lookup tables (organism, autosomes, MACS2 genome size).
//!
//! These are not user-configurable, but they are passed to the resolver as
//! a value so tests can substitute their own.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ReferenceTables {
    organisms: HashMap<String, String>,
    autosomes: HashMap<String, Vec<String>>,
    genome_sizes: HashMap<String, String>,
}

impl ReferenceTables {
    /// Tables with no genomes at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The genome builds the standard pipeline knows about.
    pub fn builtin() -> Self {
        Self::empty()
            .with_genome("hg19", "human", numbered_contigs(22), "hs")
            .with_genome("hg38", "human", numbered_contigs(22), "hs")
            .with_genome("mm9", "mouse", numbered_contigs(19), "mm")
            .with_genome("mm10", "mouse", numbered_contigs(19), "mm")
            .with_genome("rn5", "rat", numbered_contigs(20), "2.5e9")
            .with_genome("rn6", "rat", numbered_contigs(20), "2.5e9")
    }

    /// Adds or replaces one genome's entries.
    pub fn with_genome(
        mut self,
        genome: impl Into<String>,
        organism: impl Into<String>,
        autosomes: Vec<String>,
        genome_size: impl Into<String>,
    ) -> Self {
        let genome = genome.into();
        self.organisms.insert(genome.clone(), organism.into());
        self.autosomes.insert(genome.clone(), autosomes);
        self.genome_sizes.insert(genome, genome_size.into());
        self
    }

    pub fn organism(&self, genome: &str) -> Option<&str> {
        self.organisms.get(genome).map(String::as_str)
    }

    pub fn autosomes(&self, genome: &str) -> Option<&[String]> {
        self.autosomes.get(genome).map(Vec::as_slice)
    }

    pub fn genome_size(&self, genome: &str) -> Option<&str> {
        self.genome_sizes.get(genome).map(String::as_str)
    }
}

/// `chr1` .. `chrN`.
pub fn numbered_contigs(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("chr{}", i)).collect()
}
