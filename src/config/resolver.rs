//! Identity Resolver
//!
//! Maps the identifier space of a configuration onto concrete records:
//! library -> readgroups -> fastqs, and genome -> reference assets.
//! Every lookup is a pure function over the loaded configuration; a miss is
//! a [`ConfigError`] naming the identifier, never a default value.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::debug;

use super::model::PipelineConfig;
use super::reference::ReferenceTables;
use crate::error::ConfigError;
use crate::workflow::pattern::Bindings;

/// File-name suffixes stripped to obtain a fastq basename.
const FASTQ_SUFFIXES: &[&str] = &[".fastq.gz", ".fq.gz", ".fastq", ".fq"];

/// One sequencing read file.
#[derive(Debug, Clone, PartialEq)]
pub struct Fastq {
    pub path: PathBuf,
    /// 1 or 2
    pub mate: u8,
    pub basename: String,
}

/// One sequencing run/lane.
#[derive(Debug, Clone)]
pub struct Readgroup {
    pub id: String,
    pub fastqs: Vec<Fastq>,
}

/// One sample, aggregating its readgroups.
#[derive(Debug, Clone)]
pub struct Library {
    pub id: String,
    pub genome: String,
    pub description: Option<String>,
    pub readgroups: Vec<Readgroup>,
}

/// Reference assets for a genome build.
#[derive(Debug, Clone)]
pub struct Genome {
    pub id: String,
    pub bwa_index: PathBuf,
    pub tss: PathBuf,
    pub whitelists: Option<Vec<PathBuf>>,
    pub blacklists: Option<Vec<PathBuf>>,
}

/// What kind of identifier a wildcard slot holds.
///
/// The planner only accepts a wildcard binding when the resolver admits the
/// value for its domain, which keeps splits such as `{library}-{readgroup}`
/// lossless even when identifiers contain the separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WildcardDomain {
    Any,
    Library,
    /// A readgroup; if a `library` wildcard is bound it must own the readgroup
    Readgroup,
    Fastq,
    /// A fastq basename that is mate 1 of its readgroup
    FirstMate,
}

/// Location of a fastq inside the library table.
#[derive(Debug, Clone, Copy)]
struct FastqSlot {
    library: usize,
    readgroup: usize,
    fastq: usize,
}

pub struct IdentityResolver {
    results: PathBuf,
    libraries: Vec<Library>,
    library_index: HashMap<String, usize>,
    readgroup_index: HashMap<String, (usize, usize)>,
    fastq_index: HashMap<String, FastqSlot>,
    genomes: HashMap<String, Genome>,
    tables: ReferenceTables,
}

impl IdentityResolver {
    /// Builds the lookup indexes.
    ///
    /// Fails on duplicate readgroup ids or fastq basenames, libraries without
    /// readgroups, and libraries whose genome has no reference entry.
    pub fn new(config: &PipelineConfig, tables: ReferenceTables) -> Result<Self, ConfigError> {
        let genomes: HashMap<String, Genome> = config
            .genomes
            .iter()
            .map(|(id, g)| {
                (
                    id.clone(),
                    Genome {
                        id: id.clone(),
                        bwa_index: g.bwa_index.clone(),
                        tss: g.tss.clone(),
                        whitelists: g.whitelists.clone(),
                        blacklists: g.blacklists.clone(),
                    },
                )
            })
            .collect();

        let mut resolver = Self {
            results: config.results.clone(),
            libraries: Vec::with_capacity(config.libraries.len()),
            library_index: HashMap::new(),
            readgroup_index: HashMap::new(),
            fastq_index: HashMap::new(),
            genomes,
            tables,
        };

        let mut fastq_paths: HashMap<String, PathBuf> = HashMap::new();

        for (library_id, entry) in &config.libraries {
            if resolver.library_index.contains_key(library_id) {
                return Err(ConfigError::DuplicateLibrary(library_id.clone()));
            }
            if !resolver.genomes.contains_key(&entry.genome) {
                return Err(ConfigError::UnknownGenome(entry.genome.clone()));
            }
            if entry.readgroups.is_empty() {
                return Err(ConfigError::EmptyLibrary(library_id.clone()));
            }

            let library_pos = resolver.libraries.len();
            let mut readgroups = Vec::with_capacity(entry.readgroups.len());

            for (readgroup_pos, (readgroup_id, paths)) in entry.readgroups.iter().enumerate() {
                if let Some(&(owner, _)) = resolver.readgroup_index.get(readgroup_id) {
                    let first = if owner == library_pos {
                        library_id.clone()
                    } else {
                        resolver.libraries[owner].id.clone()
                    };
                    return Err(ConfigError::DuplicateReadgroup {
                        readgroup: readgroup_id.clone(),
                        first,
                        second: library_id.clone(),
                    });
                }
                if paths.len() != 2 {
                    return Err(ConfigError::MateCount {
                        readgroup: readgroup_id.clone(),
                        count: paths.len(),
                    });
                }
                resolver
                    .readgroup_index
                    .insert(readgroup_id.clone(), (library_pos, readgroup_pos));

                let mut fastqs = Vec::with_capacity(paths.len());
                for (fastq_pos, (path, mate)) in paths.iter().zip([1u8, 2]).enumerate() {
                    let basename = fastq_basename(path);
                    if let Some(first) = fastq_paths.get(&basename) {
                        return Err(ConfigError::DuplicateFastq {
                            basename,
                            first: first.clone(),
                            second: path.clone(),
                        });
                    }
                    fastq_paths.insert(basename.clone(), path.clone());
                    resolver.fastq_index.insert(
                        basename.clone(),
                        FastqSlot {
                            library: library_pos,
                            readgroup: readgroup_pos,
                            fastq: fastq_pos,
                        },
                    );
                    fastqs.push(Fastq {
                        path: path.clone(),
                        mate,
                        basename,
                    });
                }

                readgroups.push(Readgroup {
                    id: readgroup_id.clone(),
                    fastqs,
                });
            }

            resolver.library_index.insert(library_id.clone(), library_pos);
            resolver.libraries.push(Library {
                id: library_id.clone(),
                genome: entry.genome.clone(),
                description: entry.description.clone(),
                readgroups,
            });
        }

        debug!(
            "Indexed {} libraries, {} readgroups, {} fastqs",
            resolver.libraries.len(),
            resolver.readgroup_index.len(),
            resolver.fastq_index.len()
        );

        Ok(resolver)
    }

    /// Root directory for every output.
    pub fn results(&self) -> &Path {
        &self.results
    }

    /// All libraries in declaration order.
    pub fn libraries(&self) -> &[Library] {
        &self.libraries
    }

    pub fn library(&self, library_id: &str) -> Result<&Library, ConfigError> {
        self.library_index
            .get(library_id)
            .map(|&i| &self.libraries[i])
            .ok_or_else(|| ConfigError::UnknownLibrary(library_id.to_string()))
    }

    /// Finds a fastq by basename across every library and readgroup.
    pub fn resolve_fastq(&self, basename: &str) -> Result<&Fastq, ConfigError> {
        let slot = self
            .fastq_index
            .get(basename)
            .ok_or_else(|| ConfigError::UnknownFastq(basename.to_string()))?;
        Ok(&self.libraries[slot.library].readgroups[slot.readgroup].fastqs[slot.fastq])
    }

    /// The readgroup that owns a fastq basename.
    pub fn readgroup_of_fastq(&self, basename: &str) -> Result<&Readgroup, ConfigError> {
        let slot = self
            .fastq_index
            .get(basename)
            .ok_or_else(|| ConfigError::UnknownFastq(basename.to_string()))?;
        Ok(&self.libraries[slot.library].readgroups[slot.readgroup])
    }

    /// The library a readgroup belongs to.
    pub fn readgroup_of(&self, readgroup_id: &str) -> Result<&Library, ConfigError> {
        self.readgroup_index
            .get(readgroup_id)
            .map(|&(library, _)| &self.libraries[library])
            .ok_or_else(|| ConfigError::UnknownReadgroup(readgroup_id.to_string()))
    }

    /// The ordered mate pair of a readgroup.
    pub fn fastqs_of(&self, readgroup_id: &str) -> Result<(&Fastq, &Fastq), ConfigError> {
        let &(library, readgroup) = self
            .readgroup_index
            .get(readgroup_id)
            .ok_or_else(|| ConfigError::UnknownReadgroup(readgroup_id.to_string()))?;

        match self.libraries[library].readgroups[readgroup].fastqs.as_slice() {
            [first, second] => Ok((first, second)),
            other => Err(ConfigError::MateCount {
                readgroup: readgroup_id.to_string(),
                count: other.len(),
            }),
        }
    }

    pub fn genome_of(&self, library_id: &str) -> Result<&Genome, ConfigError> {
        let library = self.library(library_id)?;
        self.genome(&library.genome)
    }

    pub fn genome(&self, genome_id: &str) -> Result<&Genome, ConfigError> {
        self.genomes
            .get(genome_id)
            .ok_or_else(|| ConfigError::UnknownGenome(genome_id.to_string()))
    }

    pub fn autosomes_of(&self, genome_id: &str) -> Result<&[String], ConfigError> {
        self.tables
            .autosomes(genome_id)
            .ok_or_else(|| ConfigError::UnknownGenome(genome_id.to_string()))
    }

    pub fn organism_of(&self, genome_id: &str) -> Result<&str, ConfigError> {
        self.tables
            .organism(genome_id)
            .ok_or_else(|| ConfigError::UnknownGenome(genome_id.to_string()))
    }

    /// MACS2 `-g` value for a genome.
    pub fn genome_size_of(&self, genome_id: &str) -> Result<&str, ConfigError> {
        self.tables
            .genome_size(genome_id)
            .ok_or_else(|| ConfigError::UnknownGenome(genome_id.to_string()))
    }

    pub fn bwa_index_of(&self, genome_id: &str) -> Result<&Path, ConfigError> {
        Ok(&self.genome(genome_id)?.bwa_index)
    }

    pub fn tss_of(&self, genome_id: &str) -> Result<&Path, ConfigError> {
        Ok(&self.genome(genome_id)?.tss)
    }

    pub fn whitelists_of(&self, genome_id: &str) -> Result<Option<&[PathBuf]>, ConfigError> {
        Ok(self.genome(genome_id)?.whitelists.as_deref())
    }

    pub fn blacklists_of(&self, genome_id: &str) -> Result<Option<&[PathBuf]>, ConfigError> {
        Ok(self.genome(genome_id)?.blacklists.as_deref())
    }

    /// Label used in metrics output; the library id unless configured.
    pub fn description_of(&self, library_id: &str) -> Result<&str, ConfigError> {
        let library = self.library(library_id)?;
        Ok(library.description.as_deref().unwrap_or(&library.id))
    }

    /// Whether `value` is a legal identifier for `domain` given the other
    /// bindings of the same match.
    pub fn admits(&self, domain: WildcardDomain, value: &str, bindings: &Bindings) -> bool {
        match domain {
            WildcardDomain::Any => true,
            WildcardDomain::Library => self.library_index.contains_key(value),
            WildcardDomain::Readgroup => match self.readgroup_index.get(value) {
                Some(&(library, _)) => match bindings.get("library") {
                    Some(bound) => self.libraries[library].id == bound,
                    None => true,
                },
                None => false,
            },
            WildcardDomain::Fastq => self.fastq_index.contains_key(value),
            WildcardDomain::FirstMate => self
                .resolve_fastq(value)
                .map(|fastq| fastq.mate == 1)
                .unwrap_or(false),
        }
    }
}

/// File name of a fastq with its directory and fastq extension removed.
///
/// # Example
/// ```
/// use atacflow::config::resolver::fastq_basename;
///
/// assert_eq!(fastq_basename("/data/run1/lib1_L001.1.fastq.gz"), "lib1_L001.1");
/// assert_eq!(fastq_basename("reads.fq"), "reads");
/// ```
pub fn fastq_basename(path: impl AsRef<Path>) -> String {
    let name = path
        .as_ref()
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    FASTQ_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .unwrap_or(name)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures::{sample_config, sample_resolver};

    #[test]
    fn test_fastq_basename() {
        assert_eq!(fastq_basename("/a/b/x.1.fastq.gz"), "x.1");
        assert_eq!(fastq_basename("x.fq.gz"), "x");
        assert_eq!(fastq_basename("x.txt"), "x.txt");
    }

    #[test]
    fn test_resolve_fastq_round_trip() {
        let config = sample_config();
        let resolver = sample_resolver();

        for (_, library) in &config.libraries {
            for (_, paths) in &library.readgroups {
                for path in paths {
                    let fastq = resolver.resolve_fastq(&fastq_basename(path)).unwrap();
                    assert_eq!(&fastq.path, path);
                }
            }
        }
    }

    #[test]
    fn test_resolve_fastq_unknown_basename() {
        let resolver = sample_resolver();
        match resolver.resolve_fastq("not_configured") {
            Err(ConfigError::UnknownFastq(name)) => assert_eq!(name, "not_configured"),
            other => panic!("Expected UnknownFastq, got {:?}", other),
        }
    }

    #[test]
    fn test_readgroup_of() {
        let resolver = sample_resolver();
        assert_eq!(resolver.readgroup_of("lib1-L1").unwrap().id, "lib1");
        assert_eq!(resolver.readgroup_of("L1").unwrap().id, "lib1-a");
        assert!(matches!(
            resolver.readgroup_of("ghost"),
            Err(ConfigError::UnknownReadgroup(_))
        ));
    }

    #[test]
    fn test_fastqs_of_ordered_pair() {
        let resolver = sample_resolver();
        let (first, second) = resolver.fastqs_of("lib1-L1").unwrap();
        assert_eq!(first.mate, 1);
        assert_eq!(second.mate, 2);
        assert_eq!(first.basename, "lib1_L1.1");
        assert_eq!(second.basename, "lib1_L1.2");
    }

    #[test]
    fn test_wrong_mate_count_rejected() {
        let mut config = sample_config();
        config.libraries[0].1.readgroups[0].1.pop();

        match IdentityResolver::new(&config, ReferenceTables::builtin()) {
            Err(ConfigError::MateCount { readgroup, count }) => {
                assert_eq!(readgroup, "lib1-L1");
                assert_eq!(count, 1);
            }
            other => panic!("Expected MateCount, got {:?}", other.err()),
        }

        let mut config = sample_config();
        config.libraries[2].1.readgroups[0]
            .1
            .push(PathBuf::from("/data/mouse1.3.fq.gz"));
        assert!(matches!(
            IdentityResolver::new(&config, ReferenceTables::builtin()),
            Err(ConfigError::MateCount { count: 3, .. })
        ));
    }

    #[test]
    fn test_duplicate_library_rejected() {
        let mut config = sample_config();
        let mut again = config.libraries[0].clone();
        again.1.readgroups = vec![(
            "lib1-L9".to_string(),
            vec![
                PathBuf::from("/data/lib1_L9.1.fastq.gz"),
                PathBuf::from("/data/lib1_L9.2.fastq.gz"),
            ],
        )];
        config.libraries.push(again);

        match IdentityResolver::new(&config, ReferenceTables::builtin()) {
            Err(ConfigError::DuplicateLibrary(id)) => assert_eq!(id, "lib1"),
            other => panic!("Expected DuplicateLibrary, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_duplicate_readgroup_rejected() {
        let mut config = sample_config();
        let duplicate = config.libraries[0].1.readgroups[0].clone();
        let mut renamed = duplicate.clone();
        renamed.1 = vec![PathBuf::from("/data/other.1.fastq.gz")];
        config.libraries[1].1.readgroups.push(renamed);

        match IdentityResolver::new(&config, ReferenceTables::builtin()) {
            Err(ConfigError::DuplicateReadgroup { readgroup, .. }) => {
                assert_eq!(readgroup, duplicate.0)
            }
            other => panic!("Expected DuplicateReadgroup, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_duplicate_fastq_rejected() {
        let mut config = sample_config();
        let path = config.libraries[0].1.readgroups[0].1[0].clone();
        config.libraries[1]
            .1
            .readgroups
            .push(("extra".to_string(), vec![path.clone(), path]));

        assert!(matches!(
            IdentityResolver::new(&config, ReferenceTables::builtin()),
            Err(ConfigError::DuplicateFastq { .. })
        ));
    }

    #[test]
    fn test_unconfigured_genome_rejected() {
        let mut config = sample_config();
        config.libraries[0].1.genome = "hg00".to_string();

        assert!(matches!(
            IdentityResolver::new(&config, ReferenceTables::builtin()),
            Err(ConfigError::UnknownGenome(g)) if g == "hg00"
        ));
    }

    #[test]
    fn test_genome_lookups() {
        let resolver = sample_resolver();
        assert_eq!(resolver.genome_of("lib1").unwrap().id, "hg19");
        assert_eq!(resolver.organism_of("hg19").unwrap(), "human");
        assert_eq!(resolver.autosomes_of("hg19").unwrap().len(), 22);
        assert_eq!(resolver.genome_size_of("hg19").unwrap(), "hs");
        assert_eq!(
            resolver.bwa_index_of("hg19").unwrap(),
            Path::new("/ref/hg19/bwa/hg19")
        );
        assert_eq!(
            resolver.whitelists_of("hg19").unwrap().unwrap().len(),
            1
        );
        assert!(resolver.blacklists_of("mm10").unwrap().is_none());
    }

    #[test]
    fn test_genome_missing_from_tables_fails() {
        // Configured genome, but the injected tables do not know it.
        let tables = ReferenceTables::empty().with_genome(
            "mm10",
            "mouse",
            vec!["chr1".to_string()],
            "mm",
        );
        let resolver = IdentityResolver::new(&sample_config(), tables).unwrap();

        assert!(matches!(
            resolver.organism_of("hg19"),
            Err(ConfigError::UnknownGenome(_))
        ));
        assert!(matches!(
            resolver.autosomes_of("hg19"),
            Err(ConfigError::UnknownGenome(_))
        ));
        assert!(matches!(
            resolver.genome_size_of("hg19"),
            Err(ConfigError::UnknownGenome(_))
        ));
        assert_eq!(resolver.organism_of("mm10").unwrap(), "mouse");
    }

    #[test]
    fn test_description_defaults_to_library_id() {
        let resolver = sample_resolver();
        assert_eq!(resolver.description_of("lib1").unwrap(), "lib1");
        assert_eq!(resolver.description_of("mouse1").unwrap(), "Mouse liver");
    }

    #[test]
    fn test_admits_readgroup_of_bound_library() {
        let resolver = sample_resolver();

        let mut bindings = Bindings::new();
        bindings.insert("library", "lib1");
        assert!(resolver.admits(WildcardDomain::Readgroup, "lib1-L1", &bindings));
        assert!(!resolver.admits(WildcardDomain::Readgroup, "L1", &bindings));

        let mut bindings = Bindings::new();
        bindings.insert("library", "lib1-a");
        assert!(resolver.admits(WildcardDomain::Readgroup, "L1", &bindings));

        assert!(resolver.admits(WildcardDomain::Readgroup, "L1", &Bindings::new()));
    }

    #[test]
    fn test_admits_first_mate() {
        let resolver = sample_resolver();
        let none = Bindings::new();
        assert!(resolver.admits(WildcardDomain::FirstMate, "lib1_L1.1", &none));
        assert!(!resolver.admits(WildcardDomain::FirstMate, "lib1_L1.2", &none));
        assert!(resolver.admits(WildcardDomain::Fastq, "lib1_L1.2", &none));
        assert!(!resolver.admits(WildcardDomain::Library, "nope", &none));
    }
}
