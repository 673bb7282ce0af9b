//! Config Loader
//!
//! Reads a pipeline configuration from YAML and logs a short summary of
//! what was found.

use std::fs;
use std::path::Path;

use log::{debug, info};

use super::model::PipelineConfig;
use crate::error::ConfigError;

/// Loads a pipeline configuration from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use atacflow::config::load_config;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_config("config.yaml")?;
///     println!("Loaded {} libraries", config.libraries.len());
///     Ok(())
/// }
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<PipelineConfig, ConfigError> {
    let path = path.as_ref();
    info!("Loading config from: {}", path.display());

    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("Config content loaded ({} bytes)", text.len());

    parse_config(&text, path)
}

/// Parses configuration text; `origin` is only used in error messages.
pub fn parse_config(text: &str, origin: &Path) -> Result<PipelineConfig, ConfigError> {
    let config: PipelineConfig =
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;

    let readgroups: usize = config
        .libraries
        .iter()
        .map(|(_, library)| library.readgroups.len())
        .sum();

    info!(
        "Parsed {} libraries, {} readgroups, {} genomes",
        config.libraries.len(),
        readgroups,
        config.genomes.len()
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config("/nonexistent/path/config.yaml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_config_invalid_yaml() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        std::fs::write(&path, "libraries: [[[").unwrap();

        let result = load_config(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_config_valid() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        let yaml = r#"
results: /scratch/results
libraries:
  lib1:
    genome: hg19
    description: "Islet, donor 7"
    readgroups:
      rg1: [/data/rg1.1.fastq.gz, /data/rg1.2.fastq.gz]
genomes:
  hg19:
    bwa_index: /ref/hg19
    tss: /ref/hg19.tss.bed.gz
    blacklists: [/ref/a.bed.gz, /ref/b.bed.gz]
resources:
  io: 2
"#;
        std::fs::write(&path, yaml).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.results, Path::new("/scratch/results"));
        assert_eq!(config.libraries.len(), 1);
        assert_eq!(
            config.libraries[0].1.description.as_deref(),
            Some("Islet, donor 7")
        );
        assert_eq!(config.genomes["hg19"].blacklists.as_ref().unwrap().len(), 2);
        assert_eq!(config.resources["io"], 2);
    }

    #[test]
    fn test_duplicate_library_key_rejected() {
        let yaml = r#"
libraries:
  lib1:
    genome: hg19
    readgroups:
      a: [/data/a.1.fastq.gz, /data/a.2.fastq.gz]
  lib1:
    genome: hg19
    readgroups:
      b: [/data/b.1.fastq.gz, /data/b.2.fastq.gz]
genomes:
  hg19:
    bwa_index: /ref/hg19
    tss: /ref/hg19.tss.bed.gz
"#;
        match parse_config(yaml, Path::new("dup.yaml")) {
            Err(ConfigError::Parse { source, .. }) => {
                assert!(source.to_string().contains("duplicate"))
            }
            other => panic!("Expected Parse error, got {:?}", other.map(|c| c.libraries.len())),
        }
    }
}
