//! Rule Catalog
//!
//! The set of rules a run can draw on. [`Catalog::standard`] declares the
//! ATAC-seq stages; further rules can be pushed without touching the engine.
//!
//! # Output Layout
//!
//! ```text
//! results/
//! ├── fastqc/{fastq}_fastqc.zip
//! ├── trim/{fastq}.{1,2}.trimmed.fastq.gz
//! ├── bwa/{library}-{readgroup}.bam
//! ├── merge/{library}.bam
//! ├── mark_duplicates/{library}.md.bam{,.bai} and {library}.metrics
//! ├── prune/{library}.pruned.bam
//! ├── macs2/{library}_peaks.broadPeak{,.noblacklist}
//! ├── ataqv/{library}.ataqv.json.gz and {library}.ataqv.out
//! └── logs/{rule}/...
//! ```

use std::path::Path;

use log::debug;

use crate::config::{IdentityResolver, WildcardDomain};
use crate::error::{ConfigError, PlanError};

use super::filters::{build_filter_chain, filter_inputs, render_filter_chain};
use super::pattern::{Bindings, PathPattern};
use super::rule::Rule;
use super::validator::validate_rule;

pub const FASTQC: &str = "fastqc";
pub const TRIM: &str = "trim";
pub const ALIGN: &str = "align";
pub const MERGE: &str = "merge";
pub const MARK_DUPLICATES: &str = "mark_duplicates";
pub const INDEX: &str = "index";
pub const PRUNE: &str = "prune";
pub const CALL_PEAKS: &str = "call_peaks";
pub const MASK_BLACKLIST: &str = "mask_blacklist";
pub const COMPUTE_METRICS: &str = "compute_metrics";

/// Minimum mapping quality kept by the prune stage.
pub const MIN_MAPQ: u32 = 30;

/// Threads requested by the aligner.
pub const ALIGN_THREADS: usize = 12;

/// Resource class of the disk-heavy duplicate marking stage.
pub const IO_CLASS: &str = "io";

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    rules: Vec<Rule>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule after checking it statically.
    pub fn push(&mut self, rule: Rule) -> Result<(), PlanError> {
        if self.rule(&rule.name).is_some() {
            return Err(PlanError::InvalidRule {
                rule: rule.name,
                reason: "a rule with this name already exists".to_string(),
            });
        }
        validate_rule(&rule)?;
        debug!("Registered rule '{}'", rule.name);
        self.rules.push(rule);
        Ok(())
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// The single rule and binding set producing `path`.
    pub fn match_target(
        &self,
        path: &str,
        resolver: &IdentityResolver,
    ) -> Result<(&Rule, Bindings), PlanError> {
        let mut candidates: Vec<(&Rule, Bindings)> = Vec::new();
        for rule in &self.rules {
            for bindings in rule.match_output(path, resolver) {
                candidates.push((rule, bindings));
            }
        }

        match candidates.len() {
            0 => Err(PlanError::NoMatch {
                target: path.to_string(),
            }),
            1 => Ok(candidates.remove(0)),
            _ => Err(PlanError::AmbiguousMatch {
                target: path.to_string(),
                candidates: candidates
                    .iter()
                    .map(|(rule, bindings)| format!("{}[{}]", rule.name, bindings))
                    .collect(),
            }),
        }
    }

    /// Path of output `output` of rule `rule` under `bindings`.
    pub fn output_path(
        &self,
        rule: &str,
        output: &str,
        bindings: &Bindings,
    ) -> Result<String, PlanError> {
        let found = self.rule(rule).ok_or_else(|| PlanError::InvalidRule {
            rule: rule.to_string(),
            reason: "no such rule".to_string(),
        })?;
        found
            .render_outputs(bindings)?
            .into_iter()
            .find(|(name, _)| name == output)
            .map(|(_, path)| path)
            .ok_or_else(|| PlanError::InvalidRule {
                rule: rule.to_string(),
                reason: format!("no output named '{}'", output),
            })
    }

    /// The ATAC-seq stages, rooted at `root`.
    pub fn standard(root: &Path) -> Self {
        let at = |template: &str| PathPattern::under(root, template);

        let trimmed_first = at("trim/{fastq}.1.trimmed.fastq.gz");
        let trimmed_second = at("trim/{fastq}.2.trimmed.fastq.gz");
        let aligned = at("bwa/{library}-{readgroup}.bam");
        let md_bam = at("mark_duplicates/{library}.md.bam");
        let md_bai = at("mark_duplicates/{library}.md.bam.bai");
        let peaks = at("macs2/{library}_peaks.broadPeak");
        let masked = at("macs2/{library}_peaks.broadPeak.noblacklist");

        let fastqc = Rule::new(FASTQC, "fastqc --threads {threads} --outdir {params.outdir} {input}")
            .with_output("zip", at("fastqc/{fastq}_fastqc.zip"))
            .with_computed_input("fastq", |w, r| {
                let fastq = r.resolve_fastq(wildcard(w, "fastq"))?;
                Ok(vec![fastq.path.to_string_lossy().into_owned()])
            })
            .with_param("outdir", root.join("fastqc").to_string_lossy())
            .with_log(at("logs/fastqc/{fastq}.log"))
            .with_domain("fastq", WildcardDomain::Fastq);

        let trim = Rule::new(
            TRIM,
            "cta {input.first} {input.second} {output.first} {output.second}",
        )
        .with_output("first", trimmed_first.clone())
        .with_output("second", trimmed_second.clone())
        .with_computed_input("first", |w, r| mate_path(w, r, 1))
        .with_computed_input("second", |w, r| mate_path(w, r, 2))
        .with_log(at("logs/trim/{fastq}.log"))
        .with_domain("fastq", WildcardDomain::FirstMate);

        let align = Rule::new(
            ALIGN,
            "bwa mem -M -R '{params.rg}' -I 200,200,5000 -t {threads} {params.index} \
             {input.first} {input.second} \
             | samtools sort -m 1g -@ {threads} -O bam -T {params.sort_tmp} -o {output} -",
        )
        .with_output("bam", aligned.clone())
        .with_expanded_input("first", trimmed_first, first_mate_of_readgroup)
        .with_expanded_input("second", trimmed_second, first_mate_of_readgroup)
        .with_computed_param("index", |w, r| {
            let genome = &r.genome_of(wildcard(w, "library"))?.id;
            Ok(r.bwa_index_of(genome)?.to_string_lossy().into_owned())
        })
        .with_computed_param("rg", |w, _| {
            let library = wildcard(w, "library");
            Ok(format!(
                "@RG\\tID:{}\\tSM:{}\\tLB:{}",
                wildcard(w, "readgroup"),
                library,
                library
            ))
        })
        .with_pattern_param("sort_tmp", at("bwa/{library}-{readgroup}.sort_tmp"))
        .with_log(at("logs/align/{library}-{readgroup}.log"))
        .with_threads(ALIGN_THREADS)
        .with_domain("library", WildcardDomain::Library)
        .with_domain("readgroup", WildcardDomain::Readgroup);

        let merge = Rule::new(MERGE, "samtools merge -f -@ {threads} {output} {input}")
            .with_output("bam", at("merge/{library}.bam"))
            .with_expanded_input("bams", aligned, |w: &Bindings, r: &IdentityResolver| {
                let library = r.library(wildcard(w, "library"))?;
                Ok(library
                    .readgroups
                    .iter()
                    .map(|rg| {
                        Bindings::new()
                            .with("library", library.id.as_str())
                            .with("readgroup", rg.id.as_str())
                    })
                    .collect())
            })
            .with_log(at("logs/merge/{library}.log"))
            .with_threads(4)
            .with_domain("library", WildcardDomain::Library);

        let mark_duplicates = Rule::new(
            MARK_DUPLICATES,
            "picard -Xmx4g -Xms4g MarkDuplicates I={input} O={output.bam} \
             ASSUME_SORTED=true METRICS_FILE={output.metrics} \
             VALIDATION_STRINGENCY=LENIENT TMP_DIR={params.tmp_dir}",
        )
        .with_output("bam", md_bam.clone())
        .with_output("metrics", at("mark_duplicates/{library}.metrics"))
        .with_input("bam", at("merge/{library}.bam"))
        .with_param("tmp_dir", root.join("mark_duplicates").to_string_lossy())
        .with_log(at("logs/mark_duplicates/{library}.log"))
        .with_resource(IO_CLASS)
        .with_domain("library", WildcardDomain::Library);

        let index = Rule::new(INDEX, "samtools index {input}")
            .with_output("bai", md_bai.clone())
            .with_input("bam", md_bam.clone())
            .with_log(at("logs/index/{library}.log"))
            .with_domain("library", WildcardDomain::Library);

        let prune = Rule::new(
            PRUNE,
            "samtools view -b -h -f 3 -F 4 -F 8 -F 256 -F 1024 -F 2048 \
             -q {params.mapq} {input.bam} {params.autosomes} > {output}",
        )
        .with_output("bam", at("prune/{library}.pruned.bam"))
        .with_input("bam", md_bam.clone())
        .with_input("bai", md_bai.clone())
        .with_param("mapq", MIN_MAPQ.to_string())
        .with_computed_param("autosomes", |w, r| {
            let genome = &r.genome_of(wildcard(w, "library"))?.id;
            Ok(r.autosomes_of(genome)?.join(" "))
        })
        .with_log(at("logs/prune/{library}.log"))
        .with_domain("library", WildcardDomain::Library);

        let call_peaks = Rule::new(
            CALL_PEAKS,
            "macs2 callpeak -t {input} --outdir {params.outdir} -f BAMPE \
             -n {wildcards.library} -g {params.genome_size} --nomodel --shift -100 \
             --seed 762873 --extsize 200 -B --broad --keep-dup all --SPMR",
        )
        .with_output("peaks", peaks.clone())
        .with_input("bam", at("prune/{library}.pruned.bam"))
        .with_param("outdir", root.join("macs2").to_string_lossy())
        .with_computed_param("genome_size", |w, r| {
            let genome = &r.genome_of(wildcard(w, "library"))?.id;
            Ok(r.genome_size_of(genome)?.to_string())
        })
        .with_log(at("logs/call_peaks/{library}.log"))
        .with_domain("library", WildcardDomain::Library);

        let mask_blacklist = Rule::new(
            MASK_BLACKLIST,
            "zcat -f {input.peaks} | {params.filters} > {output}",
        )
        .with_output("peaks", masked.clone())
        .with_input("peaks", peaks)
        .with_computed_input("filters", |w, r| {
            let genome = &r.genome_of(wildcard(w, "library"))?.id;
            let chain = build_filter_chain(r.whitelists_of(genome)?, r.blacklists_of(genome)?);
            Ok(filter_inputs(&chain)
                .into_iter()
                .map(|path| path.to_string_lossy().into_owned())
                .collect())
        })
        .with_computed_param("filters", |w, r| {
            let genome = &r.genome_of(wildcard(w, "library"))?.id;
            let chain = build_filter_chain(r.whitelists_of(genome)?, r.blacklists_of(genome)?);
            Ok(render_filter_chain(&chain))
        })
        .with_log(at("logs/mask_blacklist/{library}.log"))
        .with_domain("library", WildcardDomain::Library);

        let compute_metrics = Rule::new(
            COMPUTE_METRICS,
            "ataqv --peak-file {input.peaks} --name '{params.description}' \
             --metrics-file {output.metrics} --tss-file {params.tss} \
             --ignore-read-groups {params.organism} {input.bam} > {output.text}",
        )
        .with_output("metrics", at("ataqv/{library}.ataqv.json.gz"))
        .with_output("text", at("ataqv/{library}.ataqv.out"))
        .with_input("bam", md_bam)
        .with_input("bai", md_bai)
        .with_input("peaks", masked)
        .with_computed_param("description", |w, r| {
            Ok(r.description_of(wildcard(w, "library"))?.to_string())
        })
        .with_computed_param("organism", |w, r| {
            let genome = &r.genome_of(wildcard(w, "library"))?.id;
            Ok(r.organism_of(genome)?.to_string())
        })
        .with_computed_param("tss", |w, r| {
            let genome = &r.genome_of(wildcard(w, "library"))?.id;
            Ok(r.tss_of(genome)?.to_string_lossy().into_owned())
        })
        .with_log(at("logs/compute_metrics/{library}.log"))
        .with_domain("library", WildcardDomain::Library);

        Self {
            rules: vec![
                fastqc,
                trim,
                align,
                merge,
                mark_duplicates,
                index,
                prune,
                call_peaks,
                mask_blacklist,
                compute_metrics,
            ],
        }
    }
}

fn wildcard<'a>(bindings: &'a Bindings, name: &str) -> &'a str {
    bindings.get(name).unwrap_or_default()
}

/// Raw fastq of mate `mate` in the readgroup whose first mate is `{fastq}`.
fn mate_path(
    bindings: &Bindings,
    resolver: &IdentityResolver,
    mate: u8,
) -> Result<Vec<String>, ConfigError> {
    let readgroup = resolver.readgroup_of_fastq(wildcard(bindings, "fastq"))?;
    let (first, second) = resolver.fastqs_of(&readgroup.id)?;
    let fastq = if mate == 1 { first } else { second };
    Ok(vec![fastq.path.to_string_lossy().into_owned()])
}

/// Binds `{fastq}` to the first mate of the bound readgroup; trim jobs are
/// keyed by it.
fn first_mate_of_readgroup(
    bindings: &Bindings,
    resolver: &IdentityResolver,
) -> Result<Vec<Bindings>, ConfigError> {
    let (first, _) = resolver.fastqs_of(wildcard(bindings, "readgroup"))?;
    Ok(vec![Bindings::new().with("fastq", first.basename.as_str())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures::sample_resolver;
    use crate::workflow::validator::validate_catalog;

    fn standard() -> Catalog {
        Catalog::standard(Path::new("/results"))
    }

    #[test]
    fn test_standard_catalog_is_valid() {
        let catalog = standard();
        assert_eq!(catalog.rules().len(), 10);
        assert!(validate_catalog(&catalog).is_ok());
    }

    #[test]
    fn test_match_target_per_rule() {
        let catalog = standard();
        let resolver = sample_resolver();

        let cases = [
            ("/results/fastqc/lib1_L1.2_fastqc.zip", FASTQC),
            ("/results/trim/lib1_L1.1.1.trimmed.fastq.gz", TRIM),
            ("/results/trim/lib1_L1.1.2.trimmed.fastq.gz", TRIM),
            ("/results/bwa/lib1-lib1-L1.bam", ALIGN),
            ("/results/merge/lib1.bam", MERGE),
            ("/results/mark_duplicates/lib1.md.bam", MARK_DUPLICATES),
            ("/results/mark_duplicates/lib1.metrics", MARK_DUPLICATES),
            ("/results/mark_duplicates/lib1.md.bam.bai", INDEX),
            ("/results/prune/lib1.pruned.bam", PRUNE),
            ("/results/macs2/lib1_peaks.broadPeak", CALL_PEAKS),
            ("/results/macs2/lib1_peaks.broadPeak.noblacklist", MASK_BLACKLIST),
            ("/results/ataqv/mouse1.ataqv.json.gz", COMPUTE_METRICS),
        ];

        for (target, expected) in cases {
            let (rule, _) = catalog
                .match_target(target, &resolver)
                .unwrap_or_else(|e| panic!("{}: {}", target, e));
            assert_eq!(rule.name, expected, "{}", target);
        }
    }

    #[test]
    fn test_trim_only_matches_first_mate() {
        let catalog = standard();
        let resolver = sample_resolver();
        assert!(matches!(
            catalog.match_target("/results/trim/lib1_L1.2.1.trimmed.fastq.gz", &resolver),
            Err(PlanError::NoMatch { .. })
        ));
    }

    #[test]
    fn test_no_match_outside_catalog() {
        let catalog = standard();
        let resolver = sample_resolver();
        match catalog.match_target("/results/other/lib1.txt", &resolver) {
            Err(PlanError::NoMatch { target }) => assert_eq!(target, "/results/other/lib1.txt"),
            other => panic!("Expected NoMatch, got {:?}", other),
        }
        assert!(catalog.match_target("/results/merge/ghost.bam", &resolver).is_err());
    }

    #[test]
    fn test_ambiguous_match_lists_candidates() {
        let mut catalog = Catalog::new();
        catalog
            .push(
                Rule::new("a", "touch {output}")
                    .with_output("out", PathPattern::parse("x/{name}.txt")),
            )
            .unwrap();
        catalog
            .push(
                Rule::new("b", "touch {output}")
                    .with_output("out", PathPattern::parse("x/{stem}.txt")),
            )
            .unwrap();

        match catalog.match_target("x/1.txt", &sample_resolver()) {
            Err(PlanError::AmbiguousMatch { candidates, .. }) => {
                assert_eq!(candidates, vec!["a[name=1]", "b[stem=1]"]);
            }
            other => panic!("Expected AmbiguousMatch, got {:?}", other),
        }
    }

    #[test]
    fn test_push_rejects_duplicate_name() {
        let mut catalog = Catalog::new();
        let rule = Rule::new("a", "true").with_output("out", PathPattern::parse("{x}.txt"));
        catalog.push(rule.clone()).unwrap();
        assert!(matches!(
            catalog.push(rule),
            Err(PlanError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_output_path() {
        let catalog = standard();
        let bindings = Bindings::new().with("library", "lib1");
        assert_eq!(
            catalog.output_path(MARK_DUPLICATES, "metrics", &bindings).unwrap(),
            "/results/mark_duplicates/lib1.metrics"
        );
        assert!(catalog.output_path(MARK_DUPLICATES, "nope", &bindings).is_err());
    }

    #[test]
    fn test_align_inputs_are_trimmed_pair() {
        let catalog = standard();
        let resolver = sample_resolver();
        let align = catalog.rule(ALIGN).unwrap();
        let bindings = Bindings::new()
            .with("library", "lib1")
            .with("readgroup", "lib1-L2");

        let inputs = align.resolve_inputs("t", &bindings, &resolver).unwrap();
        assert_eq!(
            inputs[0].1,
            vec!["/results/trim/lib1_L2.1.1.trimmed.fastq.gz"]
        );
        assert_eq!(
            inputs[1].1,
            vec!["/results/trim/lib1_L2.1.2.trimmed.fastq.gz"]
        );

        let params = align.resolve_params("t", &bindings, &resolver).unwrap();
        let index = params.iter().find(|(n, _)| n == "index").unwrap();
        assert_eq!(index.1, "/ref/hg19/bwa/hg19");
    }

    #[test]
    fn test_mask_blacklist_reads_filter_files() {
        let catalog = standard();
        let resolver = sample_resolver();
        let rule = catalog.rule(MASK_BLACKLIST).unwrap();

        let human = Bindings::new().with("library", "lib1");
        let inputs = rule.resolve_inputs("t", &human, &resolver).unwrap();
        let filters = &inputs.iter().find(|(n, _)| n == "filters").unwrap().1;
        let genome = resolver.genome("hg19").unwrap();
        let mut expected: Vec<String> = Vec::new();
        for path in genome.whitelists.iter().chain(&genome.blacklists).flatten() {
            expected.push(path.to_string_lossy().into_owned());
        }
        assert_eq!(filters, &expected);
        assert_eq!(filters.len(), 3);

        let mouse = Bindings::new().with("library", "mouse1");
        let inputs = rule.resolve_inputs("t", &mouse, &resolver).unwrap();
        assert!(inputs[1].1.is_empty());
    }

    #[test]
    fn test_mask_blacklist_filter_param() {
        let catalog = standard();
        let resolver = sample_resolver();
        let rule = catalog.rule(MASK_BLACKLIST).unwrap();

        let mouse = Bindings::new().with("library", "mouse1");
        let params = rule.resolve_params("t", &mouse, &resolver).unwrap();
        assert_eq!(params[0].1, "cat");

        let human = Bindings::new().with("library", "lib1");
        let params = rule.resolve_params("t", &human, &resolver).unwrap();
        assert_eq!(params[0].1.matches(" | ").count(), 3);
    }
}
