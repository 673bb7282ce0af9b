//! Mappability Filter Chain
//!
//! Peaks are masked by a chain of interval filters: every whitelist restricts
//! the records to those fully contained in it, then every blacklist removes
//! records that overlap it. The chain is built as typed steps and rendered to
//! a shell pipeline only at the end.

use std::fmt;
use std::path::{Path, PathBuf};

/// One stage of the mappability filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterStep {
    /// Pass records through unchanged
    Identity,
    /// Keep a record iff it lies entirely inside the whitelist
    Restrict(PathBuf),
    /// Drop any record overlapping the blacklist
    Subtract(PathBuf),
}

impl FilterStep {
    /// Shell command for this step, reading stdin and writing stdout.
    pub fn command(&self) -> String {
        match self {
            FilterStep::Identity => "cat".to_string(),
            FilterStep::Restrict(path) => format!(
                "bedtools intersect -a stdin -b {} -f 1.0 -u",
                path.display()
            ),
            FilterStep::Subtract(path) => {
                format!("bedtools intersect -a stdin -b {} -v", path.display())
            }
        }
    }
}

impl fmt::Display for FilterStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command())
    }
}

/// Builds the filter chain for a genome.
///
/// The chain always starts with [`FilterStep::Identity`], followed by one
/// `Restrict` per whitelist and then one `Subtract` per blacklist, each in
/// the order given.
pub fn build_filter_chain(
    whitelists: Option<&[PathBuf]>,
    blacklists: Option<&[PathBuf]>,
) -> Vec<FilterStep> {
    let mut chain = vec![FilterStep::Identity];
    chain.extend(
        whitelists
            .unwrap_or_default()
            .iter()
            .map(|w| FilterStep::Restrict(w.clone())),
    );
    chain.extend(
        blacklists
            .unwrap_or_default()
            .iter()
            .map(|b| FilterStep::Subtract(b.clone())),
    );
    chain
}

/// Joins a chain into a pipeline fragment.
///
/// # Example
/// ```
/// use std::path::PathBuf;
/// use atacflow::workflow::filters::{build_filter_chain, render_filter_chain};
///
/// let blacklist = vec![PathBuf::from("b.bed")];
/// let chain = build_filter_chain(None, Some(&blacklist));
/// assert_eq!(
///     render_filter_chain(&chain),
///     "cat | bedtools intersect -a stdin -b b.bed -v"
/// );
/// ```
pub fn render_filter_chain(chain: &[FilterStep]) -> String {
    if chain.is_empty() {
        return FilterStep::Identity.command();
    }
    chain
        .iter()
        .map(FilterStep::command)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Files a chain reads besides its stdin.
pub fn filter_inputs(chain: &[FilterStep]) -> Vec<&Path> {
    chain
        .iter()
        .filter_map(|step| match step {
            FilterStep::Identity => None,
            FilterStep::Restrict(path) | FilterStep::Subtract(path) => Some(path.as_path()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_empty_sets_degrade_to_identity() {
        assert_eq!(build_filter_chain(None, None), vec![FilterStep::Identity]);
        assert_eq!(
            build_filter_chain(Some(&[]), Some(&[])),
            vec![FilterStep::Identity]
        );
        assert_eq!(render_filter_chain(&build_filter_chain(None, None)), "cat");
        assert_eq!(render_filter_chain(&[]), "cat");
    }

    #[test]
    fn test_chain_shape() {
        let whitelists = paths(&["w1.bed", "w2.bed"]);
        let blacklists = paths(&["b1.bed", "b2.bed", "b3.bed"]);
        let chain = build_filter_chain(Some(&whitelists), Some(&blacklists));

        assert_eq!(chain.len(), 1 + 2 + 3);
        assert_eq!(chain[0], FilterStep::Identity);
        assert_eq!(chain[1], FilterStep::Restrict(PathBuf::from("w1.bed")));
        assert_eq!(chain[2], FilterStep::Restrict(PathBuf::from("w2.bed")));
        assert!(chain[3..]
            .iter()
            .all(|step| matches!(step, FilterStep::Subtract(_))));
        assert_eq!(chain[5], FilterStep::Subtract(PathBuf::from("b3.bed")));
    }

    #[test]
    fn test_render_restrict_then_subtract() {
        let whitelists = paths(&["w.bed"]);
        let blacklists = paths(&["b.bed"]);
        let chain = build_filter_chain(Some(&whitelists), Some(&blacklists));

        assert_eq!(
            render_filter_chain(&chain),
            "cat | bedtools intersect -a stdin -b w.bed -f 1.0 -u \
             | bedtools intersect -a stdin -b b.bed -v"
        );
    }

    #[test]
    fn test_filter_inputs() {
        let whitelists = paths(&["w.bed"]);
        let chain = build_filter_chain(Some(&whitelists), None);
        assert_eq!(filter_inputs(&chain), vec![Path::new("w.bed")]);
    }
}
