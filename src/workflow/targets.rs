//! Default Targets
//!
//! The `all` target set: a FastQC report for every configured fastq, and
//! for every library its masked peaks and ataqv metrics.

use log::debug;

use crate::config::IdentityResolver;
use crate::error::PlanError;

use super::catalog::{Catalog, COMPUTE_METRICS, FASTQC, MASK_BLACKLIST};
use super::pattern::Bindings;

/// Every final output of a configuration, in library declaration order.
pub fn default_targets(
    catalog: &Catalog,
    resolver: &IdentityResolver,
) -> Result<Vec<String>, PlanError> {
    let mut targets = Vec::new();

    for library in resolver.libraries() {
        for readgroup in &library.readgroups {
            for fastq in &readgroup.fastqs {
                let bindings = Bindings::new().with("fastq", fastq.basename.as_str());
                targets.push(catalog.output_path(FASTQC, "zip", &bindings)?);
            }
        }

        let bindings = Bindings::new().with("library", library.id.as_str());
        targets.push(catalog.output_path(MASK_BLACKLIST, "peaks", &bindings)?);
        targets.push(catalog.output_path(COMPUTE_METRICS, "metrics", &bindings)?);
    }

    debug!("Default target set has {} paths", targets.len());
    Ok(targets)
}
