//! Rule Validation
//!
//! Static checks run on every rule before it can be planned:
//! - Non-empty name and command, at least one output
//! - All outputs (and the log) carry the same wildcard set
//! - Input patterns, params and domains only use output wildcards
//! - Every command placeholder refers to something the rule declares

use std::collections::{BTreeSet, HashSet};

use log::{debug, info, warn};

use crate::error::PlanError;

use super::catalog::Catalog;
use super::pattern::PathPattern;
use super::render::{placeholders, Placeholder};
use super::rule::{InputSpec, ParamSpec, Rule};

fn wildcard_set(pattern: &PathPattern) -> BTreeSet<&str> {
    pattern.wildcard_names().into_iter().collect()
}

/// Collects every problem with a single rule.
fn rule_problems(rule: &Rule) -> Vec<String> {
    let mut problems = Vec::new();

    if rule.name.is_empty() {
        problems.push("rule has an empty name".to_string());
    }
    if rule.command.is_empty() {
        problems.push("rule has no command".to_string());
    }

    let Some((_, first)) = rule.outputs.first() else {
        problems.push("rule declares no outputs".to_string());
        return problems;
    };

    let wildcards = wildcard_set(first);
    for (name, pattern) in &rule.outputs[1..] {
        if wildcard_set(pattern) != wildcards {
            problems.push(format!(
                "output '{}' has wildcards {:?}, expected {:?}",
                name,
                wildcard_set(pattern),
                wildcards
            ));
        }
    }

    let mut seen = HashSet::new();
    for (name, _) in &rule.outputs {
        if !seen.insert(name.as_str()) {
            problems.push(format!("output '{}' declared twice", name));
        }
    }

    if let Some(log) = &rule.log {
        for name in log.wildcard_names() {
            if !wildcards.contains(name) {
                problems.push(format!("log uses unknown wildcard '{}'", name));
            }
        }
    }

    for (name, spec) in &rule.inputs {
        if let InputSpec::Pattern(pattern) = spec {
            for wildcard in pattern.wildcard_names() {
                if !wildcards.contains(wildcard) {
                    problems.push(format!(
                        "input '{}' uses unknown wildcard '{}'",
                        name, wildcard
                    ));
                }
            }
        }
    }

    for (name, spec) in &rule.params {
        if let ParamSpec::Pattern(pattern) = spec {
            for wildcard in pattern.wildcard_names() {
                if !wildcards.contains(wildcard) {
                    problems.push(format!(
                        "param '{}' uses unknown wildcard '{}'",
                        name, wildcard
                    ));
                }
            }
        }
    }

    for (wildcard, _) in &rule.domains {
        if !wildcards.contains(wildcard.as_str()) {
            problems.push(format!("domain given for unknown wildcard '{}'", wildcard));
        }
    }

    for placeholder in placeholders(&rule.command) {
        let problem = match &placeholder {
            Placeholder::Input(Some(name)) if !rule.inputs.iter().any(|(n, _)| n == name) => {
                Some(format!("command uses unknown input '{}'", name))
            }
            Placeholder::Output(Some(name)) if !rule.outputs.iter().any(|(n, _)| n == name) => {
                Some(format!("command uses unknown output '{}'", name))
            }
            Placeholder::Param(name) if !rule.params.iter().any(|(n, _)| n == name) => {
                Some(format!("command uses unknown param '{}'", name))
            }
            Placeholder::Wildcard(name) if !wildcards.contains(name.as_str()) => {
                Some(format!("command uses unknown wildcard '{}'", name))
            }
            Placeholder::Log if rule.log.is_none() => {
                Some("command uses {log} but the rule has no log".to_string())
            }
            Placeholder::Unknown(body) => Some(format!("unknown placeholder '{{{}}}'", body)),
            _ => None,
        };
        problems.extend(problem);
    }

    if rule.inputs.is_empty() && placeholders(&rule.command).contains(&Placeholder::Input(None)) {
        warn!(
            "Rule '{}': command uses {{input}} but no input specified",
            rule.name
        );
    }

    problems
}

/// Checks one rule, reporting every problem at once.
pub fn validate_rule(rule: &Rule) -> Result<(), PlanError> {
    let problems = rule_problems(rule);
    if problems.is_empty() {
        debug!("Rule '{}' is valid", rule.name);
        return Ok(());
    }
    Err(PlanError::InvalidRule {
        rule: rule.name.clone(),
        reason: problems.join("; "),
    })
}

/// Checks every rule of a catalog plus name uniqueness.
pub fn validate_catalog(catalog: &Catalog) -> Result<(), PlanError> {
    info!("Validating catalog with {} rules", catalog.rules().len());

    let mut names = HashSet::new();
    for rule in catalog.rules() {
        if !names.insert(rule.name.as_str()) {
            return Err(PlanError::InvalidRule {
                rule: rule.name.clone(),
                reason: "a rule with this name already exists".to_string(),
            });
        }
        validate_rule(rule)?;
    }

    Ok(())
}
