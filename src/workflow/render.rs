//! Command Rendering
//!
//! Substitutes a rule's command template with the concrete values of one
//! job. Supported placeholders:
//!
//! - `{input}` / `{output}`: every path, space separated, in declaration order
//! - `{input.NAME}` / `{output.NAME}`: the paths of one named entry
//! - `{params.NAME}`, `{wildcards.NAME}`
//! - `{threads}`, `{log}`
//!
//! `{{` and `}}` produce literal braces. Anything else is an error.

use crate::error::PlanError;

use super::pattern::Bindings;

/// One parsed placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Input(Option<String>),
    Output(Option<String>),
    Param(String),
    Wildcard(String),
    Threads,
    Log,
    Unknown(String),
}

impl Placeholder {
    fn parse(body: &str) -> Self {
        let (head, name) = match body.split_once('.') {
            Some((head, name)) => (head, Some(name.to_string())),
            None => (body, None),
        };
        match (head, name) {
            ("input", name) => Placeholder::Input(name),
            ("output", name) => Placeholder::Output(name),
            ("params", Some(name)) => Placeholder::Param(name),
            ("wildcards", Some(name)) => Placeholder::Wildcard(name),
            ("threads", None) => Placeholder::Threads,
            ("log", None) => Placeholder::Log,
            _ => Placeholder::Unknown(body.to_string()),
        }
    }
}

#[derive(Debug)]
enum Piece<'a> {
    Text(String),
    Slot(Placeholder, &'a str),
}

fn tokenize(template: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        text.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            text.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            text.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            text.push('}');
            rest = &tail[1..];
        } else if let Some(close) = tail.find('}') {
            if !text.is_empty() {
                pieces.push(Piece::Text(std::mem::take(&mut text)));
            }
            let body = &tail[1..close];
            pieces.push(Piece::Slot(Placeholder::parse(body.trim()), body));
            rest = &tail[close + 1..];
        } else {
            text.push_str(tail);
            rest = "";
        }
    }
    text.push_str(rest);
    if !text.is_empty() {
        pieces.push(Piece::Text(text));
    }
    pieces
}

/// Every placeholder a template references, in order.
pub fn placeholders(template: &str) -> Vec<Placeholder> {
    tokenize(template)
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Slot(placeholder, _) => Some(placeholder),
            Piece::Text(_) => None,
        })
        .collect()
}

/// Concrete values for one job.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub inputs: &'a [(String, Vec<String>)],
    pub outputs: &'a [(String, String)],
    pub params: &'a [(String, String)],
    pub bindings: &'a Bindings,
    pub threads: usize,
    pub log: Option<&'a str>,
}

/// Renders `template` for rule `rule`.
///
/// # Example
/// ```
/// use atacflow::workflow::pattern::Bindings;
/// use atacflow::workflow::render::{render_command, RenderContext};
///
/// let inputs = vec![("bam".to_string(), vec!["md/lib1.bam".to_string()])];
/// let outputs = vec![("bai".to_string(), "md/lib1.bam.bai".to_string())];
/// let ctx = RenderContext {
///     inputs: &inputs,
///     outputs: &outputs,
///     params: &[],
///     bindings: &Bindings::new(),
///     threads: 1,
///     log: None,
/// };
/// assert_eq!(
///     render_command("index", "samtools index {input.bam}", &ctx).unwrap(),
///     "samtools index md/lib1.bam"
/// );
/// ```
pub fn render_command(
    rule: &str,
    template: &str,
    ctx: &RenderContext<'_>,
) -> Result<String, PlanError> {
    let mut out = String::with_capacity(template.len());

    for piece in tokenize(template) {
        match piece {
            Piece::Text(text) => out.push_str(&text),
            Piece::Slot(placeholder, raw) => {
                let value = resolve(&placeholder, ctx).ok_or_else(|| {
                    PlanError::UnknownPlaceholder {
                        rule: rule.to_string(),
                        placeholder: raw.to_string(),
                    }
                })?;
                out.push_str(&value);
            }
        }
    }

    Ok(out)
}

fn resolve(placeholder: &Placeholder, ctx: &RenderContext<'_>) -> Option<String> {
    match placeholder {
        Placeholder::Input(None) => Some(
            ctx.inputs
                .iter()
                .flat_map(|(_, paths)| paths.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" "),
        ),
        Placeholder::Input(Some(name)) => ctx
            .inputs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, paths)| paths.join(" ")),
        Placeholder::Output(None) => Some(
            ctx.outputs
                .iter()
                .map(|(_, path)| path.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        ),
        Placeholder::Output(Some(name)) => ctx
            .outputs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, path)| path.clone()),
        Placeholder::Param(name) => ctx
            .params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value.clone()),
        Placeholder::Wildcard(name) => ctx.bindings.get(name).map(str::to_string),
        Placeholder::Threads => Some(ctx.threads.to_string()),
        Placeholder::Log => ctx.log.map(str::to_string),
        Placeholder::Unknown(_) => None,
    }
}

/// Threads a job is rendered with: the rule's request, capped at `ceiling`.
pub fn effective_threads(requested: usize, ceiling: usize) -> usize {
    requested.clamp(1, ceiling.max(1))
}
