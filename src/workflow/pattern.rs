//! Path Patterns and Wildcard Bindings
//!
//! A path template such as `bwa/{library}-{readgroup}.bam` is parsed once
//! into an ordered list of literal segments and named wildcard slots.
//! Matching a concrete path is a structural parse that yields every
//! possible binding; substitution is the inverse.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Wildcard name -> bound value, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bindings(BTreeMap<String, String>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
            first = false;
        }
        Ok(())
    }
}

/// One piece of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Wildcard(String),
}

/// A parsed path template.
///
/// # Example
/// ```
/// use atacflow::workflow::pattern::{Bindings, PathPattern};
///
/// let pattern = PathPattern::parse("bwa/{library}-{readgroup}.bam");
/// let bindings = Bindings::new().with("library", "lib1").with("readgroup", "L2");
/// assert_eq!(pattern.substitute(&bindings).unwrap(), "bwa/lib1-L2.bam");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parses `{name}` slots out of a template. `{{` and `}}` are literal braces.
    pub fn parse(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if closed && !name.is_empty() {
                        if !literal.is_empty() {
                            segments.push(Segment::Literal(std::mem::take(&mut literal)));
                        }
                        segments.push(Segment::Wildcard(name));
                    } else {
                        // Unterminated or empty slot: keep it verbatim
                        literal.push('{');
                        literal.push_str(&name);
                        if closed {
                            literal.push('}');
                        }
                    }
                }
                _ => literal.push(ch),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self { segments }
    }

    /// Parses `template` below a literal root directory.
    ///
    /// The root is never scanned for wildcards.
    pub fn under(root: &Path, template: &str) -> Self {
        let mut prefix = root.to_string_lossy().into_owned();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }

        let mut pattern = Self::parse(template);
        if prefix.is_empty() {
            return pattern;
        }

        match pattern.segments.first_mut() {
            Some(Segment::Literal(first)) => first.insert_str(0, &prefix),
            _ => pattern.segments.insert(0, Segment::Literal(prefix)),
        }
        pattern
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Wildcard names in order of first appearance.
    pub fn wildcard_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Wildcard(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    pub fn has_wildcards(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Wildcard(_)))
    }

    /// Fills every slot from `bindings`.
    ///
    /// Returns the name of the first unbound wildcard on failure.
    pub fn substitute(&self, bindings: &Bindings) -> Result<String, String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Wildcard(name) => match bindings.get(name) {
                    Some(value) => out.push_str(value),
                    None => return Err(name.clone()),
                },
            }
        }
        Ok(out)
    }

    /// Every way `path` can be split across this pattern's slots.
    ///
    /// Wildcard values are non-empty and never span a `/`. A wildcard that
    /// appears twice must bind the same value both times.
    pub fn match_all(&self, path: &str) -> Vec<Bindings> {
        let mut found = Vec::new();
        self.match_from(0, path, &mut Bindings::new(), &mut found);
        found
    }

    fn match_from(&self, index: usize, rest: &str, bound: &mut Bindings, found: &mut Vec<Bindings>) {
        let Some(segment) = self.segments.get(index) else {
            if rest.is_empty() {
                found.push(bound.clone());
            }
            return;
        };

        match segment {
            Segment::Literal(text) => {
                if let Some(tail) = rest.strip_prefix(text.as_str()) {
                    self.match_from(index + 1, tail, bound, found);
                }
            }
            Segment::Wildcard(name) => {
                if let Some(existing) = bound.get(name).map(str::to_string) {
                    if let Some(tail) = rest.strip_prefix(existing.as_str()) {
                        self.match_from(index + 1, tail, bound, found);
                    }
                    return;
                }

                let limit = rest.find('/').unwrap_or(rest.len());
                if limit == 0 {
                    return;
                }
                for (end, _) in rest[..limit]
                    .char_indices()
                    .skip(1)
                    .chain(std::iter::once((limit, ' ')))
                {
                    bound.insert(name.clone(), &rest[..end]);
                    self.match_from(index + 1, &rest[end..], bound, found);
                }
                bound.0.remove(name);
            }
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => write!(f, "{}", text.replace('{', "{{").replace('}', "}}"))?,
                Segment::Wildcard(name) => write!(f, "{{{}}}", name)?,
            }
        }
        Ok(())
    }
}
