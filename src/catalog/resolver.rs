//! Template Resolution
//!
//! Binds a template's declared parameters to supplied values and expands
//! its command patterns. Patterns use `{name}` placeholders; `{{` and `}}`
//! stand for literal braces. Resolution is all-or-nothing: any missing,
//! mistyped or unresolved value fails the whole template.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

use super::{CatalogTemplate, ParamType};
use crate::error::{Error, Result};

/// Escaped braces, placeholders, or a stray brace
static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{|\}\}|\{([^{}]*)\}|[{}]").expect("placeholder grammar is a valid regex")
});

/// A piece of a scanned pattern
enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

fn scan(pattern: &str) -> Result<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut last = 0;

    for caps in TOKEN.captures_iter(pattern) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        if whole.start > last {
            segments.push(Segment::Literal(&pattern[last..whole.start]));
        }
        last = whole.end;

        match &pattern[whole.clone()] {
            "{{" => segments.push(Segment::Literal("{")),
            "}}" => segments.push(Segment::Literal("}")),
            "{" | "}" => {
                return Err(Error::MalformedPattern {
                    pattern: pattern.to_string(),
                    reason: format!("unmatched brace at offset {}", whole.start),
                })
            }
            _ => {
                let name = caps.get(1).map_or("", |m| m.as_str()).trim();
                if name.is_empty() {
                    return Err(Error::MalformedPattern {
                        pattern: pattern.to_string(),
                        reason: "empty placeholder".to_string(),
                    });
                }
                segments.push(Segment::Placeholder(name));
            }
        }
    }

    if last < pattern.len() {
        segments.push(Segment::Literal(&pattern[last..]));
    }
    Ok(segments)
}

/// Placeholder names used by a pattern, in order of appearance
pub fn placeholders(pattern: &str) -> Result<Vec<String>> {
    Ok(scan(pattern)?
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.to_string()),
            Segment::Literal(_) => None,
        })
        .collect())
}

/// Substitute placeholders in one pattern
pub fn expand<S: AsRef<str>>(pattern: &str, values: &HashMap<String, S>) -> Result<String> {
    let mut out = String::with_capacity(pattern.len());
    for segment in scan(pattern)? {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Placeholder(name) => {
                let value = values
                    .get(name)
                    .ok_or_else(|| Error::UnresolvedPlaceholder {
                        name: name.to_string(),
                    })?;
                out.push_str(value.as_ref());
            }
        }
    }
    Ok(out)
}

/// Validate and convert supplied values against the declared schema
fn bind(
    template: &CatalogTemplate,
    params: &BTreeMap<String, String>,
) -> Result<HashMap<String, String>> {
    let mut bound: HashMap<String, String> = params
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    for spec in &template.parameters {
        let value = match params.get(&spec.name) {
            Some(value) if !value.trim().is_empty() => value,
            _ => {
                return Err(Error::MissingParameter {
                    name: spec.name.clone(),
                })
            }
        };

        if spec.kind == ParamType::Int {
            let number: i64 =
                value
                    .trim()
                    .parse()
                    .map_err(|_| Error::InvalidParameterType {
                        name: spec.name.clone(),
                        value: value.clone(),
                        expected: ParamType::Int.to_string(),
                    })?;
            bound.insert(spec.name.clone(), number.to_string());
        }
    }

    Ok(bound)
}

/// Expand a template into its literal commands
pub fn resolve(
    template: &CatalogTemplate,
    params: &BTreeMap<String, String>,
) -> Result<Vec<String>> {
    let bound = bind(template, params)?;
    template
        .commands
        .iter()
        .map(|pattern| expand(pattern, &bound))
        .collect()
}
