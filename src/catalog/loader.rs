//! Catalog Document Loading
//!
//! Parses the `category -> [template]` JSON document, keeping categories in
//! document order, and validates every entry. Any violation fails the whole
//! load with an error naming the offending category and item.

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

use super::resolver::placeholders;
use super::{Catalog, CatalogTemplate, Category, ParameterSpec, TemplateId};
use crate::error::{Error, Result};

/// Categories in document order, items still untyped
struct RawDocument(Vec<(String, Vec<Value>)>);

impl<'de> Deserialize<'de> for RawDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = RawDocument;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of category names to template lists")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<RawDocument, A::Error> {
                let mut categories = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, items)) = map.next_entry::<String, Vec<Value>>()? {
                    if categories.iter().any(|(existing, _)| existing == &name) {
                        return Err(de::Error::custom(format!(
                            "duplicate category '{}'",
                            name
                        )));
                    }
                    categories.push((name, items));
                }
                Ok(RawDocument(categories))
            }
        }

        deserializer.deserialize_map(DocumentVisitor)
    }
}

/// One or more command patterns
#[derive(Deserialize)]
#[serde(untagged)]
enum CommandField {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTemplate {
    #[serde(default)]
    id: Option<String>,
    name: String,
    command: CommandField,
    #[serde(default)]
    description: String,
    #[serde(default)]
    inputs: Vec<ParameterSpec>,
}

/// Parse and validate a catalog document
pub fn parse_document(document: &str) -> Result<Catalog> {
    let RawDocument(raw) =
        serde_json::from_str(document).map_err(|e| Error::CatalogSchema {
            category: "<document>".to_string(),
            item: "<root>".to_string(),
            reason: e.to_string(),
        })?;

    let mut categories = Vec::with_capacity(raw.len());
    for (category, items) in raw {
        if category.trim().is_empty() {
            return Err(schema_error("<unnamed>", "<category>", "category name is empty"));
        }

        let mut templates = Vec::with_capacity(items.len());
        for (position, item) in items.into_iter().enumerate() {
            templates.push(parse_template(&category, position, item)?);
        }
        categories.push(Category {
            name: category,
            templates,
        });
    }

    Catalog::from_categories(categories)
}

fn parse_template(category: &str, position: usize, item: Value) -> Result<CatalogTemplate> {
    let label = item
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{}", position + 1));

    let raw: RawTemplate =
        serde_json::from_value(item).map_err(|e| schema_error(category, &label, e.to_string()))?;

    if raw.name.trim().is_empty() {
        return Err(schema_error(category, &label, "template name is empty"));
    }

    let commands = match raw.command {
        CommandField::One(command) => vec![command],
        CommandField::Many(commands) => commands,
    };
    if commands.is_empty() {
        return Err(schema_error(category, &label, "no command patterns"));
    }

    let mut declared = HashSet::new();
    for input in &raw.inputs {
        if input.name.trim().is_empty() {
            return Err(schema_error(category, &label, "input with empty name"));
        }
        if !declared.insert(input.name.as_str()) {
            return Err(schema_error(
                category,
                &label,
                format!("input '{}' declared twice", input.name),
            ));
        }
    }

    for pattern in &commands {
        let names =
            placeholders(pattern).map_err(|e| schema_error(category, &label, e.to_string()))?;
        if let Some(unknown) = names.iter().find(|name| !declared.contains(name.as_str())) {
            return Err(schema_error(
                category,
                &label,
                format!("pattern '{}' uses undeclared input '{}'", pattern, unknown),
            ));
        }
    }

    let id = match raw.id {
        Some(id) if !id.trim().is_empty() => TemplateId::new(id),
        _ => TemplateId::derive(category, &raw.name),
    };

    Ok(CatalogTemplate {
        id,
        category: category.to_string(),
        name: raw.name,
        description: raw.description,
        commands,
        parameters: raw.inputs,
    })
}

fn schema_error(category: &str, item: &str, reason: impl Into<String>) -> Error {
    Error::CatalogSchema {
        category: category.to_string(),
        item: item.to_string(),
        reason: reason.into(),
    }
}
