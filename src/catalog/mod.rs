//! Configuration Catalog
//!
//! The catalog is a read-only table of parameterized command templates
//! grouped by category. It is loaded once at startup (from a JSON document
//! or the built-in Cisco IOS catalog) and shared without synchronization.

pub mod loader;
pub mod resolver;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::{CommandBatch, TemplatePick};

pub use resolver::{expand, placeholders, resolve};

/// Built-in Cisco IOS catalog document
pub const BUILTIN_CATALOG: &str = include_str!("../../catalog/cisco_ios.json");

/// Stable template identifier (`category-slug/name-slug`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(String);

impl TemplateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an id from a category and template name
    pub fn derive(category: &str, name: &str) -> Self {
        Self(format!("{}/{}", slugify(category), slugify(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TemplateId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TemplateId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lowercase, ASCII alphanumerics kept, every other run collapsed to `-`
fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Declared type of a template parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Int,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::String => f.write_str("string"),
            ParamType::Int => f.write_str("int"),
        }
    }
}

/// One declared template parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub description: String,
}

/// A named, parameterized command pattern list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTemplate {
    pub id: TemplateId,
    pub category: String,
    pub name: String,
    pub description: String,
    /// Literal command patterns with `{name}` placeholders
    pub commands: Vec<String>,
    /// Declared parameters, in display order
    pub parameters: Vec<ParameterSpec>,
}

impl CatalogTemplate {
    /// Whether the template can be expanded without any input
    pub fn is_parameterless(&self) -> bool {
        self.parameters.is_empty()
    }
}

/// Templates under one category heading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    pub templates: Vec<CatalogTemplate>,
}

/// The loaded template catalog
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    categories: Vec<Category>,
    /// id -> (category index, template index)
    index: HashMap<TemplateId, (usize, usize)>,
}

impl Catalog {
    /// Load the built-in catalog
    pub fn builtin() -> Result<Self> {
        loader::parse_document(BUILTIN_CATALOG)
    }

    /// Parse a catalog from a JSON document
    pub fn from_json_str(document: &str) -> Result<Self> {
        loader::parse_document(document)
    }

    /// Load a catalog document from disk
    pub fn load(path: &Path) -> Result<Self> {
        let document = std::fs::read_to_string(path).map_err(|e| Error::CatalogLoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let catalog = loader::parse_document(&document)?;
        info!(
            "Loaded catalog from {} ({} templates in {} categories)",
            path.display(),
            catalog.len(),
            catalog.categories.len()
        );
        Ok(catalog)
    }

    /// Build a catalog from validated categories
    pub(crate) fn from_categories(categories: Vec<Category>) -> Result<Self> {
        let mut index = HashMap::new();
        for (ci, category) in categories.iter().enumerate() {
            for (ti, template) in category.templates.iter().enumerate() {
                if index.insert(template.id.clone(), (ci, ti)).is_some() {
                    return Err(Error::CatalogSchema {
                        category: category.name.clone(),
                        item: template.name.clone(),
                        reason: format!("duplicate template id '{}'", template.id),
                    });
                }
            }
        }
        Ok(Self { categories, index })
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Templates in the named category, if it exists
    pub fn templates_in(&self, category: &str) -> Option<&[CatalogTemplate]> {
        self.categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(category))
            .map(|c| c.templates.as_slice())
    }

    /// Every template in document order
    pub fn templates(&self) -> impl Iterator<Item = &CatalogTemplate> {
        self.categories.iter().flat_map(|c| c.templates.iter())
    }

    /// Look a template up by id
    pub fn get(&self, id: &TemplateId) -> Result<&CatalogTemplate> {
        self.index
            .get(id)
            .map(|&(ci, ti)| &self.categories[ci].templates[ti])
            .ok_or_else(|| Error::TemplateNotFound {
                id: id.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Expand picks, in order, into one batch
    ///
    /// Fails on the first pick that does not resolve; nothing is partially
    /// returned.
    pub fn resolve_picks(&self, picks: &[TemplatePick]) -> Result<CommandBatch> {
        let mut commands = Vec::new();
        for pick in picks {
            let template = self.get(&pick.template)?;
            commands.extend(resolve(template, &pick.params)?);
        }
        Ok(CommandBatch::new(commands))
    }
}
