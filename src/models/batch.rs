//! Command Batch Model
//!
//! Picks are unresolved (template, parameters) selections; a batch is the
//! ordered list of literal commands they expand to.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::catalog::TemplateId;

/// Opaque token identifying one dispatched batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchToken(Uuid);

impl BatchToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One template selected with its parameter values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatePick {
    /// Template to expand
    pub template: TemplateId,

    /// Parameter values by name; integers are accepted and stored as text
    #[serde(default, deserialize_with = "deserialize_params")]
    pub params: BTreeMap<String, String>,
}

impl TemplatePick {
    pub fn new(template: impl Into<TemplateId>) -> Self {
        Self {
            template: template.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter value
    pub fn with_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }
}

/// Parameter values may be written as strings or bare integers
fn deserialize_params<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawValue {
        Int(i64),
        Text(String),
    }

    let raw = BTreeMap::<String, RawValue>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                RawValue::Int(n) => n.to_string(),
                RawValue::Text(s) => s,
            };
            (name, value)
        })
        .collect())
}

/// Resolved, ordered literal commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    token: BatchToken,
    commands: Vec<String>,
}

impl CommandBatch {
    /// Wrap already-literal commands in a new batch
    pub fn new(commands: Vec<String>) -> Self {
        Self {
            token: BatchToken::new(),
            commands,
        }
    }

    pub fn token(&self) -> BatchToken {
        self.token
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn into_parts(self) -> (BatchToken, Vec<String>) {
        (self.token, self.commands)
    }
}

impl<S: Into<String>> FromIterator<S> for CommandBatch {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        CommandBatch::new(iter.into_iter().map(Into::into).collect())
    }
}
