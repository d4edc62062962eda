//! Pre-flight checks run against a tree before it is restored.

use crate::models::Tree;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub file: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file, self.message)
    }
}

/// The external runtime's "is this configuration loadable" check.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, tree: &Tree) -> Result<(), Vec<ValidationIssue>>;
}

/// Accepts every tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

#[async_trait]
impl Validator for AcceptAll {
    async fn validate(&self, _tree: &Tree) -> Result<(), Vec<ValidationIssue>> {
        Ok(())
    }
}

/// Rejects YAML that does not parse and `automations.yaml` files that
/// repeat an automation `id`.
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlValidator;

impl YamlValidator {
    fn is_yaml(path: &str) -> bool {
        let lower = path.to_ascii_lowercase();
        lower.ends_with(".yaml") || lower.ends_with(".yml")
    }

    fn check_file(path: &str, content: &[u8]) -> Option<ValidationIssue> {
        let text = match std::str::from_utf8(content) {
            Ok(text) => text,
            Err(_) => return Some(ValidationIssue::new(path, "not valid UTF-8")),
        };

        // Home Assistant tags such as `!include` and `!secret` parse as tagged values.
        let value: serde_yaml::Value = match serde_yaml::from_str(text) {
            Ok(value) => value,
            Err(e) => return Some(ValidationIssue::new(path, format!("invalid YAML: {e}"))),
        };

        let file_name = path.rsplit('/').next().unwrap_or(path);
        if file_name != "automations.yaml" {
            return None;
        }

        let items = value.as_sequence()?;
        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for item in items {
            let id = match item.get("id") {
                Some(serde_yaml::Value::String(s)) => s.clone(),
                Some(serde_yaml::Value::Number(n)) => n.to_string(),
                _ => continue,
            };
            if !seen.insert(id.clone()) {
                duplicates.insert(id);
            }
        }

        if duplicates.is_empty() {
            None
        } else {
            let ids = duplicates.into_iter().collect::<Vec<_>>().join(", ");
            Some(ValidationIssue::new(
                path,
                format!("duplicate automation id values: {ids}"),
            ))
        }
    }
}

#[async_trait]
impl Validator for YamlValidator {
    async fn validate(&self, tree: &Tree) -> Result<(), Vec<ValidationIssue>> {
        let issues: Vec<_> = tree
            .iter()
            .filter(|(path, _)| Self::is_yaml(path))
            .filter_map(|(path, content)| Self::check_file(path, content))
            .collect();

        debug!("YAML validation found {} issue(s)", issues.len());
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}
