//! Append-only store of scenario results for one run.

use crate::error::{CertError, Result};
use crate::model::ScenarioResult;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Completed scenario results keyed by scenario name.
///
/// Entries are never overwritten or removed within a run.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: HashMap<String, ScenarioResult>,
    order: Vec<String>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result of a completed scenario.
    pub fn push(
        &mut self,
        name: impl Into<String>,
        result: ScenarioResult,
    ) -> Result<()> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(CertError::DuplicateScenario(name));
        }
        debug!("Cached result for scenario '{}'", name);
        self.order.push(name.clone());
        self.entries.insert(name, result);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ScenarioResult> {
        self.entries.get(name)
    }

    /// Resolve `[scenario, field, subfield, ...]` against the cache.
    pub fn access_value<S: AsRef<str>>(&self, path: &[S]) -> Result<&Value> {
        let (name, fields) = match path.split_first() {
            Some((name, fields)) => (name.as_ref(), fields),
            None => {
                return Err(CertError::UnknownField {
                    scenario: String::new(),
                    path: String::new(),
                })
            }
        };

        let result = self
            .entries
            .get(name)
            .ok_or_else(|| CertError::UnknownScenario(name.to_string()))?;

        result.lookup_field(fields).ok_or_else(|| {
            CertError::UnknownField {
                scenario: name.to_string(),
                path: fields
                    .iter()
                    .map(|s| s.as_ref())
                    .collect::<Vec<_>>()
                    .join("."),
            }
        })
    }

    /// Scenario names in the order they were recorded.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
