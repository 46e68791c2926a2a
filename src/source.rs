//! External value sources for `${namespace.key}` placeholders.

use crate::error::{CertError, Result};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Anything outside the run that can supply a placeholder value, such as
/// a driver for the gateway's hosted tokenization page.
///
/// `start` and `stop` are idempotent. `fetch_value` is only valid
/// between them.
#[async_trait]
pub trait ExternalValueSource: Send {
    fn name(&self) -> &str;

    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    async fn fetch_value(&mut self, key: &str) -> Result<String>;
}

/// Source backed by a fixed key/value table.
#[derive(Debug, Default)]
pub struct StaticValueSource {
    values: HashMap<String, String>,
    active: bool,
}

impl StaticValueSource {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self {
            values,
            active: false,
        }
    }

    /// Load a flat YAML mapping of key to value.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).context(format!(
            "Failed to read source values: {}",
            path.display()
        ))?;
        let values: HashMap<String, String> = serde_yaml::from_str(&content)
            .context(format!(
                "Failed to parse source values from {}",
                path.display()
            ))?;
        info!(
            "Loaded {} external values from {}",
            values.len(),
            path.display()
        );
        Ok(Self::new(values))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

#[async_trait]
impl ExternalValueSource for StaticValueSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn start(&mut self) -> Result<()> {
        self.active = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.active = false;
        Ok(())
    }

    async fn fetch_value(&mut self, key: &str) -> Result<String> {
        if !self.active {
            return Err(CertError::SourceUnavailable(self.name().to_string()));
        }
        self.values.get(key).cloned().ok_or_else(|| {
            CertError::SourceValueMissing {
                source_name: self.name().to_string(),
                key: key.to_string(),
            }
        })
    }
}

/// Source reading `<prefix><KEY>` environment variables, with the key
/// upper-cased.
#[derive(Debug)]
pub struct EnvValueSource {
    prefix: String,
    active: bool,
}

impl EnvValueSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            active: false,
        }
    }

    fn variable_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_uppercase())
    }
}

#[async_trait]
impl ExternalValueSource for EnvValueSource {
    fn name(&self) -> &str {
        "env"
    }

    async fn start(&mut self) -> Result<()> {
        self.active = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.active = false;
        Ok(())
    }

    async fn fetch_value(&mut self, key: &str) -> Result<String> {
        if !self.active {
            return Err(CertError::SourceUnavailable(self.name().to_string()));
        }
        let var = self.variable_name(key);
        debug!("Reading external value from ${}", var);
        std::env::var(&var).map_err(|_| CertError::SourceValueMissing {
            source_name: self.name().to_string(),
            key: key.to_string(),
        })
    }
}
