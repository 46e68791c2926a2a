//! Gateway configuration and fixture loading.

use crate::model::{FixtureFile, ScenarioDefinition};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Connection settings for the gateway under certification.
///
/// Built once and handed to the executor; nothing reads credentials
/// from process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub merchant_id: Option<String>,
    /// Endpoint identifier to URL path, e.g. `AUTHORIZATION: /v1/credit/authorization`.
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Dotted path of the request id in response payloads.
    #[serde(default = "default_request_id_field")]
    pub request_id_field: String,
}

fn default_timeout() -> u64 {
    30
}

fn default_request_id_field() -> String {
    "RequestID".to_string()
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user: None,
            password: None,
            merchant_id: None,
            endpoints: HashMap::new(),
            headers: HashMap::new(),
            timeout: default_timeout(),
            request_id_field: default_request_id_field(),
        }
    }

    pub fn with_endpoint(
        mut self,
        id: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        self.endpoints.insert(id.into(), path.into());
        self
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .context("Failed to parse gateway configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading gateway configuration from {}", path.display());
        let content = fs::read_to_string(path).context(format!(
            "Failed to read gateway configuration: {}",
            path.display()
        ))?;
        Self::from_yaml(&content)
            .context(format!("Invalid gateway configuration in {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.base_url).context(format!(
            "Invalid base_url in gateway configuration: {}",
            self.base_url
        ))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "base_url must use http or https: {}",
                self.base_url
            ));
        }
        if self.timeout == 0 {
            return Err(anyhow!("timeout must be at least one second"));
        }
        if self.request_id_field.is_empty() {
            return Err(anyhow!("request_id_field must not be empty"));
        }
        Ok(())
    }
}

/// Yields scenario definitions in a stable order.
pub trait FixtureSource {
    fn load(&self) -> Result<Vec<ScenarioDefinition>>;
}

/// Directory of fixture files, searched recursively.
///
/// Each `.json`, `.yaml` or `.yml` file is one scenario named after its
/// file stem. Files are ordered by path.
#[derive(Debug, Clone)]
pub struct FixtureDirectory {
    pub root: PathBuf,
}

impl FixtureDirectory {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Parse one fixture file.
    pub fn load_fixture<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<ScenarioDefinition> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("Fixture has no usable name: {}", path.display()))?
            .to_string();

        let content = fs::read_to_string(path).context(format!(
            "Failed to read fixture file: {}",
            path.display()
        ))?;

        let fixture: FixtureFile = if has_extension(path, &["json"]) {
            serde_json::from_str(&content).context(format!(
                "Failed to parse JSON fixture from {}",
                path.display()
            ))?
        } else {
            serde_yaml::from_str(&content).context(format!(
                "Failed to parse YAML fixture from {}",
                path.display()
            ))?
        };

        debug!("Loaded fixture '{}' for endpoint {}", name, fixture.endpoint);
        Ok(ScenarioDefinition::new(name, fixture.endpoint, fixture.body))
    }
}

impl FixtureSource for FixtureDirectory {
    fn load(&self) -> Result<Vec<ScenarioDefinition>> {
        info!("Loading fixtures from directory: {}", self.root.display());

        let mut files = Vec::new();
        collect_fixture_files(&self.root, &mut files)?;
        files.sort();

        let mut scenarios = Vec::with_capacity(files.len());
        let mut seen = HashMap::new();
        for path in files {
            let scenario = self.load_fixture(&path)?;
            if let Some(previous) = seen.insert(scenario.name.clone(), path.clone())
            {
                return Err(anyhow!(
                    "Fixture name '{}' is defined by both {} and {}",
                    scenario.name,
                    previous.display(),
                    path.display()
                ));
            }
            scenarios.push(scenario);
        }

        info!(
            "Loaded {} fixtures from {}",
            scenarios.len(),
            self.root.display()
        );
        Ok(scenarios)
    }
}

fn collect_fixture_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)
        .context(format!("Failed to read directory: {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_dir() {
            collect_fixture_files(&path, files)?;
        } else if path.is_file() && is_fixture_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

fn is_fixture_file(path: &Path) -> bool {
    has_extension(path, &["json", "yaml", "yml"])
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.contains(&ext))
}
