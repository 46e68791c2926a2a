//! Sequential certification run loop.

use crate::cache::ResponseCache;
use crate::error::{CertError, Result};
use crate::executor::RequestExecutor;
use crate::model::*;
use crate::resolver::{PlaceholderResolver, ResolveScope, DEFAULT_SOURCE_NAMESPACE};
use crate::sink::ResultSink;
use crate::source::ExternalValueSource;
use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Decides which scenarios a run executes.
#[derive(Debug, Clone)]
pub struct NameFilter {
    pattern: Regex,
}

impl NameFilter {
    /// Names starting with `prefix`.
    pub fn prefix(prefix: &str) -> Self {
        Self::from_escaped(&format!("^{}", regex::escape(prefix)))
    }

    /// Names from one certification group, e.g. `AC` selects `L_AC_1`,
    /// `L_AC_2`, ...
    pub fn cert_group(group: &str) -> Self {
        Self::from_escaped(&format!(r"L_{}_\d*", regex::escape(group)))
    }

    /// Names containing a match of `pattern`.
    pub fn pattern(pattern: &str) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    fn from_escaped(pattern: &str) -> Self {
        Self {
            pattern: Regex::new(pattern)
                .expect("escaped filter always forms a valid pattern"),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }
}

/// Replays scenarios one at a time against the gateway.
///
/// A runner performs a single run. The external source is started when
/// the run begins; the source is stopped and the results log closed when
/// it ends, whether it completed or aborted.
pub struct SequentialRunner {
    resolver: PlaceholderResolver,
    executor: Box<dyn RequestExecutor>,
    source: Box<dyn ExternalValueSource>,
    sink: Box<dyn ResultSink>,
    filter: Option<NameFilter>,
    cancel: Option<Arc<AtomicBool>>,
    state: RunState,
}

impl SequentialRunner {
    pub fn new(
        executor: Box<dyn RequestExecutor>,
        source: Box<dyn ExternalValueSource>,
        sink: Box<dyn ResultSink>,
    ) -> Self {
        Self {
            resolver: PlaceholderResolver::standard(DEFAULT_SOURCE_NAMESPACE),
            executor,
            source,
            sink,
            filter: None,
            cancel: None,
            state: RunState::Idle,
        }
    }

    pub fn with_filter(mut self, filter: NameFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_resolver(mut self, resolver: PlaceholderResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Namespace of external source placeholders (`${<namespace>.key}`).
    pub fn with_source_namespace(self, namespace: &str) -> Self {
        self.with_resolver(PlaceholderResolver::standard(namespace))
    }

    /// Flag checked before each scenario starts. Once set, the run
    /// aborts without starting another scenario.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run `scenarios` in order, stopping at the first failure.
    #[instrument(skip_all, fields(scenarios = scenarios.len()))]
    pub async fn run(
        &mut self,
        scenarios: &[ScenarioDefinition],
    ) -> Result<RunSummary> {
        if self.state != RunState::Idle {
            return Err(CertError::RunnerNotIdle);
        }
        self.state = RunState::Running;

        let start_time = Instant::now();
        let mut summary = RunSummary {
            completed: Vec::new(),
            skipped: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
        };
        info!(
            "Starting certification run with {} scenario(s)",
            scenarios.len()
        );

        let mut cache = ResponseCache::new();
        let started = self.source.start().await;
        let outcome = match started {
            Ok(()) => {
                debug!("Started external value source '{}'", self.source.name());
                self.run_scenarios(scenarios, &mut cache, &mut summary).await
            }
            Err(e) => Err(e),
        };
        drop(cache);

        let teardown = self.teardown().await;
        summary.duration_ms = start_time.elapsed().as_millis() as u64;

        match (outcome, teardown) {
            (Ok(()), Ok(())) => {
                self.state = RunState::Completed;
                info!(
                    "Certification run finished: {} completed, {} skipped ({} ms)",
                    summary.completed.len(),
                    summary.skipped.len(),
                    summary.duration_ms
                );
                Ok(summary)
            }
            (Ok(()), Err(e)) => {
                self.state = RunState::Aborted;
                error!("Teardown failed: {}", e);
                Err(e)
            }
            (Err(e), teardown) => {
                self.state = RunState::Aborted;
                if let Err(teardown_err) = teardown {
                    warn!("Teardown after abort also failed: {}", teardown_err);
                }
                error!(
                    "Certification run aborted after {} scenario(s): {}",
                    summary.completed.len(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn run_scenarios(
        &mut self,
        scenarios: &[ScenarioDefinition],
        cache: &mut ResponseCache,
        summary: &mut RunSummary,
    ) -> Result<()> {
        for (idx, scenario) in scenarios.iter().enumerate() {
            if let Some(filter) = &self.filter {
                if !filter.matches(&scenario.name) {
                    debug!("Skipping scenario '{}' (filtered)", scenario.name);
                    summary.skipped.push(scenario.name.clone());
                    continue;
                }
            }

            if let Some(cancel) = &self.cancel {
                if cancel.load(Ordering::SeqCst) {
                    return Err(CertError::Cancelled {
                        before: scenario.name.clone(),
                    });
                }
            }

            info!(
                "Running scenario {}/{}: {}",
                idx + 1,
                scenarios.len(),
                scenario.name
            );

            let completed = self.run_scenario(scenario, cache).await?;
            summary.completed.push(completed);
        }
        Ok(())
    }

    async fn run_scenario(
        &mut self,
        scenario: &ScenarioDefinition,
        cache: &mut ResponseCache,
    ) -> Result<CompletedScenario> {
        let body = {
            let mut scope = ResolveScope {
                cache: &*cache,
                source: self.source.as_mut(),
            };
            self.resolver
                .resolve(&scenario.name, &scenario.raw_body, &mut scope)
                .await?
        };

        let response = self.executor.execute(&scenario.endpoint_id, &body).await?;

        let request_id = match response.request_id() {
            Some(id) if !response.is_api_level_failure() => id.to_string(),
            _ => {
                return Err(CertError::ApiLevelFailure {
                    scenario: scenario.name.clone(),
                    payload: render_payload(response.payload()),
                })
            }
        };
        let status = response.status();

        cache.push(
            scenario.name.clone(),
            ScenarioResult {
                name: scenario.name.clone(),
                request_id: request_id.clone(),
                response,
            },
        )?;
        self.sink
            .append(&format!("{},{}\n", scenario.name, request_id))?;
        debug!(
            "Scenario '{}' completed with request id {}",
            scenario.name, request_id
        );

        Ok(CompletedScenario {
            name: scenario.name.clone(),
            request_id,
            status,
        })
    }

    async fn teardown(&mut self) -> Result<()> {
        let stopped = self.source.stop().await;
        let closed = self.sink.close().map_err(CertError::from);
        debug!("Stopped external value source and closed results log");
        stopped.and(closed)
    }
}

fn render_payload(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
