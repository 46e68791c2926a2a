//! Error types for certification runs.
//!
//! Every variant is fatal to a run: the runner never retries, skips, or
//! substitutes defaults. Business declines from the gateway are not errors
//! and never show up here.

use thiserror::Error;

/// Result type alias for certification operations.
pub type Result<T> = std::result::Result<T, CertError>;

/// Errors that can abort a certification run.
#[derive(Debug, Error)]
pub enum CertError {
    /// A placeholder in a scenario body could not be resolved.
    ///
    /// `source` holds the underlying cause (unknown scenario, unknown
    /// field, unavailable external source, ...).
    #[error(
        "failed to resolve placeholder '{placeholder}' in scenario \
         '{scenario}': {source}"
    )]
    Resolution {
        scenario: String,
        placeholder: String,
        #[source]
        source: Box<CertError>,
    },

    /// A string still holds a placeholder after its first one was
    /// replaced.
    #[error("more than one placeholder in a single value")]
    UnresolvedPlaceholder,

    /// The same scenario name was recorded twice in one run.
    #[error("scenario '{0}' already has a recorded result")]
    DuplicateScenario(String),

    /// A dotted reference names a scenario with no recorded result.
    #[error("no result recorded for scenario '{0}'")]
    UnknownScenario(String),

    /// A dotted reference names a field the recorded result lacks.
    #[error("field '{path}' not found in result of scenario '{scenario}'")]
    UnknownField { scenario: String, path: String },

    /// The gateway rejected a request at the protocol or
    /// authentication level.
    #[error("CERT FAILED: {scenario}\n WITH: {payload}")]
    ApiLevelFailure { scenario: String, payload: String },

    /// The external value source was used outside its active window.
    #[error("external value source '{0}' is not started")]
    SourceUnavailable(String),

    /// The external value source is active but cannot supply the key.
    #[error("external value source '{source_name}' has no value for '{key}'")]
    SourceValueMissing { source_name: String, key: String },

    /// A scenario names an endpoint the gateway configuration lacks.
    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),

    /// The HTTP request could not be completed.
    #[error("request to endpoint '{endpoint}' failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The run was cancelled before the named scenario started.
    #[error("run cancelled before scenario '{before}'")]
    Cancelled { before: String },

    /// `run` was called on a runner that already ran.
    #[error("runner has already been started")]
    RunnerNotIdle,

    /// Writing to the results log failed.
    #[error("results log error: {0}")]
    Io(#[from] std::io::Error),
}

impl CertError {
    /// Innermost cause, looking through resolution wrappers.
    pub fn root_cause(&self) -> &CertError {
        match self {
            CertError::Resolution { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether this error (or its root cause) reports an unknown
    /// scenario reference.
    pub fn is_unknown_scenario(&self) -> bool {
        matches!(self.root_cause(), CertError::UnknownScenario(_))
    }
}
