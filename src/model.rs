//! Scenario definitions, gateway responses, and run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::HashMap;

/// A single recorded certification scenario.
///
/// Loaded once per run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    /// Scenario name, also the key under which its result is cached.
    pub name: String,
    /// Gateway endpoint identifier (e.g. `AUTHORIZATION`).
    pub endpoint_id: String,
    /// Request body, possibly containing placeholders.
    pub raw_body: Value,
}

impl ScenarioDefinition {
    pub fn new(
        name: impl Into<String>,
        endpoint_id: impl Into<String>,
        raw_body: Value,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint_id: endpoint_id.into(),
            raw_body,
        }
    }
}

/// On-disk shape of a fixture file. The scenario name comes from the
/// file stem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureFile {
    pub endpoint: String,
    #[serde(default)]
    pub body: Value,
}

/// Response returned by the gateway for one request.
///
/// The field lookup table is built once at construction: every dotted
/// path of the payload plus the typed aliases `requestId` and `status`.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    status: u16,
    request_id: Option<String>,
    payload: Value,
    fields: HashMap<String, Value>,
}

impl GatewayResponse {
    pub fn new(
        status: u16,
        request_id: Option<String>,
        payload: Value,
    ) -> Self {
        let mut fields = HashMap::new();
        flatten_value("", &payload, &mut fields);
        fields.insert(
            "status".to_string(),
            Value::Number(Number::from(status)),
        );
        if let Some(id) = &request_id {
            fields.insert("requestId".to_string(), Value::String(id.clone()));
        }

        Self {
            status,
            request_id,
            payload,
            fields,
        }
    }

    /// Build a response, taking the request id from `request_id_field`
    /// (a dotted path into the payload).
    pub fn from_payload(
        status: u16,
        payload: Value,
        request_id_field: &str,
    ) -> Self {
        let request_id = get_value_by_path(&payload, request_id_field)
            .and_then(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        Self::new(status, request_id, payload)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// A rejection by the gateway's protocol or authentication layer.
    ///
    /// Any non-2xx status or a response without a request id counts.
    /// Business declines come back as 2xx with a request id and are not
    /// failures here.
    pub fn is_api_level_failure(&self) -> bool {
        !(200..300).contains(&self.status) || self.request_id.is_none()
    }

    /// Look up a field by path segments (`["Transaction", "TransactionID"]`).
    pub fn lookup_field<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }
        let key = path
            .iter()
            .map(|s| s.as_ref())
            .collect::<Vec<_>>()
            .join(".");
        self.fields.get(&key)
    }
}

fn get_value_by_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.').filter(|p| !p.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn flatten_value(
    prefix: &str,
    value: &Value,
    fields: &mut HashMap<String, Value>,
) {
    if !prefix.is_empty() {
        fields.insert(prefix.to_string(), value.clone());
    }
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_value(&path, val, fields);
            }
        }
        Value::Array(items) => {
            for (idx, val) in items.iter().enumerate() {
                let path = if prefix.is_empty() {
                    idx.to_string()
                } else {
                    format!("{prefix}.{idx}")
                };
                flatten_value(&path, val, fields);
            }
        }
        _ => {}
    }
}

/// Outcome of one executed scenario, as stored in the response cache.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub name: String,
    pub request_id: String,
    pub response: GatewayResponse,
}

impl ScenarioResult {
    pub fn lookup_field<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        self.response.lookup_field(path)
    }
}

/// Runner lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Aborted,
}

/// A scenario that completed and was written to the results log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedScenario {
    pub name: String,
    pub request_id: String,
    pub status: u16,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub completed: Vec<CompletedScenario>,
    pub skipped: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approved() -> GatewayResponse {
        GatewayResponse::from_payload(
            200,
            json!({
                "RequestID": "R1",
                "Transaction": {
                    "TransactionID": "T-100",
                    "ResponseCode": "000",
                    "Amount": 1000
                },
                "Tokens": [{"Value": "tok-a"}]
            }),
            "RequestID",
        )
    }

    #[test]
    fn lookup_resolves_nested_and_alias_fields() {
        let response = approved();

        assert_eq!(response.request_id(), Some("R1"));
        assert_eq!(
            response.lookup_field(&["requestId"]),
            Some(&json!("R1"))
        );
        assert_eq!(
            response.lookup_field(&["Transaction", "TransactionID"]),
            Some(&json!("T-100"))
        );
        assert_eq!(
            response.lookup_field(&["Transaction", "Amount"]),
            Some(&json!(1000))
        );
        assert_eq!(
            response.lookup_field(&["Tokens", "0", "Value"]),
            Some(&json!("tok-a"))
        );
        assert_eq!(response.lookup_field(&["status"]), Some(&json!(200)));
    }

    #[test]
    fn lookup_misses_return_none() {
        let response = approved();

        assert!(response.lookup_field(&["Transaction", "Nope"]).is_none());
        assert!(response.lookup_field::<&str>(&[]).is_none());
    }

    #[test]
    fn business_decline_is_not_api_level_failure() {
        let response = GatewayResponse::from_payload(
            200,
            json!({"RequestID": "R2", "Transaction": {"ResponseCode": "110"}}),
            "RequestID",
        );

        assert!(!response.is_api_level_failure());
    }

    #[test]
    fn rejected_or_unidentified_responses_are_api_level_failures() {
        let unauthorized = GatewayResponse::from_payload(
            401,
            json!({"RequestID": "R3"}),
            "RequestID",
        );
        let missing_id =
            GatewayResponse::from_payload(200, json!({"ok": true}), "RequestID");

        assert!(unauthorized.is_api_level_failure());
        assert!(missing_id.is_api_level_failure());
    }
}
