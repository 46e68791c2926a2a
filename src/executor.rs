//! Request execution against the gateway.

use crate::config::GatewayConfig;
use crate::error::{CertError, Result};
use crate::model::GatewayResponse;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

/// Sends a resolved scenario body to a gateway endpoint.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(
        &self,
        endpoint_id: &str,
        body: &Value,
    ) -> Result<GatewayResponse>;
}

/// JSON-over-HTTP executor.
///
/// Gateway rejections (non-2xx, unreadable body, missing request id)
/// come back as responses flagged by
/// [`GatewayResponse::is_api_level_failure`]; only transport problems
/// are errors.
#[derive(Debug)]
pub struct HttpRequestExecutor {
    client: Client,
    config: GatewayConfig,
}

impl HttpRequestExecutor {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: GatewayConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn endpoint_url(&self, endpoint_id: &str) -> Result<Url> {
        let path = self
            .config
            .endpoints
            .get(endpoint_id)
            .ok_or_else(|| CertError::UnknownEndpoint(endpoint_id.to_string()))?;
        let base = Url::parse(&self.config.base_url)
            .map_err(|_| CertError::UnknownEndpoint(endpoint_id.to_string()))?;
        base.join(path.trim_start_matches('/'))
            .map_err(|_| CertError::UnknownEndpoint(endpoint_id.to_string()))
    }
}

#[async_trait]
impl RequestExecutor for HttpRequestExecutor {
    #[instrument(skip(self, body), fields(endpoint = %endpoint_id))]
    async fn execute(
        &self,
        endpoint_id: &str,
        body: &Value,
    ) -> Result<GatewayResponse> {
        let url = self.endpoint_url(endpoint_id)?;

        let mut req_builder = self
            .client
            .post(url.clone())
            .timeout(Duration::from_secs(self.config.timeout))
            .json(body);

        if let Some(user) = &self.config.user {
            req_builder =
                req_builder.basic_auth(user, self.config.password.as_deref());
        }
        if let Some(merchant_id) = &self.config.merchant_id {
            req_builder = req_builder.header("X-Merchant-Id", merchant_id);
        }
        for (name, value) in &self.config.headers {
            req_builder = req_builder.header(name, value);
        }

        debug!("Sending request to {}", url);
        let response =
            req_builder.send().await.map_err(|source| CertError::Transport {
                endpoint: endpoint_id.to_string(),
                source,
            })?;
        let status = response.status().as_u16();
        debug!("Received response with status: {}", status);

        let text = response.text().await.map_err(|source| {
            CertError::Transport {
                endpoint: endpoint_id.to_string(),
                source,
            }
        })?;
        let payload = serde_json::from_str::<Value>(&text)
            .unwrap_or_else(|_| Value::String(text));

        Ok(GatewayResponse::from_payload(
            status,
            payload,
            &self.config.request_id_field,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_joins_base_and_path() {
        let config = GatewayConfig::new("https://cert.example.com/api/")
            .with_endpoint("AUTHORIZATION", "/v1/credit/authorization");
        let executor = HttpRequestExecutor::new(config);

        assert_eq!(
            executor.endpoint_url("AUTHORIZATION").unwrap().as_str(),
            "https://cert.example.com/api/v1/credit/authorization"
        );
    }

    #[test]
    fn unknown_endpoint_is_rejected() {
        let executor =
            HttpRequestExecutor::new(GatewayConfig::new("https://cert.example.com/"));

        assert!(matches!(
            executor.endpoint_url("VOID").unwrap_err(),
            CertError::UnknownEndpoint(ref id) if id == "VOID"
        ));
    }
}
