//! Built-in flow handlers shipped with the gateway binary.
//!
//! Deployments with custom work embed `flowbeat-scheduler` as a library and
//! register their own handlers; the gateway itself only knows how to call
//! out over HTTP.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use flowbeat_scheduler::{FlowHandler, HandlerError};

/// Flow params understood by the `webhook` handler.
#[derive(Debug, Deserialize)]
struct WebhookParams {
    /// Target URL, required.
    url: String,
    /// HTTP method, defaults to POST.
    #[serde(default = "default_method")]
    method: String,
    /// Optional JSON body sent with the request.
    #[serde(default)]
    body: Option<serde_json::Value>,
    /// Extra headers, e.g. an Authorization token.
    #[serde(default)]
    headers: HashMap<String, String>,
}

fn default_method() -> String {
    "POST".to_string()
}

fn parse_params(params: &serde_json::Value) -> Result<WebhookParams, HandlerError> {
    serde_json::from_value(params.clone())
        .map_err(|e| format!("invalid webhook params: {e}").into())
}

/// Calls a configured URL once per run. A non-2xx response fails the run.
pub struct WebhookFlow {
    client: reqwest::Client,
}

impl WebhookFlow {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl FlowHandler for WebhookFlow {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn run(&self, params: &serde_json::Value) -> Result<(), HandlerError> {
        let params = parse_params(params)?;
        let method: reqwest::Method = params
            .method
            .parse()
            .map_err(|_| format!("invalid HTTP method: {}", params.method))?;

        debug!(url = %params.url, method = %method, "firing webhook");

        let mut builder = self.client.request(method, &params.url);
        for (name, value) in &params.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = params.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "webhook target rejected the call");
            return Err(format!("webhook returned {status}: {text}").into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_default_to_post_with_no_body() {
        let params = parse_params(&serde_json::json!({"url": "http://localhost/hook"})).unwrap();
        assert_eq!(params.method, "POST");
        assert!(params.body.is_none());
        assert!(params.headers.is_empty());
    }

    #[test]
    fn params_accept_full_shape() {
        let params = parse_params(&serde_json::json!({
            "url": "http://localhost/hook",
            "method": "PUT",
            "body": {"message": "tick"},
            "headers": {"authorization": "Bearer token-1"}
        }))
        .unwrap();
        assert_eq!(params.method, "PUT");
        assert_eq!(params.body.unwrap()["message"], "tick");
        assert_eq!(params.headers["authorization"], "Bearer token-1");
    }

    #[test]
    fn missing_url_is_rejected() {
        let err = parse_params(&serde_json::json!({"method": "POST"})).unwrap_err();
        assert!(err.to_string().contains("invalid webhook params"));
    }
}
