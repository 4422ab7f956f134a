// src/transport/api.rs
//! Collector HTTP client
//!
//! All collector traffic goes through the [`Api`] trait so the pipeline can
//! be driven against an in-memory double in tests. The production
//! implementation uses a blocking client with Basic credentials; a 401 from
//! any endpoint maps to [`AgentError::Unauthorized`], which permanently
//! disables the agent upstream.

use crate::errors::{AgentError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Collector credentials, sent as HTTP Basic auth
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    fn basic_header(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", BASE64.encode(raw))
    }
}

/// Everything the agent needs from the collector
pub trait Api: Send + Sync {
    /// Ship a batch of redacted records
    fn post_events(&self, events: &[Value]) -> Result<()>;

    /// Report an internal agent failure, best effort
    fn post_errors(&self, payload: Value, message: &str) -> Result<()>;

    /// Fetch the current remote policy document
    fn fetch_config(&self) -> Result<Value>;
}

/// Production collector client
pub struct HttpApi {
    client: Client,
    credentials: Credentials,
    events_url: Url,
    errors_url: Url,
    config_url: Url,
}

impl HttpApi {
    pub fn new(
        base_url: &Url,
        credentials: Credentials,
        event_sink_endpoint: &str,
        error_sink_endpoint: &str,
        remote_config_endpoint: &str,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            credentials,
            events_url: join(base_url, event_sink_endpoint)?,
            errors_url: join(base_url, error_sink_endpoint)?,
            config_url: join(base_url, remote_config_endpoint)?,
        })
    }

    fn post(&self, url: &Url, body: &Value) -> reqwest::Result<reqwest::blocking::Response> {
        self.client
            .post(url.clone())
            .header("Authorization", self.credentials.basic_header())
            .header("x-wiretap-agent", crate::VERSION)
            .json(body)
            .send()
    }
}

fn join(base: &Url, endpoint: &str) -> Result<Url> {
    base.join(endpoint)
        .map_err(|err| AgentError::InvalidConfig(format!("bad endpoint {:?}: {}", endpoint, err)))
}

impl Api for HttpApi {
    fn post_events(&self, events: &[Value]) -> Result<()> {
        let response = self.post(&self.events_url, &Value::Array(events.to_vec()))?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                debug!(count = events.len(), "posted events");
                Ok(())
            }
            StatusCode::UNAUTHORIZED => Err(AgentError::Unauthorized),
            status => Err(AgentError::PostingEvents(format!(
                "collector returned {}",
                status
            ))),
        }
    }

    fn post_errors(&self, payload: Value, message: &str) -> Result<()> {
        let body = json!({
            "payload": payload,
            "error": message,
            "agentVersion": crate::VERSION,
        });
        let response = self.post(&self.errors_url, &body)?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            StatusCode::UNAUTHORIZED => Err(AgentError::Unauthorized),
            status => Err(AgentError::PostingEvents(format!(
                "error sink returned {}",
                status
            ))),
        }
    }

    fn fetch_config(&self) -> Result<Value> {
        let response = self
            .client
            .get(self.config_url.clone())
            .header("Authorization", self.credentials.basic_header())
            .header("x-wiretap-agent", crate::VERSION)
            .send()?;
        match response.status() {
            StatusCode::OK => {
                let raw: Value = response
                    .json()
                    .map_err(|err| AgentError::ConfigFetch(err.to_string()))?;
                Ok(raw)
            }
            StatusCode::UNAUTHORIZED => Err(AgentError::Unauthorized),
            status => Err(AgentError::ConfigFetch(format!(
                "config endpoint returned {}",
                status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_header_encoding() {
        let credentials = Credentials::new("id", "secret");
        // base64("id:secret")
        assert_eq!(credentials.basic_header(), "Basic aWQ6c2VjcmV0");
    }

    #[test]
    fn test_endpoint_join() {
        let base = Url::parse("https://collector.example.com").unwrap();
        assert_eq!(
            join(&base, "/events").unwrap().as_str(),
            "https://collector.example.com/events"
        );
    }

    #[test]
    fn test_new_builds_all_urls() {
        let base = Url::parse("https://collector.example.com").unwrap();
        let api = HttpApi::new(
            &base,
            Credentials::new("id", "secret"),
            "/events",
            "/errors",
            "/config",
        )
        .unwrap();
        assert_eq!(api.config_url.path(), "/config");
        assert_eq!(api.errors_url.path(), "/errors");
    }
}
