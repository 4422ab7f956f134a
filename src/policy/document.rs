// src/policy/document.rs
//! Remote policy document
//!
//! The collector serves a JSON array of vendor entries; each vendor names a
//! domain and a list of endpoints matched by a compiled regex against a
//! configured location. Parsing compiles every regex up front: a single
//! invalid pattern rejects the whole document so a half-usable policy is
//! never installed.

use crate::errors::{AgentError, Result};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// Where an endpoint's matching regex is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchLocation {
    Path,
    Url,
    Domain,
    Subdomain,
    RequestHeaders,
    RequestBody,
}

/// Disposition of calls matching an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum EndpointAction {
    #[serde(alias = "allow")]
    Allow,
    #[serde(alias = "ignore")]
    Ignore,
}

/// Per-key redaction directive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyAction {
    Redact,
    Allow,
}

/// A dotted/array key path marked for redaction or explicit allowance
#[derive(Debug, Clone)]
pub struct SensitiveKey {
    pub key_path: String,
    pub action: KeyAction,
}

/// A single regex-matched API route within a vendor
#[derive(Debug)]
pub struct EndpointConfig {
    pub endpoint_id: Option<String>,
    pub location: MatchLocation,
    pub regex: Regex,
    pub action: EndpointAction,
    pub sensitive_keys: Vec<SensitiveKey>,
}

impl EndpointConfig {
    /// Sensitive keys carrying the given action
    pub fn keys_with_action(&self, action: KeyAction) -> Vec<&SensitiveKey> {
        self.sensitive_keys
            .iter()
            .filter(|key| key.action == action)
            .collect()
    }
}

/// All endpoints configured for one third-party domain.
/// Endpoint declaration order is preserved: first match wins.
#[derive(Debug)]
pub struct VendorConfig {
    pub domain: String,
    pub vendor_id: Option<String>,
    pub endpoints: Vec<EndpointConfig>,
}

/// The parsed, regex-compiled policy document
#[derive(Debug, Default)]
pub struct PolicyDocument {
    pub vendors: Vec<VendorConfig>,
}

// Raw wire shapes, deserialized before regex compilation.
#[derive(Deserialize)]
struct RawVendor {
    domain: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    endpoints: Vec<RawEndpoint>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEndpoint {
    #[serde(default)]
    id: Option<String>,
    matching_regex: RawMatchingRegex,
    #[serde(default)]
    endpoint_configuration: Option<RawEndpointConfiguration>,
}

#[derive(Deserialize)]
struct RawMatchingRegex {
    location: MatchLocation,
    regex: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEndpointConfiguration {
    action: EndpointAction,
    #[serde(default)]
    sensitive_keys: Vec<RawSensitiveKey>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSensitiveKey {
    key_path: String,
    action: KeyAction,
}

impl PolicyDocument {
    /// Parse a raw policy document. Fails atomically: any invalid entry or
    /// regex rejects the whole document.
    pub fn parse(raw: &Value) -> Result<PolicyDocument> {
        let raw_vendors: Vec<RawVendor> = serde_json::from_value(raw.clone())
            .map_err(|e| AgentError::PolicyParse(e.to_string()))?;

        let mut vendors = Vec::with_capacity(raw_vendors.len());
        for raw_vendor in raw_vendors {
            let mut endpoints = Vec::with_capacity(raw_vendor.endpoints.len());
            for raw_endpoint in raw_vendor.endpoints {
                let regex = Regex::new(&raw_endpoint.matching_regex.regex).map_err(|e| {
                    AgentError::PolicyParse(format!(
                        "invalid matching regex for vendor {}: {}",
                        raw_vendor.domain, e
                    ))
                })?;

                // A missing endpoint configuration means Allow with no keys.
                let (action, sensitive_keys) = match raw_endpoint.endpoint_configuration {
                    Some(conf) => (
                        conf.action,
                        conf.sensitive_keys
                            .into_iter()
                            .map(|key| SensitiveKey {
                                key_path: key.key_path,
                                action: key.action,
                            })
                            .collect(),
                    ),
                    None => (EndpointAction::Allow, Vec::new()),
                };

                endpoints.push(EndpointConfig {
                    endpoint_id: raw_endpoint.id,
                    location: raw_endpoint.matching_regex.location,
                    regex,
                    action,
                    sensitive_keys,
                });
            }
            vendors.push(VendorConfig {
                domain: raw_vendor.domain,
                vendor_id: raw_vendor.id,
                endpoints,
            });
        }

        Ok(PolicyDocument { vendors })
    }

    /// Look up an endpoint by the ids annotated at capture time
    pub fn find_endpoint(
        &self,
        vendor_id: &str,
        endpoint_id: &str,
    ) -> Option<(&VendorConfig, &EndpointConfig)> {
        let vendor = self
            .vendors
            .iter()
            .find(|v| v.vendor_id.as_deref() == Some(vendor_id))?;
        let endpoint = vendor
            .endpoints
            .iter()
            .find(|e| e.endpoint_id.as_deref() == Some(endpoint_id))?;
        Some((vendor, endpoint))
    }

    /// ALLOW-action key paths for an endpoint, used by redact-by-default mode
    pub fn allowed_keys_for(&self, vendor_id: &str, endpoint_id: &str) -> Vec<String> {
        match self.find_endpoint(vendor_id, endpoint_id) {
            Some((_, endpoint)) => endpoint
                .keys_with_action(KeyAction::Allow)
                .iter()
                .map(|key| key.key_path.clone())
                .collect(),
            None => Vec::new(),
        }
    }
}
