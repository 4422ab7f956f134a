// src/redact/engine.rs
//! In-place redaction of record batches
//!
//! Modes, highest priority first: `force_redact_all` redacts every leaf
//! unconditionally; `redact_by_default` redacts every leaf not explicitly
//! ALLOWed for the matched endpoint; policy-driven redacts only keys marked
//! REDACT; `ignore_redaction` leaves everything untouched. Every redacted
//! leaf is replaced with JSON null and described as `{keyPath, type,
//! length}` for downstream anomaly detection; the value itself is never
//! retained.
//!
//! Any failure aborts the whole batch so a half-redacted payload is never
//! posted.

use crate::capture::record::{Record, SensitiveKeyMeta};
use crate::config::AgentConfig;
use crate::errors::Result;
use crate::policy::document::{EndpointAction, EndpointConfig, KeyAction, SensitiveKey};
use crate::policy::matcher::match_vendor_endpoint;
use crate::policy::PolicyDocument;
use crate::redact::paths::{self, KeyPath, RootField};
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

/// Redacts batches of records against the active policy document
pub struct Redactor<'a> {
    config: &'a AgentConfig,
    policy: Option<&'a PolicyDocument>,
}

/// Endpoint directives resolved for one record
struct EndpointPlan {
    action: EndpointAction,
    redact_keys: Vec<SensitiveKey>,
    allow_keys: Vec<SensitiveKey>,
}

impl EndpointPlan {
    fn from_endpoint(endpoint: &EndpointConfig) -> Self {
        let partition = |action: KeyAction| {
            endpoint
                .sensitive_keys
                .iter()
                .filter(|key| key.action == action)
                .cloned()
                .collect()
        };
        Self {
            action: endpoint.action,
            redact_keys: partition(KeyAction::Redact),
            allow_keys: partition(KeyAction::Allow),
        }
    }
}

impl<'a> Redactor<'a> {
    pub fn new(config: &'a AgentConfig, policy: Option<&'a PolicyDocument>) -> Self {
        Self { config, policy }
    }

    /// Redact a batch in place, dropping records whose matched endpoint is
    /// marked Ignore. A single failure aborts the whole batch.
    pub fn redact_batch(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        let mut kept = Vec::with_capacity(records.len());
        for mut record in records {
            if self.redact_record(&mut record)? {
                kept.push(record);
            }
        }
        Ok(kept)
    }

    /// Returns false when the record should be dropped from the batch
    fn redact_record(&self, record: &mut Record) -> Result<bool> {
        let plan = self.resolve_plan(record);
        if let Some(plan) = &plan {
            if plan.action == EndpointAction::Ignore {
                return Ok(false);
            }
        }

        record.metadata.sensitive_keys.clear();
        if self.config.force_redact_all {
            // Per-key ALLOW directives are ignored in force mode.
            record.metadata.sensitive_keys = redact_everything(record, &HashSet::new());
        } else if self.config.redact_by_default {
            let allowed = match &plan {
                Some(plan) => expanded_allow_set(record, &plan.allow_keys)?,
                None => HashSet::new(),
            };
            record.metadata.sensitive_keys = redact_everything(record, &allowed);
        } else if !self.config.ignore_redaction {
            if let Some(plan) = &plan {
                record.metadata.sensitive_keys = redact_marked_keys(record, &plan.redact_keys)?;
            }
        }
        Ok(true)
    }

    /// Resolve the endpoint directives for a record, preferring the ids
    /// annotated at capture time and falling back to a fresh match.
    fn resolve_plan(&self, record: &Record) -> Option<EndpointPlan> {
        let doc = self.policy?;
        if let (Some(vendor_id), Some(endpoint_id)) =
            (&record.metadata.vendor_id, &record.metadata.endpoint_id)
        {
            if let Some((_, endpoint)) = doc.find_endpoint(vendor_id, endpoint_id) {
                return Some(EndpointPlan::from_endpoint(endpoint));
            }
        }
        let url = Url::parse(&record.request.url).ok()?;
        let body = (!record.request.body.is_null()).then_some(&record.request.body);
        let (_, endpoint) = match_vendor_endpoint(doc, &url, body, &record.request.headers)?;
        Some(EndpointPlan::from_endpoint(endpoint))
    }
}

fn root_ref(record: &Record, root: RootField) -> Option<&Value> {
    match root {
        RootField::RequestBody => Some(&record.request.body),
        RootField::RequestHeaders => Some(&record.request.headers),
        RootField::ResponseBody => record.response.as_ref().map(|r| &r.body),
        RootField::ResponseHeaders => record.response.as_ref().map(|r| &r.headers),
    }
}

fn root_mut(record: &mut Record, root: RootField) -> Option<&mut Value> {
    match root {
        RootField::RequestBody => Some(&mut record.request.body),
        RootField::RequestHeaders => Some(&mut record.request.headers),
        RootField::ResponseBody => record.response.as_mut().map(|r| &mut r.body),
        RootField::ResponseHeaders => record.response.as_mut().map(|r| &mut r.headers),
    }
}

/// Redact the keys explicitly marked REDACT for the matched endpoint.
/// Response-side paths on a response-less record are skipped, as are paths
/// whose branches do not exist in the live document.
fn redact_marked_keys(
    record: &mut Record,
    redact_keys: &[SensitiveKey],
) -> Result<Vec<SensitiveKeyMeta>> {
    let mut out = Vec::new();
    for key in redact_keys {
        let path: KeyPath = paths::parse_key_path(&key.key_path)?;
        let Some(root_value) = root_mut(record, path.root) else {
            continue;
        };
        let concrete = paths::expand(root_value, &path);
        for concrete_path in concrete {
            let Some(target) = paths::get_mut(root_value, &concrete_path) else {
                continue;
            };
            let (kind, length) = describe(target);
            *target = Value::Null;
            out.push(SensitiveKeyMeta {
                key_path: paths::render(path.root, &concrete_path),
                kind: kind.to_string(),
                length,
            });
        }
    }
    Ok(out)
}

/// Expand ALLOW key paths into the set of concrete path strings exempt from
/// default-deny redaction.
fn expanded_allow_set(record: &Record, allow_keys: &[SensitiveKey]) -> Result<HashSet<String>> {
    let mut allowed = HashSet::new();
    for key in allow_keys {
        let path = paths::parse_key_path(&key.key_path)?;
        let Some(root_value) = root_ref(record, path.root) else {
            continue;
        };
        for concrete_path in paths::expand(root_value, &path) {
            allowed.insert(paths::render(path.root, &concrete_path));
        }
    }
    Ok(allowed)
}

/// Redact every leaf under every root, except paths in the allowed set.
/// Allowed container paths exempt their whole subtree.
fn redact_everything(record: &mut Record, allowed: &HashSet<String>) -> Vec<SensitiveKeyMeta> {
    let mut out = Vec::new();
    for root in RootField::ALL {
        if let Some(value) = root_mut(record, root) {
            walk_redact(value, root.name().to_string(), allowed, &mut out);
        }
    }
    out
}

fn walk_redact(
    value: &mut Value,
    path: String,
    allowed: &HashSet<String>,
    out: &mut Vec<SensitiveKeyMeta>,
) {
    if allowed.contains(&path) {
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                walk_redact(child, format!("{}.{}", path, key), allowed, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter_mut().enumerate() {
                walk_redact(child, format!("{}[{}]", path, index), allowed, out);
            }
        }
        // Already absent; nothing to describe or remove.
        Value::Null => {}
        leaf => {
            let (kind, length) = describe(leaf);
            out.push(SensitiveKeyMeta {
                key_path: path,
                kind: kind.to_string(),
                length,
            });
            *leaf = Value::Null;
        }
    }
}

/// Describe a value about to be redacted as an inferred `(type, length)`
/// pair: strings by character count, numbers by decimal-string length,
/// arrays by element count, objects by a recursive byte estimate over their
/// values (keys and container overhead excluded).
pub fn describe(value: &Value) -> (&'static str, usize) {
    match value {
        Value::Null => ("null", 0),
        Value::Bool(_) => ("boolean", 1),
        Value::Number(n) => {
            let kind = if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "float"
            };
            (kind, n.to_string().len())
        }
        Value::String(s) => ("string", s.chars().count()),
        Value::Array(items) => ("array", items.len()),
        Value::Object(_) => ("object", approx_size(value)),
    }
}

fn approx_size(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 8,
        Value::String(s) => s.len(),
        Value::Array(items) => items.iter().map(approx_size).sum(),
        Value::Object(map) => map.values().map(approx_size).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::record::{PendingRequest, RecordMetadata, RequestLog, ResponseLog};
    use chrono::Utc;
    use serde_json::json;

    fn record_for(url: &str, response_body: Value) -> Record {
        let pending = PendingRequest {
            request: RequestLog {
                id: "req_1".to_string(),
                method: "GET".to_string(),
                url: url.to_string(),
                path: Url::parse(url).unwrap().path().to_string(),
                search: String::new(),
                body: Value::Null,
                headers: json!({"accept": "application/json"}),
                requested_at: Utc::now(),
            },
            metadata: RecordMetadata::default(),
        };
        pending.into_record(ResponseLog {
            body: response_body,
            headers: json!({"content-type": "application/json"}),
            status: 200,
            status_text: Some("OK".to_string()),
            responded_at: Utc::now(),
        })
    }

    fn policy_with_keys(keys: &[(&str, &str)]) -> PolicyDocument {
        let built: Vec<Value> = keys
            .iter()
            .map(|(path, action)| json!({"keyPath": path, "action": action}))
            .collect();
        PolicyDocument::parse(&json!([
            {
                "domain": "localhost",
                "id": "vendor-id",
                "endpoints": [
                    {
                        "id": "endpoint-id",
                        "matchingRegex": { "location": "path", "regex": "200" },
                        "endpointConfiguration": { "action": "Allow", "sensitiveKeys": built }
                    }
                ]
            }
        ]))
        .unwrap()
    }

    fn ignore_policy() -> PolicyDocument {
        PolicyDocument::parse(&json!([
            {
                "domain": "localhost",
                "id": "vendor-id",
                "endpoints": [
                    {
                        "id": "endpoint-id",
                        "matchingRegex": { "location": "path", "regex": "200" },
                        "endpointConfiguration": { "action": "Ignore", "sensitiveKeys": [] }
                    }
                ]
            }
        ]))
        .unwrap()
    }

    #[test]
    fn test_describe_each_kind() {
        assert_eq!(describe(&json!(null)), ("null", 0));
        assert_eq!(describe(&json!(true)), ("boolean", 1));
        assert_eq!(describe(&json!("abc")), ("string", 3));
        assert_eq!(describe(&json!(123)), ("integer", 3));
        assert_eq!(describe(&json!(123.45)), ("float", 6));
        assert_eq!(describe(&json!(["a", "b", "c"])), ("array", 3));
        // "value1" (6 bytes) + 2 (8 bytes) = 14
        assert_eq!(
            describe(&json!({"param1": "value1", "param2": 2})),
            ("object", 14)
        );
    }

    #[test]
    fn test_redact_single_marked_key() {
        let config = AgentConfig::default();
        let policy = policy_with_keys(&[("responseBody.secret", "REDACT")]);
        let redactor = Redactor::new(&config, Some(&policy));

        let record = record_for(
            "http://localhost/200",
            json!({"secret": "abc", "other": "abc"}),
        );
        let kept = redactor.redact_batch(vec![record]).unwrap();
        assert_eq!(kept.len(), 1);

        let response = kept[0].response.as_ref().unwrap();
        assert_eq!(response.body, json!({"secret": null, "other": "abc"}));
        assert_eq!(
            kept[0].metadata.sensitive_keys,
            vec![SensitiveKeyMeta {
                key_path: "responseBody.secret".to_string(),
                kind: "string".to_string(),
                length: 3,
            }]
        );
    }

    #[test]
    fn test_redaction_is_deterministic() {
        let config = AgentConfig::default();
        let policy = policy_with_keys(&[("responseBody.secret", "REDACT")]);
        let redactor = Redactor::new(&config, Some(&policy));

        let body = json!({"secret": "abc", "other": "abc"});
        let first = redactor
            .redact_batch(vec![record_for("http://localhost/200", body.clone())])
            .unwrap();
        let second = redactor
            .redact_batch(vec![record_for("http://localhost/200", body)])
            .unwrap();
        assert_eq!(
            first[0].metadata.sensitive_keys,
            second[0].metadata.sensitive_keys
        );
    }

    #[test]
    fn test_array_expansion_redaction() {
        let config = AgentConfig::default();
        let policy = policy_with_keys(&[("responseBody.array[]", "REDACT")]);
        let redactor = Redactor::new(&config, Some(&policy));

        let record = record_for("http://localhost/200", json!({"array": ["", "a", "ab"]}));
        let kept = redactor.redact_batch(vec![record]).unwrap();

        let response = kept[0].response.as_ref().unwrap();
        assert_eq!(response.body, json!({"array": [null, null, null]}));

        let keys = &kept[0].metadata.sensitive_keys;
        assert_eq!(keys.len(), 3);
        for (index, key) in keys.iter().enumerate() {
            assert_eq!(key.key_path, format!("responseBody.array[{}]", index));
            assert_eq!(key.kind, "string");
            assert_eq!(key.length, index);
        }
    }

    #[test]
    fn test_nested_array_and_sub_element_redaction() {
        let config = AgentConfig::default();
        let policy = policy_with_keys(&[("responseBody.objectArray[].secret_item", "REDACT")]);
        let redactor = Redactor::new(&config, Some(&policy));

        let record = record_for(
            "http://localhost/200",
            json!({
                "objectArray": [
                    {"normal_item": "normal0", "secret_item": "secret"},
                    {"normal_item": "normal1", "secret_item": "secret2"},
                ]
            }),
        );
        let kept = redactor.redact_batch(vec![record]).unwrap();
        let body = &kept[0].response.as_ref().unwrap().body;
        assert_eq!(body["objectArray"][0]["secret_item"], Value::Null);
        assert_eq!(body["objectArray"][1]["secret_item"], Value::Null);
        assert_eq!(body["objectArray"][0]["normal_item"], "normal0");

        let keys = &kept[0].metadata.sensitive_keys;
        assert_eq!(keys[0].key_path, "responseBody.objectArray[0].secret_item");
        assert_eq!(keys[0].length, "secret".len());
        assert_eq!(keys[1].key_path, "responseBody.objectArray[1].secret_item");
        assert_eq!(keys[1].length, "secret2".len());
    }

    #[test]
    fn test_top_level_roots_redacted_whole() {
        let config = AgentConfig::default();
        let policy = policy_with_keys(&[
            ("requestBody", "REDACT"),
            ("requestHeaders", "REDACT"),
            ("responseBody", "REDACT"),
            ("responseHeaders", "REDACT"),
        ]);
        let redactor = Redactor::new(&config, Some(&policy));

        let record = record_for("http://localhost/200", json!({"string": "abc"}));
        let kept = redactor.redact_batch(vec![record]).unwrap();
        assert_eq!(kept[0].request.body, Value::Null);
        assert_eq!(kept[0].request.headers, Value::Null);
        let response = kept[0].response.as_ref().unwrap();
        assert_eq!(response.body, Value::Null);
        assert_eq!(response.headers, Value::Null);
    }

    #[test]
    fn test_force_redact_all_ignores_allow() {
        let config = AgentConfig {
            force_redact_all: true,
            ..AgentConfig::default()
        };
        let policy = policy_with_keys(&[
            ("responseBody.string", "ALLOW"),
            ("responseBody.other_string", "REDACT"),
        ]);
        let redactor = Redactor::new(&config, Some(&policy));

        let record = record_for(
            "http://localhost/200",
            json!({"string": "abc", "other_string": "123"}),
        );
        let kept = redactor.redact_batch(vec![record]).unwrap();
        let body = &kept[0].response.as_ref().unwrap().body;
        assert_eq!(body["string"], Value::Null);
        assert_eq!(body["other_string"], Value::Null);

        let response_keys: Vec<_> = kept[0]
            .metadata
            .sensitive_keys
            .iter()
            .filter(|k| k.key_path.starts_with("responseBody"))
            .collect();
        assert_eq!(response_keys.len(), 2);
        for key in response_keys {
            assert_eq!(key.kind, "string");
            assert_eq!(key.length, 3);
        }
    }

    #[test]
    fn test_redact_by_default_honors_allow() {
        let config = AgentConfig {
            redact_by_default: true,
            ..AgentConfig::default()
        };
        let policy = policy_with_keys(&[
            ("responseBody.string", "ALLOW"),
            ("responseBody.other_string", "REDACT"),
        ]);
        let redactor = Redactor::new(&config, Some(&policy));

        let record = record_for(
            "http://localhost/200",
            json!({"string": "abc", "other_string": "123"}),
        );
        let kept = redactor.redact_batch(vec![record]).unwrap();
        let body = &kept[0].response.as_ref().unwrap().body;
        assert_eq!(body["string"], "abc");
        assert_eq!(body["other_string"], Value::Null);

        let filtered: Vec<_> = kept[0]
            .metadata
            .sensitive_keys
            .iter()
            .filter(|k| k.key_path.starts_with("responseBody"))
            .collect();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].key_path, "responseBody.other_string");
        assert_eq!(filtered[0].kind, "string");
        assert_eq!(filtered[0].length, 3);
    }

    #[test]
    fn test_redact_by_default_allows_array_indexed_keys() {
        let config = AgentConfig {
            redact_by_default: true,
            ..AgentConfig::default()
        };
        let policy = policy_with_keys(&[("responseBody[].data[].string", "ALLOW")]);
        let redactor = Redactor::new(&config, Some(&policy));

        let record = record_for(
            "http://localhost/200",
            json!([
                {
                    "data": [
                        {"string": "abc", "other_string": "sensitive"},
                        {"string": "abc", "other_string": "sensitive"},
                    ]
                }
            ]),
        );
        let kept = redactor.redact_batch(vec![record]).unwrap();
        let body = &kept[0].response.as_ref().unwrap().body;
        assert_eq!(body[0]["data"][0]["string"], "abc");
        assert_eq!(body[0]["data"][1]["string"], "abc");
        assert_eq!(body[0]["data"][0]["other_string"], Value::Null);
        assert_eq!(body[0]["data"][1]["other_string"], Value::Null);

        let filtered: Vec<_> = kept[0]
            .metadata
            .sensitive_keys
            .iter()
            .filter(|k| k.key_path.starts_with("responseBody"))
            .collect();
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].key_path, "responseBody[0].data[0].other_string");
        assert_eq!(filtered[1].key_path, "responseBody[0].data[1].other_string");
        assert!(filtered.iter().all(|k| k.length == 9));
    }

    #[test]
    fn test_ignore_redaction_leaves_everything() {
        let config = AgentConfig {
            ignore_redaction: true,
            ..AgentConfig::default()
        };
        let policy = policy_with_keys(&[("responseBody.string", "REDACT")]);
        let redactor = Redactor::new(&config, Some(&policy));

        let record = record_for("http://localhost/200", json!({"string": "abc"}));
        let kept = redactor.redact_batch(vec![record]).unwrap();
        assert_eq!(kept[0].response.as_ref().unwrap().body["string"], "abc");
        assert!(kept[0].metadata.sensitive_keys.is_empty());
    }

    #[test]
    fn test_ignore_endpoint_drops_record() {
        let config = AgentConfig::default();
        let policy = ignore_policy();
        let redactor = Redactor::new(&config, Some(&policy));

        let record = record_for("http://localhost/200", json!({"string": "abc"}));
        let kept = redactor.redact_batch(vec![record]).unwrap();
        assert!(kept.is_empty());
    }

    #[test]
    fn test_response_paths_skipped_without_response() {
        let config = AgentConfig::default();
        let policy = policy_with_keys(&[("responseBody.secret", "REDACT")]);
        let redactor = Redactor::new(&config, Some(&policy));

        let mut record = record_for("http://localhost/200", json!({}));
        record.response = None;
        let kept = redactor.redact_batch(vec![record]).unwrap();
        assert_eq!(kept.len(), 1);
        assert!(kept[0].metadata.sensitive_keys.is_empty());
    }

    #[test]
    fn test_missing_terminal_key_is_skipped() {
        let config = AgentConfig::default();
        let policy = policy_with_keys(&[("responseBody.i_dont_exist", "REDACT")]);
        let redactor = Redactor::new(&config, Some(&policy));

        let record = record_for("http://localhost/200", json!({"string": "abc"}));
        let kept = redactor.redact_batch(vec![record]).unwrap();
        assert!(kept[0].metadata.sensitive_keys.is_empty());
        assert_eq!(kept[0].response.as_ref().unwrap().body["string"], "abc");
    }

    #[test]
    fn test_malformed_key_path_aborts_batch() {
        let config = AgentConfig::default();
        let policy = policy_with_keys(&[("bogusRoot.secret", "REDACT")]);
        let redactor = Redactor::new(&config, Some(&policy));

        let record = record_for("http://localhost/200", json!({"secret": "abc"}));
        let result = redactor.redact_batch(vec![record]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unmatched_record_passes_through_policy_mode() {
        let config = AgentConfig::default();
        let policy = policy_with_keys(&[("responseBody.secret", "REDACT")]);
        let redactor = Redactor::new(&config, Some(&policy));

        // Host matches no vendor: nothing redacted, empty metadata.
        let record = record_for("http://unrelated.example.com/200", json!({"secret": "abc"}));
        let kept = redactor.redact_batch(vec![record]).unwrap();
        assert_eq!(kept[0].response.as_ref().unwrap().body["secret"], "abc");
        assert!(kept[0].metadata.sensitive_keys.is_empty());
    }
}
