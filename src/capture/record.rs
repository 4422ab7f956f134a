// src/capture/record.rs
//! Record model: the unit of export
//!
//! A `PendingRequest` is created when an outbound call begins and owned by
//! the correlator until its response arrives, at which point it is promoted
//! to a `Record`. Records are immutable once redaction completes and are
//! consumed exactly once by the collector sink.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Request half of a record
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLog {
    pub id: String,
    pub method: String,
    pub url: String,
    pub path: String,
    pub search: String,
    pub body: Value,
    pub headers: Value,
    pub requested_at: DateTime<Utc>,
}

/// Response half of a record
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseLog {
    pub body: Value,
    pub headers: Value,
    pub status: u16,
    pub status_text: Option<String>,
    pub responded_at: DateTime<Utc>,
}

/// Redaction metadata describing one redacted leaf: the key path it lived
/// at and the shape of the value that was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitiveKeyMeta {
    pub key_path: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub length: usize,
}

/// Caller- and policy-supplied annotations attached to a record
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Map<String, Value>>,
    pub sensitive_keys: Vec<SensitiveKeyMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<String>,
}

/// The paired request/response/metadata unit exported to the collector.
/// `response` is absent only for unpaired requests drained by a forced
/// flush at shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub request: RequestLog,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseLog>,
    pub metadata: RecordMetadata,
}

/// An in-flight request awaiting its response
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request: RequestLog,
    pub metadata: RecordMetadata,
}

impl PendingRequest {
    /// Promote to a record by pairing with a response
    pub fn into_record(self, response: ResponseLog) -> Record {
        Record {
            request: self.request,
            response: Some(response),
            metadata: self.metadata,
        }
    }

    /// Promote to a request-only record (forced flush of an unpaired call)
    pub fn into_unpaired_record(self) -> Record {
        Record {
            request: self.request,
            response: None,
            metadata: self.metadata,
        }
    }
}

/// Convert an adapter-supplied header map into a JSON object so redaction
/// walks a single value type.
pub fn headers_to_value(headers: &HashMap<String, String>) -> Value {
    let map: Map<String, Value> = headers
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(map)
}

/// Best-effort body decoding: bytes -> JSON value, falling back to a string,
/// falling back to null for undecodable input.
pub fn parse_body(body: Option<&[u8]>) -> Value {
    let Some(bytes) = body else {
        return Value::Null;
    };
    if bytes.is_empty() {
        return Value::Null;
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => Value::String(text.to_string()),
        },
        Err(_) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}
