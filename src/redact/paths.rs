// src/redact/paths.rs
//! Sensitive key-path parsing and array expansion
//!
//! A key path is a dotted sequence of segments rooted at one of the four
//! record fields (`requestBody`, `requestHeaders`, `responseBody`,
//! `responseHeaders`). A segment ending in `[]` means "for every element of
//! the array at this path"; expansion enumerates the live document, so a
//! path like `responseBody.outerArray[].innerArray[]` fans out into one
//! concrete path per actual element. Branches that point at nothing are
//! dropped silently, never treated as errors.

use crate::errors::{AgentError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fmt::Write as _;

/// The four redactable roots of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootField {
    RequestBody,
    RequestHeaders,
    ResponseBody,
    ResponseHeaders,
}

impl RootField {
    pub const ALL: [RootField; 4] = [
        RootField::RequestBody,
        RootField::RequestHeaders,
        RootField::ResponseBody,
        RootField::ResponseHeaders,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RootField::RequestBody => "requestBody",
            RootField::RequestHeaders => "requestHeaders",
            RootField::ResponseBody => "responseBody",
            RootField::ResponseHeaders => "responseHeaders",
        }
    }

    fn from_name(name: &str) -> Option<RootField> {
        match name {
            "requestBody" => Some(RootField::RequestBody),
            "requestHeaders" => Some(RootField::RequestHeaders),
            "responseBody" => Some(RootField::ResponseBody),
            "responseHeaders" => Some(RootField::ResponseHeaders),
            _ => None,
        }
    }
}

/// One dotted segment, optionally expanding an array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub key: String,
    pub each: bool,
}

/// A parsed sensitive key path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    pub root: RootField,
    pub root_each: bool,
    pub segments: Vec<Segment>,
}

/// One step of a concrete (fully indexed) path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    Key(String),
    Index(usize),
}

pub type ConcretePath = Vec<Step>;

static SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^.\[\]]+)(\[\])?$").expect("segment pattern is valid"));

fn parse_segment(part: &str) -> Result<(String, bool)> {
    let captures = SEGMENT_RE.captures(part).ok_or_else(|| {
        AgentError::Redaction(format!("malformed key path segment: {:?}", part))
    })?;
    let key = captures[1].to_string();
    let each = captures.get(2).is_some();
    Ok((key, each))
}

/// Parse a dotted key path string into a [`KeyPath`]
pub fn parse_key_path(path: &str) -> Result<KeyPath> {
    let mut parts = path.split('.');
    let root_part = parts.next().unwrap_or_default();
    let (root_name, root_each) = parse_segment(root_part)?;
    let root = RootField::from_name(&root_name).ok_or_else(|| {
        AgentError::Redaction(format!("unrecognized key path root: {:?}", root_name))
    })?;

    let mut segments = Vec::new();
    for part in parts {
        let (key, each) = parse_segment(part)?;
        segments.push(Segment { key, each });
    }

    Ok(KeyPath {
        root,
        root_each,
        segments,
    })
}

/// Navigate a value by a concrete path
pub fn get<'a>(mut value: &'a Value, path: &[Step]) -> Option<&'a Value> {
    for step in path {
        value = match (value, step) {
            (Value::Object(map), Step::Key(key)) => map.get(key)?,
            (Value::Array(items), Step::Index(index)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(value)
}

/// Navigate a value mutably by a concrete path
pub fn get_mut<'a>(mut value: &'a mut Value, path: &[Step]) -> Option<&'a mut Value> {
    for step in path {
        value = match (value, step) {
            (Value::Object(map), Step::Key(key)) => map.get_mut(key)?,
            (Value::Array(items), Step::Index(index)) => items.get_mut(*index)?,
            _ => return None,
        };
    }
    Some(value)
}

/// Expand a key path against a live root value into the set of concrete
/// paths it names. `[]` segments enumerate the actual array; missing
/// branches are dropped.
pub fn expand(root: &Value, path: &KeyPath) -> Vec<ConcretePath> {
    let mut paths: Vec<ConcretePath> = Vec::new();
    if path.root_each {
        if let Value::Array(items) = root {
            for index in 0..items.len() {
                paths.push(vec![Step::Index(index)]);
            }
        }
    } else {
        paths.push(Vec::new());
    }

    for segment in &path.segments {
        let mut next = Vec::new();
        for concrete in paths {
            let mut extended = concrete;
            extended.push(Step::Key(segment.key.clone()));
            if segment.each {
                if let Some(Value::Array(items)) = get(root, &extended) {
                    for index in 0..items.len() {
                        let mut element = extended.clone();
                        element.push(Step::Index(index));
                        next.push(element);
                    }
                }
            } else {
                next.push(extended);
            }
        }
        paths = next;
    }

    paths
}

/// Render a concrete path back into its dotted/indexed string form
pub fn render(root: RootField, path: &[Step]) -> String {
    let mut out = root.name().to_string();
    for step in path {
        match step {
            Step::Key(key) => {
                let _ = write!(out, ".{}", key);
            }
            Step::Index(index) => {
                let _ = write!(out, "[{}]", index);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_simple_path() {
        let path = parse_key_path("responseBody.secret").unwrap();
        assert_eq!(path.root, RootField::ResponseBody);
        assert!(!path.root_each);
        assert_eq!(
            path.segments,
            vec![Segment {
                key: "secret".to_string(),
                each: false
            }]
        );
    }

    #[test]
    fn test_parse_root_only_path() {
        let path = parse_key_path("requestHeaders").unwrap();
        assert_eq!(path.root, RootField::RequestHeaders);
        assert!(path.segments.is_empty());
    }

    #[test]
    fn test_parse_array_segments() {
        let path = parse_key_path("responseBody.outerArray[].innerArray[]").unwrap();
        assert_eq!(path.segments.len(), 2);
        assert!(path.segments[0].each);
        assert!(path.segments[1].each);

        let rooted = parse_key_path("responseBody[].data[].string").unwrap();
        assert!(rooted.root_each);
        assert_eq!(rooted.segments.len(), 2);
        assert!(rooted.segments[0].each);
        assert!(!rooted.segments[1].each);
    }

    #[test]
    fn test_parse_rejects_unknown_root_and_garbage() {
        assert!(parse_key_path("body.secret").is_err());
        assert!(parse_key_path("responseBody..secret").is_err());
        assert!(parse_key_path("responseBody.[]").is_err());
    }

    #[test]
    fn test_expand_flat_array() {
        let root = json!({"array": ["", "a", "ab"]});
        let path = parse_key_path("responseBody.array[]").unwrap();
        let expanded = expand(&root, &path);
        assert_eq!(expanded.len(), 3);
        assert_eq!(
            render(RootField::ResponseBody, &expanded[2]),
            "responseBody.array[2]"
        );
    }

    #[test]
    fn test_expand_nested_arrays() {
        let root = json!({
            "outerArray": [
                {"innerArray": ["a"]},
                {"innerArray": ["ab", "cd"]},
            ]
        });
        let path = parse_key_path("responseBody.outerArray[].innerArray[]").unwrap();
        let expanded = expand(&root, &path);
        let rendered: Vec<String> = expanded
            .iter()
            .map(|p| render(RootField::ResponseBody, p))
            .collect();
        assert_eq!(
            rendered,
            vec![
                "responseBody.outerArray[0].innerArray[0]",
                "responseBody.outerArray[1].innerArray[0]",
                "responseBody.outerArray[1].innerArray[1]",
            ]
        );
    }

    #[test]
    fn test_expand_top_level_array_root() {
        let root = json!([{"data": [{"x": 1}, {"x": 2}]}]);
        let path = parse_key_path("responseBody[].data[].x").unwrap();
        let expanded = expand(&root, &path);
        let rendered: Vec<String> = expanded
            .iter()
            .map(|p| render(RootField::ResponseBody, p))
            .collect();
        assert_eq!(
            rendered,
            vec!["responseBody[0].data[0].x", "responseBody[0].data[1].x"]
        );
    }

    #[test]
    fn test_expand_missing_array_drops_branch() {
        let root = json!({"other": 1});
        let path = parse_key_path("responseBody.array[]").unwrap();
        assert!(expand(&root, &path).is_empty());

        // Non-array root with a root expansion is dropped too.
        let path = parse_key_path("responseBody[].x").unwrap();
        assert!(expand(&root, &path).is_empty());
    }

    #[test]
    fn test_get_mut_follows_indices() {
        let mut root = json!({"a": [{"b": 1}]});
        let steps = vec![
            Step::Key("a".to_string()),
            Step::Index(0),
            Step::Key("b".to_string()),
        ];
        *get_mut(&mut root, &steps).unwrap() = Value::Null;
        assert_eq!(root, json!({"a": [{"b": null}]}));
    }
}
