// src/redact/mod.rs
//! Redaction: key-path expansion and in-place batch redaction

pub mod engine;
pub mod paths;

pub use engine::Redactor;
pub use paths::{parse_key_path, KeyPath, RootField};
