// src/policy/mod.rs
//! Remote policy: document parsing, matching, and the atomically-swapped store

pub mod document;
pub mod matcher;

pub use document::{
    EndpointAction, EndpointConfig, KeyAction, MatchLocation, PolicyDocument, SensitiveKey,
    VendorConfig,
};
pub use matcher::match_vendor_endpoint;

use crate::errors::Result;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

/// Holder for the active policy document.
///
/// Readers take a cheap `Arc` clone; the refresher replaces the whole
/// document in one swap, so a half-updated policy is never observable.
#[derive(Default)]
pub struct PolicyStore {
    current: RwLock<Option<Arc<PolicyDocument>>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active document, if one has been installed
    pub fn load(&self) -> Option<Arc<PolicyDocument>> {
        self.current.read().clone()
    }

    /// Whether any document has ever been installed
    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    /// Atomically replace the active document
    pub fn install(&self, doc: PolicyDocument) {
        *self.current.write() = Some(Arc::new(doc));
    }

    /// Parse and install in one step. On parse failure the prior document
    /// stays active.
    pub fn install_raw(&self, raw: &Value) -> Result<()> {
        let doc = PolicyDocument::parse(raw)?;
        self.install(doc);
        Ok(())
    }
}
