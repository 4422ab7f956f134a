// src/agent/tags.rs
//! Thread-local tag layers
//!
//! Callers push a layer of tags for the duration of a scope; every request
//! captured on that thread while the layer is live carries the merged tags.
//! Layers nest, with inner layers overriding outer ones key by key, and pop
//! strictly LIFO when their guard drops.

use serde_json::{Map, Value};
use std::cell::RefCell;
use std::marker::PhantomData;

thread_local! {
    static TAG_STACK: RefCell<Vec<Map<String, Value>>> = const { RefCell::new(Vec::new()) };
}

/// Pops its tag layer on drop. Not `Send`: a layer belongs to the thread
/// that pushed it.
#[must_use = "the tag layer is popped when this guard drops"]
pub struct TagGuard {
    _not_send: PhantomData<*const ()>,
}

/// Push a tag layer onto the current thread's stack
pub fn push_layer(tags: Map<String, Value>) -> TagGuard {
    TAG_STACK.with(|stack| stack.borrow_mut().push(tags));
    TagGuard {
        _not_send: PhantomData,
    }
}

impl Drop for TagGuard {
    fn drop(&mut self) {
        TAG_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Merge the live layers, later layers overriding earlier ones. `None`
/// when no layer is active.
pub fn merged() -> Option<Map<String, Value>> {
    TAG_STACK.with(|stack| {
        let stack = stack.borrow();
        if stack.is_empty() {
            return None;
        }
        let mut out = Map::new();
        for layer in stack.iter() {
            for (key, value) in layer {
                out.insert(key.clone(), value.clone());
            }
        }
        Some(out)
    })
}
