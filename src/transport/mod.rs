// src/transport/mod.rs
//! Collector transport: the `Api` trait and its blocking HTTP implementation

pub mod api;

pub use api::{Api, Credentials, HttpApi};
