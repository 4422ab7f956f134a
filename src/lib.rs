// src/lib.rs
//! In-process traffic capture agent
//!
//! Hooks into HTTP client libraries via [`Adapter`]s, correlates the
//! request and response halves of each outbound call, redacts sensitive
//! fields according to a remotely managed policy, and ships batched
//! records to a collector.
//!
//! ```no_run
//! use wiretap_agent::{Agent, AgentConfig, Credentials};
//!
//! let agent = Agent::initialize(
//!     Credentials::new("client-id", "client-secret"),
//!     "https://collector.example.com",
//!     AgentConfig::default(),
//! )?;
//!
//! // adapters report traffic through agent.handle() ...
//!
//! agent.close();
//! # Ok::<(), wiretap_agent::AgentError>(())
//! ```

pub mod agent;
pub mod capture;
pub mod config;
pub mod errors;
pub mod policy;
pub mod redact;
pub mod transport;
pub mod worker;

pub use agent::{Agent, TagGuard};
pub use capture::{Adapter, CaptureHandle, Record, RecordMetadata, RequestLog, ResponseLog};
pub use config::AgentConfig;
pub use errors::{AgentError, Result};
pub use policy::{EndpointAction, KeyAction, MatchLocation, PolicyDocument};
pub use transport::{Api, Credentials, HttpApi};

/// Agent version reported to the collector
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
