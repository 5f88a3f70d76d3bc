//! Lagoon - TCP deception service core
//!
//! Lagoon impersonates TCP services to adversarial clients. Each connection
//! gets a fake banner, its first chunk of input is captured, and an optional
//! LLM produces a plausible reply that remembers what the same peer asked
//! before. Every connection leaves exactly one trace record behind.
//!
//! ## Architecture
//!
//! ```text
//!   attacker ──TCP──► Listener ──spawn──► Connection handler
//!                                              │
//!                         ┌────────────────────┼───────────────────┐
//!                         ▼                    ▼                   ▼
//!                   SessionCache ◄──► ResponseEngine ──► Generator (LLM)
//!                   (history by                                    │
//!                    protocol+IP)                                  │
//!                                              │◄──────────────────┘
//!                                              ▼
//!                                     TraceSink (one event)
//! ```
//!
//! ## Modules
//!
//! - [`honeypot`]: listeners, admission policy and the per-connection handler
//! - [`session`]: conversation memory with idle eviction
//! - [`generator`]: provider resolution and the HTTP chat client
//! - [`trace`]: trace event record and sinks
//! - [`config`]: configuration management

pub mod config;
pub mod error;
pub mod generator;
pub mod honeypot;
pub mod session;
pub mod trace;

pub use config::LagoonConfig;
pub use error::{Error, Result};
