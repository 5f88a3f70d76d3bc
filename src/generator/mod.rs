//! Generative replies
//!
//! ```text
//! captured command ─► ResponseEngine ─► GenerationRequest ─► Generator
//!                         ▲                                     │
//!                  session history                       reply text / error
//! ```

mod client;
mod engine;
mod provider;

pub use client::{default_prompt, strip_code_fences, GenerationRequest, Generator, HttpGenerator};
pub use engine::ResponseEngine;
pub use provider::LlmProvider;
