//! Interaction records
//!
//! Every handled connection produces exactly one [`TraceEvent`], delivered to
//! a [`TraceSink`].

mod event;
mod sink;

pub use event::{Protocol, Status, TraceEvent, LLM_HANDLER_NAME};
pub use sink::{MemorySink, TraceOutput, TraceSink, Tracer};
