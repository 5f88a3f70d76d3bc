//! Trace event record
//!
//! One record per handled connection. Keys are PascalCase with `ID` for the
//! identifier, the shape downstream log extractors read.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Handler tag attached to generator-produced events
pub const LLM_HANDLER_NAME: &str = "LLMHoneypot";

/// Protocol of the impersonated service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "SSH")]
    Ssh,
    #[serde(rename = "HTTP")]
    Http,
}

impl Protocol {
    /// Tag used in trace events and as session key prefix
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Ssh => "SSH",
            Self::Http => "HTTP",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Interaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Single-shot exchange with no session on the wire
    Stateless,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stateless => write!(f, "Stateless"),
        }
    }
}

/// A single observability record; never mutated after emission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TraceEvent {
    pub msg: String,
    pub protocol: Protocol,
    pub command: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command_output: String,
    pub status: Status,
    pub remote_addr: String,
    pub source_ip: String,
    pub source_port: String,
    #[serde(rename = "ID")]
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    pub date_time: String,
}

impl TraceEvent {
    /// Start a stateless event for `peer` with a fresh id and timestamp
    pub fn stateless(
        msg: impl Into<String>,
        protocol: Protocol,
        peer: SocketAddr,
        command: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            msg: msg.into(),
            protocol,
            command: command.into(),
            command_output: String::new(),
            status: Status::Stateless,
            remote_addr: peer.to_string(),
            source_ip: peer.ip().to_string(),
            source_port: peer.port().to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            handler: None,
            date_time: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Attach generator output and the handler that produced it
    pub fn with_output(mut self, output: impl Into<String>, handler: impl Into<String>) -> Self {
        self.command_output = output.into();
        self.handler = Some(handler.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "10.0.0.5:40123".parse().unwrap()
    }

    #[test]
    fn test_stateless_event_fields() {
        let event = TraceEvent::stateless("New TCP attempt", Protocol::Tcp, peer(), "ls -la", "MySQL");
        assert_eq!(event.source_ip, "10.0.0.5");
        assert_eq!(event.source_port, "40123");
        assert_eq!(event.remote_addr, "10.0.0.5:40123");
        assert_eq!(event.status, Status::Stateless);
        assert!(event.command_output.is_empty());
        assert!(event.handler.is_none());
        assert!(uuid::Uuid::parse_str(&event.id).is_ok());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = TraceEvent::stateless("m", Protocol::Tcp, peer(), "", "");
        let b = TraceEvent::stateless("m", Protocol::Tcp, peer(), "", "");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_serialized_keys() {
        let event = TraceEvent::stateless("New TCP attempt (LLM)", Protocol::Tcp, peer(), "whoami", "d")
            .with_output("root", LLM_HANDLER_NAME);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["Protocol"], "TCP");
        assert_eq!(json["Status"], "Stateless");
        assert_eq!(json["Command"], "whoami");
        assert_eq!(json["CommandOutput"], "root");
        assert_eq!(json["SourceIp"], "10.0.0.5");
        assert_eq!(json["Handler"], "LLMHoneypot");
        assert!(json["ID"].is_string());
        assert!(json["DateTime"].is_string());
    }

    #[test]
    fn test_fallback_omits_output_and_handler() {
        let event = TraceEvent::stateless("New TCP attempt", Protocol::Tcp, peer(), "x", "d");
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("CommandOutput").is_none());
        assert!(json.get("Handler").is_none());
    }
}
