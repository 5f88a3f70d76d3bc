//! TCP honeypot services
//!
//! One [`Listener`] per configured TCP service. All services share a single
//! [`SessionCache`] and trace sink; everything else is per connection.

mod admission;
mod handler;
mod listener;

pub use admission::{admission_policy, AdmissionPermit, AdmissionPolicy, ConnectionLimit, Unbounded};
pub use handler::{handle_connection, ServiceContext, READ_BUFFER_SIZE};
pub use listener::{Listener, ListenerHandle};

use crate::config::LagoonConfig;
use crate::error::Result;
use crate::generator::ResponseEngine;
use crate::session::SessionCache;
use crate::trace::TraceSink;
use std::sync::Arc;

/// Runs every TCP service in a configuration
pub struct Honeypot {
    config: LagoonConfig,
    sessions: Arc<SessionCache>,
    engine: ResponseEngine,
    sink: Arc<dyn TraceSink>,
}

impl Honeypot {
    /// Configuration this honeypot serves
    pub fn config(&self) -> &LagoonConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionCache> {
        &self.sessions
    }

    /// Start the session reclaimer and bind every TCP service
    ///
    /// Fails on the first service that cannot bind; listeners already
    /// started are aborted.
    pub async fn start(&self) -> Result<Vec<ListenerHandle>> {
        self.sessions.start_reclaimer(
            self.config.history.sweep_interval(),
            self.config.history.max_idle(),
        );

        for service in self.config.services.iter().filter(|s| !s.is_tcp()) {
            tracing::warn!(
                protocol = %service.protocol,
                address = %service.address,
                "Unsupported protocol, service skipped"
            );
        }

        let mut handles = Vec::new();
        for service in self.config.tcp_services() {
            let ctx = Arc::new(ServiceContext::new(
                service.clone(),
                self.sessions.clone(),
                self.engine.clone(),
                self.sink.clone(),
            ));
            let admission = admission_policy(self.config.admission.max_connections);

            match Listener::new(ctx, admission).bind().await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    tracing::error!("Error during init TCP service: {}", e);
                    for handle in &handles {
                        handle.abort();
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(services = handles.len(), "Honeypot started");
        Ok(handles)
    }
}

/// Builder for [`Honeypot`]
pub struct HoneypotBuilder {
    config: LagoonConfig,
    sessions: Option<Arc<SessionCache>>,
    engine: Option<ResponseEngine>,
    sink: Option<Arc<dyn TraceSink>>,
}

impl HoneypotBuilder {
    /// Create a new builder with default config
    pub fn new() -> Self {
        Self {
            config: LagoonConfig::default(),
            sessions: None,
            engine: None,
            sink: None,
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: LagoonConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a private session cache instead of the process-wide one
    pub fn sessions(mut self, sessions: Arc<SessionCache>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Set the response engine (defaults to the HTTP generator)
    pub fn engine(mut self, engine: ResponseEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the trace sink
    pub fn sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the honeypot; a sink is required
    pub fn build(self) -> Result<Honeypot> {
        let sink = self
            .sink
            .ok_or_else(|| crate::error::Error::Config("Trace sink not set".to_string()))?;
        self.config.validate()?;

        Ok(Honeypot {
            config: self.config,
            sessions: self.sessions.unwrap_or_else(SessionCache::global),
            engine: self.engine.unwrap_or_default(),
            sink,
        })
    }
}

impl Default for HoneypotBuilder {
    fn default() -> Self {
        Self::new()
    }
}
