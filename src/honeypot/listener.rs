//! TCP accept loop

use super::admission::AdmissionPolicy;
use super::handler::{handle_connection, ServiceContext};
use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Pause after a failed accept so fd exhaustion does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Binds one service address and serves it until aborted
pub struct Listener {
    ctx: Arc<ServiceContext>,
    admission: Arc<dyn AdmissionPolicy>,
}

/// A running accept loop
#[derive(Debug)]
pub struct ListenerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting; in-flight connections keep running
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Listener {
    pub fn new(ctx: Arc<ServiceContext>, admission: Arc<dyn AdmissionPolicy>) -> Self {
        Self { ctx, admission }
    }

    /// Bind the service address and spawn the accept loop
    ///
    /// A bind failure is returned and nothing is spawned.
    pub async fn bind(self) -> Result<ListenerHandle> {
        let address = self.ctx.service.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| Error::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            address = %local_addr,
            banner = %self.ctx.service.banner,
            generator = self.ctx.service.generator().is_some(),
            "Init service tcp"
        );

        let task = tokio::spawn(accept_loop(listener, self.ctx, self.admission));
        Ok(ListenerHandle { local_addr, task })
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ServiceContext>,
    admission: Arc<dyn AdmissionPolicy>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let permit = admission.admit().await;
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    handle_connection(stream, peer, ctx).await;
                });
            }
            Err(e) => {
                tracing::warn!("Accept error: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}
