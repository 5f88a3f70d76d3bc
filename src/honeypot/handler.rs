//! Per-connection exchange
//!
//! banner → one read → (generator | fallback) → exactly one trace event → close.
//! Every I/O step and the generator call share one deadline; a step that
//! runs past it counts as failed and the flow continues with the fallback.
//! A generator still running at the deadline is cancelled and handled like
//! any other generator fault: no history is recorded and the fallback event
//! is emitted.

use crate::config::ServiceConfig;
use crate::generator::ResponseEngine;
use crate::session::{session_key, Message, SessionCache};
use crate::trace::{Protocol, TraceEvent, TraceSink, LLM_HANDLER_NAME};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};

/// Maximum bytes captured from the peer
pub const READ_BUFFER_SIZE: usize = 1024;

const FALLBACK_MSG: &str = "New TCP attempt";
const LLM_MSG: &str = "New TCP attempt (LLM)";

/// Everything a connection task needs for one service
pub struct ServiceContext {
    pub service: ServiceConfig,
    pub sessions: Arc<SessionCache>,
    pub engine: ResponseEngine,
    pub sink: Arc<dyn TraceSink>,
    deadline: Duration,
}

impl ServiceContext {
    pub fn new(
        service: ServiceConfig,
        sessions: Arc<SessionCache>,
        engine: ResponseEngine,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        let deadline = service.deadline();
        Self {
            service,
            sessions,
            engine,
            sink,
            deadline,
        }
    }

    /// Override the per-connection lifetime
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

/// Run the exchange for one accepted connection
pub async fn handle_connection<S>(mut stream: S, peer: SocketAddr, ctx: Arc<ServiceContext>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let deadline = Instant::now() + ctx.deadline;
    let protocol = Protocol::Tcp;

    let banner = format!("{}\n", ctx.service.banner);
    write_bounded(&mut stream, banner.as_bytes(), deadline, peer).await;

    let command = read_command(&mut stream, deadline, peer).await;

    if let Some(plugin) = ctx.service.generator() {
        let key = session_key(protocol.tag(), &peer.ip().to_string());
        let histories = ctx.sessions.get(&key).await;

        match timeout_at(
            deadline,
            ctx.engine.respond(&command, histories, plugin, protocol),
        )
        .await
        {
            Ok(Ok(reply)) => {
                write_bounded(&mut stream, reply.as_bytes(), deadline, peer).await;

                ctx.sessions
                    .append(
                        &key,
                        [Message::user(command.clone()), Message::assistant(reply.clone())],
                    )
                    .await;

                ctx.sink.trace_event(
                    TraceEvent::stateless(LLM_MSG, protocol, peer, command, &ctx.service.description)
                        .with_output(reply, LLM_HANDLER_NAME),
                );
                close(&mut stream, deadline).await;
                return;
            }
            Ok(Err(e)) => {
                tracing::error!(
                    peer = %peer,
                    command = %command,
                    "Generator failed, falling back to default behavior: {}",
                    e
                );
            }
            Err(_) => {
                tracing::error!(
                    peer = %peer,
                    command = %command,
                    "Generator exceeded connection deadline, falling back to default behavior"
                );
            }
        }
    }

    ctx.sink.trace_event(TraceEvent::stateless(
        FALLBACK_MSG,
        protocol,
        peer,
        command,
        &ctx.service.description,
    ));
    close(&mut stream, deadline).await;
}

async fn write_bounded<S>(stream: &mut S, bytes: &[u8], deadline: Instant, peer: SocketAddr)
where
    S: AsyncWrite + Unpin,
{
    match timeout_at(deadline, stream.write_all(bytes)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(peer = %peer, "Write failed: {}", e),
        Err(_) => tracing::debug!(peer = %peer, "Write hit connection deadline"),
    }
}

/// One read of up to [`READ_BUFFER_SIZE`] bytes; empty on error, EOF or deadline
async fn read_command<S>(stream: &mut S, deadline: Instant, peer: SocketAddr) -> String
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];
    match timeout_at(deadline, stream.read(&mut buf)).await {
        Ok(Ok(n)) => String::from_utf8_lossy(&buf[..n]).into_owned(),
        Ok(Err(e)) => {
            tracing::debug!(peer = %peer, "Read failed: {}", e);
            String::new()
        }
        Err(_) => {
            tracing::debug!(peer = %peer, "Read hit connection deadline");
            String::new()
        }
    }
}

async fn close<S>(stream: &mut S, deadline: Instant)
where
    S: AsyncWrite + Unpin,
{
    let _ = timeout_at(deadline, stream.shutdown()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginConfig;
    use crate::error::{Error, Result};
    use crate::generator::{GenerationRequest, Generator};
    use crate::trace::{MemorySink, Status};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::io::duplex;

    /// Answers with a fixed reply and records the history it was given
    struct StaticGenerator {
        reply: String,
        seen_histories: Mutex<Vec<Vec<Message>>>,
    }

    impl StaticGenerator {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                seen_histories: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Generator for StaticGenerator {
        async fn generate(&self, request: GenerationRequest) -> Result<String> {
            self.seen_histories.lock().unwrap().push(request.histories);
            Ok(self.reply.clone())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        async fn generate(&self, _request: GenerationRequest) -> Result<String> {
            Err(Error::Generator("connection refused".to_string()))
        }
    }

    /// Never answers
    struct StalledGenerator;

    #[async_trait]
    impl Generator for StalledGenerator {
        async fn generate(&self, _request: GenerationRequest) -> Result<String> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn peer() -> SocketAddr {
        "203.0.113.7:51000".parse().unwrap()
    }

    fn service(with_plugin: bool) -> ServiceConfig {
        let mut service = ServiceConfig::tcp("127.0.0.1:0", "SSH-2.0-OpenSSH_8.9p1");
        service.description = "fake sshd".to_string();
        if with_plugin {
            service.plugin = Some(PluginConfig {
                llm_provider: "openai".to_string(),
                llm_model: "gpt-4o-mini".to_string(),
                open_ai_secret_key: "sk-test".to_string(),
                ..Default::default()
            });
        }
        service
    }

    fn context(
        service: ServiceConfig,
        generator: Arc<dyn Generator>,
    ) -> (Arc<ServiceContext>, Arc<SessionCache>, Arc<MemorySink>) {
        let sessions = Arc::new(SessionCache::new());
        let sink = Arc::new(MemorySink::new());
        let ctx = ServiceContext::new(
            service,
            sessions.clone(),
            ResponseEngine::new(generator),
            sink.clone(),
        )
        .with_deadline(Duration::from_millis(300));
        (Arc::new(ctx), sessions, sink)
    }

    /// Send `input`, run the handler, return everything the peer saw
    async fn exchange(ctx: Arc<ServiceContext>, input: &[u8]) -> String {
        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(handle_connection(server, peer(), ctx));

        client.write_all(input).await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        task.await.unwrap();
        String::from_utf8_lossy(&received).into_owned()
    }

    #[tokio::test]
    async fn test_fallback_without_generator() {
        let (ctx, sessions, sink) = context(service(false), Arc::new(FailingGenerator));
        let received = exchange(ctx, b"ls -la").await;

        assert_eq!(received, "SSH-2.0-OpenSSH_8.9p1\n");
        let events = sink.events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.msg, FALLBACK_MSG);
        assert_eq!(event.command, "ls -la");
        assert!(event.command_output.is_empty());
        assert!(event.handler.is_none());
        assert_eq!(event.status, Status::Stateless);
        assert_eq!(event.protocol, Protocol::Tcp);
        assert_eq!(event.source_ip, "203.0.113.7");
        assert_eq!(event.source_port, "51000");
        assert_eq!(event.remote_addr, "203.0.113.7:51000");
        assert_eq!(event.description, "fake sshd");
        assert!(sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_generator_success_records_history() {
        let generator = Arc::new(StaticGenerator::new("root"));
        let (ctx, sessions, sink) = context(service(true), generator.clone());
        let received = exchange(ctx, b"whoami").await;

        assert_eq!(received, "SSH-2.0-OpenSSH_8.9p1\nroot");
        assert_eq!(
            sessions.get("TCP203.0.113.7").await,
            vec![Message::user("whoami"), Message::assistant("root")]
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].msg, LLM_MSG);
        assert_eq!(events[0].command, "whoami");
        assert_eq!(events[0].command_output, "root");
        assert_eq!(events[0].handler.as_deref(), Some(LLM_HANDLER_NAME));
        assert_eq!(generator.seen_histories.lock().unwrap()[0], Vec::<Message>::new());
    }

    #[tokio::test]
    async fn test_generator_sees_prior_history() {
        let generator = Arc::new(StaticGenerator::new("uid=0(root)"));
        let (ctx, sessions, sink) = context(service(true), generator.clone());
        sessions
            .append(
                "TCP203.0.113.7",
                [Message::user("whoami"), Message::assistant("root")],
            )
            .await;

        exchange(ctx, b"id").await;

        let seen = generator.seen_histories.lock().unwrap()[0].clone();
        assert_eq!(seen, vec![Message::user("whoami"), Message::assistant("root")]);
        assert_eq!(
            sessions.get("TCP203.0.113.7").await,
            vec![
                Message::user("whoami"),
                Message::assistant("root"),
                Message::user("id"),
                Message::assistant("uid=0(root)"),
            ]
        );
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_generator_failure_looks_like_fallback() {
        let (ctx, sessions, sink) = context(service(true), Arc::new(FailingGenerator));
        let received = exchange(ctx, b"cat /etc/passwd").await;

        assert_eq!(received, "SSH-2.0-OpenSSH_8.9p1\n");
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].msg, FALLBACK_MSG);
        assert_eq!(events[0].command, "cat /etc/passwd");
        assert!(events[0].command_output.is_empty());
        assert!(events[0].handler.is_none());
        assert!(sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_provider_falls_back() {
        let mut svc = service(true);
        if let Some(plugin) = svc.plugin.as_mut() {
            plugin.llm_provider = "skynet".to_string();
        }
        let (ctx, sessions, sink) = context(svc, Arc::new(StaticGenerator::new("root")));
        let received = exchange(ctx, b"whoami").await;

        assert_eq!(received, "SSH-2.0-OpenSSH_8.9p1\n");
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0].msg, FALLBACK_MSG);
        assert!(sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_stalled_generator_bounded_by_deadline() {
        let (ctx, sessions, sink) = context(service(true), Arc::new(StalledGenerator));
        let received = exchange(ctx, b"uname -a").await;

        assert_eq!(received, "SSH-2.0-OpenSSH_8.9p1\n");
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0].command, "uname -a");
        assert_eq!(sink.events()[0].msg, FALLBACK_MSG);
        assert!(sink.events()[0].handler.is_none());
        assert!(sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_read_timeout_yields_empty_command() {
        let (ctx, _sessions, sink) = context(service(false), Arc::new(FailingGenerator));

        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(handle_connection(server, peer(), ctx));

        // Send nothing; keep the pipe open until the handler gives up
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        task.await.unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].command, "");
    }

    #[tokio::test]
    async fn test_empty_read_yields_empty_command() {
        let (ctx, _sessions, sink) = context(service(false), Arc::new(FailingGenerator));

        let (client, server) = duplex(4096);
        let task = tokio::spawn(handle_connection(server, peer(), ctx));
        drop(client);
        task.await.unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0].command, "");
    }

    #[tokio::test]
    async fn test_read_is_capped_at_buffer_size() {
        let (ctx, _sessions, sink) = context(service(false), Arc::new(FailingGenerator));
        let input = vec![b'A'; READ_BUFFER_SIZE * 2];
        exchange(ctx, &input).await;

        assert_eq!(sink.events()[0].command.len(), READ_BUFFER_SIZE);
    }
}
