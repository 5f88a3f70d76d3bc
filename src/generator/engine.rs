//! Response decision engine
//!
//! Resolves a service's plugin settings into a [`GenerationRequest`] and
//! delegates to the configured [`Generator`]. Any error is returned as-is;
//! the connection handler decides to fall back.

use super::client::{GenerationRequest, Generator, HttpGenerator};
use super::provider::LlmProvider;
use crate::config::PluginConfig;
use crate::error::{Error, Result};
use crate::session::Message;
use crate::trace::Protocol;
use std::sync::Arc;

/// Decides the generated reply for a captured command
#[derive(Clone)]
pub struct ResponseEngine {
    generator: Arc<dyn Generator>,
}

impl ResponseEngine {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Produce a reply for `command` given the session's prior turns
    pub async fn respond(
        &self,
        command: &str,
        histories: Vec<Message>,
        plugin: &PluginConfig,
        protocol: Protocol,
    ) -> Result<String> {
        let provider: LlmProvider = plugin.llm_provider.parse().map_err(Error::Provider)?;

        let request = GenerationRequest {
            histories,
            command: command.to_string(),
            provider,
            model: plugin.llm_model.clone(),
            host: plugin.host.clone(),
            api_key: plugin.api_key(),
            custom_prompt: plugin.prompt.clone(),
            protocol,
        };

        self.generator.generate(request).await
    }
}

impl Default for ResponseEngine {
    fn default() -> Self {
        Self::new(Arc::new(HttpGenerator::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records requests and answers with a fixed reply
    #[derive(Default)]
    struct RecordingGenerator {
        seen: Mutex<Vec<GenerationRequest>>,
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        async fn generate(&self, request: GenerationRequest) -> Result<String> {
            self.seen.lock().unwrap().push(request);
            Ok("root".to_string())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        async fn generate(&self, _request: GenerationRequest) -> Result<String> {
            Err(Error::Generator("upstream 503".to_string()))
        }
    }

    fn plugin(provider: &str) -> PluginConfig {
        PluginConfig {
            llm_provider: provider.to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            open_ai_secret_key: "sk-test".to_string(),
            host: String::new(),
            prompt: "You are a Redis server.".to_string(),
        }
    }

    #[tokio::test]
    async fn test_respond_forwards_request() {
        let generator = Arc::new(RecordingGenerator::default());
        let engine = ResponseEngine::new(generator.clone());
        let history = vec![Message::user("PING"), Message::assistant("+PONG")];

        let reply = engine
            .respond("whoami", history.clone(), &plugin("OpenAI"), Protocol::Tcp)
            .await
            .unwrap();
        assert_eq!(reply, "root");

        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].provider, LlmProvider::OpenAi);
        assert_eq!(seen[0].histories, history);
        assert_eq!(seen[0].command, "whoami");
        assert_eq!(seen[0].api_key, "sk-test");
        assert_eq!(seen[0].custom_prompt, "You are a Redis server.");
    }

    #[tokio::test]
    async fn test_unknown_provider_is_error() {
        let generator = Arc::new(RecordingGenerator::default());
        let engine = ResponseEngine::new(generator.clone());

        let err = engine
            .respond("ls", Vec::new(), &plugin("skynet"), Protocol::Tcp)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert!(generator.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generator_error_surfaces_once() {
        let engine = ResponseEngine::new(Arc::new(FailingGenerator));
        let err = engine
            .respond("ls", Vec::new(), &plugin("ollama"), Protocol::Tcp)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Generator(_)));
    }
}
