//! Generator trait and the HTTP chat-completion client

use super::provider::LlmProvider;
use crate::error::{Error, Result};
use crate::session::Message;
use crate::trace::Protocol;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

const TCP_PROMPT: &str = "You will act as a network service listening on a raw TCP port. \
The client will send raw protocol input, and you are to reply with exactly what the service \
would send back on the wire. Do not provide notes or explanations. Your entire response is \
the raw reply, using \\n for new lines, and you will NOT wrap it in markdown code markers.";

const SSH_PROMPT: &str = "You will act as an Ubuntu Linux terminal. The user will type \
commands, and you are to reply with what the terminal should show. Do not provide notes or \
explanations, and do not type commands unless explicitly instructed by the user. Your entire \
response is plain text using \\n for new lines, and you will NOT wrap it in markdown code markers.";

const HTTP_PROMPT: &str = "You will act as an unsecure HTTP server with multiple \
vulnerabilities, such as cloud and git credentials stored in the web root. The user will send \
HTTP requests, and you are to reply with what the server should return. Do not provide \
explanations or type commands unless explicitly instructed by the user.";

static CODE_FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```( *)?([a-z]*)?(\n)?").unwrap());

/// Everything a generator needs for one invocation
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Prior turns for this session, oldest first
    pub histories: Vec<Message>,
    /// Newly captured attacker input
    pub command: String,
    pub provider: LlmProvider,
    pub model: String,
    /// Endpoint override; empty selects the provider default
    pub host: String,
    pub api_key: String,
    /// System prompt override; empty selects the protocol default
    pub custom_prompt: String,
    pub protocol: Protocol,
}

impl GenerationRequest {
    /// Chat messages sent upstream: system prompt, history, new command
    pub fn build_messages(&self) -> Vec<Message> {
        let system = if self.custom_prompt.trim().is_empty() {
            default_prompt(self.protocol).to_string()
        } else {
            self.custom_prompt.clone()
        };

        let mut messages = Vec::with_capacity(self.histories.len() + 2);
        messages.push(Message::system(system));
        messages.extend(self.histories.iter().cloned());
        messages.push(Message::user(self.command.clone()));
        messages
    }

    /// Endpoint URL for this request
    pub fn endpoint(&self) -> &str {
        if self.host.trim().is_empty() {
            self.provider.default_endpoint()
        } else {
            self.host.trim()
        }
    }
}

/// Built-in system prompt per impersonated protocol
pub fn default_prompt(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Tcp => TCP_PROMPT,
        Protocol::Ssh => SSH_PROMPT,
        Protocol::Http => HTTP_PROMPT,
    }
}

/// Remove markdown code fences the model wraps replies in
pub fn strip_code_fences(text: &str) -> String {
    CODE_FENCE_RE.replace_all(text, "").into_owned()
}

/// Produces attacker-facing reply text
#[async_trait]
pub trait Generator: Send + Sync {
    /// Run one completion; no retries
    async fn generate(&self, request: GenerationRequest) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: ReplyMessage,
}

/// Generator backed by OpenAI-compatible or Ollama chat endpoints
#[derive(Debug, Clone, Default)]
pub struct HttpGenerator {
    client: reqwest::Client,
}

impl HttpGenerator {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn request_body(request: &GenerationRequest) -> serde_json::Value {
        let messages = request.build_messages();
        match request.provider {
            LlmProvider::OpenAi => serde_json::json!({
                "model": request.model,
                "messages": messages,
            }),
            LlmProvider::Ollama => serde_json::json!({
                "model": request.model,
                "messages": messages,
                "stream": false,
            }),
        }
    }

    fn parse_reply(provider: LlmProvider, body: &str) -> Result<String> {
        let content = match provider {
            LlmProvider::OpenAi => {
                let response: OpenAiResponse = serde_json::from_str(body)?;
                response
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .ok_or_else(|| Error::Generator("no choices in response".to_string()))?
            }
            LlmProvider::Ollama => {
                let response: OllamaResponse = serde_json::from_str(body)?;
                response.message.content
            }
        };
        Ok(strip_code_fences(&content))
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let mut builder = self
            .client
            .post(request.endpoint())
            .json(&Self::request_body(&request));

        if request.provider == LlmProvider::OpenAi {
            if request.api_key.is_empty() {
                return Err(Error::Generator("openAISecretKey is empty".to_string()));
            }
            builder = builder.bearer_auth(&request.api_key);
        }

        tracing::debug!(
            provider = %request.provider,
            model = %request.model,
            history_len = request.histories.len(),
            "Invoking generator"
        );

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::Generator(format!(
                "{} returned {}: {}",
                request.provider, status, body
            )));
        }

        Self::parse_reply(request.provider, &body)
    }
}
