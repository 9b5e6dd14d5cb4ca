pub mod generator;
pub mod openrouter;
pub mod summarizer;
pub mod web_search;

pub use generator::ResponseGenerator;
pub use openrouter::OpenRouterClient;
pub use summarizer::ChannelSummarizer;
pub use web_search::{WebSearchDecision, WebSearchRouter};

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A single conversation turn. Immutable once created; turn sequences are
/// ordered chronologically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Wire-level message content: plain text, or multi-part (text + image).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ChatPart>),
}

impl ChatContent {
    /// Text view for plain-text content (used by tests and the mock).
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ChatContent::Text(text) => Some(text),
            ChatContent::Parts(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrlPart },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrlPart {
    pub url: String,
}

/// Wire-level chat message sent to the completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: ChatContent,
}

impl ChatMessage {
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role: role.as_str().to_string(),
            content: ChatContent::Text(content.into()),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        ChatMessage::text(message.role, message.content.clone())
    }
}

/// One completion call, fully assembled by the caller.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: u32,
    /// Ask the endpoint for a JSON object response (classifier calls).
    pub json_response: bool,
}

/// A web citation attached to a completion response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub title: Option<String>,
    pub url: String,
}

/// Parsed completion response: first choice's content plus any citation
/// metadata the provider attached.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub citations: Vec<Citation>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            citations: Vec::new(),
        }
    }
}

/// Mock AI client for tests - returns pre-configured responses from a queue
/// and captures every request for auditing.
#[derive(Clone)]
pub struct MockAiClient {
    responses: Arc<Mutex<VecDeque<Result<ChatResponse, String>>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockAiClient {
    pub fn new(responses: Vec<Result<ChatResponse, String>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn next_response(&self, request: ChatRequest) -> Result<ChatResponse, String> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ChatResponse::text("(mock exhausted)")))
    }

    /// All captured requests, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Unified AI client over the configured completion provider.
#[derive(Clone)]
pub enum AiClient {
    OpenRouter(OpenRouterClient),
    Mock(MockAiClient),
}

impl AiClient {
    /// Issue one completion call.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, String> {
        match self {
            AiClient::OpenRouter(client) => client.chat(request).await,
            AiClient::Mock(client) => client.next_response(request),
        }
    }
}
