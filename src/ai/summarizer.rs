use crate::ai::{AiClient, ChatMessage, ChatRequest, Message, MessageRole};
use crate::bot::channel_manager::WELCOME_MESSAGE_SUFFIX;
use once_cell::sync::Lazy;
use regex::Regex;

const SUMMARY_MODEL: &str = "openai/gpt-5-nano";
const SUMMARY_MAX_TOKENS: u32 = 2000;

const SYSTEM_PROMPT: &str = "You are a helpful assistant that creates concise, descriptive titles for conversations. Create a short title (3-5 words) that captures the main topic of the conversation. Only respond with the title, nothing else. Use the language primarily used in the conversation. If it's Japanese, never separate words with spaces.";

/// API failure / empty response fallback. Deliberately different from the
/// sanitizer's "chat-summary" fallback: the two strings mark two different
/// failure paths.
const API_FALLBACK: &str = "Chat Summary";
const SANITIZE_FALLBACK: &str = "chat-summary";

const MAX_TITLE_CHARS: usize = 30;

static DISALLOWED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\s-]").unwrap());
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static HYPHEN_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+").unwrap());

/// Derives a short topic label from a conversation, safe for use in a
/// channel name.
#[derive(Clone)]
pub struct ChannelSummarizer {
    client: AiClient,
}

impl ChannelSummarizer {
    pub fn new(client: AiClient) -> Self {
        Self { client }
    }

    /// Summarize a conversation into a sanitized channel-name label.
    /// Welcome-message boilerplate is filtered out before summarization.
    pub async fn summarize_conversation(&self, messages: &[Message]) -> String {
        log::info!("Generating summary for conversation with {} messages", messages.len());

        let formatted_history = messages
            .iter()
            .filter(|m| !m.content.contains(WELCOME_MESSAGE_SUFFIX))
            .map(|m| {
                let role = match m.role {
                    MessageRole::User => "User",
                    _ => "Assistant",
                };
                format!("{}: {}", role, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let request = ChatRequest {
            model: SUMMARY_MODEL.to_string(),
            messages: vec![
                ChatMessage::text(MessageRole::System, SYSTEM_PROMPT),
                ChatMessage::text(MessageRole::User, formatted_history),
            ],
            temperature: None,
            max_tokens: SUMMARY_MAX_TOKENS,
            json_response: false,
        };

        match self.client.chat(request).await {
            Ok(response) => match response.content {
                Some(content) if !content.is_empty() => sanitize_title(&content),
                _ => API_FALLBACK.to_string(),
            },
            Err(e) => {
                log::error!("Error summarizing conversation: {}", e);
                API_FALLBACK.to_string()
            }
        }
    }
}

/// Make a raw model title safe for use in a channel name: lowercase, Unicode
/// letters/digits/whitespace/hyphen only, whitespace runs become single
/// hyphens, repeated hyphens collapse, trimmed, at most 30 characters.
pub fn sanitize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped = DISALLOWED.replace_all(&lowered, "");
    let hyphenated = WHITESPACE_RUN.replace_all(stripped.trim(), "-");
    let collapsed = HYPHEN_RUN.replace_all(&hyphenated, "-");

    let truncated: String = collapsed.chars().take(MAX_TITLE_CHARS).collect();
    let trimmed = truncated.trim_matches('-');

    if trimmed.is_empty() {
        SANITIZE_FALLBACK.to_string()
    } else {
        trimmed.to_string()
    }
}
