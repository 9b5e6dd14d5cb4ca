use crate::ai::{
    AiClient, ChatContent, ChatMessage, ChatPart, ChatRequest, Citation, ImageUrlPart, Message,
    MessageRole, WebSearchDecision, WebSearchRouter,
};

/// Fixed default model; the web-search router upgrades it per conversation.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o";
pub const SEARCH_MODEL: &str = "openai/gpt-4o-search-preview";
pub const SONAR_MODEL: &str = "perplexity/sonar";
pub const SONAR_PRO_MODEL: &str = "perplexity/sonar-pro";
/// Image-grounded Q&A always uses this model, never the routed ones.
pub const IMAGE_MODEL: &str = "google/gemini-2.5-flash";

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 100_000;

const IMAGE_PROMPT: &str = "What do you see in this image?";

pub const EMPTY_RESPONSE_FALLBACK: &str = "I'm not sure how to respond to that.";
pub const ERROR_FALLBACK: &str = "Sorry, I encountered an error while processing your request.";
pub const EMPTY_IMAGE_FALLBACK: &str = "I'm unable to analyze this image.";
pub const IMAGE_ERROR_FALLBACK: &str = "Sorry, I encountered an error while processing your image.";

/// Builds prompts and calls the completion endpoint. Errors never escape this
/// layer: empty and failed responses both map to fixed fallback strings.
#[derive(Clone)]
pub struct ResponseGenerator {
    client: AiClient,
    router: WebSearchRouter,
}

impl ResponseGenerator {
    pub fn new(client: AiClient) -> Self {
        let router = WebSearchRouter::new(client.clone());
        Self { client, router }
    }

    /// Generate the assistant reply for a turn sequence.
    ///
    /// With `search_if_needed` the router may upgrade the model to one of the
    /// search tiers; replies from the sonar tiers get a citation block
    /// appended when the provider returned citation metadata.
    pub async fn generate(
        &self,
        turns: &[Message],
        personality: Option<&str>,
        search_if_needed: bool,
    ) -> String {
        log::info!("Generating AI response with {} history items", turns.len());

        let decision = if search_if_needed {
            self.router.should_search(turns).await
        } else {
            WebSearchDecision::None
        };

        let model = match &decision {
            WebSearchDecision::SonarPro { .. } => SONAR_PRO_MODEL,
            WebSearchDecision::Sonar { .. } => SONAR_MODEL,
            WebSearchDecision::Search { .. } => SEARCH_MODEL,
            WebSearchDecision::None => DEFAULT_MODEL,
        };
        log::info!("Selected model: {}", model);

        let request = ChatRequest {
            model: model.to_string(),
            messages: assemble_messages(turns, personality),
            temperature: Some(TEMPERATURE),
            max_tokens: MAX_TOKENS,
            json_response: false,
        };

        match self.client.chat(request).await {
            Ok(response) => match response.content {
                Some(content) if !content.is_empty() => {
                    if is_citation_model(model) {
                        format_citations(&content, &response.citations)
                    } else {
                        content
                    }
                }
                _ => EMPTY_RESPONSE_FALLBACK.to_string(),
            },
            Err(e) => {
                log::error!("Error calling completion endpoint: {}", e);
                ERROR_FALLBACK.to_string()
            }
        }
    }

    /// Image-grounded Q&A: same prompt assembly plus one extra user turn
    /// carrying the image reference. Always the fixed image model.
    pub async fn process_image(
        &self,
        image_url: &str,
        turns: &[Message],
        personality: Option<&str>,
    ) -> String {
        log::info!("Processing image from URL: {}", image_url);

        let mut messages = assemble_messages(turns, personality);
        messages.push(ChatMessage {
            role: MessageRole::User.as_str().to_string(),
            content: ChatContent::Parts(vec![
                ChatPart::ImageUrl {
                    image_url: ImageUrlPart {
                        url: image_url.to_string(),
                    },
                },
                ChatPart::Text {
                    text: IMAGE_PROMPT.to_string(),
                },
            ]),
        });

        let request = ChatRequest {
            model: IMAGE_MODEL.to_string(),
            messages,
            temperature: Some(TEMPERATURE),
            max_tokens: MAX_TOKENS,
            json_response: false,
        };

        match self.client.chat(request).await {
            Ok(response) => match response.content {
                Some(content) if !content.is_empty() => content,
                _ => EMPTY_IMAGE_FALLBACK.to_string(),
            },
            Err(e) => {
                log::error!("Error processing image: {}", e);
                IMAGE_ERROR_FALLBACK.to_string()
            }
        }
    }
}

/// Optional personality system turn, then the role-mapped conversation.
fn assemble_messages(turns: &[Message], personality: Option<&str>) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    if let Some(personality) = personality {
        messages.push(ChatMessage::text(MessageRole::System, personality));
    }
    messages.extend(turns.iter().map(ChatMessage::from));
    messages
}

/// Citation processing is defined only for the sonar-tier models.
fn is_citation_model(model: &str) -> bool {
    model == SONAR_MODEL || model == SONAR_PRO_MODEL
}

/// Append citations as a markdown block: `[n] [title](url)`, numbered from 1
/// in source order. Missing titles become `Source n`.
fn format_citations(content: &str, citations: &[Citation]) -> String {
    if citations.is_empty() {
        return content.to_string();
    }

    let lines: Vec<String> = citations
        .iter()
        .enumerate()
        .map(|(i, citation)| {
            let n = i + 1;
            let title = citation
                .title
                .clone()
                .unwrap_or_else(|| format!("Source {}", n));
            format!("[{}] [{}]({})", n, title, citation.url)
        })
        .collect();

    format!("{}\n\n{}", content, lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{ChatResponse, MockAiClient};

    fn generator_with(responses: Vec<Result<ChatResponse, String>>) -> (ResponseGenerator, MockAiClient) {
        let mock = MockAiClient::new(responses);
        (ResponseGenerator::new(AiClient::Mock(mock.clone())), mock)
    }

    fn none_decision() -> Result<ChatResponse, String> {
        Ok(ChatResponse::text("{\"decision\": \"NONE\", \"query\": null}"))
    }

    #[tokio::test]
    async fn personality_becomes_the_system_turn() {
        let (generator, mock) = generator_with(vec![Ok(ChatResponse::text("reply"))]);

        let reply = generator
            .generate(&[Message::user("Hello")], Some("You are a helpful assistant"), false)
            .await;

        assert_eq!(reply, "reply");
        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, DEFAULT_MODEL);
        assert_eq!(requests[0].messages[0].role, "system");
        assert_eq!(
            requests[0].messages[0].content.as_text(),
            Some("You are a helpful assistant")
        );
        assert_eq!(requests[0].messages[1].content.as_text(), Some("Hello"));
    }

    #[tokio::test]
    async fn no_personality_means_no_system_turn() {
        let (generator, mock) = generator_with(vec![Ok(ChatResponse::text("reply"))]);
        generator.generate(&[Message::user("Hello")], None, false).await;

        let requests = mock.requests();
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[0].messages[0].role, "user");
    }

    #[tokio::test]
    async fn router_decision_selects_the_model() {
        for (decision, expected_model) in [
            ("SONAR_PRO", SONAR_PRO_MODEL),
            ("SONAR", SONAR_MODEL),
            ("SEARCH", SEARCH_MODEL),
        ] {
            let (generator, mock) = generator_with(vec![
                Ok(ChatResponse::text(format!(
                    "{{\"decision\": \"{}\", \"query\": \"q\"}}",
                    decision
                ))),
                Ok(ChatResponse::text("reply")),
            ]);
            generator.generate(&[Message::user("Hello")], None, true).await;

            let requests = mock.requests();
            // First request is the classifier, second is the generation call.
            assert_eq!(requests.len(), 2);
            assert_eq!(requests[1].model, expected_model);
        }
    }

    #[tokio::test]
    async fn none_decision_keeps_the_default_model() {
        let (generator, mock) =
            generator_with(vec![none_decision(), Ok(ChatResponse::text("reply"))]);
        generator.generate(&[Message::user("Hello")], None, true).await;

        let requests = mock.requests();
        assert_eq!(requests[1].model, DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn search_skipped_when_not_requested() {
        let (generator, mock) = generator_with(vec![Ok(ChatResponse::text("reply"))]);
        generator.generate(&[Message::user("Hello")], None, false).await;

        // No classifier call at all.
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn sonar_reply_gets_citation_block() {
        let (generator, _) = generator_with(vec![
            Ok(ChatResponse::text("{\"decision\": \"SONAR\", \"query\": \"q\"}")),
            Ok(ChatResponse {
                content: Some("text".to_string()),
                citations: vec![
                    Citation {
                        title: Some("A".to_string()),
                        url: "u1".to_string(),
                    },
                    Citation {
                        title: Some("B".to_string()),
                        url: "u2".to_string(),
                    },
                ],
            }),
        ]);

        let reply = generator.generate(&[Message::user("news?")], None, true).await;
        assert_eq!(reply, "text\n\n[1] [A](u1)\n[2] [B](u2)");
    }

    #[tokio::test]
    async fn default_model_ignores_citation_metadata() {
        let (generator, _) = generator_with(vec![
            none_decision(),
            Ok(ChatResponse {
                content: Some("text".to_string()),
                citations: vec![Citation {
                    title: Some("A".to_string()),
                    url: "u1".to_string(),
                }],
            }),
        ]);

        let reply = generator.generate(&[Message::user("hi")], None, true).await;
        assert_eq!(reply, "text");
    }

    #[test]
    fn missing_citation_titles_become_source_n() {
        let citations = vec![
            Citation {
                title: None,
                url: "u1".to_string(),
            },
            Citation {
                title: Some("B".to_string()),
                url: "u2".to_string(),
            },
        ];
        assert_eq!(
            format_citations("text", &citations),
            "text\n\n[1] [Source 1](u1)\n[2] [B](u2)"
        );
    }

    #[tokio::test]
    async fn empty_content_maps_to_fallback() {
        let (generator, _) = generator_with(vec![Ok(ChatResponse {
            content: None,
            citations: Vec::new(),
        })]);
        let reply = generator.generate(&[Message::user("hi")], None, false).await;
        assert_eq!(reply, EMPTY_RESPONSE_FALLBACK);
    }

    #[tokio::test]
    async fn call_failure_maps_to_fallback() {
        let (generator, _) = generator_with(vec![Err("boom".to_string())]);
        let reply = generator.generate(&[Message::user("hi")], None, false).await;
        assert_eq!(reply, ERROR_FALLBACK);
    }

    #[tokio::test]
    async fn image_uses_fixed_model_and_appends_image_turn() {
        let (generator, mock) = generator_with(vec![Ok(ChatResponse::text("a cat"))]);

        let reply = generator
            .process_image("http://example.com/image.jpg", &[Message::user("Hello")], None)
            .await;

        assert_eq!(reply, "a cat");
        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, IMAGE_MODEL);

        let last = requests[0].messages.last().unwrap();
        match &last.content {
            ChatContent::Parts(parts) => {
                assert!(matches!(&parts[0], ChatPart::ImageUrl { image_url }
                    if image_url.url == "http://example.com/image.jpg"));
                assert!(matches!(&parts[1], ChatPart::Text { text } if text == IMAGE_PROMPT));
            }
            ChatContent::Text(_) => panic!("image turn must be multi-part"),
        }
    }

    #[tokio::test]
    async fn image_failures_map_to_image_fallbacks() {
        let (generator, _) = generator_with(vec![Err("boom".to_string())]);
        let reply = generator
            .process_image("http://example.com/i.jpg", &[], None)
            .await;
        assert_eq!(reply, IMAGE_ERROR_FALLBACK);

        let (generator, _) = generator_with(vec![Ok(ChatResponse {
            content: Some(String::new()),
            citations: Vec::new(),
        })]);
        let reply = generator
            .process_image("http://example.com/i.jpg", &[], None)
            .await;
        assert_eq!(reply, EMPTY_IMAGE_FALLBACK);
    }
}
