use crate::ai::{AiClient, ChatMessage, ChatRequest, Message, MessageRole};
use serde::Deserialize;

/// Routing decision for a conversation: whether web-augmented answering is
/// warranted, and at what strength. Produced fresh per generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSearchDecision {
    None,
    Search { query: String },
    Sonar { query: String },
    SonarPro { query: String },
}

const CLASSIFIER_MODEL: &str = "openai/gpt-5-nano";
const CLASSIFIER_MAX_TOKENS: u32 = 2000;

/// Structured classifier output: {"decision": ..., "query": ...}
#[derive(Debug, Deserialize)]
struct ClassifierOutput {
    decision: Option<String>,
    query: Option<String>,
}

/// Asks a small completion model to classify whether a conversation needs
/// web-augmented answering. Any ambiguity - malformed JSON, missing query,
/// unknown decision, call failure - degrades to `None` (fail closed).
#[derive(Clone)]
pub struct WebSearchRouter {
    client: AiClient,
}

impl WebSearchRouter {
    pub fn new(client: AiClient) -> Self {
        Self { client }
    }

    pub async fn should_search(&self, messages: &[Message]) -> WebSearchDecision {
        let conversation_context = messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "You are a decision-making AI. Based on the user's conversation history, decide whether to use a web search.\n\
             The conversation history is:\n\
             {}\n\n\
             You have four options:\n\
             1. SONAR_PRO: If the message requests deep insights, detailed analysis, or contains phrases like \"詳しく教えて\", \"詳細に教えて\", \"search deeply\", \"deep insights\", or \"in-depth analysis\".\n\
             2. SONAR: If the message is a question about recent facts, news, or unpopular specialized facts.\n\
             3. SEARCH: If the message is a question about less-known things that would benefit from a web search.\n\
             4. NONE: If the user is greeting, conversing, or asking about well-known facts (geographical, historical, scientific).\n\n\
             Respond with a JSON object in the format {{\"decision\": \"SONAR_PRO\" | \"SONAR\" | \"SEARCH\" | \"NONE\", \"query\": \"search query\" | null}}.\n\
             The \"query\" should be a concise search query if the decision is SONAR_PRO, SONAR, or SEARCH, otherwise null.",
            conversation_context
        );

        let request = ChatRequest {
            model: CLASSIFIER_MODEL.to_string(),
            messages: vec![ChatMessage::text(MessageRole::System, prompt)],
            temperature: None,
            max_tokens: CLASSIFIER_MAX_TOKENS,
            json_response: true,
        };

        match self.client.chat(request).await {
            Ok(response) => match response.content.as_deref() {
                Some(content) if !content.is_empty() => parse_decision(content),
                _ => {
                    log::warn!("Empty response from web-search classifier");
                    WebSearchDecision::None
                }
            },
            Err(e) => {
                log::error!("Web-search classification failed: {}", e);
                WebSearchDecision::None
            }
        }
    }
}

/// Map the classifier's JSON to a decision. Anything that is not a
/// recognized decision paired with a query degrades to `None`.
fn parse_decision(content: &str) -> WebSearchDecision {
    let output: ClassifierOutput = match serde_json::from_str(content) {
        Ok(output) => output,
        Err(e) => {
            log::warn!("Unparseable web-search classifier output: {}", e);
            return WebSearchDecision::None;
        }
    };

    let query = match output.query {
        Some(q) if !q.is_empty() => q,
        _ => return WebSearchDecision::None,
    };

    match output.decision.as_deref() {
        Some("SONAR_PRO") => WebSearchDecision::SonarPro { query },
        Some("SONAR") => WebSearchDecision::Sonar { query },
        Some("SEARCH") => WebSearchDecision::Search { query },
        _ => WebSearchDecision::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{ChatResponse, MockAiClient};

    fn router_with(responses: Vec<Result<ChatResponse, String>>) -> (WebSearchRouter, MockAiClient) {
        let mock = MockAiClient::new(responses);
        (WebSearchRouter::new(AiClient::Mock(mock.clone())), mock)
    }

    #[tokio::test]
    async fn maps_each_decision_with_query() {
        for (decision, expected) in [
            ("SONAR_PRO", WebSearchDecision::SonarPro { query: "q".to_string() }),
            ("SONAR", WebSearchDecision::Sonar { query: "q".to_string() }),
            ("SEARCH", WebSearchDecision::Search { query: "q".to_string() }),
        ] {
            let (router, _) = router_with(vec![Ok(ChatResponse::text(format!(
                "{{\"decision\": \"{}\", \"query\": \"q\"}}",
                decision
            )))]);
            let result = router.should_search(&[Message::user("hello")]).await;
            assert_eq!(result, expected);
        }
    }

    #[tokio::test]
    async fn missing_query_fails_closed() {
        let (router, _) = router_with(vec![Ok(ChatResponse::text(
            "{\"decision\": \"SONAR\", \"query\": null}",
        ))]);
        let result = router.should_search(&[Message::user("news?")]).await;
        assert_eq!(result, WebSearchDecision::None);
    }

    #[tokio::test]
    async fn unknown_decision_fails_closed() {
        let (router, _) = router_with(vec![Ok(ChatResponse::text(
            "{\"decision\": \"MAYBE\", \"query\": \"q\"}",
        ))]);
        let result = router.should_search(&[Message::user("hmm")]).await;
        assert_eq!(result, WebSearchDecision::None);
    }

    #[tokio::test]
    async fn malformed_json_fails_closed() {
        let (router, _) = router_with(vec![Ok(ChatResponse::text("not json at all"))]);
        let result = router.should_search(&[Message::user("hi")]).await;
        assert_eq!(result, WebSearchDecision::None);
    }

    #[tokio::test]
    async fn empty_content_fails_closed() {
        let (router, _) = router_with(vec![Ok(ChatResponse {
            content: None,
            citations: Vec::new(),
        })]);
        let result = router.should_search(&[Message::user("hi")]).await;
        assert_eq!(result, WebSearchDecision::None);
    }

    #[tokio::test]
    async fn call_failure_fails_closed() {
        let (router, _) = router_with(vec![Err("connection refused".to_string())]);
        let result = router.should_search(&[Message::user("hi")]).await;
        assert_eq!(result, WebSearchDecision::None);
    }

    #[tokio::test]
    async fn classifier_request_embeds_history_and_asks_for_json() {
        let (router, mock) = router_with(vec![Ok(ChatResponse::text(
            "{\"decision\": \"NONE\", \"query\": null}",
        ))]);
        router
            .should_search(&[Message::user("hello"), Message::assistant("hi!")])
            .await;

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, CLASSIFIER_MODEL);
        assert!(requests[0].json_response);
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[0].messages[0].role, "system");
        let prompt = requests[0].messages[0].content.as_text().unwrap();
        assert!(prompt.contains("user: hello"));
        assert!(prompt.contains("assistant: hi!"));
    }
}
