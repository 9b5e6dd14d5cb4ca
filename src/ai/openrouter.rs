use crate::ai::{ChatMessage, ChatRequest, ChatResponse, Citation};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Chat-completion client speaking the OpenRouter (OpenAI-compatible) wire
/// format. The endpoint is treated as unreliable: callers convert any error
/// from here into a fixed fallback string.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    auth_headers: header::HeaderMap,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    web_search_options: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    search_results: Option<Vec<SearchResult>>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    annotations: Option<Vec<Annotation>>,
}

/// Flat citation entry returned by the search-tier models.
#[derive(Debug, Deserialize)]
struct SearchResult {
    title: Option<String>,
    url: String,
}

/// Per-choice annotation entry; only `url_citation` entries carry citations.
#[derive(Debug, Deserialize)]
struct Annotation {
    #[serde(rename = "type")]
    annotation_type: String,
    url_citation: Option<UrlCitation>,
}

#[derive(Debug, Deserialize)]
struct UrlCitation {
    title: Option<String>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// The "-search-preview" model variants require an (empty) web_search_options
/// flag in the request body; the standard call shape omits it entirely.
pub fn uses_web_search_options(model: &str) -> bool {
    model.ends_with("-search-preview")
}

impl OpenRouterClient {
    pub fn new(api_key: &str, base_url: &str) -> Result<Self, String> {
        let mut auth_headers = header::HeaderMap::new();
        auth_headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        auth_headers.insert("X-Title", header::HeaderValue::from_static("orenchi-ai-bot"));

        let auth_value = header::HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| format!("Invalid API key format: {}", e))?;
        auth_headers.insert(header::AUTHORIZATION, auth_value);

        Ok(Self {
            client: Client::new(),
            auth_headers,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
        })
    }

    /// Issue one completion call and parse the first choice plus citation
    /// metadata (flat search results, else url_citation annotations).
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, String> {
        let body = CompletionRequest {
            web_search_options: uses_web_search_options(&request.model).then(|| json!({})),
            response_format: request.json_response.then(|| json!({ "type": "json_object" })),
            model: request.model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        log::info!(
            "[OPENROUTER] Sending request to {} with model {} and {} messages",
            self.endpoint,
            body.model,
            body.messages.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.auth_headers.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("OpenRouter API request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let error_msg = match serde_json::from_str::<ApiErrorResponse>(&error_text) {
                Ok(parsed) => format!("OpenRouter API error: {}", parsed.error.message),
                Err(_) => {
                    let truncated = if error_text.len() > 200 {
                        format!("{}...", &error_text[..200])
                    } else {
                        error_text
                    };
                    format!("OpenRouter API returned error status: {}, body: {}", status, truncated)
                }
            };
            return Err(error_msg);
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| format!("Failed to read OpenRouter response: {}", e))?;

        log::debug!("[OPENROUTER] Raw response:\n{}", response_text);

        let data: CompletionResponse = serde_json::from_str(&response_text)
            .map_err(|e| format!("Failed to parse OpenRouter response: {}", e))?;

        let citations = extract_citations(&data);
        let content = data.choices.into_iter().next().and_then(|c| c.message.content);

        log::info!(
            "[OPENROUTER] Response - content_len: {}, citations: {}",
            content.as_ref().map(|c| c.len()).unwrap_or(0),
            citations.len()
        );

        Ok(ChatResponse { content, citations })
    }
}

/// Prefer the flat search-result list; fall back to per-choice url_citation
/// annotations when it is absent.
fn extract_citations(data: &CompletionResponse) -> Vec<Citation> {
    if let Some(results) = &data.search_results {
        return results
            .iter()
            .map(|r| Citation {
                title: r.title.clone(),
                url: r.url.clone(),
            })
            .collect();
    }

    data.choices
        .first()
        .and_then(|c| c.message.annotations.as_ref())
        .map(|annotations| {
            annotations
                .iter()
                .filter(|a| a.annotation_type == "url_citation")
                .filter_map(|a| a.url_citation.as_ref())
                .map(|u| Citation {
                    title: u.title.clone(),
                    url: u.url.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_preview_models_get_the_flag() {
        assert!(uses_web_search_options("openai/gpt-4o-search-preview"));
        assert!(uses_web_search_options("openai/gpt-4o-mini-search-preview"));
        assert!(!uses_web_search_options("openai/gpt-4o"));
        assert!(!uses_web_search_options("openai/gpt-4o:online"));
        assert!(!uses_web_search_options("perplexity/sonar"));
    }

    #[test]
    fn request_body_includes_flag_only_for_search_preview() {
        let body = CompletionRequest {
            model: "openai/gpt-4o-search-preview".to_string(),
            messages: vec![crate::ai::ChatMessage::text(crate::ai::MessageRole::User, "hi")],
            temperature: Some(0.7),
            max_tokens: 100,
            response_format: None,
            web_search_options: uses_web_search_options("openai/gpt-4o-search-preview")
                .then(|| json!({})),
        };
        let value: Value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["web_search_options"], json!({}));

        let body = CompletionRequest {
            model: "openai/gpt-4o".to_string(),
            messages: vec![],
            temperature: None,
            max_tokens: 100,
            response_format: None,
            web_search_options: uses_web_search_options("openai/gpt-4o").then(|| json!({})),
        };
        let value: Value = serde_json::to_value(&body).unwrap();
        assert!(value.get("web_search_options").is_none());
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn citations_prefer_flat_search_results() {
        let data: CompletionResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": "text",
                    "annotations": [{
                        "type": "url_citation",
                        "url_citation": { "title": "Nested", "url": "n1" }
                    }]
                }
            }],
            "search_results": [
                { "title": "A", "url": "u1" },
                { "title": "B", "url": "u2" }
            ]
        }))
        .unwrap();

        let citations = extract_citations(&data);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].url, "u1");
        assert_eq!(citations[1].title.as_deref(), Some("B"));
    }

    #[test]
    fn citations_fall_back_to_url_citation_annotations() {
        let data: CompletionResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": "text",
                    "annotations": [
                        {
                            "type": "url_citation",
                            "url_citation": { "title": "A", "url": "u1" }
                        },
                        { "type": "other", "url_citation": null }
                    ]
                }
            }]
        }))
        .unwrap();

        let citations = extract_citations(&data);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].title.as_deref(), Some("A"));
        assert_eq!(citations[0].url, "u1");
    }

    #[test]
    fn image_message_serializes_as_parts() {
        let message = crate::ai::ChatMessage {
            role: "user".to_string(),
            content: crate::ai::ChatContent::Parts(vec![
                crate::ai::ChatPart::ImageUrl {
                    image_url: crate::ai::ImageUrlPart {
                        url: "http://example.com/image.jpg".to_string(),
                    },
                },
                crate::ai::ChatPart::Text {
                    text: "What do you see in this image?".to_string(),
                },
            ]),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["content"][0]["type"], "image_url");
        assert_eq!(value["content"][0]["image_url"]["url"], "http://example.com/image.jpg");
        assert_eq!(value["content"][1]["text"], "What do you see in this image?");
    }
}
