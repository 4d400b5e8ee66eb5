//! Access to the hosted chat model.
//!
//! The API is stateless, so every reply request re-sends the context turn
//! followed by the whole stored transcript. Internal roles are translated to
//! the service's vocabulary only here.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::config::Config;
use crate::error::GatewayError;
use crate::session::{Message, Role};

/// Reply text as it arrives. The stream ending is the completion signal;
/// it cannot be restarted.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// One-shot completion of a single user turn.
    async fn generate(&self, content: &str) -> Result<String, GatewayError>;

    /// Streams the reply to `context` followed by `history`.
    async fn generate_stream(
        &self,
        context: &str,
        history: &[Message],
    ) -> Result<FragmentStream, GatewayError>;
}

// Request/response bodies of the generateContent endpoints.
#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize, Debug, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text parts of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

fn service_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

fn user_turn(text: &str) -> Content<'_> {
    Content {
        role: "user",
        parts: [Part { text }],
    }
}

fn conversation<'a>(context: &'a str, history: &'a [Message]) -> GenerateRequest<'a> {
    let mut contents = Vec::with_capacity(history.len() + 1);
    contents.push(user_turn(context));
    contents.extend(history.iter().map(|m| Content {
        role: service_role(m.role),
        parts: [Part { text: &m.content }],
    }));
    GenerateRequest { contents }
}

/// Google Gemini `generateContent` client.
#[derive(Clone)]
pub struct GeminiGateway {
    client: Client,
    api_base: String,
    model: String,
    api_key: String,
}

impl fmt::Debug for GeminiGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiGateway")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiGateway {
    pub fn new(
        client: Client,
        api_base: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Client::new(),
            &config.api_base,
            &config.model,
            &config.api_key,
        )
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.api_base, self.model, method)
    }

    async fn post(
        &self,
        url: &str,
        body: &GenerateRequest<'_>,
    ) -> Result<reqwest::Response, GatewayError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "model API request failed");
            return Err(GatewayError::Status { status, body });
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelGateway for GeminiGateway {
    #[instrument(skip(self, content), fields(model = %self.model, chars = content.chars().count()))]
    async fn generate(&self, content: &str) -> Result<String, GatewayError> {
        let body = GenerateRequest {
            contents: vec![user_turn(content)],
        };
        let response = self.post(&self.endpoint("generateContent"), &body).await?;
        let parsed: GenerateResponse = response.json().await?;
        let text = parsed.text();
        if text.is_empty() {
            return Err(GatewayError::EmptyResponse);
        }
        debug!(chars = text.chars().count(), "received opening reply");
        Ok(text)
    }

    #[instrument(skip(self, context, history), fields(model = %self.model, turns = history.len() + 1))]
    async fn generate_stream(
        &self,
        context: &str,
        history: &[Message],
    ) -> Result<FragmentStream, GatewayError> {
        let body = conversation(context, history);
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.post(&url, &body).await?;

        let state = SseState {
            bytes: Box::pin(response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec()))),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
        };
        Ok(Box::pin(futures::stream::unfold(state, next_fragment)))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

struct SseState {
    bytes: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, GatewayError>>,
    finished: bool,
}

async fn next_fragment(
    mut state: SseState,
) -> Option<(Result<String, GatewayError>, SseState)> {
    loop {
        if let Some(item) = state.pending.pop_front() {
            return Some((item, state));
        }
        if state.finished {
            return None;
        }
        match state.bytes.next().await {
            Some(Ok(chunk)) => match state.decoder.push(&chunk) {
                Ok(payloads) => state
                    .pending
                    .extend(payloads.iter().filter_map(|p| fragment_from_payload(p))),
                Err(e) => {
                    state.pending.push_back(Err(e));
                    state.finished = true;
                }
            },
            Some(Err(e)) => {
                error!(error = %e, "model stream interrupted");
                state.pending.push_back(Err(e.into()));
                state.finished = true;
            }
            None => {
                match state.decoder.finish() {
                    Ok(payloads) => state
                        .pending
                        .extend(payloads.iter().filter_map(|p| fragment_from_payload(p))),
                    Err(e) => state.pending.push_back(Err(e)),
                }
                state.finished = true;
            }
        }
    }
}

/// Text of one streamed chunk. Chunks carrying no text (safety metadata,
/// usage counters) are skipped.
fn fragment_from_payload(payload: &str) -> Option<Result<String, GatewayError>> {
    if payload.trim() == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<GenerateResponse>(payload) {
        Ok(chunk) => {
            let text = chunk.text();
            (!text.is_empty()).then_some(Ok(text))
        }
        Err(e) => {
            warn!(%payload, error = %e, "failed to parse stream chunk");
            Some(Err(GatewayError::Malformed(e.to_string())))
        }
    }
}

/// Incremental `text/event-stream` decoder. Network chunks may split lines
/// and multi-byte characters anywhere, so raw bytes are buffered until a
/// full line is available.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feeds a chunk; returns the data of every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, GatewayError> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = std::str::from_utf8(&line)
                .map_err(|e| GatewayError::Malformed(e.to_string()))?
                .trim_end_matches(['\n', '\r']);
            if let Some(event) = self.take_line(line) {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Flushes a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Result<Vec<String>, GatewayError> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8(rest).map_err(|e| GatewayError::Malformed(e.to_string()))?;
            if let Some(event) = self.take_line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }
        if !self.data.is_empty() {
            events.push(std::mem::take(&mut self.data).join("\n"));
        }
        Ok(events)
    }

    fn take_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.data).join("\n"));
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        // Comments, `event:`, `id:` and `retry:` lines are not used.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_map_to_service_vocabulary() {
        assert_eq!(service_role(Role::User), "user");
        assert_eq!(service_role(Role::Assistant), "model");
    }

    #[test]
    fn test_conversation_starts_with_context_turn() {
        let history = vec![
            Message::assistant("最初の質問"),
            Message::user("答え"),
        ];
        let request = conversation("CONTEXT", &history);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "CONTEXT"}]},
                    {"role": "model", "parts": [{"text": "最初の質問"}]},
                    {"role": "user", "parts": [{"text": "答え"}]},
                ]
            })
        );
    }

    #[test]
    fn test_response_text_joins_parts_of_first_candidate() {
        let parsed: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"こん"},{"text":"にちは"}]}},{"content":{"parts":[{"text":"ignored"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.text(), "こんにちは");
    }

    #[test]
    fn test_response_without_candidates_is_empty() {
        let parsed: GenerateResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        assert_eq!(parsed.text(), "");
    }

    #[test]
    fn test_decoder_handles_split_lines_and_characters() {
        let mut decoder = SseDecoder::default();
        let frame = "data: {\"t\":\"振り返り\"}\r\n\r\n".as_bytes();
        // Split inside the first multi-byte character.
        let (a, b) = frame.split_at(13);
        assert!(decoder.push(a).unwrap().is_empty());
        assert_eq!(decoder.push(b).unwrap(), vec!["{\"t\":\"振り返り\"}"]);
    }

    #[test]
    fn test_decoder_joins_multi_line_data_and_ignores_comments() {
        let mut decoder = SseDecoder::default();
        let events = decoder
            .push(b": keep-alive\nevent: message\ndata: one\ndata:two\n\ndata: three\n\n")
            .unwrap();
        assert_eq!(events, vec!["one\ntwo", "three"]);
    }

    #[test]
    fn test_decoder_flushes_unterminated_event() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: tail").unwrap().is_empty());
        assert_eq!(decoder.finish().unwrap(), vec!["tail"]);
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_fragment_skips_chunks_without_text() {
        assert!(fragment_from_payload(r#"{"candidates":[{"content":{"parts":[]}}]}"#).is_none());
        assert!(fragment_from_payload(r#"{"usageMetadata":{"totalTokenCount":3}}"#).is_none());
        assert!(matches!(
            fragment_from_payload(r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#),
            Some(Ok(t)) if t == "hi"
        ));
        assert!(matches!(
            fragment_from_payload("not json"),
            Some(Err(GatewayError::Malformed(_)))
        ));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let gateway = GeminiGateway::new(Client::new(), "http://x/", "m", "secret-key");
        let rendered = format!("{gateway:?}");
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("http://x"));
    }
}
