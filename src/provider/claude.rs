use super::{LineDecoder, LineEvent, ProviderAdapter};
use crate::chat::{EncodedImage, RawFragment, ResolvedMessage};
use crate::config::ProviderConfig;
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Max tokens is mandatory on the Anthropic messages API.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic messages dialect (streaming). A Claude provider configured
/// with `stream = false` is routed through the OpenAI-compatible fallback
/// instead and never reaches this adapter.
pub struct ClaudeAdapter;

impl ProviderAdapter for ClaudeAdapter {
    fn translate(
        &self,
        cfg: &ProviderConfig,
        history: &[ResolvedMessage],
        _session: Option<&str>,
        _search: bool,
    ) -> Result<serde_json::Value> {
        let messages = history
            .iter()
            .map(|msg| Message {
                role: msg.role.as_str(),
                content: content_for(msg),
            })
            .collect();

        let body = MessagesRequest {
            model: cfg.model.clone(),
            system: (!cfg.system_prompt.is_empty()).then(|| cfg.system_prompt.clone()),
            messages,
            max_tokens: cfg.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: cfg.temperature,
            stream: cfg.flags.stream,
        };
        serde_json::to_value(&body)
            .map_err(|e| GatewayError::UpstreamProtocol(format!("request encode failed: {e}")))
    }

    fn prepare(
        &self,
        http: &reqwest::Client,
        cfg: &ProviderConfig,
        api_key: &str,
    ) -> Result<reqwest::RequestBuilder> {
        Ok(http
            .post(&cfg.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION))
    }

    fn decoder(&self) -> Box<dyn LineDecoder> {
        Box::new(ClaudeDecoder { in_content_delta: false })
    }

    fn decode_body(&self, body: &str) -> Result<RawFragment> {
        let resp: MessagesResponse = serde_json::from_str(body)
            .map_err(|e| GatewayError::UpstreamProtocol(format!("unexpected response body: {e}")))?;
        let text: String = resp
            .content
            .into_iter()
            .filter_map(|b| b.text)
            .collect();
        Ok(RawFragment::content(text))
    }
}

fn content_for(msg: &ResolvedMessage) -> MessageContent {
    if msg.images.is_empty() {
        return MessageContent::Text(msg.replay_content());
    }
    let mut parts = vec![ContentPart::Text { text: msg.replay_content() }];
    for img in &msg.images {
        parts.push(ContentPart::Image {
            source: ImageSource {
                kind: "base64",
                media_type: EncodedImage::MEDIA_TYPE,
                data: img.base64.clone(),
            },
        });
    }
    MessageContent::Parts(parts)
}

#[derive(Debug, Clone, Serialize)]
struct MessagesRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: ImageSource },
}

#[derive(Debug, Clone, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'static str,
    data: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamDataPayload {
    #[serde(default)]
    delta: Option<DeltaText>,
}

#[derive(Debug, Clone, Deserialize)]
struct DeltaText {
    #[serde(default)]
    text: Option<String>,
}

/// Claude frames its stream with SSE event names: only the data line that
/// follows an `event: content_block_delta` line carries text, and
/// `event: message_stop` terminates the stream.
struct ClaudeDecoder {
    in_content_delta: bool,
}

impl LineDecoder for ClaudeDecoder {
    fn push_line(&mut self, line: &str) -> Result<LineEvent> {
        if let Some(event) = line.strip_prefix("event: ") {
            match event.trim() {
                "message_stop" => return Ok(LineEvent::Done),
                "content_block_delta" => self.in_content_delta = true,
                _ => self.in_content_delta = false,
            }
            return Ok(LineEvent::Skip);
        }

        let Some(data) = line.strip_prefix("data: ") else {
            return Ok(LineEvent::Skip);
        };
        if !self.in_content_delta {
            return Ok(LineEvent::Skip);
        }
        self.in_content_delta = false;

        let payload: StreamDataPayload = serde_json::from_str(data.trim())
            .map_err(|e| GatewayError::UpstreamProtocol(format!("unexpected stream chunk: {e}")))?;
        Ok(match payload.delta.and_then(|d| d.text) {
            Some(text) => LineEvent::Fragment(RawFragment::content(text)),
            None => LineEvent::Skip,
        })
    }
}
