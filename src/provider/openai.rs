use super::{LineDecoder, LineEvent, ProviderAdapter};
use crate::chat::{RawFragment, ResolvedMessage, Role};
use crate::config::ProviderConfig;
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};

/// OpenAI chat-completions dialect. Also covers QwenVL, DeepSeek and
/// Deepbricks endpoints, and the non-streaming Claude fallback, all of
/// which speak this wire format.
pub struct OpenAiAdapter;

impl ProviderAdapter for OpenAiAdapter {
    fn translate(
        &self,
        cfg: &ProviderConfig,
        history: &[ResolvedMessage],
        _session: Option<&str>,
        _search: bool,
    ) -> Result<serde_json::Value> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !cfg.system_prompt.is_empty() {
            messages.push(Message {
                role: Role::System.as_str(),
                content: MessageContent::Text(cfg.system_prompt.clone()),
            });
        }
        for msg in history {
            messages.push(Message {
                role: msg.role.as_str(),
                content: content_for(msg),
            });
        }

        let body = ChatCompletionRequest {
            model: cfg.model.clone(),
            messages,
            stream: cfg.flags.stream,
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
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
        Ok(http.post(&cfg.endpoint).bearer_auth(api_key))
    }

    fn decoder(&self) -> Box<dyn LineDecoder> {
        Box::new(OpenAiDecoder)
    }

    fn decode_body(&self, body: &str) -> Result<RawFragment> {
        let resp: ChatCompletionResponse = serde_json::from_str(body)
            .map_err(|e| GatewayError::UpstreamProtocol(format!("unexpected response body: {e}")))?;
        let msg = resp.choices.into_iter().next().and_then(|c| c.message);
        Ok(match msg {
            Some(m) => RawFragment {
                content: m.content,
                reasoning: m.reasoning_content,
                session_id: None,
            },
            None => RawFragment::default(),
        })
    }
}

fn content_for(msg: &ResolvedMessage) -> MessageContent {
    if msg.images.is_empty() {
        return MessageContent::Text(msg.replay_content());
    }
    let mut parts = vec![ContentPart::Text { text: msg.replay_content() }];
    for img in &msg.images {
        parts.push(ContentPart::ImageUrl {
            image_url: ImageUrl { url: img.data_url() },
        });
    }
    MessageContent::Parts(parts)
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
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
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<DeltaPayload>,
    #[serde(default)]
    message: Option<DeltaPayload>,
}

#[derive(Debug, Clone, Deserialize)]
struct DeltaPayload {
    #[serde(default)]
    content: Option<String>,
    /// DeepSeek-style dedicated reasoning stream.
    #[serde(default)]
    reasoning_content: Option<String>,
}

struct OpenAiDecoder;

impl LineDecoder for OpenAiDecoder {
    fn push_line(&mut self, line: &str) -> Result<LineEvent> {
        let Some(data) = line.strip_prefix("data: ") else {
            return Ok(LineEvent::Skip);
        };
        let data = data.trim();
        if data.is_empty() {
            return Ok(LineEvent::Skip);
        }
        if data == "[DONE]" {
            return Ok(LineEvent::Done);
        }

        let chunk: ChatCompletionResponse = serde_json::from_str(data)
            .map_err(|e| GatewayError::UpstreamProtocol(format!("unexpected stream chunk: {e}")))?;
        let delta = chunk.choices.into_iter().next().and_then(|c| c.delta);
        Ok(match delta {
            Some(d) => LineEvent::Fragment(RawFragment {
                content: d.content,
                reasoning: d.reasoning_content,
                session_id: None,
            }),
            None => LineEvent::Skip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::EncodedImage;
    use crate::config::ProviderFlags;
    use crate::provider::ProviderKind;
    use pretty_assertions::assert_eq;

    fn cfg() -> ProviderConfig {
        ProviderConfig {
            name: "gpt".to_string(),
            kind: ProviderKind::OpenAiCompatible,
            endpoint: "https://api.example.com/v1/chat/completions".to_string(),
            api_key_env: "EXAMPLE_API_KEY".to_string(),
            model: "gpt-4o".to_string(),
            system_prompt: "be brief".to_string(),
            temperature: Some(0.7),
            max_tokens: Some(512),
            flags: ProviderFlags::default(),
            prompt_template: None,
        }
    }

    fn user(text: &str) -> ResolvedMessage {
        ResolvedMessage { role: Role::User, content: text.to_string(), images: vec![] }
    }

    #[test]
    fn system_prompt_becomes_leading_message() {
        let body = OpenAiAdapter.translate(&cfg(), &[user("hi")], None, false).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be brief");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["temperature"], 0.7);
    }

    #[test]
    fn empty_system_prompt_is_omitted() {
        let mut c = cfg();
        c.system_prompt.clear();
        let body = OpenAiAdapter.translate(&c, &[user("hi")], None, false).unwrap();
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn assistant_history_loses_think_spans() {
        let history = vec![
            user("question"),
            ResolvedMessage {
                role: Role::Assistant,
                content: "<think>hmm</think>answer".to_string(),
                images: vec![],
            },
        ];
        let body = OpenAiAdapter.translate(&cfg(), &history, None, false).unwrap();
        assert_eq!(body["messages"][2]["content"], "answer");
    }

    #[test]
    fn images_become_multipart_content() {
        let history = vec![ResolvedMessage {
            role: Role::User,
            content: "what is this".to_string(),
            images: vec![EncodedImage { base64: "QUJD".to_string() }],
        }];
        let body = OpenAiAdapter.translate(&cfg(), &history, None, false).unwrap();
        let parts = body["messages"][1]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/jpeg;base64,QUJD");
    }

    #[test]
    fn decoder_yields_incremental_fragments_until_done() {
        let mut d = OpenAiDecoder;
        let ev = d
            .push_line(r#"data: {"choices":[{"delta":{"content":"He"}}]}"#)
            .unwrap();
        assert_eq!(ev, LineEvent::Fragment(RawFragment::content("He")));
        assert_eq!(d.push_line("").unwrap(), LineEvent::Skip);
        assert_eq!(d.push_line(": keep-alive").unwrap(), LineEvent::Skip);
        assert_eq!(d.push_line("data: [DONE]").unwrap(), LineEvent::Done);
    }

    #[test]
    fn decoder_surfaces_reasoning_content_separately() {
        let mut d = OpenAiDecoder;
        let ev = d
            .push_line(r#"data: {"choices":[{"delta":{"reasoning_content":"thinking"}}]}"#)
            .unwrap();
        let LineEvent::Fragment(frag) = ev else { panic!("expected fragment") };
        assert_eq!(frag.reasoning.as_deref(), Some("thinking"));
        assert_eq!(frag.content, None);
    }

    #[test]
    fn malformed_data_line_is_fatal() {
        let mut d = OpenAiDecoder;
        let err = d.push_line("data: {not json").unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamProtocol(_)));
    }

    #[test]
    fn whole_body_decode_reads_message_content() {
        let body = r#"{"choices":[{"message":{"content":"Hello"}}]}"#;
        let frag = OpenAiAdapter.decode_body(body).unwrap();
        assert_eq!(frag.content.as_deref(), Some("Hello"));
    }
}
