use super::{LineDecoder, LineEvent, ProviderAdapter};
use crate::chat::{RawFragment, ResolvedMessage, Role};
use crate::config::ProviderConfig;
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};

/// DashScope generation dialect, messages input. Chunks arrive on `data:`
/// lines (no space after the colon) and repeat the whole text so far when
/// `incremental_output` is off; the normalizer diffs them downstream.
pub struct DashScopeChatAdapter;

/// DashScope prompt dialect: sends only the latest user turn plus the
/// provider-issued session id, which resumes server-side conversation
/// context. This is a provider limitation, not an optimization.
pub struct DashScopePromptAdapter;

/// Llama 3.2 hosted on DashScope, messages input with `message` result
/// format: text lives at `output.choices[0].message.content[0].text`.
pub struct Llama32Adapter;

fn auth(
    http: &reqwest::Client,
    cfg: &ProviderConfig,
    api_key: &str,
) -> reqwest::RequestBuilder {
    let rb = http.post(&cfg.endpoint).bearer_auth(api_key);
    if cfg.flags.stream {
        rb.header("X-DashScope-SSE", "enable")
    } else {
        rb
    }
}

fn encode(body: &GenerationRequest) -> Result<serde_json::Value> {
    serde_json::to_value(body)
        .map_err(|e| GatewayError::UpstreamProtocol(format!("request encode failed: {e}")))
}

fn messages_with_system(cfg: &ProviderConfig, history: &[ResolvedMessage]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if !cfg.system_prompt.is_empty() {
        messages.push(Message {
            role: Role::System.as_str(),
            content: cfg.system_prompt.clone(),
        });
    }
    for msg in history {
        messages.push(Message {
            role: msg.role.as_str(),
            content: msg.replay_content(),
        });
    }
    messages
}

fn parameters(cfg: &ProviderConfig, search: bool) -> Parameters {
    Parameters {
        incremental_output: cfg.flags.incremental_output,
        enable_search: search,
        temperature: cfg.temperature,
        max_tokens: cfg.max_tokens,
        result_format: None,
    }
}

impl ProviderAdapter for DashScopeChatAdapter {
    fn translate(
        &self,
        cfg: &ProviderConfig,
        history: &[ResolvedMessage],
        _session: Option<&str>,
        search: bool,
    ) -> Result<serde_json::Value> {
        let body = GenerationRequest {
            model: cfg.model.clone(),
            input: Input {
                messages: Some(messages_with_system(cfg, history)),
                prompt: None,
                session_id: None,
                prompt_template: None,
            },
            parameters: parameters(cfg, search),
        };
        encode(&body)
    }

    fn prepare(
        &self,
        http: &reqwest::Client,
        cfg: &ProviderConfig,
        api_key: &str,
    ) -> Result<reqwest::RequestBuilder> {
        Ok(auth(http, cfg, api_key))
    }

    // Generation messages carry text only.
    fn supports_images(&self) -> bool {
        false
    }

    fn decoder(&self) -> Box<dyn LineDecoder> {
        Box::new(DashScopeDecoder)
    }

    fn decode_body(&self, body: &str) -> Result<RawFragment> {
        decode_output(body)
    }
}

impl ProviderAdapter for DashScopePromptAdapter {
    fn translate(
        &self,
        cfg: &ProviderConfig,
        history: &[ResolvedMessage],
        session: Option<&str>,
        search: bool,
    ) -> Result<serde_json::Value> {
        // Full history is never replayed here; the session id carries it.
        let latest = history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let body = GenerationRequest {
            model: cfg.model.clone(),
            input: Input {
                messages: None,
                prompt: Some(latest),
                session_id: session.map(str::to_string),
                prompt_template: cfg.prompt_template.clone(),
            },
            parameters: parameters(cfg, search),
        };
        encode(&body)
    }

    fn prepare(
        &self,
        http: &reqwest::Client,
        cfg: &ProviderConfig,
        api_key: &str,
    ) -> Result<reqwest::RequestBuilder> {
        Ok(auth(http, cfg, api_key))
    }

    fn supports_images(&self) -> bool {
        false
    }

    fn decoder(&self) -> Box<dyn LineDecoder> {
        Box::new(DashScopeDecoder)
    }

    fn decode_body(&self, body: &str) -> Result<RawFragment> {
        decode_output(body)
    }
}

impl ProviderAdapter for Llama32Adapter {
    fn translate(
        &self,
        cfg: &ProviderConfig,
        history: &[ResolvedMessage],
        _session: Option<&str>,
        search: bool,
    ) -> Result<serde_json::Value> {
        let mut params = parameters(cfg, search);
        params.result_format = Some("message");
        let body = GenerationRequest {
            model: cfg.model.clone(),
            input: Input {
                messages: Some(messages_with_system(cfg, history)),
                prompt: None,
                session_id: None,
                prompt_template: None,
            },
            parameters: params,
        };
        encode(&body)
    }

    fn prepare(
        &self,
        http: &reqwest::Client,
        cfg: &ProviderConfig,
        api_key: &str,
    ) -> Result<reqwest::RequestBuilder> {
        Ok(auth(http, cfg, api_key))
    }

    fn supports_images(&self) -> bool {
        false
    }

    fn decoder(&self) -> Box<dyn LineDecoder> {
        Box::new(Llama32Decoder)
    }

    fn decode_body(&self, body: &str) -> Result<RawFragment> {
        let resp = parse_response(body)?;
        Ok(RawFragment::content(choices_text(&resp).unwrap_or_default()))
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerationRequest {
    model: String,
    input: Input,
    parameters: Parameters,
}

#[derive(Debug, Clone, Serialize)]
struct Input {
    #[serde(skip_serializing_if = "Option::is_none")]
    messages: Option<Vec<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_template: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct Parameters {
    incremental_output: bool,
    enable_search: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result_format: Option<&'static str>,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    output: Option<Output>,
}

#[derive(Debug, Clone, Deserialize)]
struct Output {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    choices: Vec<OutputChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OutputChoice {
    #[serde(default)]
    message: Option<OutputMessage>,
}

#[derive(Debug, Clone, Deserialize)]
struct OutputMessage {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Clone, Deserialize)]
struct OutputContent {
    #[serde(default)]
    text: Option<String>,
}

fn parse_response(data: &str) -> Result<GenerationResponse> {
    serde_json::from_str(data)
        .map_err(|e| GatewayError::UpstreamProtocol(format!("unexpected stream chunk: {e}")))
}

fn decode_output(data: &str) -> Result<RawFragment> {
    let resp = parse_response(data)?;
    Ok(match resp.output {
        Some(out) => RawFragment {
            content: out.text,
            reasoning: None,
            session_id: out.session_id,
        },
        None => RawFragment::default(),
    })
}

fn choices_text(resp: &GenerationResponse) -> Option<String> {
    resp.output
        .as_ref()?
        .choices
        .first()?
        .message
        .as_ref()?
        .content
        .first()?
        .text
        .clone()
}

/// Strips the DashScope frame prefix: `data:` without the space SSE
/// usually has. Lines with a space still match.
fn strip_frame(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

struct DashScopeDecoder;

impl LineDecoder for DashScopeDecoder {
    fn push_line(&mut self, line: &str) -> Result<LineEvent> {
        let Some(data) = strip_frame(line) else {
            return Ok(LineEvent::Skip);
        };
        if data.is_empty() {
            return Ok(LineEvent::Skip);
        }
        if data == "[DONE]" {
            return Ok(LineEvent::Done);
        }
        Ok(LineEvent::Fragment(decode_output(data)?))
    }
}

struct Llama32Decoder;

impl LineDecoder for Llama32Decoder {
    fn push_line(&mut self, line: &str) -> Result<LineEvent> {
        let Some(data) = strip_frame(line) else {
            return Ok(LineEvent::Skip);
        };
        if data.is_empty() {
            return Ok(LineEvent::Skip);
        }
        if data == "[DONE]" {
            return Ok(LineEvent::Done);
        }
        let resp = parse_response(data)?;
        Ok(match choices_text(&resp) {
            Some(text) => LineEvent::Fragment(RawFragment::content(text)),
            None => LineEvent::Skip,
        })
    }
}
