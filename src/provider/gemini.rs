use super::{LineDecoder, LineEvent, ProviderAdapter};
use crate::chat::{EncodedImage, RawFragment, ResolvedMessage, Role};
use crate::config::ProviderConfig;
use crate::error::{GatewayError, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Google Generative Language dialect. Auth is a `key` query parameter;
/// streaming uses SSE via `alt=sse`.
pub struct GeminiAdapter;

impl ProviderAdapter for GeminiAdapter {
    fn translate(
        &self,
        cfg: &ProviderConfig,
        history: &[ResolvedMessage],
        _session: Option<&str>,
        _search: bool,
    ) -> Result<serde_json::Value> {
        let contents = history
            .iter()
            .map(|msg| Content {
                role: Some(role_for(msg.role).to_string()),
                parts: parts_for(msg),
            })
            .collect();

        let body = GenerateContentRequest {
            system_instruction: (!cfg.system_prompt.is_empty()).then(|| Content {
                role: None,
                parts: vec![Part::text(&cfg.system_prompt)],
            }),
            contents,
            generation_config: GenerationConfig {
                temperature: cfg.temperature,
                max_output_tokens: cfg.max_tokens,
            },
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
        let mut url = Url::parse(&cfg.endpoint).map_err(|e| {
            GatewayError::ConfigurationMissing(format!(
                "invalid endpoint for '{}': {e}",
                cfg.name
            ))
        })?;
        url.query_pairs_mut().append_pair("key", api_key);
        if cfg.flags.stream {
            url.query_pairs_mut().append_pair("alt", "sse");
        }
        Ok(http.post(url))
    }

    fn decoder(&self) -> Box<dyn LineDecoder> {
        Box::new(GeminiDecoder)
    }

    fn decode_body(&self, body: &str) -> Result<RawFragment> {
        let resp: GenerateContentResponse = serde_json::from_str(body)
            .map_err(|e| GatewayError::UpstreamProtocol(format!("unexpected response body: {e}")))?;
        Ok(RawFragment::content(extract_text(&resp).unwrap_or_default()))
    }
}

/// Gemini has no assistant role; model turns are "model".
fn role_for(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        other => other.as_str(),
    }
}

fn parts_for(msg: &ResolvedMessage) -> Vec<Part> {
    let mut parts = vec![Part::text(msg.replay_content())];
    for img in &msg.images {
        parts.push(Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: EncodedImage::MEDIA_TYPE.to_string(),
                data: img.base64.clone(),
            }),
        });
    }
    parts
}

#[derive(Debug, Clone, Serialize)]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(t: impl Into<String>) -> Self {
        Self { text: Some(t.into()), inline_data: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

/// Concatenate all text parts of the first candidate.
fn extract_text(r: &GenerateContentResponse) -> Option<String> {
    let cand = r.candidates.first()?;
    let content = cand.content.as_ref()?;
    let mut out = String::new();
    for p in &content.parts {
        if let Some(t) = &p.text {
            out.push_str(t);
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

struct GeminiDecoder;

impl LineDecoder for GeminiDecoder {
    fn push_line(&mut self, line: &str) -> Result<LineEvent> {
        let Some(data) = line.strip_prefix("data: ") else {
            return Ok(LineEvent::Skip);
        };
        let data = data.trim();
        if data.is_empty() {
            return Ok(LineEvent::Skip);
        }

        let resp: GenerateContentResponse = serde_json::from_str(data)
            .map_err(|e| GatewayError::UpstreamProtocol(format!("unexpected stream chunk: {e}")))?;
        // The stream has no explicit terminator; end of body ends it.
        Ok(match extract_text(&resp) {
            Some(text) => LineEvent::Fragment(RawFragment::content(text)),
            None => LineEvent::Skip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderFlags;
    use crate::provider::ProviderKind;
    use pretty_assertions::assert_eq;

    fn cfg() -> ProviderConfig {
        ProviderConfig {
            name: "gemini".to_string(),
            kind: ProviderKind::Gemini,
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:streamGenerateContent"
                .to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            model: "gemini-pro".to_string(),
            system_prompt: "answer in french".to_string(),
            temperature: Some(0.2),
            max_tokens: Some(256),
            flags: ProviderFlags::default(),
            prompt_template: None,
        }
    }

    fn msg(role: Role, text: &str) -> ResolvedMessage {
        ResolvedMessage { role, content: text.to_string(), images: vec![] }
    }

    #[test]
    fn assistant_turns_become_model_role() {
        let history = vec![msg(Role::User, "hi"), msg(Role::Assistant, "bonjour")];
        let body = GeminiAdapter.translate(&cfg(), &history, None, false).unwrap();
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
    }

    #[test]
    fn system_prompt_is_a_system_instruction() {
        let body = GeminiAdapter
            .translate(&cfg(), &[msg(Role::User, "hi")], None, false)
            .unwrap();
        assert_eq!(
            body["system_instruction"]["parts"][0]["text"],
            "answer in french"
        );
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn images_become_inline_data_parts() {
        let history = vec![ResolvedMessage {
            role: Role::User,
            content: "describe".to_string(),
            images: vec![crate::chat::EncodedImage { base64: "QUJD".to_string() }],
        }];
        let body = GeminiAdapter.translate(&cfg(), &history, None, false).unwrap();
        let part = &body["contents"][0]["parts"][1];
        assert_eq!(part["inline_data"]["mime_type"], "image/jpeg");
        assert_eq!(part["inline_data"]["data"], "QUJD");
    }

    #[test]
    fn auth_key_and_sse_ride_the_query_string() {
        let http = reqwest::Client::new();
        let rb = GeminiAdapter.prepare(&http, &cfg(), "secret").unwrap();
        let req = rb.build().unwrap();
        let query = req.url().query().unwrap();
        assert!(query.contains("key=secret"));
        assert!(query.contains("alt=sse"));
    }

    #[test]
    fn decoder_extracts_candidate_text() {
        let mut d = GeminiDecoder;
        let ev = d
            .push_line(r#"data: {"candidates":[{"content":{"parts":[{"text":"Salut"}]}}]}"#)
            .unwrap();
        assert_eq!(ev, LineEvent::Fragment(RawFragment::content("Salut")));
        assert_eq!(d.push_line("").unwrap(), LineEvent::Skip);
    }

    #[test]
    fn whole_body_decode_for_non_streaming() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"He"},{"text":"llo"}]}}]}"#;
        let frag = GeminiAdapter.decode_body(body).unwrap();
        assert_eq!(frag.content.as_deref(), Some("Hello"));
    }
}
