pub mod claude;
pub mod dashscope;
pub mod gemini;
pub mod openai;

use crate::chat::{RawFragment, ResolvedMessage};
use crate::config::ProviderConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// The closed set of upstream API dialects this gateway speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
    #[serde(rename = "claude")]
    Claude,
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "dashscope-chat")]
    DashScopeChat,
    #[serde(rename = "dashscope-prompt")]
    DashScopePrompt,
    #[serde(rename = "llama32")]
    Llama32,
    #[serde(rename = "qwen-vl")]
    QwenVl,
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "deepbricks")]
    Deepbricks,
}

/// One upstream dialect: payload shape, auth scheme, wire decode.
///
/// Implementations are stateless; per-request decode state lives in the
/// `LineDecoder` handed out for each call.
pub trait ProviderAdapter: Send + Sync {
    /// Builds the provider-specific request body. `session` is the
    /// continuation token from the previous turn, used only by dialects
    /// that resume server-side context. Never performs I/O.
    fn translate(
        &self,
        cfg: &ProviderConfig,
        history: &[ResolvedMessage],
        session: Option<&str>,
        search: bool,
    ) -> Result<serde_json::Value>;

    /// Endpoint URL plus authentication for the outbound POST.
    fn prepare(
        &self,
        http: &reqwest::Client,
        cfg: &ProviderConfig,
        api_key: &str,
    ) -> Result<reqwest::RequestBuilder>;

    /// Whether this dialect's payload can carry image parts at all.
    /// When false, attachments are never fetched or encoded, even for a
    /// config with image uploads enabled.
    fn supports_images(&self) -> bool {
        true
    }

    /// Fresh decoder for one streaming response.
    fn decoder(&self) -> Box<dyn LineDecoder>;

    /// Decodes a whole non-streaming response body.
    fn decode_body(&self, body: &str) -> Result<RawFragment>;
}

/// Outcome of feeding one wire line to a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Blank line, comment, or a frame this dialect ignores.
    Skip,
    Fragment(RawFragment),
    /// Explicit stream terminator ("[DONE]", Claude message_stop).
    Done,
}

/// Per-request, line-oriented wire decoder. Framing differs per dialect
/// (prefix, terminator, payload path), so each adapter brings its own.
/// Malformed JSON on a data line is fatal (`UpstreamProtocol`), since the
/// wire contract is assumed stable; non-frame lines are skipped.
pub trait LineDecoder: Send {
    fn push_line(&mut self, line: &str) -> Result<LineEvent>;
}

/// Splits an incrementally delivered byte stream into complete lines.
///
/// Carries partial lines across network chunk boundaries, so decode output
/// never depends on how the provider's bytes happened to be packetized.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.drain(..=pos).collect::<Vec<u8>>();
            if line.ends_with(&[b'\n']) {
                line.pop();
            }
            if line.ends_with(&[b'\r']) {
                line.pop();
            }
            match String::from_utf8(line) {
                Ok(s) => out.push(s),
                // Lines are whole (no '\n' inside a UTF-8 sequence), so
                // this is genuinely malformed input; skip it.
                Err(_) => continue,
            }
        }
        out
    }

    /// Trailing bytes after the body ends without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        String::from_utf8(rest).ok()
    }
}

/// Selects the dialect for a provider config. A config with
/// `uses_prompt_endpoint` always routes through the DashScope prompt
/// dialect regardless of kind; Claude without streaming falls back to the
/// OpenAI-compatible dialect.
pub fn adapter_for(cfg: &ProviderConfig) -> Box<dyn ProviderAdapter> {
    if cfg.flags.uses_prompt_endpoint {
        return Box::new(dashscope::DashScopePromptAdapter);
    }
    match cfg.kind {
        ProviderKind::OpenAiCompatible
        | ProviderKind::QwenVl
        | ProviderKind::DeepSeek
        | ProviderKind::Deepbricks => Box::new(openai::OpenAiAdapter),
        ProviderKind::Claude => {
            if cfg.flags.stream {
                Box::new(claude::ClaudeAdapter)
            } else {
                Box::new(openai::OpenAiAdapter)
            }
        }
        ProviderKind::Gemini => Box::new(gemini::GeminiAdapter),
        ProviderKind::DashScopeChat => Box::new(dashscope::DashScopeChatAdapter),
        ProviderKind::DashScopePrompt => Box::new(dashscope::DashScopePromptAdapter),
        ProviderKind::Llama32 => Box::new(dashscope::Llama32Adapter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lines_are_reassembled_across_chunk_boundaries() {
        let mut s = LineSplitter::new();
        assert_eq!(s.push(b"data: {\"te"), Vec::<String>::new());
        assert_eq!(s.push(b"xt\":\"hi\"}\r\nda"), vec!["data: {\"text\":\"hi\"}"]);
        assert_eq!(s.push(b"ta: [DONE]\n"), vec!["data: [DONE]"]);
        assert_eq!(s.finish(), None);
    }

    #[test]
    fn blank_lines_are_preserved_for_decoders_to_skip() {
        let mut s = LineSplitter::new();
        assert_eq!(s.push(b"\n\nx\n"), vec!["", "", "x"]);
    }

    #[test]
    fn body_without_trailing_newline_is_flushed() {
        let mut s = LineSplitter::new();
        assert_eq!(s.push(b"a\nb"), vec!["a"]);
        assert_eq!(s.finish().as_deref(), Some("b"));
        assert_eq!(s.finish(), None);
    }

    #[test]
    fn multibyte_text_split_mid_character_survives() {
        let mut s = LineSplitter::new();
        let bytes = "data: {\"t\":\"你好\"}\n".as_bytes();
        let (a, b) = bytes.split_at(12); // inside 你
        assert_eq!(s.push(a), Vec::<String>::new());
        assert_eq!(s.push(b), vec!["data: {\"t\":\"你好\"}"]);
    }

    #[test]
    fn kind_names_round_trip_through_serde() {
        for (kind, name) in [
            (ProviderKind::OpenAiCompatible, "\"openai-compatible\""),
            (ProviderKind::DashScopePrompt, "\"dashscope-prompt\""),
            (ProviderKind::QwenVl, "\"qwen-vl\""),
            (ProviderKind::Llama32, "\"llama32\""),
        ] {
            assert_eq!(serde_json::to_string(&kind).unwrap(), name);
            assert_eq!(serde_json::from_str::<ProviderKind>(name).unwrap(), kind);
        }
    }

    #[test]
    fn text_only_dialects_opt_out_of_image_support() {
        assert!(openai::OpenAiAdapter.supports_images());
        assert!(claude::ClaudeAdapter.supports_images());
        assert!(gemini::GeminiAdapter.supports_images());
        assert!(!dashscope::DashScopeChatAdapter.supports_images());
        assert!(!dashscope::DashScopePromptAdapter.supports_images());
        assert!(!dashscope::Llama32Adapter.supports_images());
    }
}
