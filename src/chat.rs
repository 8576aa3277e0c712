use serde::{Deserialize, Serialize};

/// One canonical chat request, relayed to whichever provider the model
/// name resolves to. Owned by exactly one in-flight call; the caller
/// supplies the full history each turn (nothing is persisted here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model name, looked up in the registry.
    pub model: String,

    /// Request-level web-search toggle; effective only when the provider
    /// config also enables it.
    #[serde(default)]
    pub enable_search: bool,

    pub history: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,

    /// Attachment URLs, in order. Dropped silently when the provider does
    /// not accept image uploads.
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Wire name used by every provider except Gemini, which maps
    /// assistant to "model".
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A history message with its attachments already fetched and encoded.
/// Translators consume this, so building a provider payload never does I/O.
#[derive(Debug, Clone)]
pub struct ResolvedMessage {
    pub role: Role,
    pub content: String,
    pub images: Vec<EncodedImage>,
}

impl ResolvedMessage {
    /// Content as replayed upstream: assistant turns lose their
    /// `<think>…</think>` spans so reasoning is never re-sent as context.
    pub fn replay_content(&self) -> String {
        match self.role {
            Role::Assistant => strip_think_spans(&self.content),
            _ => self.content.clone(),
        }
    }
}

/// Preprocessed attachment: always JPEG after re-encoding.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub base64: String,
}

impl EncodedImage {
    pub const MEDIA_TYPE: &'static str = "image/jpeg";

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", Self::MEDIA_TYPE, self.base64)
    }
}

/// Provider-agnostic incremental fragment, delivered downstream in strict
/// upstream arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalDelta {
    pub text: String,
    pub reasoning: bool,
}

impl CanonicalDelta {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), reasoning: false }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self { text: text.into(), reasoning: true }
    }
}

/// Raw per-chunk output of a provider adapter, before normalization.
/// Never exposed outside the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFragment {
    pub content: Option<String>,
    /// Dedicated reasoning field, where the provider has one
    /// (e.g. DeepSeek `reasoning_content`).
    pub reasoning: Option<String>,
    /// Continuation token carried by DashScope prompt-mode chunks.
    pub session_id: Option<String>,
}

impl RawFragment {
    pub fn content(text: impl Into<String>) -> Self {
        Self { content: Some(text.into()), ..Self::default() }
    }
}

/// Removes `<think>…</think>` spans from assistant-authored text before it
/// is replayed upstream as context. An unclosed opening tag strips to the
/// end of the message.
pub fn strip_think_spans(text: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        let Some(start) = rest.find(OPEN) else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        rest = &after_open[end + CLOSE.len()..];
    }
    out
}
