use crate::chat::CanonicalDelta;
use crate::error::{GatewayError, Result};
use futures::StreamExt;
use futures_core::stream::BoxStream;
use serde::Serialize;

/// One outbound event record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Content { content: String },
    Error { error: String },
}

/// Terminal marker; the consumer's protocol state machine always observes
/// it exactly once, on success, error and cancellation alike.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Serializes one record as an SSE frame.
pub fn frame(record: &Record) -> String {
    // Record serialization cannot fail: both variants are a single string
    // field.
    let json = serde_json::to_string(record).unwrap_or_default();
    format!("data: {json}\n\n")
}

/// Wraps a canonical delta stream into framed event records.
///
/// Each delta becomes one `{"content": ...}` frame. The first error ends
/// the stream with one `{"error": ...}` frame. Every path then yields the
/// `[DONE]` frame exactly once.
pub fn frame_stream(deltas: BoxStream<'static, Result<CanonicalDelta>>) -> BoxStream<'static, String> {
    enum State {
        Streaming(BoxStream<'static, Result<CanonicalDelta>>),
        Terminal,
        Finished,
    }

    futures::stream::unfold(State::Streaming(deltas), |state| async move {
        match state {
            State::Finished => None,
            State::Terminal => Some((DONE_FRAME.to_string(), State::Finished)),
            State::Streaming(mut deltas) => match deltas.next().await {
                Some(Ok(delta)) => Some((
                    frame(&Record::Content { content: delta.text }),
                    State::Streaming(deltas),
                )),
                Some(Err(e)) => Some((frame(&error_record(&e)), State::Terminal)),
                None => Some((DONE_FRAME.to_string(), State::Finished)),
            },
        }
    })
    .boxed()
}

fn error_record(e: &GatewayError) -> Record {
    Record::Error { error: e.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn collect(items: Vec<Result<CanonicalDelta>>) -> Vec<String> {
        let stream = futures::stream::iter(items).boxed();
        futures::executor::block_on(frame_stream(stream).collect())
    }

    #[test]
    fn deltas_become_content_records_with_one_terminal() {
        let frames = collect(vec![
            Ok(CanonicalDelta::text("He")),
            Ok(CanonicalDelta::text("llo")),
        ]);
        assert_eq!(
            frames,
            vec![
                "data: {\"content\":\"He\"}\n\n",
                "data: {\"content\":\"llo\"}\n\n",
                DONE_FRAME,
            ]
        );
    }

    #[test]
    fn error_is_one_record_followed_by_terminal() {
        let frames = collect(vec![
            Ok(CanonicalDelta::text("partial")),
            Err(GatewayError::UpstreamProtocol("upstream returned HTTP 500".to_string())),
        ]);
        assert_eq!(frames.len(), 3);
        assert!(frames[1].contains("\"error\""));
        assert_eq!(frames[2], DONE_FRAME);
    }

    #[test]
    fn empty_stream_still_terminates_exactly_once() {
        let frames = collect(vec![]);
        assert_eq!(frames, vec![DONE_FRAME.to_string()]);
    }

    #[test]
    fn nothing_follows_an_error_record_but_the_terminal() {
        let frames = collect(vec![
            Err(GatewayError::NotConfigured("ghost".to_string())),
            Ok(CanonicalDelta::text("never delivered")),
        ]);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("\"error\""));
        assert_eq!(frames[1], DONE_FRAME);
    }
}
