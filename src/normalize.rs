use crate::chat::{CanonicalDelta, RawFragment};

/// Opening marker for a reasoning segment: the downstream convention is a
/// `<think>` tag followed by a fenced "Thoughts" block, so the front end
/// can render reasoning distinctly without per-provider knowledge.
pub const THINK_OPEN: &str = "<think>\n\n```Thoughts\n\n";
/// Closing fence + tag, ending a reasoning segment.
pub const THINK_CLOSE: &str = "\n\n```\n\n</think>\n\n";

/// Literal tokens some OpenAI-compatible endpoints inline directly in the
/// content stream instead of using a dedicated reasoning field.
const INLINE_OPEN: &str = "<think>";
const INLINE_CLOSE: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThinkState {
    Outside,
    /// Provider streams reasoning through a dedicated field
    /// (DeepSeek `reasoning_content`).
    InReasoningField,
    /// Provider inlined a literal `<think>` token in content.
    InInlineThinkTag,
}

/// Per-request normalizer turning raw provider fragments into canonical
/// incremental deltas.
///
/// Two transforms run on every fragment, in order: cumulative-to-
/// incremental reconciliation for providers that repeat all text so far,
/// then reasoning-segment wrapping. Both are per-stream state; a fresh
/// normalizer is built for each request.
#[derive(Debug)]
pub struct DeltaNormalizer {
    /// Whether upstream chunks are already incremental.
    incremental: bool,
    /// Characters of cumulative content already emitted.
    seen: usize,
    state: ThinkState,
}

impl DeltaNormalizer {
    pub fn new(incremental: bool) -> Self {
        Self { incremental, seen: 0, state: ThinkState::Outside }
    }

    /// Feeds one raw fragment; returns zero or more deltas in order.
    /// A fragment carrying both reasoning and content yields the
    /// reasoning part first.
    pub fn push(&mut self, frag: &RawFragment) -> Vec<CanonicalDelta> {
        let mut out = Vec::new();

        if let Some(reasoning) = frag.reasoning.as_deref() {
            if !reasoning.is_empty() {
                self.push_reasoning(reasoning, &mut out);
            }
        }

        if let Some(content) = frag.content.as_deref() {
            if let Some(new) = self.reconcile(content) {
                self.push_content(&new, &mut out);
            }
        }

        out
    }

    /// True once an opened reasoning block was not closed by the stream
    /// itself; the pipeline closes it at end of stream.
    pub fn needs_close(&self) -> bool {
        self.state != ThinkState::Outside
    }

    /// Written at end of stream when the provider never signalled the end
    /// of its reasoning segment.
    pub fn close_delta(&mut self) -> Option<CanonicalDelta> {
        if self.state == ThinkState::Outside {
            return None;
        }
        self.state = ThinkState::Outside;
        Some(CanonicalDelta::reasoning(THINK_CLOSE))
    }

    /// Cumulative providers resend everything so far; keep only the new
    /// suffix. Incremental providers pass through untouched.
    fn reconcile(&mut self, content: &str) -> Option<String> {
        if self.incremental {
            if content.is_empty() {
                return None;
            }
            return Some(content.to_string());
        }

        // Index by chars, not bytes: the counter tracks what the caller
        // has already seen of multi-byte text.
        let new: String = content.chars().skip(self.seen).collect();
        self.seen = content.chars().count().max(self.seen);
        if new.is_empty() {
            None
        } else {
            Some(new)
        }
    }

    fn push_reasoning(&mut self, text: &str, out: &mut Vec<CanonicalDelta>) {
        match self.state {
            ThinkState::Outside => {
                out.push(CanonicalDelta::reasoning(format!("{THINK_OPEN}{text}")));
                self.state = ThinkState::InReasoningField;
            }
            // Already inside a reasoning block (either signal): never open
            // a second one, so markers stay balanced.
            ThinkState::InReasoningField | ThinkState::InInlineThinkTag => {
                out.push(CanonicalDelta::reasoning(text));
            }
        }
    }

    fn push_content(&mut self, text: &str, out: &mut Vec<CanonicalDelta>) {
        match self.state {
            ThinkState::Outside => {
                if text == INLINE_OPEN {
                    out.push(CanonicalDelta::reasoning(THINK_OPEN));
                    self.state = ThinkState::InInlineThinkTag;
                } else {
                    out.push(CanonicalDelta::text(text));
                }
            }
            ThinkState::InReasoningField => {
                if text == INLINE_OPEN {
                    // Overlapping signals: the inline tag inside an open
                    // reasoning-field block passes through as reasoning.
                    out.push(CanonicalDelta::reasoning(text));
                } else {
                    // First normal content ends the reasoning segment.
                    out.push(CanonicalDelta::text(format!("{THINK_CLOSE}{text}")));
                    self.state = ThinkState::Outside;
                }
            }
            ThinkState::InInlineThinkTag => {
                if text == INLINE_CLOSE {
                    out.push(CanonicalDelta::reasoning(THINK_CLOSE));
                    self.state = ThinkState::Outside;
                } else {
                    out.push(CanonicalDelta::reasoning(text));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn content(s: &str) -> RawFragment {
        RawFragment::content(s)
    }

    fn reasoning(s: &str) -> RawFragment {
        RawFragment { reasoning: Some(s.to_string()), ..RawFragment::default() }
    }

    fn texts(n: &mut DeltaNormalizer, frags: &[RawFragment]) -> Vec<String> {
        frags
            .iter()
            .flat_map(|f| n.push(f))
            .map(|d| d.text)
            .collect()
    }

    #[test]
    fn incremental_content_passes_through() {
        let mut n = DeltaNormalizer::new(true);
        let out = texts(&mut n, &[content("He"), content("llo")]);
        assert_eq!(out, vec!["He", "llo"]);
    }

    #[test]
    fn cumulative_content_is_diffed_without_overlap_or_gap() {
        let mut n = DeltaNormalizer::new(false);
        let out = texts(&mut n, &[content("He"), content("Hello"), content("Hello!")]);
        assert_eq!(out, vec!["He", "llo", "!"]);
        assert_eq!(out.concat(), "Hello!");
    }

    #[test]
    fn cumulative_diff_counts_chars_not_bytes() {
        let mut n = DeltaNormalizer::new(false);
        let out = texts(&mut n, &[content("你好"), content("你好世界")]);
        assert_eq!(out, vec!["你好", "世界"]);
    }

    #[test]
    fn cumulative_repeat_of_same_text_emits_nothing() {
        let mut n = DeltaNormalizer::new(false);
        let out = texts(&mut n, &[content("Hi"), content("Hi")]);
        assert_eq!(out, vec!["Hi"]);
    }

    #[test]
    fn reasoning_field_is_wrapped_with_markers() {
        // DeepSeek-style stream: reasoning_content first, then content.
        let mut n = DeltaNormalizer::new(true);
        let out = texts(&mut n, &[reasoning("thinking"), content("hello")]);
        assert_eq!(
            out,
            vec![
                "<think>\n\n```Thoughts\n\nthinking",
                "\n\n```\n\n</think>\n\nhello",
            ]
        );
    }

    #[test]
    fn consecutive_reasoning_fragments_open_one_block() {
        let mut n = DeltaNormalizer::new(true);
        let out = texts(&mut n, &[reasoning("a"), reasoning("b"), content("c")]);
        assert_eq!(out[0], format!("{THINK_OPEN}a"));
        assert_eq!(out[1], "b");
        assert_eq!(out[2], format!("{THINK_CLOSE}c"));
    }

    #[test]
    fn inline_think_tags_are_rewrapped() {
        let mut n = DeltaNormalizer::new(true);
        let out = texts(
            &mut n,
            &[content("<think>"), content("pondering"), content("</think>"), content("done")],
        );
        assert_eq!(out, vec![THINK_OPEN, "pondering", THINK_CLOSE, "done"]);
    }

    #[test]
    fn reasoning_flag_marks_think_block_fragments() {
        let mut n = DeltaNormalizer::new(true);
        let deltas: Vec<_> = [reasoning("a"), content("b")]
            .iter()
            .flat_map(|f| n.push(f))
            .collect();
        assert!(deltas[0].reasoning);
        assert!(!deltas[1].reasoning);
    }

    #[test]
    fn overlapping_signals_never_unbalance_markers() {
        let mut n = DeltaNormalizer::new(true);
        let out = texts(
            &mut n,
            &[reasoning("a"), content("<think>"), reasoning("b"), content("done")],
        );
        // Exactly one opening and one closing marker.
        let joined = out.concat();
        assert_eq!(joined.matches("```Thoughts").count(), 1);
        assert_eq!(joined.matches(THINK_CLOSE).count(), 1);
    }

    #[test]
    fn unterminated_reasoning_is_closed_at_end_of_stream() {
        let mut n = DeltaNormalizer::new(true);
        let _ = n.push(&reasoning("dangling"));
        assert!(n.needs_close());
        assert_eq!(n.close_delta().unwrap().text, THINK_CLOSE);
        assert!(n.close_delta().is_none());
    }

    #[test]
    fn fragment_with_reasoning_and_content_orders_reasoning_first() {
        let mut n = DeltaNormalizer::new(true);
        let frag = RawFragment {
            reasoning: Some("why".to_string()),
            content: Some("what".to_string()),
            session_id: None,
        };
        let out: Vec<_> = n.push(&frag).into_iter().map(|d| d.text).collect();
        assert_eq!(out[0], format!("{THINK_OPEN}why"));
        assert_eq!(out[1], format!("{THINK_CLOSE}what"));
    }

    #[test]
    fn empty_fragments_emit_nothing() {
        let mut n = DeltaNormalizer::new(true);
        assert!(n.push(&RawFragment::default()).is_empty());
        assert!(n.push(&content("")).is_empty());
        assert!(n.push(&reasoning("")).is_empty());
    }
}
