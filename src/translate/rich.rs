//! Platform-neutral rich text.
//!
//! Span offsets are byte offsets into `text`, always on char boundaries.
//! Spans may nest but never cross.

use std::fmt;

use crate::common::types::Platform;

/// Formatting applied to a range of text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpanKind {
    Bold,
    Italic,
    Strikethrough,
    Spoiler,
    Monospace,
    Link { url: String },
}

impl SpanKind {
    pub fn name(&self) -> &'static str {
        match self {
            SpanKind::Bold => "bold",
            SpanKind::Italic => "italic",
            SpanKind::Strikethrough => "strikethrough",
            SpanKind::Spoiler => "spoiler",
            SpanKind::Monospace => "monospace",
            SpanKind::Link { .. } => "link",
        }
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A formatted byte range `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub kind: SpanKind,
}

impl Span {
    pub fn new(start: usize, end: usize, kind: SpanKind) -> Self {
        Self { start, end, kind }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Whether `self` and `other` overlap without one containing the other.
    pub fn crosses(&self, other: &Span) -> bool {
        let overlap = self.start < other.end && other.start < self.end;
        let nested = (self.start <= other.start && other.end <= self.end)
            || (other.start <= self.start && self.end <= other.end);
        overlap && !nested
    }
}

/// Formatting lost during translation. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Degradation {
    /// The destination platform cannot express this kind of span.
    Unsupported { kind: SpanKind, platform: Platform },
    /// The span crossed an earlier span.
    Crossing { kind: SpanKind },
    /// A style entry that could not be understood.
    Malformed { entry: String },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::Unsupported { kind, platform } => {
                write!(f, "{} spans are not supported on {}", kind, platform)
            }
            Degradation::Crossing { kind } => write!(f, "{} span crosses another span", kind),
            Degradation::Malformed { entry } => write!(f, "malformed style '{}'", entry),
        }
    }
}

/// Plain text plus well-nested formatting spans.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RichText {
    pub text: String,
    pub spans: Vec<Span>,
}

impl RichText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            spans: Vec::new(),
        }
    }

    /// Build from arbitrary spans, dropping empty, out-of-range and crossing ones.
    pub fn from_spans(text: impl Into<String>, spans: Vec<Span>) -> (Self, Vec<Degradation>) {
        let text = text.into();
        let mut candidates = spans;
        candidates.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

        let mut kept: Vec<Span> = Vec::with_capacity(candidates.len());
        let mut degradations = Vec::new();
        for span in candidates {
            if span.is_empty()
                || span.end > text.len()
                || !text.is_char_boundary(span.start)
                || !text.is_char_boundary(span.end)
            {
                degradations.push(Degradation::Malformed {
                    entry: format!("{}:{}:{}", span.start, span.end, span.kind),
                });
                continue;
            }
            if kept.iter().any(|k| k.crosses(&span)) {
                degradations.push(Degradation::Crossing { kind: span.kind });
                continue;
            }
            kept.push(span);
        }

        (Self { text, spans: kept }, degradations)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Spans ordered outermost first: by start, longer spans before shorter ones.
    pub fn sorted_spans(&self) -> Vec<&Span> {
        let mut spans: Vec<&Span> = self.spans.iter().collect();
        spans.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
        spans
    }

    /// Surround the text with `prefix` and `suffix`, shifting spans to match.
    pub fn wrap(mut self, prefix: &str, suffix: &str) -> Self {
        let shift = prefix.len();
        for span in &mut self.spans {
            span.start += shift;
            span.end += shift;
        }
        self.text = format!("{}{}{}", prefix, self.text, suffix);
        self
    }

    /// Drop every span `keep` rejects, returning what was dropped.
    pub fn retain_spans(&mut self, mut keep: impl FnMut(&SpanKind) -> bool) -> Vec<SpanKind> {
        let mut dropped = Vec::new();
        self.spans.retain(|span| {
            let retain = keep(&span.kind);
            if !retain {
                dropped.push(span.kind.clone());
            }
            retain
        });
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crosses() {
        let outer = Span::new(0, 10, SpanKind::Bold);
        let inner = Span::new(2, 5, SpanKind::Italic);
        let crossing = Span::new(5, 12, SpanKind::Italic);
        let after = Span::new(10, 12, SpanKind::Italic);

        assert!(!outer.crosses(&inner));
        assert!(!inner.crosses(&outer));
        assert!(outer.crosses(&crossing));
        assert!(!outer.crosses(&after));
    }

    #[test]
    fn test_from_spans_drops_crossing() {
        let (rich, degradations) = RichText::from_spans(
            "hello world",
            vec![
                Span::new(0, 5, SpanKind::Bold),
                Span::new(3, 8, SpanKind::Italic),
                Span::new(6, 11, SpanKind::Spoiler),
            ],
        );

        assert_eq!(
            rich.spans,
            vec![
                Span::new(0, 5, SpanKind::Bold),
                Span::new(6, 11, SpanKind::Spoiler)
            ]
        );
        assert_eq!(
            degradations,
            vec![Degradation::Crossing {
                kind: SpanKind::Italic
            }]
        );
    }

    #[test]
    fn test_from_spans_rejects_non_boundary() {
        let (rich, degradations) =
            RichText::from_spans("héllo", vec![Span::new(0, 2, SpanKind::Bold)]);
        assert!(rich.spans.is_empty());
        assert_eq!(degradations.len(), 1);
    }

    #[test]
    fn test_wrap_shifts_spans() {
        let rich = RichText {
            text: "hello world".into(),
            spans: vec![Span::new(0, 5, SpanKind::Bold)],
        }
        .wrap("Alice: ", "");

        assert_eq!(rich.text, "Alice: hello world");
        assert_eq!(rich.spans, vec![Span::new(7, 12, SpanKind::Bold)]);
        assert_eq!(&rich.text[7..12], "hello");
    }
}
