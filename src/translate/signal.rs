//! Signal text-style codec.
//!
//! Signal carries plain text plus `start:length:STYLE` entries whose offsets
//! count UTF-16 code units.

use crate::common::types::WireText;

use super::rich::{Degradation, RichText, Span, SpanKind};

/// Signal style name for a span kind, `None` if Signal has no equivalent.
pub fn style_name(kind: &SpanKind) -> Option<&'static str> {
    match kind {
        SpanKind::Bold => Some("BOLD"),
        SpanKind::Italic => Some("ITALIC"),
        SpanKind::Strikethrough => Some("STRIKETHROUGH"),
        SpanKind::Spoiler => Some("SPOILER"),
        SpanKind::Monospace => Some("MONOSPACE"),
        SpanKind::Link { .. } => None,
    }
}

fn kind_for_style(style: &str) -> Option<SpanKind> {
    match style {
        "BOLD" => Some(SpanKind::Bold),
        "ITALIC" => Some(SpanKind::Italic),
        "STRIKETHROUGH" => Some(SpanKind::Strikethrough),
        "SPOILER" => Some(SpanKind::Spoiler),
        "MONOSPACE" => Some(SpanKind::Monospace),
        _ => None,
    }
}

/// Number of UTF-16 code units in `text[..byte]`.
fn utf16_offset(text: &str, byte: usize) -> usize {
    text[..byte].encode_utf16().count()
}

/// Byte offset of the char starting at UTF-16 offset `units`.
///
/// `None` when `units` is past the end or falls inside a surrogate pair.
fn byte_offset(text: &str, units: usize) -> Option<usize> {
    let mut counted = 0;
    for (byte, ch) in text.char_indices() {
        if counted == units {
            return Some(byte);
        }
        if counted > units {
            return None;
        }
        counted += ch.len_utf16();
    }
    (counted == units).then_some(text.len())
}

/// Render rich text as Signal plain text plus styles.
///
/// Spans without a Signal style are skipped; the caller filters and reports them.
pub fn render(rich: &RichText) -> WireText {
    let styles = rich
        .sorted_spans()
        .into_iter()
        .filter_map(|span| {
            let style = style_name(&span.kind)?;
            let start = utf16_offset(&rich.text, span.start);
            let len = utf16_offset(&rich.text, span.end) - start;
            Some(format!("{}:{}:{}", start, len, style))
        })
        .collect();

    WireText {
        text: rich.text.clone(),
        styles,
    }
}

/// Parse Signal plain text plus styles into rich text.
///
/// Unknown, malformed, out-of-range and crossing styles are dropped and reported.
pub fn parse(wire: &WireText) -> (RichText, Vec<Degradation>) {
    let mut degradations = Vec::new();
    let mut spans = Vec::with_capacity(wire.styles.len());

    for entry in &wire.styles {
        match parse_entry(&wire.text, entry) {
            Some(span) => spans.push(span),
            None => degradations.push(Degradation::Malformed {
                entry: entry.clone(),
            }),
        }
    }

    let (rich, dropped) = RichText::from_spans(wire.text.clone(), spans);
    degradations.extend(dropped);
    (rich, degradations)
}

fn parse_entry(text: &str, entry: &str) -> Option<Span> {
    let mut parts = entry.splitn(3, ':');
    let start: usize = parts.next()?.trim().parse().ok()?;
    let len: usize = parts.next()?.trim().parse().ok()?;
    let kind = kind_for_style(parts.next()?.trim())?;

    let start_byte = byte_offset(text, start)?;
    let end_byte = byte_offset(text, start.checked_add(len)?)?;
    Some(Span::new(start_byte, end_byte, kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_uses_utf16_offsets() {
        // The emoji is one char, four bytes, two UTF-16 units.
        let text = "👋 hi";
        let start = text.find("hi").unwrap();
        let rich = RichText {
            text: text.into(),
            spans: vec![Span::new(start, start + 2, SpanKind::Bold)],
        };

        let wire = render(&rich);
        assert_eq!(wire.styles, vec!["3:2:BOLD"]);
    }

    #[test]
    fn test_parse_uses_utf16_offsets() {
        let wire = WireText {
            text: "👋 hi".into(),
            styles: vec!["3:2:ITALIC".into()],
        };
        let (rich, degradations) = parse(&wire);
        assert!(degradations.is_empty());
        assert_eq!(&rich.text[rich.spans[0].start..rich.spans[0].end], "hi");
    }

    #[test]
    fn test_link_has_no_style() {
        let rich = RichText {
            text: "see docs".into(),
            spans: vec![
                Span::new(
                    4,
                    8,
                    SpanKind::Link {
                        url: "https://example.org".into(),
                    },
                ),
                Span::new(0, 3, SpanKind::Bold),
            ],
        };

        let wire = render(&rich);
        assert_eq!(wire.text, "see docs");
        assert_eq!(wire.styles, vec!["0:3:BOLD"]);
    }

    #[test]
    fn test_parse_rejects_bad_entries() {
        let wire = WireText {
            text: "hello".into(),
            styles: vec![
                "0:5:BOLD".into(),
                "0:99:ITALIC".into(),
                "x:1:BOLD".into(),
                "0:1:UNDERLINE".into(),
            ],
        };
        let (rich, degradations) = parse(&wire);
        assert_eq!(rich.spans, vec![Span::new(0, 5, SpanKind::Bold)]);
        assert_eq!(degradations.len(), 3);
    }

    #[test]
    fn test_parse_rejects_split_surrogate() {
        let wire = WireText {
            text: "👋".into(),
            styles: vec!["1:1:BOLD".into()],
        };
        let (rich, degradations) = parse(&wire);
        assert!(rich.spans.is_empty());
        assert_eq!(degradations.len(), 1);
    }

    #[test]
    fn test_byte_offset_at_end() {
        assert_eq!(byte_offset("abc", 3), Some(3));
        assert_eq!(byte_offset("abc", 4), None);
        assert_eq!(byte_offset("", 0), Some(0));
    }
}
