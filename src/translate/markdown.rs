//! Telegram markdown codec.
//!
//! Supports `**bold**`, `__italic__`, `~~strike~~`, `||spoiler||`, `` `mono` ``
//! and `[text](url)`. Markers nest; monospace content is taken literally.
//! Outside monospace a backslash escapes the next marker character.

use fancy_regex::Regex;
use tracing::warn;

use super::rich::{RichText, Span, SpanKind};

const MARKDOWN_PATTERN: &str = concat!(
    r"\\(?P<escaped>[\\*_~|`\[\]])",
    r"|\*\*(?P<bold>(?:\\[\s\S]|[\s\S])+?)\*\*",
    r"|__(?P<italic>(?:\\[\s\S]|[\s\S])+?)__",
    r"|~~(?P<strike>(?:\\[\s\S]|[\s\S])+?)~~",
    r"|\|\|(?P<spoiler>(?:\\[\s\S]|[\s\S])+?)\|\|",
    r"|`(?P<mono>[^`]+)`",
    r"|\[(?P<label>(?:\\[\s\S]|[^\]\\])+)\]\((?P<url>[^)\s]+)\)",
);

/// Characters escaped in plain text so they are never read as markers.
const ESCAPED: &[char] = &['\\', '*', '_', '~', '|', '`', '[', ']'];

/// Parses and renders Telegram's markdown flavour.
#[derive(Debug, Clone)]
pub struct MarkdownCodec {
    pattern: Regex,
}

impl Default for MarkdownCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownCodec {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(MARKDOWN_PATTERN).expect("markdown pattern is valid"),
        }
    }

    /// Strip markdown markers into plain text plus spans.
    ///
    /// Unmatched markers stay in the text verbatim.
    pub fn parse(&self, input: &str) -> RichText {
        let mut out = RichText::default();
        self.parse_into(input, &mut out);
        out
    }

    fn parse_into(&self, input: &str, out: &mut RichText) {
        let mut last = 0;
        for caps in self.pattern.captures_iter(input) {
            let caps = match caps {
                Ok(caps) => caps,
                Err(e) => {
                    warn!("Markdown match error: {}", e);
                    break;
                }
            };
            let Some(whole) = caps.get(0) else {
                continue;
            };

            out.text.push_str(&input[last..whole.start()]);
            let start = out.text.len();

            if let Some(escaped) = caps.name("escaped") {
                out.text.push_str(escaped.as_str());
            } else if let Some(mono) = caps.name("mono") {
                out.text.push_str(mono.as_str());
                out.spans
                    .push(Span::new(start, out.text.len(), SpanKind::Monospace));
            } else {
                let (kind, inner) = if let Some(m) = caps.name("bold") {
                    (SpanKind::Bold, m.as_str())
                } else if let Some(m) = caps.name("italic") {
                    (SpanKind::Italic, m.as_str())
                } else if let Some(m) = caps.name("strike") {
                    (SpanKind::Strikethrough, m.as_str())
                } else if let Some(m) = caps.name("spoiler") {
                    (SpanKind::Spoiler, m.as_str())
                } else if let (Some(label), Some(url)) = (caps.name("label"), caps.name("url")) {
                    (
                        SpanKind::Link {
                            url: url.as_str().to_string(),
                        },
                        label.as_str(),
                    )
                } else {
                    out.text.push_str(whole.as_str());
                    last = whole.end();
                    continue;
                };

                self.parse_into(inner, out);
                let end = out.text.len();
                if end > start {
                    out.spans.push(Span::new(start, end, kind));
                }
            }

            last = whole.end();
        }
        out.text.push_str(&input[last..]);
    }

    /// Render plain text plus spans back into markdown.
    pub fn render(&self, rich: &RichText) -> String {
        let spans = rich.sorted_spans();
        let mut out = String::with_capacity(rich.text.len() + spans.len() * 4);
        let mut open: Vec<&Span> = Vec::new();
        let mut next = 0;
        let mut pos = 0;

        let mut boundaries: Vec<usize> = spans
            .iter()
            .flat_map(|s| [s.start, s.end])
            .chain([rich.text.len()])
            .collect();
        boundaries.sort_unstable();
        boundaries.dedup();

        for boundary in boundaries {
            let segment = &rich.text[pos..boundary];
            if open.iter().any(|span| span.kind == SpanKind::Monospace) {
                out.push_str(segment);
            } else {
                push_escaped(&mut out, segment);
            }
            pos = boundary;

            while let Some(top) = open.last() {
                if top.end > pos {
                    break;
                }
                out.push_str(&close_marker(&top.kind));
                open.pop();
            }
            while next < spans.len() && spans[next].start == pos {
                let span = spans[next];
                out.push_str(open_marker(&span.kind));
                open.push(span);
                next += 1;
            }
        }

        while let Some(span) = open.pop() {
            out.push_str(&close_marker(&span.kind));
        }
        out
    }
}

fn push_escaped(out: &mut String, text: &str) {
    for ch in text.chars() {
        if ESCAPED.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
}

fn open_marker(kind: &SpanKind) -> &'static str {
    match kind {
        SpanKind::Bold => "**",
        SpanKind::Italic => "__",
        SpanKind::Strikethrough => "~~",
        SpanKind::Spoiler => "||",
        SpanKind::Monospace => "`",
        SpanKind::Link { .. } => "[",
    }
}

fn close_marker(kind: &SpanKind) -> String {
    match kind {
        SpanKind::Link { url } => format!("]({})", url),
        other => open_marker(other).to_string(),
    }
}
