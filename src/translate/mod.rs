//! Message text translation between Telegram markdown and Signal text styles.
//!
//! Everything here is pure: no I/O, no logging of its own. Lost formatting is
//! returned as [`Degradation`]s for the caller to report.

mod attribution;
mod markdown;
mod rich;
mod signal;

use attribution::{Attribution, DEFAULT_ATTRIBUTION};
use markdown::MarkdownCodec;
use rich::{Degradation, RichText, SpanKind};

use crate::common::types::{Direction, Platform, WireText};

/// Whether `platform` can display spans of `kind`.
fn supports(platform: Platform, kind: &SpanKind) -> bool {
    match platform {
        Platform::Telegram => true,
        Platform::Signal => signal::style_name(kind).is_some(),
    }
}

/// Result of translating one message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub wire: WireText,
    pub degradations: Vec<Degradation>,
}

/// Converts message bodies between the two platforms' wire formats.
#[derive(Debug, Clone)]
pub struct Translator {
    markdown: MarkdownCodec,
    attribution: Attribution,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new(DEFAULT_ATTRIBUTION)
    }
}

impl Translator {
    pub fn new(attribution_template: &str) -> Self {
        Self {
            markdown: MarkdownCodec::new(),
            attribution: Attribution::new(attribution_template),
        }
    }

    /// Decode a platform's wire text into rich text.
    pub fn parse(&self, platform: Platform, wire: &WireText) -> (RichText, Vec<Degradation>) {
        match platform {
            Platform::Telegram => (self.markdown.parse(&wire.text), Vec::new()),
            Platform::Signal => signal::parse(wire),
        }
    }

    /// Encode rich text for a platform, dropping spans it cannot display.
    pub fn render(&self, platform: Platform, rich: &RichText) -> (WireText, Vec<Degradation>) {
        let mut rich = rich.clone();
        let degradations = rich
            .retain_spans(|kind| supports(platform, kind))
            .into_iter()
            .map(|kind| Degradation::Unsupported { kind, platform })
            .collect();

        let wire = match platform {
            Platform::Telegram => WireText::plain(self.markdown.render(&rich)),
            Platform::Signal => signal::render(&rich),
        };
        (wire, degradations)
    }

    /// Translate a message body in `direction`, prefixing `sender` when given.
    pub fn translate(
        &self,
        direction: Direction,
        wire: &WireText,
        sender: Option<&str>,
    ) -> Translation {
        let (mut rich, mut degradations) = self.parse(direction.source(), wire);
        if let Some(sender) = sender {
            rich = self.attribution.apply(sender, rich);
        }
        let (wire, rendered) = self.render(direction.destination(), &rich);
        degradations.extend(rendered);
        Translation { wire, degradations }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator() -> Translator {
        Translator::default()
    }

    #[test]
    fn test_group_message_gets_attribution() {
        let out = translator().translate(
            Direction::TelegramToSignal,
            &WireText::plain("**hello** world"),
            Some("Alice"),
        );

        assert_eq!(out.wire.text, "Alice: hello world");
        assert_eq!(out.wire.styles, vec!["7:5:BOLD"]);
        assert!(out.degradations.is_empty());
    }

    #[test]
    fn test_private_message_has_no_attribution() {
        let out = translator().translate(
            Direction::TelegramToSignal,
            &WireText::plain("__hi__"),
            None,
        );
        assert_eq!(out.wire.text, "hi");
        assert_eq!(out.wire.styles, vec!["0:2:ITALIC"]);
    }

    #[test]
    fn test_supported_spans_round_trip() {
        let t = translator();
        let source = WireText::plain("**a __b__** ~~c~~ ||d|| `e` plain 👋 **f**");

        let to_signal = t.translate(Direction::TelegramToSignal, &source, None);
        assert!(to_signal.degradations.is_empty());

        let back = t.translate(Direction::SignalToTelegram, &to_signal.wire, None);
        assert!(back.degradations.is_empty());

        let original = t.parse(Platform::Telegram, &source).0;
        let round_tripped = t.parse(Platform::Telegram, &back.wire).0;
        assert_eq!(round_tripped.text, original.text);
        assert_eq!(round_tripped.sorted_spans(), original.sorted_spans());
    }

    #[test]
    fn test_signal_text_with_marker_characters_survives() {
        let t = translator();
        let source = WireText::plain("2**3 = 8 and 4**2 = 16, file my__init__.py");

        let out = t.translate(Direction::SignalToTelegram, &source, None);
        let parsed = t.parse(Platform::Telegram, &out.wire).0;
        assert_eq!(parsed, RichText::plain(source.text.as_str()));
    }

    #[test]
    fn test_link_is_the_only_lossy_kind() {
        let t = translator();
        let source = WireText::plain("**x** [docs](https://example.org)");

        let to_signal = t.translate(Direction::TelegramToSignal, &source, None);
        assert_eq!(to_signal.wire.text, "x docs");
        assert_eq!(to_signal.degradations.len(), 1);

        let back = t.translate(Direction::SignalToTelegram, &to_signal.wire, None);
        assert_eq!(back.wire.text, "**x** docs");
    }

    #[test]
    fn test_only_links_are_unsupported_on_signal() {
        let t = translator();
        let rich = t
            .parse(
                Platform::Telegram,
                &WireText::plain("**a** __b__ ~~c~~ ||d|| `e` [f](https://example.org)"),
            )
            .0;

        let (_, to_telegram) = t.render(Platform::Telegram, &rich);
        assert!(to_telegram.is_empty());

        let (wire, to_signal) = t.render(Platform::Signal, &rich);
        assert_eq!(wire.styles.len(), 5);
        assert_eq!(
            to_signal,
            vec![Degradation::Unsupported {
                kind: SpanKind::Link {
                    url: "https://example.org".into()
                },
                platform: Platform::Signal,
            }]
        );
    }

    #[test]
    fn test_crossing_signal_styles_degrade() {
        let wire = WireText {
            text: "hello world".into(),
            styles: vec!["0:7:BOLD".into(), "4:5:ITALIC".into()],
        };
        let out = translator().translate(Direction::SignalToTelegram, &wire, None);
        assert_eq!(out.wire.text, "**hello w**orld");
        assert_eq!(out.degradations.len(), 1);
    }
}
