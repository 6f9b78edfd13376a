//! Sender attribution for relayed group messages.
//!
//! Signal groups show every relayed message as sent by the relay account, so
//! group messages get the original sender's name in front.
//! Supports placeholders: %user, %message

use super::rich::RichText;

/// Default attribution template.
pub const DEFAULT_ATTRIBUTION: &str = "%user: %message";

/// Substitutes the sender around a message according to a template.
#[derive(Debug, Clone)]
pub struct Attribution {
    /// Template text before `%message`.
    prefix: String,
    /// Template text after `%message`.
    suffix: String,
}

impl Default for Attribution {
    fn default() -> Self {
        Self::new(DEFAULT_ATTRIBUTION)
    }
}

impl Attribution {
    /// Create from a template. A template without `%message` appends the message.
    pub fn new(template: &str) -> Self {
        let (prefix, suffix) = template.split_once("%message").unwrap_or((template, ""));
        Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        }
    }

    /// Put `user` around `body`, keeping the body's spans on the same characters.
    ///
    /// A message without text (e.g. a bare photo) gets the trimmed prefix only.
    pub fn apply(&self, user: &str, body: RichText) -> RichText {
        let prefix = self.prefix.replace("%user", user);
        let suffix = self.suffix.replace("%user", user);

        if body.is_empty() {
            let line = format!("{}{}", prefix, suffix);
            return RichText::plain(line.trim_end());
        }
        body.wrap(&prefix, &suffix)
    }
}
