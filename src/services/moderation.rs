use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Knobs forwarded to the spam checker on every send.
#[derive(Debug, Clone, Copy)]
pub struct SpamOptions {
    pub max_url_count: usize,
    pub max_per_minute: u32,
    pub check_duplicates: bool,
    pub check_keywords: bool,
}

impl Default for SpamOptions {
    fn default() -> Self {
        Self { max_url_count: 3, max_per_minute: 10, check_duplicates: true, check_keywords: true }
    }
}

#[derive(Debug, Clone)]
pub struct SpamVerdict {
    pub is_spam: bool,
    pub reason: Option<String>,
    pub score: f32,
}

impl SpamVerdict {
    #[must_use]
    pub const fn clean() -> Self {
        Self { is_spam: false, reason: None, score: 0.0 }
    }
}

/// External content sanitizer. Must run before the spam check and before
/// persistence; failures here fail closed.
#[async_trait]
pub trait ContentSanitizer: Send + Sync + std::fmt::Debug {
    async fn sanitize(&self, message: &str, strict: bool) -> Result<String>;
}

/// External spam scorer. Failures here fail closed.
#[async_trait]
pub trait SpamChecker: Send + Sync + std::fmt::Debug {
    async fn check(&self, sender_id: Uuid, content: &str, options: &SpamOptions) -> Result<SpamVerdict>;
}

/// Minimal escaping sanitizer used when no richer implementation is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscapingSanitizer;

#[async_trait]
impl ContentSanitizer for EscapingSanitizer {
    async fn sanitize(&self, message: &str, strict: bool) -> Result<String> {
        let mut out = String::with_capacity(message.len());
        for c in message.chars() {
            match c {
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '&' => out.push_str("&amp;"),
                '"' if strict => out.push_str("&quot;"),
                '\'' if strict => out.push_str("&#x27;"),
                c if c.is_control() && c != '\n' && c != '\t' => {}
                c => out.push(c),
            }
        }
        Ok(out)
    }
}

/// Pass-through checker for deployments without a spam backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveSpamChecker;

#[async_trait]
impl SpamChecker for PermissiveSpamChecker {
    async fn check(&self, _sender_id: Uuid, _content: &str, _options: &SpamOptions) -> Result<SpamVerdict> {
        Ok(SpamVerdict::clean())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn escaping_sanitizer_strips_markup() {
        let sanitizer = EscapingSanitizer;
        let out = sanitizer.sanitize("<b>hi</b> & \"there\"", false).await.expect("sanitize");
        assert_eq!(out, "&lt;b&gt;hi&lt;/b&gt; &amp; \"there\"");

        let strict = sanitizer.sanitize("\"quoted\"", true).await.expect("sanitize");
        assert_eq!(strict, "&quot;quoted&quot;");
    }

    #[tokio::test]
    async fn control_characters_are_dropped() {
        let sanitizer = EscapingSanitizer;
        let out = sanitizer.sanitize("a\u{0}b\nc", false).await.expect("sanitize");
        assert_eq!(out, "ab\nc");
    }
}
