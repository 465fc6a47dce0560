//! Word-list censorship.
//!
//! Matching is a plain ASCII case-insensitive substring search over the
//! configured words. Nothing smarter than a word list is attempted.

use crate::config::CensorConfig;
use aho_corasick::AhoCorasick;
use tracing::warn;

/// What to do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    /// Redact the message.
    Redact { word: String },
    /// Redact the message and ban the sender community-wide.
    RedactAndBan { word: String },
}

/// Compiled censorship word lists.
pub struct Censor {
    config: CensorConfig,
    /// Automaton for censored words
    words: Option<(AhoCorasick, Vec<String>)>,
    /// Automaton for instant-ban words
    instant_ban: Option<(AhoCorasick, Vec<String>)>,
}

fn build(words: &[String], list: &str) -> Option<(AhoCorasick, Vec<String>)> {
    let words: Vec<String> = words
        .iter()
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return None;
    }

    match AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(&words)
    {
        Ok(matcher) => Some((matcher, words)),
        Err(err) => {
            warn!(error = ?err, list, "Failed to build censor matcher; list disabled");
            None
        }
    }
}

fn first_match(matcher: &Option<(AhoCorasick, Vec<String>)>, text: &str) -> Option<String> {
    let (automaton, words) = matcher.as_ref()?;
    automaton
        .find(text)
        .map(|m| words[m.pattern().as_usize()].clone())
}

impl Censor {
    pub fn new(config: &CensorConfig) -> Self {
        Self {
            words: build(&config.words, "words"),
            instant_ban: build(&config.instant_ban_words, "instant_ban_words"),
            config: config.clone(),
        }
    }

    /// Whether a message from a sender at `sender_level` in `room` is subject
    /// to censorship at all.
    pub fn applies(&self, room: &str, sender_level: i64) -> bool {
        self.config.enabled.covers(room) && sender_level < self.config.uncensor_power_level
    }

    /// Check message text. Instant-ban words take precedence.
    pub fn check(&self, text: &str) -> Verdict {
        if let Some(word) = first_match(&self.instant_ban, text) {
            return Verdict::RedactAndBan { word };
        }
        if let Some(word) = first_match(&self.words, text) {
            return Verdict::Redact { word };
        }
        Verdict::Clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CensorScope;

    fn censor(enabled: CensorScope) -> Censor {
        Censor::new(&CensorConfig {
            enabled,
            words: vec!["darn".into(), " ".into()],
            instant_ban_words: vec!["buy followers".into()],
            uncensor_power_level: 50,
            redact_limit: 100,
        })
    }

    #[test]
    fn substring_match_is_case_insensitive() {
        let c = censor(CensorScope::All(true));
        assert_eq!(c.check("well DARNIT"), Verdict::Redact { word: "darn".into() });
        assert_eq!(c.check("hello there"), Verdict::Clean);
    }

    #[test]
    fn instant_ban_wins() {
        let c = censor(CensorScope::All(true));
        assert_eq!(
            c.check("darn, Buy Followers here"),
            Verdict::RedactAndBan { word: "buy followers".into() }
        );
    }

    #[test]
    fn scope_and_exemption() {
        let c = censor(CensorScope::Rooms(vec!["!a:example.org".into()]));
        assert!(c.applies("!a:example.org", 0));
        assert!(!c.applies("!b:example.org", 0));
        assert!(!c.applies("!a:example.org", 50));

        let off = censor(CensorScope::All(false));
        assert!(!off.applies("!a:example.org", 0));
    }
}
