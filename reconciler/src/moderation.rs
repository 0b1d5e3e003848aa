//! Content-moderation hook for outgoing session chat.
//!
//! The session integration calls [`MessageModerator::on_before_send_message`]
//! before a chat message leaves the client and honours the verdict.

use std::borrow::Cow;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

/// Terms blocked when no list is supplied.
pub const DEFAULT_BLOCKED_TERMS: &[&str] = &[
    "idiot", "stupid", "dumb", "moron", "loser", "shut up", "hate you", "damn", "crap",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationVerdict {
    Allow,
    /// Send this text instead of the original.
    Replace(String),
    Reject { reason: String },
}

impl ModerationVerdict {
    /// The text to send, or `None` if the message must not be sent.
    #[must_use]
    pub fn outgoing<'a>(&'a self, original: &'a str) -> Option<&'a str> {
        match self {
            Self::Allow => Some(original),
            Self::Replace(text) => Some(text.as_str()),
            Self::Reject { .. } => None,
        }
    }
}

pub trait MessageModerator: Send + Sync {
    fn on_before_send_message(&self, message: &str) -> ModerationVerdict;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModerationAction {
    #[default]
    Reject,
    /// Replace each blocked term with asterisks of the same length.
    Mask,
}

/// Whole-word, ASCII case-insensitive blocklist.
pub struct BlockedTermsModerator {
    terms: Vec<String>,
    automaton: Option<AhoCorasick>,
    action: ModerationAction,
}

impl std::fmt::Debug for BlockedTermsModerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockedTermsModerator")
            .field("term_count", &self.terms.len())
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

impl Default for BlockedTermsModerator {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCKED_TERMS.iter().copied(), ModerationAction::Reject)
    }
}

impl BlockedTermsModerator {
    pub fn new<I, S>(terms: I, action: ModerationAction) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut terms: Vec<String> = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        terms.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        terms.dedup();

        let automaton = if terms.is_empty() {
            None
        } else {
            match AhoCorasickBuilder::new()
                .match_kind(MatchKind::LeftmostLongest)
                .ascii_case_insensitive(true)
                .build(&terms)
            {
                Ok(ac) => Some(ac),
                Err(e) => {
                    // find_blocked falls back to sequential matching.
                    tracing::warn!(term_count = terms.len(), "Blocklist build failed ({e})");
                    None
                }
            }
        };

        Self {
            terms,
            automaton,
            action,
        }
    }

    /// Byte ranges of whole-word blocked terms in `message`.
    fn find_blocked(&self, message: &str) -> Vec<(usize, usize)> {
        if let Some(ac) = &self.automaton {
            return ac
                .find_iter(message)
                .filter(|m| is_whole_word(message, m.start(), m.end()))
                .map(|m| (m.start(), m.end()))
                .collect();
        }

        // Sequential fallback, longest terms first.
        let lowered = message.to_ascii_lowercase();
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for term in &self.terms {
            for (start, _) in lowered.match_indices(term.as_str()) {
                let end = start + term.len();
                let overlaps = ranges.iter().any(|&(s, e)| start < e && s < end);
                if !overlaps && is_whole_word(message, start, end) {
                    ranges.push((start, end));
                }
            }
        }
        ranges.sort_unstable();
        ranges
    }

    #[must_use]
    pub fn mask<'a>(&self, message: &'a str) -> Cow<'a, str> {
        let ranges = self.find_blocked(message);
        if ranges.is_empty() {
            return Cow::Borrowed(message);
        }

        let mut out = String::with_capacity(message.len());
        let mut cursor = 0;
        for (start, end) in ranges {
            out.push_str(&message[cursor..start]);
            out.extend(std::iter::repeat_n('*', message[start..end].chars().count()));
            cursor = end;
        }
        out.push_str(&message[cursor..]);
        Cow::Owned(out)
    }
}

impl MessageModerator for BlockedTermsModerator {
    fn on_before_send_message(&self, message: &str) -> ModerationVerdict {
        let ranges = self.find_blocked(message);
        if ranges.is_empty() {
            return ModerationVerdict::Allow;
        }

        tracing::debug!(matches = ranges.len(), "Outgoing message hit the blocklist");
        match self.action {
            ModerationAction::Reject => ModerationVerdict::Reject {
                reason: "message contains inappropriate language".to_string(),
            },
            ModerationAction::Mask => ModerationVerdict::Replace(self.mask(message).into_owned()),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_whole_word(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
}
