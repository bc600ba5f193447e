pub mod normalize;
pub mod split;

use crate::config::{StagedConfig, TextConfig};

pub use normalize::normalize;
pub use split::{chunk_main, split_intro};

/// Reply text cut into synthesis units.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedText {
    pub intro: Option<String>,
    pub main: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TextPreparer {
    text: TextConfig,
    max_intro_len: usize,
    min_chunk_len: usize,
    max_chunk_len: usize,
}

impl TextPreparer {
    pub fn new(text: TextConfig, staged: &StagedConfig) -> Self {
        Self {
            text,
            max_intro_len: staged.max_intro_len,
            min_chunk_len: staged.min_chunk_len,
            max_chunk_len: staged.max_chunk_len,
        }
    }

    pub fn normalize(&self, text: &str) -> String {
        normalize(text, &self.text)
    }

    /// Cut normalized text. With `with_intro`, the head of the text becomes
    /// the intro and the remainder is chunked; otherwise the whole text is
    /// chunked.
    pub fn split(&self, normalized: &str, with_intro: bool) -> PreparedText {
        if normalized.is_empty() {
            return PreparedText {
                intro: None,
                main: Vec::new(),
            };
        }

        let (intro, rest) = if with_intro {
            let (intro, rest) = split_intro(normalized, self.max_intro_len);
            (Some(intro), rest)
        } else {
            (None, normalized.to_string())
        };

        PreparedText {
            intro,
            main: chunk_main(&rest, self.min_chunk_len, self.max_chunk_len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepare(text: &str, with_intro: bool) -> PreparedText {
        let staged = StagedConfig {
            max_intro_len: 35,
            min_chunk_len: 10,
            max_chunk_len: 40,
            ..StagedConfig::default()
        };
        let preparer = TextPreparer::new(TextConfig::default(), &staged);
        preparer.split(&preparer.normalize(text), with_intro)
    }

    #[test]
    fn short_text_is_intro_only() {
        let prepared = prepare("Kurzer Satz.", true);
        assert_eq!(prepared.intro.as_deref(), Some("Kurzer Satz."));
        assert!(prepared.main.is_empty());
    }

    #[test]
    fn empty_after_normalization_is_nothing_to_say() {
        let prepared = prepare("  **  ", true);
        assert!(prepared.intro.is_none());
        assert!(prepared.main.is_empty());
    }

    #[test]
    fn long_text_gets_intro_and_chunks() {
        let prepared = prepare(
            "## Antwort\nDas ist die Einleitung. Danach kommt der eigentliche Inhalt, \
             der deutlich länger ist und in mehrere Teile zerfällt.",
            true,
        );
        assert_eq!(prepared.intro.as_deref(), Some("Antwort Das ist die Einleitung."));
        assert!(prepared.main.len() >= 2);
        assert!(prepared.main.iter().all(|c| c.chars().count() <= 40));
    }

    #[test]
    fn without_intro_everything_is_chunked() {
        let prepared = prepare("Kurzer Satz.", false);
        assert!(prepared.intro.is_none());
        assert_eq!(prepared.main, vec!["Kurzer Satz."]);
    }
}
