use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::TextConfig;

/// Punctuation kept in strict ASCII mode, alongside ASCII letters, digits and spaces.
pub const SAFE_PUNCTUATION: &str = ".,!?;:'\"-()%&/+=@";

/// Characters engines read aloud or choke on when they come from markdown.
const MARKUP_CHARS: &[char] = &[
    '*', '#', '_', '`', '~', '>', '|', '[', ']', '{', '}', '<', '•', '·', '▪', '◦', '‣',
];

lazy_static! {
    static ref LINK_REGEX: Regex = Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap();
    static ref BULLET_REGEX: Regex = Regex::new(r"(?m)^(?:[^\S\n]*[-+*•][^\S\n]+)+").unwrap();
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

/// Normalize reply text for synthesis.
///
/// Steps, in order: canonical composition (NFC), markdown links reduced to
/// their label, optional diacritic stripping, control characters replaced by
/// spaces, optional strict-ASCII filtering, markup removal, whitespace
/// collapsing. The result is a fixed point: normalizing it again changes
/// nothing.
///
/// In strict ASCII mode the output only contains ASCII letters, digits,
/// spaces and [`SAFE_PUNCTUATION`].
pub fn normalize(text: &str, config: &TextConfig) -> String {
    let mut text: String = text.nfc().collect();

    if config.sanitize {
        text = LINK_REGEX.replace_all(&text, "$1").into_owned();
    }

    if config.remove_diacritics {
        text = strip_diacritics(&text);
    }

    text = text
        .chars()
        .map(|c| if c.is_control() && c != '\n' { ' ' } else { c })
        .collect();

    if config.strict_ascii {
        text = to_safe_ascii(&text);
    }

    if config.sanitize {
        text = text.replace(MARKUP_CHARS, "");
        text = BULLET_REGEX.replace_all(&text, "").into_owned();
    }

    let mut text = WHITESPACE_REGEX.replace_all(&text, " ").trim().to_string();

    // Collapsing can pull a dangling marker from an empty line to the front.
    if config.sanitize {
        text = BULLET_REGEX.replace(&text, "").trim().to_string();
    }

    text
}

fn strip_diacritics(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).nfc().collect()
}

fn to_safe_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            'ä' => out.push_str("ae"),
            'ö' => out.push_str("oe"),
            'ü' => out.push_str("ue"),
            'Ä' => out.push_str("Ae"),
            'Ö' => out.push_str("Oe"),
            'Ü' => out.push_str("Ue"),
            'ß' => out.push_str("ss"),
            '‘' | '’' | '‚' | '′' => out.push('\''),
            '“' | '”' | '„' | '«' | '»' | '″' => out.push('"'),
            '–' | '—' | '‐' | '−' => out.push('-'),
            '…' => out.push_str("..."),
            c if c.is_ascii_alphanumeric() || c == '\n' || c == ' ' => out.push(c),
            c if SAFE_PUNCTUATION.contains(c) => out.push(c),
            c if c.is_whitespace() => out.push(' '),
            c => {
                // Fold accented letters to their base letter when one exists.
                let base: String = c
                    .to_string()
                    .nfd()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .collect();
                if base.is_empty() {
                    out.push(' ');
                } else {
                    out.push_str(&base);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(sanitize: bool, strict_ascii: bool, remove_diacritics: bool) -> TextConfig {
        TextConfig {
            sanitize,
            strict_ascii,
            remove_diacritics,
        }
    }

    fn default_config() -> TextConfig {
        TextConfig::default()
    }

    #[test]
    fn composes_to_canonical_form() {
        let decomposed = "Mu\u{0308}ller";
        assert_eq!(normalize(decomposed, &default_config()), "Müller");
    }

    #[test]
    fn strips_markdown() {
        let input = "## Wetter\n\n- **Heute**: sonnig\n* Morgen: `Regen`\n> Zitat";
        assert_eq!(
            normalize(input, &default_config()),
            "Wetter Heute: sonnig Morgen: Regen Zitat"
        );
    }

    #[test]
    fn reduces_links_to_label() {
        assert_eq!(
            normalize("Siehe [die Doku](https://example.org) hier.", &default_config()),
            "Siehe die Doku hier."
        );
    }

    #[test]
    fn keeps_inline_dashes() {
        assert_eq!(
            normalize("Berlin - Hamburg", &default_config()),
            "Berlin - Hamburg"
        );
    }

    #[test]
    fn replaces_control_characters() {
        assert_eq!(
            normalize("Hallo\u{7}Welt\r\n\tda", &default_config()),
            "Hallo Welt da"
        );
    }

    #[test]
    fn strips_diacritics_when_enabled() {
        assert_eq!(
            normalize("Café Größe", &config(true, false, true)),
            "Cafe Große"
        );
    }

    #[test]
    fn strict_ascii_transliterates_and_filters() {
        let out = normalize("Grüße – „schön“ 😀 naïve…", &config(true, true, false));
        assert_eq!(out, "Gruesse - \"schoen\" naive...");
        assert!(out
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ' ' || SAFE_PUNCTUATION.contains(c)));
    }

    #[test]
    fn leaves_markup_alone_without_sanitize() {
        assert_eq!(
            normalize("*wichtig*", &config(false, false, false)),
            "*wichtig*"
        );
    }

    #[test]
    fn empty_after_normalization() {
        assert_eq!(normalize("  ** \n # ", &default_config()), "");
        assert_eq!(normalize("", &default_config()), "");
    }

    #[test]
    fn dangling_bullet_lines_are_dropped() {
        assert_eq!(normalize("-\n- y", &default_config()), "y");
        assert_eq!(normalize("Liste:\n-\n- y", &default_config()), "Liste: - y");
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "## Titel\n- Punkt *eins*\n- Punkt [zwei](http://x)",
            "* - verschachtelt",
            "€- Preis",
            "[a]*(b)",
            "  \u{A0}- versteckt",
            "Grüße – „schön“ 😀 naïve…",
            "Mu\u{0308}ller\u{7}   und\tso",
            "  leading and trailing  ",
            "-\n- y",
            "*\n* x",
            "+\n\n+ - z",
        ];
        let configs = [
            config(true, false, false),
            config(true, true, false),
            config(true, true, true),
            config(false, true, false),
            config(false, false, true),
        ];

        for cfg in &configs {
            for sample in samples {
                let once = normalize(sample, cfg);
                assert_eq!(normalize(&once, cfg), once, "input {:?} with {:?}", sample, cfg);
            }
        }
    }
}
