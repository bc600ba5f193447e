//! Cutting normalized text into synthesis units.
//!
//! All lengths are in characters, not bytes.

const SENTENCE_ENDS: &[char] = &['.', '!', '?', ';', '…'];

fn is_sentence_end(chars: &[char], i: usize) -> bool {
    SENTENCE_ENDS.contains(&chars[i]) && chars.get(i + 1).map_or(true, |c| c.is_whitespace())
}

fn is_word_boundary(chars: &[char], i: usize) -> bool {
    i > 0 && i < chars.len() && chars[i].is_whitespace() && !chars[i - 1].is_whitespace()
}

/// Where to cut `chars` so that the piece is at most `limit` long.
///
/// Prefers the last sentence end at or after `sentence_floor`, then the last
/// word boundary at or after `word_floor`, then a hard cut at `limit`.
fn find_cut(chars: &[char], limit: usize, sentence_floor: usize, word_floor: usize) -> usize {
    let sentence_floor = sentence_floor.max(1);
    for end in (sentence_floor..=limit).rev() {
        if is_sentence_end(chars, end - 1) {
            return end;
        }
    }

    let word_floor = word_floor.max(1);
    for i in (word_floor..=limit).rev() {
        if is_word_boundary(chars, i) {
            return i;
        }
    }

    limit
}

fn collect_trimmed(chars: &[char]) -> String {
    chars.iter().collect::<String>().trim().to_string()
}

fn trim_start(mut chars: &[char]) -> &[char] {
    while let Some((first, rest)) = chars.split_first() {
        if !first.is_whitespace() {
            break;
        }
        chars = rest;
    }
    chars
}

/// Split off an intro of at most `max_intro_len` characters.
///
/// Returns `(intro, remainder)`. The intro ends at a sentence end in the
/// second half of the window if there is one, otherwise at a word boundary in
/// the last 20% of the window, otherwise at a hard cut. It is never empty when
/// `text` has non-whitespace content.
pub fn split_intro(text: &str, max_intro_len: usize) -> (String, String) {
    let chars: Vec<char> = text.trim().chars().collect();
    let max_intro_len = max_intro_len.max(1);

    if chars.len() <= max_intro_len {
        return (chars.iter().collect(), String::new());
    }

    let cut = find_cut(
        &chars,
        max_intro_len,
        max_intro_len / 2,
        max_intro_len - max_intro_len / 5,
    );

    (
        collect_trimmed(&chars[..cut]),
        collect_trimmed(&chars[cut..]),
    )
}

/// Split `text` into chunks of `min_chunk..=max_chunk` characters.
///
/// Cuts at the last sentence end that keeps the chunk at least `min_chunk`
/// long, then at a word boundary, and only hard-cuts at `max_chunk` when the
/// window has neither. The last chunk may be shorter than `min_chunk`. Never
/// returns an empty chunk.
pub fn chunk_main(text: &str, min_chunk: usize, max_chunk: usize) -> Vec<String> {
    let max_chunk = max_chunk.max(1);
    let min_chunk = min_chunk.clamp(1, max_chunk);

    let chars: Vec<char> = text.chars().collect();
    let mut rest = trim_start(&chars);
    let mut chunks = Vec::new();

    while !rest.is_empty() {
        if rest.len() <= max_chunk {
            let last = collect_trimmed(rest);
            if !last.is_empty() {
                chunks.push(last);
            }
            break;
        }

        let cut = find_cut(rest, max_chunk, min_chunk, min_chunk);
        let piece = collect_trimmed(&rest[..cut]);
        if !piece.is_empty() {
            chunks.push(piece);
        }
        rest = trim_start(&rest[cut..]);
    }

    chunks
}
