//! Canonical text form for keyword matching.
//!
//! Ticket titles and knowledge-base keywords arrive with mixed case,
//! Portuguese diacritics and stray punctuation. Both sides of every
//! comparison go through [`normalize`] first so "Configuração" and
//! "configuracao" are the same word.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Reduce `text` to its canonical comparable form.
///
/// Steps: NFKD-decompose and drop combining marks (strips accents),
/// lowercase, turn everything outside `a-z0-9` into a space, collapse
/// whitespace runs and trim. Idempotent; always returns a string,
/// possibly empty.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();

    folded
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
