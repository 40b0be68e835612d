//! Decides whether a `$...$` payload is math or just two dollar signs.

use regex::Regex;

use crate::formatting::rules::{LazyPattern, compiled};

lazy_static::lazy_static! {
    static ref BARE_NUMERAL: LazyPattern = Regex::new(r"^[\d.,\s]+$");
    static ref LATEX_SIGNAL: LazyPattern = Regex::new(r"\\[A-Za-z]+|[{}^_]");
    static ref SINGLE_LETTER: LazyPattern = Regex::new(r"^\p{L}$");
    static ref BINARY_OP: LazyPattern =
        Regex::new(r"[\p{L}\p{N})]\s*(?:[+\-*/=<>]|≤|≥|≠|×|÷|·)\s*[\p{L}\p{N}(]");
    static ref MIXED_TOKEN: LazyPattern = Regex::new(r"^(?:\p{L}+\p{N}|\p{N}+\p{L})[\p{L}\p{N}]*$");
}

/// Heuristic for single-dollar inline math.
///
/// `$5 and $10` must stay currency, `$x$`, `$a+b$`, `$x^2$` and `$2x$` are
/// math. A payload padded with whitespace on either side is never math.
pub fn looks_like_math(payload: &str) -> bool {
    let trimmed = payload.trim();
    if trimmed.is_empty() || trimmed.len() != payload.len() {
        return false;
    }
    let hit = |pattern: &'static LazyPattern| {
        compiled(pattern).is_ok_and(|re| re.is_match(trimmed))
    };
    if hit(&BARE_NUMERAL) {
        return false;
    }
    hit(&LATEX_SIGNAL)
        || hit(&SINGLE_LETTER)
        || hit(&BINARY_OP)
        || hit(&MIXED_TOKEN)
}
