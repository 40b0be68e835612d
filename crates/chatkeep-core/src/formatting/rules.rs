//! Rule runner and text helpers shared by the correction stages.
//!
//! Every rule is a pure `&str -> String` transform. A rule that fails (bad
//! pattern, internal error or panic) is skipped: the text it received is
//! passed on unchanged to the next rule.

use std::panic::{AssertUnwindSafe, catch_unwind};

use regex::Regex;
use thiserror::Error;
use tracing::warn;

use super::config::CorrectionConfig;
use super::math_fix::math_ranges;

#[derive(Debug, Error)]
pub enum CorrectionError {
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("rule {rule} rejected its output: {reason}")]
    Rule { rule: &'static str, reason: String },
}

pub type CorrectionResult<T> = Result<T, CorrectionError>;

/// Lazily compiled pattern, see `compiled`.
pub type LazyPattern = Result<Regex, regex::Error>;

/// Borrow a lazily compiled pattern or surface its compile error.
pub fn compiled(pattern: &'static LazyPattern) -> CorrectionResult<&'static Regex> {
    pattern.as_ref().map_err(|e| CorrectionError::Pattern(e.clone()))
}

/// One named step of a stage
pub struct Rule {
    pub name: &'static str,
    pub enabled: fn(&CorrectionConfig) -> bool,
    pub apply: fn(&str) -> CorrectionResult<String>,
}

/// Apply one transform, falling back to its input on error or panic.
pub fn apply_rule(name: &'static str, input: &str, f: fn(&str) -> CorrectionResult<String>) -> String {
    match catch_unwind(AssertUnwindSafe(|| f(input))) {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!(rule = name, error = %e, "Correction rule failed, keeping its input");
            input.to_string()
        }
        Err(_) => {
            warn!(rule = name, "Correction rule panicked, keeping its input");
            input.to_string()
        }
    }
}

/// Run the enabled rules of a stage in order.
pub fn run_rules(rules: &[Rule], config: &CorrectionConfig, input: &str) -> String {
    rules
        .iter()
        .filter(|rule| (rule.enabled)(config))
        .fold(input.to_string(), |text, rule| apply_rule(rule.name, &text, rule.apply))
}

/// Language tag of a fence line, or None when the line is not a fence.
/// A backtick in the info string makes the line an inline span instead.
pub fn fence_info(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("```")?;
    let info = rest.trim_start_matches('`');
    if info.contains('`') {
        return None;
    }
    Some(info.trim())
}

/// How a line relates to the block structure around it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineKind {
    Fence,
    Code,
    /// Inside or delimiting a multi-line `$$` / `\[` block
    DisplayMath,
    Prose,
}

/// Classifies lines one at a time while walking a text top to bottom.
#[derive(Debug, Default)]
pub struct BlockTracker {
    in_fence: bool,
    display_closer: Option<&'static str>,
}

impl BlockTracker {
    pub fn classify(&mut self, line: &str) -> LineKind {
        if fence_info(line).is_some() {
            self.in_fence = !self.in_fence;
            self.display_closer = None;
            return LineKind::Fence;
        }
        if self.in_fence {
            return LineKind::Code;
        }
        if let Some(closer) = self.display_closer {
            if closes_display(line, closer) {
                self.display_closer = None;
            }
            return LineKind::DisplayMath;
        }
        if let Some(closer) = opens_display(line) {
            self.display_closer = Some(closer);
            return LineKind::DisplayMath;
        }
        LineKind::Prose
    }
}

/// Closing delimiter owed when `line` opens display math without closing it.
fn opens_display(line: &str) -> Option<&'static str> {
    if line.matches("$$").count() % 2 == 1 {
        return Some("$$");
    }
    match (line.rfind(r"\["), line.rfind(r"\]")) {
        (Some(open), close) if close.is_none_or(|c| c < open) => Some(r"\]"),
        _ => None,
    }
}

fn closes_display(line: &str, closer: &str) -> bool {
    if closer == "$$" {
        line.matches("$$").count() % 2 == 1
    } else {
        line.contains(closer)
    }
}

/// Rewrite every prose line. Fenced code and multi-line display math,
/// delimiters included, are copied through untouched.
pub fn map_prose_lines(text: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut tracker = BlockTracker::default();
    let mut out: Vec<String> = Vec::new();
    for line in text.split('\n') {
        match tracker.classify(line) {
            LineKind::Prose => out.push(f(line)),
            _ => out.push(line.to_string()),
        }
    }
    out.join("\n")
}

/// Apply `f` to the parts of a line that are not inside inline code spans.
pub fn map_outside_inline_code(line: &str, mut f: impl FnMut(&str) -> String) -> String {
    let bytes = line.as_bytes();
    let mut out = String::with_capacity(line.len());
    let mut plain_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }
        let run_start = i;
        while i < bytes.len() && bytes[i] == b'`' {
            i += 1;
        }
        let run_len = i - run_start;
        if let Some(close) = find_backtick_run(bytes, i, run_len) {
            out.push_str(&f(&line[plain_start..run_start]));
            out.push_str(&line[run_start..close + run_len]);
            i = close + run_len;
            plain_start = i;
        }
    }
    out.push_str(&f(&line[plain_start..]));
    out
}

/// Apply `f` to the parts of a line that lie outside inline math spans
/// (`$..$`, `$$..$$`, `\(..\)`, `\[..\]`).
pub fn map_outside_math(segment: &str, mut f: impl FnMut(&str) -> String) -> String {
    let spans = math_ranges(segment);
    if spans.is_empty() {
        return f(segment);
    }
    let mut out = String::with_capacity(segment.len());
    let mut last = 0;
    for (start, end) in spans {
        out.push_str(&f(&segment[last..start]));
        out.push_str(&segment[start..end]);
        last = end;
    }
    out.push_str(&f(&segment[last..]));
    out
}

/// The segment with every inline math span reduced to one neutral character,
/// for counting markup outside math.
pub fn mask_math(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut last = 0;
    for (start, end) in math_ranges(segment) {
        out.push_str(&segment[last..start]);
        out.push('0');
        last = end;
    }
    out.push_str(&segment[last..]);
    out
}

/// Position of the next run of exactly `len` backticks at or after `from`.
pub fn find_backtick_run(bytes: &[u8], from: usize, len: usize) -> Option<usize> {
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] == b'`' {
            let start = i;
            while i < bytes.len() && bytes[i] == b'`' {
                i += 1;
            }
            if i - start == len {
                return Some(start);
            }
        } else {
            i += 1;
        }
    }
    None
}

/// True when the byte at `pos` is preceded by an odd number of backslashes.
pub fn is_escaped(text: &str, pos: usize) -> bool {
    text.as_bytes()[..pos]
        .iter()
        .rev()
        .take_while(|&&b| b == b'\\')
        .count()
        % 2
        == 1
}

lazy_static::lazy_static! {
    static ref MATH_SIGNAL: LazyPattern =
        Regex::new(r"\$|\\\(|\\\[|\\(?:frac|sqrt|sum|int|prod|lim|begin|end|alpha|beta|gamma|delta|theta|lambda|pi|sigma|omega|infty|cdot|times|le|ge|neq|mathbb|mathrm|text|left|right)\b");
}

/// Whether the text carries LaTeX delimiters or math commands.
pub fn contains_math(text: &str) -> bool {
    match compiled(&MATH_SIGNAL) {
        Ok(re) => re.is_match(text),
        // Unknown: err on the side of preserving structure
        Err(_) => true,
    }
}

/// Cheap pre-check used by the performance fast path.
pub fn needs_correction(text: &str) -> bool {
    const MARKUP: &[u8] = b"`*_#[]()<>{}|$\\~:>-+^=\"'";
    let bytes = text.as_bytes();
    if bytes.iter().any(|b| MARKUP.contains(b)) {
        return true;
    }
    if text.contains("  ") || text.contains("\n\n\n") || text.contains(" \n") || text.contains('\t') {
        return true;
    }
    if !text.is_ascii() {
        return true;
    }
    bytes
        .windows(2)
        .any(|w| matches!(w[0], b'.' | b'!' | b'?') && w[1].is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing(_: &str) -> CorrectionResult<String> {
        Err(CorrectionError::Rule {
            rule: "failing",
            reason: "always".into(),
        })
    }

    fn panicking(_: &str) -> CorrectionResult<String> {
        panic!("boom")
    }

    fn shout(text: &str) -> CorrectionResult<String> {
        Ok(text.to_uppercase())
    }

    #[test]
    fn test_failed_rule_keeps_input() {
        assert_eq!(apply_rule("failing", "abc", failing), "abc");
        assert_eq!(apply_rule("panicking", "abc", panicking), "abc");
    }

    #[test]
    fn test_run_rules_skips_failures_and_disabled() {
        let rules = [
            Rule {
                name: "failing",
                enabled: |_| true,
                apply: failing,
            },
            Rule {
                name: "shout",
                enabled: |c| c.enable_markdown_correction,
                apply: shout,
            },
        ];
        assert_eq!(run_rules(&rules, &CorrectionConfig::default(), "hi"), "HI");
        assert_eq!(run_rules(&rules, &CorrectionConfig::disabled(), "hi"), "hi");
    }

    #[test]
    fn test_map_prose_lines_skips_fences() {
        let text = "a\n```\na\n```\na";
        let out = map_prose_lines(text, |l| l.replace('a', "b"));
        assert_eq!(out, "b\n```\na\n```\nb");
    }

    #[test]
    fn test_fence_info() {
        assert_eq!(fence_info("```rust"), Some("rust"));
        assert_eq!(fence_info("  ```"), Some(""));
        assert_eq!(fence_info("````"), Some(""));
        assert_eq!(fence_info("```x```"), None);
        assert_eq!(fence_info("```let a = `b`"), None);
        assert_eq!(fence_info("text ```"), None);
    }

    #[test]
    fn test_map_outside_inline_code() {
        let out = map_outside_inline_code("x `x` x ``x`` x", |s| s.replace('x', "y"));
        assert_eq!(out, "y `x` y ``x`` y");
        // unmatched backtick is plain text
        let out = map_outside_inline_code("x ` x", |s| s.replace('x', "y"));
        assert_eq!(out, "y ` y");
    }

    #[test]
    fn test_is_escaped() {
        assert!(is_escaped(r"\$", 1));
        assert!(!is_escaped(r"\\$", 2));
        assert!(!is_escaped("$", 0));
    }

    #[test]
    fn test_contains_math() {
        assert!(contains_math("cost $x$"));
        assert!(contains_math(r"use \frac{a}{b}"));
        assert!(!contains_math("plain words"));
    }

    #[test]
    fn test_needs_correction() {
        assert!(!needs_correction("Just a sentence. Another one"));
        assert!(needs_correction("end.Next"));
        assert!(needs_correction("# title"));
        assert!(needs_correction("two  spaces"));
    }
}
