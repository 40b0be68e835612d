//! Math delimiter repairs used by the error corrector.

use regex::{Captures, Regex};

use super::rules::{
    CorrectionResult, LazyPattern, compiled, fence_info, find_backtick_run, is_escaped,
    map_outside_inline_code, map_prose_lines,
};

lazy_static::lazy_static! {
    /// Highest priority first: whole equations before their parts.
    static ref BARE_MATH_PATTERNS: Vec<LazyPattern> = vec![
        Regex::new(r"\b[A-Za-z]\^\d+\s*[+\-]\s*[A-Za-z]\^\d+\s*=\s*[A-Za-z]\^\d+\b"),
        Regex::new(r"\b[A-Za-z0-9]+\^(?:\d+|[A-Za-z]|\{[^{}\s]+\})(?:\s*[+\-*/=]\s*[A-Za-z0-9]+(?:\^(?:\d+|[A-Za-z]|\{[^{}\s]+\}))?)+"),
        Regex::new(r"\\d?frac\{[^{}\n]*\}\{[^{}\n]*\}|\\sqrt(?:\[[^\]\n]*\])?\{[^{}\n]*\}"),
        Regex::new(r"\b[A-Za-z]\^(?:\d+|\{[^{}\s]+\})"),
        Regex::new(r"\b[A-Za-z]_(?:\d+|\{[^{}\s]+\})"),
        Regex::new(r"\\(?:alpha|beta|gamma|delta|epsilon|theta|lambda|mu|pi|sigma|omega|infty|partial|nabla)\b"),
    ];
    static ref URL: LazyPattern = Regex::new(r"https?://\S+|\[[^\]\n]*\]\([^)\n]*\)");
    static ref SINGLE_LINE_MATH: LazyPattern = Regex::new(r"\$\$([^$\n]+)\$\$|\$([^$\n]+)\$");
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct DollarToken {
    offset: usize,
    double: bool,
}

/// Unescaped `$` / `$$` outside code, in order of appearance.
fn dollar_tokens(text: &str) -> Vec<DollarToken> {
    let mut tokens = Vec::new();
    let mut offset = 0;
    let mut in_fence = false;
    for line in text.split_inclusive('\n') {
        if fence_info(line).is_some() {
            in_fence = !in_fence;
        } else if !in_fence {
            let bytes = line.as_bytes();
            let mut i = 0;
            while i < bytes.len() {
                match bytes[i] {
                    b'`' => {
                        let start = i;
                        while i < bytes.len() && bytes[i] == b'`' {
                            i += 1;
                        }
                        if let Some(close) = find_backtick_run(bytes, i, i - start) {
                            i = close + (i - start);
                        }
                    }
                    b'$' if !is_escaped(line, i) => {
                        let double = bytes.get(i + 1) == Some(&b'$');
                        tokens.push(DollarToken {
                            offset: offset + i,
                            double,
                        });
                        i += if double { 2 } else { 1 };
                    }
                    _ => i += 1,
                }
            }
        }
        offset += line.len();
    }
    tokens
}

/// Close an odd `$$` or a dangling `$` so that math spans pair up.
///
/// A dangling `$` directly followed by a digit reads as currency and is
/// left alone.
pub fn balance_dollars(text: &str) -> CorrectionResult<String> {
    let tokens = dollar_tokens(text);
    let mut out = text.to_string();

    let singles: Vec<&DollarToken> = tokens.iter().filter(|t| !t.double).collect();
    if singles.len() % 2 == 1
        && let Some(last) = singles.last()
    {
        let after = text[last.offset + 1..].chars().next();
        if !after.is_some_and(|c| c.is_ascii_digit()) {
            let line_end = text[last.offset..]
                .find('\n')
                .map(|p| last.offset + p)
                .unwrap_or(text.len());
            let insert_at = last.offset + text[last.offset..line_end].trim_end().len();
            out.insert(insert_at, '$');
        }
    }

    let doubles: Vec<&DollarToken> = tokens.iter().filter(|t| t.double).collect();
    if doubles.len() % 2 == 1
        && let Some(last) = doubles.last()
    {
        let line_start = text[..last.offset].rfind('\n').map(|p| p + 1).unwrap_or(0);
        let own_line = text[line_start..last.offset].trim().is_empty();
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
        out.push_str(if own_line { "\n$$" } else { "$$" });
    }
    Ok(out)
}

/// Close unbalanced `{` inside single-line math spans.
pub fn balance_math_braces(text: &str) -> CorrectionResult<String> {
    let re = compiled(&SINGLE_LINE_MATH)?;
    Ok(map_prose_lines(text, |line| {
        map_outside_inline_code(line, |segment| {
            re.replace_all(segment, |caps: &Captures| {
                let (payload, delim) = match (caps.get(1), caps.get(2)) {
                    (Some(m), _) => (m.as_str(), "$$"),
                    (None, Some(m)) => (m.as_str(), "$"),
                    (None, None) => return caps[0].to_string(),
                };
                let missing = unclosed_braces(payload);
                format!("{delim}{payload}{}{delim}", "}".repeat(missing))
            })
            .into_owned()
        })
    }))
}

fn unclosed_braces(payload: &str) -> usize {
    let mut depth: usize = 0;
    for (i, ch) in payload.char_indices() {
        if is_escaped(payload, i) {
            continue;
        }
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth
}

/// Byte ranges of delimited math (`$..$`, `$$..$$`, `\(..\)`, `\[..\]`),
/// sorted and merged so that none overlap.
pub fn math_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();

    let tokens = dollar_tokens(text);
    for double in [true, false] {
        let of_kind: Vec<&DollarToken> = tokens.iter().filter(|t| t.double == double).collect();
        let width = if double { 2 } else { 1 };
        for pair in of_kind.chunks_exact(2) {
            ranges.push((pair[0].offset, pair[1].offset + width));
        }
    }

    for (open, close) in [(r"\(", r"\)"), (r"\[", r"\]")] {
        let mut from = 0;
        while let Some(start) = text[from..].find(open).map(|p| p + from) {
            match text[start + 2..].find(close) {
                Some(end) => {
                    let end = start + 2 + end + 2;
                    ranges.push((start, end));
                    from = end;
                }
                None => break,
            }
        }
    }

    ranges.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if start < last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Byte ranges the math wrapper must not touch: code, existing math, links.
fn protected_ranges(text: &str) -> CorrectionResult<Vec<(usize, usize)>> {
    let mut ranges = Vec::new();

    let mut offset = 0;
    let mut fence_start: Option<usize> = None;
    for line in text.split_inclusive('\n') {
        if fence_info(line).is_some() {
            match fence_start.take() {
                Some(start) => ranges.push((start, offset + line.len())),
                None => fence_start = Some(offset),
            }
        } else if fence_start.is_none() {
            let bytes = line.as_bytes();
            let mut i = 0;
            while i < bytes.len() {
                if bytes[i] != b'`' {
                    i += 1;
                    continue;
                }
                let start = i;
                while i < bytes.len() && bytes[i] == b'`' {
                    i += 1;
                }
                if let Some(close) = find_backtick_run(bytes, i, i - start) {
                    let end = close + (i - start);
                    ranges.push((offset + start, offset + end));
                    i = end;
                }
            }
        }
        offset += line.len();
    }
    if let Some(start) = fence_start {
        ranges.push((start, text.len()));
    }

    ranges.extend(math_ranges(text));

    let url = compiled(&URL)?;
    ranges.extend(url.find_iter(text).map(|m| (m.start(), m.end())));
    Ok(ranges)
}

fn overlaps(ranges: &[(usize, usize)], start: usize, end: usize) -> bool {
    ranges.iter().any(|&(s, e)| start < e && s < end)
}

/// Wrap bare expressions such as `a^2+b^2=c^2` or `x_1` in `$...$`.
pub fn wrap_bare_math(text: &str) -> CorrectionResult<String> {
    let protected = protected_ranges(text)?;
    let mut chosen: Vec<(usize, usize)> = Vec::new();
    for pattern in BARE_MATH_PATTERNS.iter() {
        let re = compiled(pattern)?;
        for m in re.find_iter(text) {
            let (start, end) = (m.start(), m.end());
            if overlaps(&protected, start, end) || overlaps(&chosen, start, end) {
                continue;
            }
            chosen.push((start, end));
        }
    }
    if chosen.is_empty() {
        return Ok(text.to_string());
    }
    chosen.sort_unstable();

    let mut out = String::with_capacity(text.len() + chosen.len() * 2);
    let mut last = 0;
    for (start, end) in chosen {
        out.push_str(&text[last..start]);
        out.push('$');
        out.push_str(&text[start..end]);
        out.push('$');
        last = end;
    }
    out.push_str(&text[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_equation_as_one_span() {
        assert_eq!(
            wrap_bare_math("By Pythagoras a^2+b^2=c^2 holds").unwrap(),
            "By Pythagoras $a^2+b^2=c^2$ holds"
        );
    }

    #[test]
    fn test_wraps_superscript_and_subscript() {
        assert_eq!(
            wrap_bare_math("Let x^2 and y_1 be given").unwrap(),
            "Let $x^2$ and $y_1$ be given"
        );
    }

    #[test]
    fn test_existing_math_untouched() {
        let text = "Already $x^2$ and \\(y_1\\) and $$z^3$$";
        assert_eq!(wrap_bare_math(text).unwrap(), text);
    }

    #[test]
    fn test_code_untouched() {
        let text = "Use `x^2` or\n```\ny_1 = x^2\n```";
        assert_eq!(wrap_bare_math(text).unwrap(), text);
    }

    #[test]
    fn test_identifiers_untouched() {
        let text = "call max_value and user_1 now";
        assert_eq!(wrap_bare_math(text).unwrap(), text);
    }

    #[test]
    fn test_wrap_is_idempotent() {
        let once = wrap_bare_math("Let x^2 + y^2 = r^2 and \\frac{a}{b}").unwrap();
        assert_eq!(wrap_bare_math(&once).unwrap(), once);
    }

    #[test]
    fn test_balance_dangling_single_dollar() {
        assert_eq!(balance_dollars("value $x^2 here").unwrap(), "value $x^2 here$");
    }

    #[test]
    fn test_currency_dollar_left_alone() {
        assert_eq!(balance_dollars("costs $5 today").unwrap(), "costs $5 today");
    }

    #[test]
    fn test_balance_block_dollars() {
        assert_eq!(balance_dollars("$$\nx = 1\n").unwrap(), "$$\nx = 1\n$$");
        assert_eq!(balance_dollars("see $$x = 1").unwrap(), "see $$x = 1$$");
    }

    #[test]
    fn test_balanced_dollars_untouched() {
        let text = "$a$ and $$b$$ and \\$5";
        assert_eq!(balance_dollars(text).unwrap(), text);
    }

    #[test]
    fn test_balance_math_braces() {
        assert_eq!(
            balance_math_braces(r"so $\frac{a}{b$ holds").unwrap(),
            r"so $\frac{a}{b}$ holds"
        );
    }
}
