//! Stage B: markdown-level repairs applied once to finalized text.

use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::{Captures, Regex};
use tracing::{debug, warn};

use super::cache::{CACHE_INPUT_CEILING, CorrectionCache, CorrectionCacheKey, PerformanceMetrics};
use super::config::CorrectionConfig;
use super::rules::{
    CorrectionResult, LazyPattern, Rule, compiled, contains_math, fence_info, map_outside_inline_code,
    map_outside_math, map_prose_lines, mask_math, needs_correction, run_rules,
};
use crate::parsing::table::split_table_cells;

const CACHE_STAGE: &str = "format";

/// Inputs longer than this are guarded against over-aggressive shrinking
const SHRINK_GUARD_MIN_LEN: usize = 50;

lazy_static::lazy_static! {
    static ref HEADER_NO_SPACE: LazyPattern = Regex::new(r"^(\s{0,3}#{1,6})([^#\s\d!])");
    static ref HEADER_LINE: LazyPattern = Regex::new(r"^\s{0,3}#{1,6}\s");
    static ref BULLET_GLYPH: LazyPattern = Regex::new(r"^(\s*)[•·▪●]\s*");
    static ref DASH_NO_SPACE: LazyPattern = Regex::new(r"^(\s*)([-+])(\p{L})");
    static ref STAR_NO_SPACE: LazyPattern = Regex::new(r"^(\s*)\*(\p{L}[^*]*)$");
    static ref NUMBERED_NO_SPACE: LazyPattern = Regex::new(r"^(\s*)(\d{1,3})\.(\p{L})");
    static ref LINK_GAP: LazyPattern = Regex::new(r"\[([^\]\n]+)\][ \t]+\(([^)\s]+)\)");
    static ref BARE_URL: LazyPattern = Regex::new(r#"https?://[^\s<>()\[\]`"']+"#);
    static ref SEPARATOR_LIKE: LazyPattern = Regex::new(r"^[\s|:\-]+$");
    static ref QUOTE_NO_SPACE: LazyPattern = Regex::new(r"^(\s*>+)([^\s>=])");
    static ref BOLD_INNER_SPACE: LazyPattern = Regex::new(r"\*\*[ \t]+([^*\n]+?)[ \t]+\*\*");
    static ref RULE_LINE: LazyPattern = Regex::new(r"^\s*(?:(?:\*\s*){3,}|(?:-\s*){3,}|(?:_\s*){3,})$");
    static ref SENTENCE_GAP: LazyPattern = Regex::new(r"(\p{Ll}{2}[.!?])(\p{Lu}\p{Ll})");
    static ref COMMA_GAP: LazyPattern = Regex::new(r",([A-Za-z])");
    static ref CJK_SPACE_BEFORE: LazyPattern = Regex::new(r"[ \t]+([，。！？；：、）」』】])");
    static ref CJK_SPACE_AFTER: LazyPattern = Regex::new(r"([，。！？；：、（「『【])[ \t]+");
    static ref CJK_ASCII_COMMA: LazyPattern = Regex::new(r"(\p{Han}),(\p{Han})");
    static ref SPACE_RUN: LazyPattern = Regex::new(r"(\S)[ \t]{2,}");
}

/// Ordered rule list; each entry is gated by its own flag.
const FORMAT_RULES: &[Rule] = &[
    Rule {
        name: "close_code_fences",
        enabled: |c| c.enable_code_block_correction,
        apply: close_code_fences,
    },
    Rule {
        name: "balance_inline_backticks",
        enabled: |c| c.enable_code_block_correction,
        apply: balance_inline_backticks,
    },
    Rule {
        name: "header_spacing",
        enabled: |c| c.enable_markdown_correction,
        apply: header_spacing,
    },
    Rule {
        name: "header_blank_lines",
        enabled: |c| c.enable_markdown_correction,
        apply: header_blank_lines,
    },
    Rule {
        name: "list_spacing",
        enabled: |c| c.enable_list_correction,
        apply: list_spacing,
    },
    Rule {
        name: "link_repair",
        enabled: |c| c.enable_link_correction,
        apply: link_repair,
    },
    Rule {
        name: "table_separators",
        enabled: |c| c.enable_table_correction,
        apply: table_separators,
    },
    Rule {
        name: "quote_spacing",
        enabled: |c| c.enable_quote_correction,
        apply: quote_spacing,
    },
    Rule {
        name: "balance_emphasis",
        enabled: |c| c.enable_text_style_correction,
        apply: balance_emphasis,
    },
    Rule {
        name: "paragraph_spacing",
        enabled: |c| c.enable_paragraph_correction,
        apply: paragraph_spacing,
    },
    Rule {
        name: "collapse_whitespace",
        enabled: |c| c.enable_markdown_correction || c.enable_paragraph_correction,
        apply: collapse_whitespace,
    },
];

/// The subset that is safe on a lone streaming delta.
const LINE_LOCAL_RULES: &[Rule] = &[
    Rule {
        name: "header_spacing",
        enabled: |c| c.enable_markdown_correction,
        apply: header_spacing,
    },
    Rule {
        name: "list_spacing",
        enabled: |c| c.enable_list_correction,
        apply: list_spacing,
    },
    Rule {
        name: "quote_spacing",
        enabled: |c| c.enable_quote_correction,
        apply: quote_spacing,
    },
];

pub struct FormatCorrector {
    config: Arc<CorrectionConfig>,
    cache: Arc<CorrectionCache>,
    metrics: Arc<PerformanceMetrics>,
}

impl FormatCorrector {
    pub fn new(
        config: Arc<CorrectionConfig>,
        cache: Arc<CorrectionCache>,
        metrics: Arc<PerformanceMetrics>,
    ) -> Self {
        Self {
            config,
            cache,
            metrics,
        }
    }

    /// Correct a finalized message text.
    pub fn correct(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }
        if self.config.enable_performance_optimization && !needs_correction(text) {
            return text.to_string();
        }

        let started = Instant::now();
        let cacheable = self.config.enable_caching && text.len() <= CACHE_INPUT_CEILING;
        let key = CorrectionCacheKey::new(CACHE_STAGE, text);
        if cacheable {
            if let Some(hit) = self.cache.get(&key, text) {
                self.metrics.record_hit();
                return hit;
            }
            self.metrics.record_miss();
        } else {
            self.metrics.record_skip();
        }

        let chunked = self.config.enable_async_processing
            && text.chars().count() > self.config.chunk_size_threshold;
        let corrected = if chunked {
            self.correct_chunked(text)
        } else {
            run_rules(FORMAT_RULES, &self.config, text)
        };
        let corrected = guard_shrinkage(text, corrected);

        let elapsed = started.elapsed();
        let budget = Duration::from_millis(self.config.max_processing_time_ms);
        if self.metrics.record_processing(elapsed, budget) {
            warn!(
                stage = CACHE_STAGE,
                elapsed_ms = elapsed.as_millis() as u64,
                input_len = text.len(),
                "Format correction exceeded its time budget"
            );
        }

        if cacheable {
            self.cache.insert(key, text, corrected.clone());
        }
        corrected
    }

    /// Line-local repairs used by the realtime preprocessor.
    pub fn correct_line_local(&self, text: &str) -> String {
        run_rules(LINE_LOCAL_RULES, &self.config, text)
    }

    fn correct_chunked(&self, text: &str) -> String {
        let chunks = split_into_chunks(text, self.config.chunk_size_threshold);
        debug!(chunks = chunks.len(), "Correcting large input chunk-wise");
        let config = &self.config;
        std::thread::scope(|scope| {
            let handles: Vec<_> = chunks
                .iter()
                .map(|chunk| scope.spawn(move || run_rules(FORMAT_RULES, config, chunk)))
                .collect();
            handles
                .into_iter()
                .zip(chunks.iter())
                .map(|(handle, chunk)| handle.join().unwrap_or_else(|_| chunk.to_string()))
                .collect()
        })
    }
}

/// Split at line boundaries into chunks of roughly `threshold` bytes.
/// Cuts land just before a blank line when possible so that paragraph
/// breaks start the next chunk.
fn split_into_chunks(text: &str, threshold: usize) -> Vec<&str> {
    let threshold = threshold.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() && offset - start >= threshold {
            chunks.push(&text[start..offset]);
            start = offset;
        }
        offset += line.len();
        if offset - start >= threshold * 2 {
            chunks.push(&text[start..offset]);
            start = offset;
        }
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

fn guard_shrinkage(original: &str, corrected: String) -> String {
    let before = original.chars().count();
    let after = corrected.chars().count();
    if before > SHRINK_GUARD_MIN_LEN && after * 10 < before * 3 {
        warn!(before, after, "Correction removed too much content, reverting");
        return original.to_string();
    }
    corrected
}

fn close_code_fences(text: &str) -> CorrectionResult<String> {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 1);
    let mut in_fence = false;
    for (idx, line) in lines.iter().enumerate() {
        match fence_info(line) {
            Some(info) if !in_fence => {
                in_fence = true;
                if info.is_empty() {
                    let body: Vec<&str> = lines[idx + 1..]
                        .iter()
                        .take_while(|l| fence_info(l).is_none())
                        .copied()
                        .collect();
                    if let Some(lang) = infer_language(&body) {
                        let indent = &line[..line.len() - line.trim_start().len()];
                        out.push(format!("{indent}```{lang}"));
                        continue;
                    }
                }
                out.push(line.to_string());
            }
            Some(_) => {
                in_fence = false;
                out.push(line.to_string());
            }
            None => out.push(line.to_string()),
        }
    }
    let mut result = out.join("\n");
    if in_fence {
        if !result.ends_with('\n') {
            result.push('\n');
        }
        result.push_str("```");
    }
    Ok(result)
}

/// Guess a fence language from its body; None when nothing is recognisable.
pub fn infer_language(body: &[&str]) -> Option<&'static str> {
    let first = body.iter().map(|l| l.trim()).find(|l| !l.is_empty())?;
    let joined = body.join("\n");
    let trimmed = joined.trim();

    if first.starts_with("#!/bin/bash") || first.starts_with("#!/bin/sh") || first.starts_with("$ ")
    {
        return Some("bash");
    }
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
    {
        return Some("json");
    }
    if first.starts_with("<!DOCTYPE") || first.starts_with("<html") || first.starts_with("<div") {
        return Some("html");
    }
    let upper = first.to_ascii_uppercase();
    if ["SELECT ", "INSERT ", "UPDATE ", "DELETE ", "CREATE TABLE"]
        .iter()
        .any(|kw| upper.starts_with(kw))
    {
        return Some("sql");
    }
    if any_line(body, |l| {
        l.starts_with("fn ")
            || l.starts_with("pub fn ")
            || l.starts_with("use std::")
            || l.starts_with("let mut ")
            || l.starts_with("impl ")
    }) {
        return Some("rust");
    }
    if any_line(body, |l| l.starts_with("#include")) {
        return Some("cpp");
    }
    if any_line(body, |l| {
        ((l.starts_with("def ") || l.starts_with("class ")) && l.trim_end().ends_with(':'))
            || l.starts_with("print(")
            || (l.starts_with("from ") && l.contains(" import "))
    }) {
        return Some("python");
    }
    if any_line(body, |l| {
        l.starts_with("function ") || l.starts_with("const ") || l.contains("console.log") || l.contains("=> {")
    }) {
        return Some("javascript");
    }
    None
}

fn any_line(body: &[&str], pred: impl Fn(&str) -> bool) -> bool {
    body.iter().any(|l| pred(l.trim_start()))
}

fn balance_inline_backticks(text: &str) -> CorrectionResult<String> {
    Ok(map_prose_lines(text, |line| {
        let bytes = line.as_bytes();
        let mut singles = 0;
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'`' {
                let start = i;
                while i < bytes.len() && bytes[i] == b'`' {
                    i += 1;
                }
                if i - start == 1 {
                    singles += 1;
                }
            } else {
                i += 1;
            }
        }
        if singles % 2 == 0 {
            return line.to_string();
        }
        let body = line.trim_end();
        if body.ends_with('`') && !body.ends_with("``") {
            body[..body.len() - 1].trim_end().to_string()
        } else {
            format!("{body}`")
        }
    }))
}

fn header_spacing(text: &str) -> CorrectionResult<String> {
    let re = compiled(&HEADER_NO_SPACE)?;
    Ok(map_prose_lines(text, |line| re.replace(line, "$1 $2").into_owned()))
}

fn header_blank_lines(text: &str) -> CorrectionResult<String> {
    let header = compiled(&HEADER_LINE)?;
    let mut out: Vec<&str> = Vec::new();
    let mut in_fence = false;
    for line in text.split('\n') {
        if fence_info(line).is_some() {
            in_fence = !in_fence;
        } else if !in_fence
            && header.is_match(line)
            && out.last().is_some_and(|prev| !prev.trim().is_empty())
        {
            out.push("");
        }
        out.push(line);
    }
    Ok(out.join("\n"))
}

fn list_spacing(text: &str) -> CorrectionResult<String> {
    let glyph = compiled(&BULLET_GLYPH)?;
    let dash = compiled(&DASH_NO_SPACE)?;
    let star = compiled(&STAR_NO_SPACE)?;
    let numbered = compiled(&NUMBERED_NO_SPACE)?;
    Ok(map_prose_lines(text, |line| {
        let line = glyph.replace(line, "$1- ");
        let line = dash.replace(&line, "$1$2 $3");
        let line = star.replace(&line, "$1* $2");
        numbered.replace(&line, "$1$2. $3").into_owned()
    }))
}

fn link_repair(text: &str) -> CorrectionResult<String> {
    let gap = compiled(&LINK_GAP)?;
    let url = compiled(&BARE_URL)?;
    Ok(map_prose_lines(text, |line| {
        map_outside_inline_code(line, |segment| {
            map_outside_math(segment, |plain| {
                let plain = gap.replace_all(plain, "[$1]($2)");
                wrap_bare_urls(&plain, url)
            })
        })
    }))
}

fn wrap_bare_urls(segment: &str, url: &Regex) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut last = 0;
    for m in url.find_iter(segment) {
        let prev = segment[..m.start()].chars().next_back();
        if matches!(prev, Some('(' | '[' | '<' | ']' | '"' | '\'' | '=' | '/')) {
            continue;
        }
        let link = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
        if link.len() <= "https://".len() {
            continue;
        }
        out.push_str(&segment[last..m.start()]);
        out.push_str(&format!("[{link}]({link})"));
        last = m.start() + link.len();
    }
    out.push_str(&segment[last..]);
    out
}

fn table_separators(text: &str) -> CorrectionResult<String> {
    let separator = compiled(&SEPARATOR_LIKE)?;
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut in_fence = false;
    for (idx, line) in lines.iter().enumerate() {
        if fence_info(line).is_some() {
            in_fence = !in_fence;
            out.push(line.to_string());
            continue;
        }
        let prev = idx.checked_sub(1).map(|p| lines[p]);
        let fixed = match prev {
            Some(header)
                if !in_fence
                    && header.contains('|')
                    && line.contains('-')
                    && separator.is_match(line) =>
            {
                normalize_separator(header, line)
            }
            _ => None,
        };
        out.push(fixed.unwrap_or_else(|| line.to_string()));
    }
    Ok(out.join("\n"))
}

/// Canonical separator row for `header`, or None when `row` is already fine.
fn normalize_separator(header: &str, row: &str) -> Option<String> {
    let header_cells = split_table_cells(header);
    if header_cells.len() < 2 {
        return None;
    }
    let cells = split_table_cells(row);
    let well_formed = cells.len() == header_cells.len()
        && cells.iter().all(|c| {
            let c = c.trim_matches(':');
            !c.is_empty() && c.chars().all(|ch| ch == '-')
        })
        && row.trim_start().starts_with('|') == header.trim_start().starts_with('|');
    if well_formed {
        return None;
    }
    let cells: Vec<&str> = (0..header_cells.len())
        .map(|i| {
            cells
                .get(i)
                .filter(|c| c.contains('-'))
                .map(|c| crate::models::ColumnAlignment::from_separator_cell(c).separator_cell())
                .unwrap_or("---")
        })
        .collect();
    Some(format!("| {} |", cells.join(" | ")))
}

fn quote_spacing(text: &str) -> CorrectionResult<String> {
    let re = compiled(&QUOTE_NO_SPACE)?;
    Ok(map_prose_lines(text, |line| re.replace(line, "$1 $2").into_owned()))
}

fn balance_emphasis(text: &str) -> CorrectionResult<String> {
    let inner = compiled(&BOLD_INNER_SPACE)?;
    let rule_line = compiled(&RULE_LINE)?;
    Ok(map_prose_lines(text, |line| {
        if rule_line.is_match(line) || line.trim_start().starts_with('|') {
            return line.to_string();
        }
        map_outside_inline_code(line, |segment| {
            let segment = map_outside_math(segment, |plain| {
                inner.replace_all(plain, "**$1**").into_owned()
            });
            balance_segment(&segment)
        })
    }))
}

/// Markers inside math spans are operators, not emphasis, and are not counted.
fn balance_segment(segment: &str) -> String {
    let mut out = segment.to_string();
    for marker in ["**", "__", "~~"] {
        if mask_math(&out).matches(marker).count() % 2 == 1 {
            let trimmed_len = out.trim_end().len();
            out.insert_str(trimmed_len, marker);
        }
    }
    if lone_star_count(&mask_math(&out)) % 2 == 1 {
        let trimmed_len = out.trim_end().len();
        out.insert(trimmed_len, '*');
    }
    out
}

/// Stars that can act as italic markers. A run pairs off into `**` first,
/// so `*` and `***` each leave one; a lone `*` that is a list bullet or a
/// spaced multiplication sign does not count.
fn lone_star_count(segment: &str) -> usize {
    let chars: Vec<char> = segment.chars().collect();
    let first_non_space = chars.iter().position(|c| !c.is_whitespace());
    let mut count = 0;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '*' {
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && chars[i] == '*' {
            i += 1;
        }
        let run = i - start;
        if run % 2 == 0 {
            continue;
        }
        if run == 1 {
            let before = start.checked_sub(1).map(|p| chars[p]);
            let after = chars.get(i).copied();
            let bullet = Some(start) == first_non_space && after == Some(' ');
            let operator =
                before.is_some_and(char::is_whitespace) && after.is_some_and(char::is_whitespace);
            if bullet || operator {
                continue;
            }
        }
        count += 1;
    }
    count
}

fn paragraph_spacing(text: &str) -> CorrectionResult<String> {
    let sentence = compiled(&SENTENCE_GAP)?;
    let comma = compiled(&COMMA_GAP)?;
    let cjk_before = compiled(&CJK_SPACE_BEFORE)?;
    let cjk_after = compiled(&CJK_SPACE_AFTER)?;
    let cjk_comma = compiled(&CJK_ASCII_COMMA)?;
    Ok(map_prose_lines(text, |line| {
        if line.contains("://") || line.contains('|') {
            return line.to_string();
        }
        map_outside_inline_code(line, |segment| {
            map_outside_math(segment, |plain| {
                let s = sentence.replace_all(plain, "$1 $2");
                let s = comma.replace_all(&s, ", $1");
                let s = cjk_before.replace_all(&s, "$1");
                let s = cjk_after.replace_all(&s, "$1");
                cjk_comma
                    .replace_all(&s, |caps: &Captures| format!("{}，{}", &caps[1], &caps[2]))
                    .into_owned()
            })
        })
    }))
}

fn collapse_whitespace(text: &str) -> CorrectionResult<String> {
    let space_run = compiled(&SPACE_RUN)?;
    let math_safe = contains_math(text);
    let mut out: Vec<String> = Vec::new();
    let mut in_fence = false;
    let mut blank_run = 0;
    for line in text.split('\n') {
        if fence_info(line).is_some() {
            in_fence = !in_fence;
            blank_run = 0;
            out.push(line.trim_end().to_string());
            continue;
        }
        if in_fence {
            out.push(line.to_string());
            continue;
        }
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            out.push(String::new());
            continue;
        }
        blank_run = 0;
        if math_safe {
            out.push(line.to_string());
        } else {
            out.push(
                map_outside_inline_code(line, |segment| {
                    space_run.replace_all(segment, "$1 ").into_owned()
                }),
            );
        }
    }
    Ok(out.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corrector(config: CorrectionConfig) -> FormatCorrector {
        FormatCorrector::new(
            Arc::new(config),
            Arc::new(CorrectionCache::new(16)),
            Arc::new(PerformanceMetrics::new()),
        )
    }

    fn default_corrector() -> FormatCorrector {
        corrector(CorrectionConfig::default())
    }

    #[test]
    fn test_closes_unterminated_fence_and_infers_language() {
        let out = default_corrector().correct("Here:\n```\ndef main():\n    print(1)");
        assert_eq!(out, "Here:\n```python\ndef main():\n    print(1)\n```");
    }

    #[test]
    fn test_balanced_fence_untouched() {
        let text = "```rust\nfn main() {}\n```";
        assert_eq!(default_corrector().correct(text), text);
    }

    #[test]
    fn test_single_line_triple_backtick_span_is_not_a_fence() {
        let text = "```x```\nDone";
        assert_eq!(default_corrector().correct(text), text);
        assert_eq!(close_code_fences("a ```b``` c\n```x```").unwrap(), "a ```b``` c\n```x```");
    }

    #[test]
    fn test_infer_language_leaves_tables_alone() {
        assert_eq!(infer_language(&["| a | b |", "| - | - |"]), None);
        assert_eq!(infer_language(&["{\"a\": 1}"]), Some("json"));
        assert_eq!(infer_language(&["SELECT * FROM t"]), Some("sql"));
        assert_eq!(infer_language(&["fn main() {", "}"]), Some("rust"));
    }

    #[test]
    fn test_inline_backtick_balanced() {
        let out = default_corrector().correct("Call `run it now");
        assert_eq!(out, "Call `run it now`");
    }

    #[test]
    fn test_header_spacing_and_blank_line() {
        let out = default_corrector().correct("Intro\n##Setup\nSteps");
        assert_eq!(out, "Intro\n\n## Setup\nSteps");
    }

    #[test]
    fn test_header_spacing_ignores_code() {
        let text = "```c\n#include <stdio.h>\n```";
        assert_eq!(default_corrector().correct(text), text);
    }

    #[test]
    fn test_list_spacing() {
        let out = default_corrector().correct("-apples\n•pears\n1.first\n*plums");
        assert_eq!(out, "- apples\n- pears\n1. first\n* plums");
    }

    #[test]
    fn test_list_spacing_keeps_rules_and_numbers() {
        assert_eq!(list_spacing("---\n-5 degrees\n1.5 liters").unwrap(), "---\n-5 degrees\n1.5 liters");
    }

    #[test]
    fn test_bare_url_wrapped() {
        let out = default_corrector().correct("See https://example.com/docs.");
        assert_eq!(out, "See [https://example.com/docs](https://example.com/docs).");
    }

    #[test]
    fn test_existing_links_untouched() {
        let text = "See [docs](https://example.com) and <https://example.org>";
        assert_eq!(link_repair(text).unwrap(), text);
    }

    #[test]
    fn test_link_gap_closed() {
        assert_eq!(
            link_repair("[docs] (https://example.com)").unwrap(),
            "[docs](https://example.com)"
        );
    }

    #[test]
    fn test_table_separator_fixed() {
        let out = table_separators("| A | B | C |\n|---|:--|").unwrap();
        assert_eq!(out, "| A | B | C |\n| --- | :--- | --- |");
    }

    #[test]
    fn test_valid_table_separator_kept() {
        let text = "| A | B |\n|:--|--:|\n| 1 | 2 |";
        assert_eq!(table_separators(text).unwrap(), text);
    }

    #[test]
    fn test_quote_spacing() {
        assert_eq!(quote_spacing(">quoted\n>> nested").unwrap(), "> quoted\n>> nested");
    }

    #[test]
    fn test_emphasis_balanced() {
        assert_eq!(balance_emphasis("this is **bold").unwrap(), "this is **bold**");
        assert_eq!(balance_emphasis("** spaced **").unwrap(), "**spaced**");
        assert_eq!(balance_emphasis("an *italic word").unwrap(), "an *italic word*");
        assert_eq!(balance_emphasis("2 * 3 = 6").unwrap(), "2 * 3 = 6");
        assert_eq!(balance_emphasis("***").unwrap(), "***");
    }

    #[test]
    fn test_mixed_emphasis_closed_once() {
        let c = default_corrector();
        for (text, expected) in [
            ("a **b *c", "a **b *c***"),
            ("see **this and *that", "see **this and *that***"),
            ("- **bold *it", "- **bold *it***"),
        ] {
            let once = c.correct(text);
            assert_eq!(once, expected);
            assert_eq!(c.correct(&once), once, "not idempotent for {text:?}");
        }
    }

    #[test]
    fn test_lone_star_count_pairs_runs() {
        assert_eq!(lone_star_count("***"), 1);
        assert_eq!(lone_star_count("**b *c***"), 2);
        assert_eq!(lone_star_count("* item and 2 * 3"), 0);
    }

    #[test]
    fn test_emphasis_ignores_math_operators() {
        for text in ["Compute $a*b$ now", r"Product \(x*y\) is", "Area $$w*h$$ here"] {
            assert_eq!(balance_emphasis(text).unwrap(), text);
        }
        assert_eq!(
            balance_emphasis("an *italic word and $x*y$").unwrap(),
            "an *italic word and $x*y$*"
        );
    }

    #[test]
    fn test_paragraph_spacing_ignores_math() {
        assert_eq!(paragraph_spacing("The set $a,b$ here").unwrap(), "The set $a,b$ here");
        assert_eq!(
            paragraph_spacing("pick a,b from $x,y$").unwrap(),
            "pick a, b from $x,y$"
        );
    }

    #[test]
    fn test_display_math_block_untouched() {
        let text = "Sum:\n$$\n-a*b,c\n#x\n$$\nDone.Next";
        assert_eq!(default_corrector().correct(text), "Sum:\n$$\n-a*b,c\n#x\n$$\nDone. Next");
    }

    #[test]
    fn test_paragraph_spacing() {
        assert_eq!(
            paragraph_spacing("It works.Then it fails,again").unwrap(),
            "It works. Then it fails, again"
        );
        assert_eq!(paragraph_spacing("e.g.Foo").unwrap(), "e.g.Foo");
    }

    #[test]
    fn test_cjk_punctuation() {
        assert_eq!(
            paragraph_spacing("你好 ， 世界,朋友").unwrap(),
            "你好，世界，朋友"
        );
    }

    #[test]
    fn test_whitespace_collapsed() {
        let out = collapse_whitespace("a   b  \n\n\n\nc").unwrap();
        assert_eq!(out, "a b\n\nc");
    }

    #[test]
    fn test_whitespace_math_guard() {
        let out = collapse_whitespace("$$\na  &=  b\n$$   \n\n\n\nnext").unwrap();
        assert_eq!(out, "$$\na  &=  b\n$$\n\nnext");
    }

    #[test]
    fn test_whitespace_keeps_code() {
        let text = "```\na    b\n\n\n\nc\n```";
        assert_eq!(collapse_whitespace(text).unwrap(), text);
    }

    #[test]
    fn test_shrink_guard_reverts() {
        let original = "x".repeat(100);
        assert_eq!(guard_shrinkage(&original, "x".into()), original);
        assert_eq!(guard_shrinkage("short", "s".into()), "s");
    }

    #[test]
    fn test_idempotent_on_sample() {
        let c = default_corrector();
        let samples = [
            "#Title\nSome text.Next sentence,with comma\n-item\n```\nprint(1)",
            "Visit https://example.com now\n| A | B |\n|---|\n| 1 | 2 |",
            ">quote **bold\n\n\n\nend   of   text",
        ];
        for sample in samples {
            let once = c.correct(sample);
            assert_eq!(c.correct(&once), once, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn test_cache_hit_recorded() {
        let c = default_corrector();
        let first = c.correct("#Title");
        let second = c.correct("#Title");
        assert_eq!(first, second);
        assert_eq!(c.metrics.snapshot().cache_hits, 1);
    }

    #[test]
    fn test_disabled_config_is_identity() {
        let text = "#Title\n-item\n```\ncode";
        assert_eq!(corrector(CorrectionConfig::disabled()).correct(text), text);
    }

    #[test]
    fn test_chunked_correction_preserves_order() {
        let config = CorrectionConfig {
            chunk_size_threshold: 20,
            enable_caching: false,
            ..CorrectionConfig::default()
        };
        let text = "#One\nfirst paragraph here\n\n#Two\nsecond paragraph here\n\n#Three\nthird";
        let out = corrector(config).correct(text);
        assert_eq!(
            out,
            "# One\nfirst paragraph here\n\n# Two\nsecond paragraph here\n\n# Three\nthird"
        );
    }

    #[test]
    fn test_split_into_chunks_prefers_blank_lines() {
        let chunks = split_into_chunks("aaaa\nbbbb\n\ncccc\n", 6);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n", "\ncccc\n"]);
        assert_eq!(chunks.concat(), "aaaa\nbbbb\n\ncccc\n");
    }
}
