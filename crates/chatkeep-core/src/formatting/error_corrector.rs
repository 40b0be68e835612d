//! Stage C: structural repairs for JSON, markup, code and math.

use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::warn;

use super::cache::{CACHE_INPUT_CEILING, CorrectionCache, CorrectionCacheKey, PerformanceMetrics};
use super::config::CorrectionConfig;
use super::math_fix::{balance_dollars, balance_math_braces, wrap_bare_math};
use super::rules::{
    CorrectionResult, LazyPattern, Rule, compiled, fence_info, find_backtick_run, map_prose_lines,
    mask_math, needs_correction, run_rules,
};

const CACHE_STAGE: &str = "error";

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];
/// Elements closed in prose; anything else in angle brackets, like
/// `<stdin>` or `<path>`, is taken as a placeholder
const PROSE_TAGS: &[&str] = &[
    "a", "abbr", "b", "blockquote", "code", "del", "details", "div", "em", "h1", "h2", "h3", "h4",
    "h5", "h6", "i", "ins", "kbd", "li", "mark", "ol", "p", "pre", "q", "s", "small", "span",
    "strong", "sub", "summary", "sup", "table", "tbody", "td", "th", "thead", "tr", "u", "ul",
];
const MARKUP_LANGS: &[&str] = &["html", "xml", "svg", "xhtml"];
const JSON_LANGS: &[&str] = &["json", "jsonc", "json5"];
const PYTHON_LANGS: &[&str] = &["python", "py", "python3"];
const C_LIKE_LANGS: &[&str] = &[
    "c", "cpp", "c++", "cs", "csharp", "go", "java", "javascript", "js", "jsx", "kotlin", "php",
    "rust", "rs", "scala", "swift", "ts", "tsx", "typescript",
];
/// Fences whose brackets are not code structure
const UNBRACKETED_LANGS: &[&str] = &["diff", "patch", "markdown", "md", "latex", "tex", "math"];
const PY_DEDENT: &[&str] = &["else", "elif", "except", "finally"];
const PY_EXIT: &[&str] = &["return", "break", "continue", "pass", "raise"];

lazy_static::lazy_static! {
    static ref TAG: LazyPattern = Regex::new(r"<(/?)([A-Za-z][A-Za-z0-9:-]*)(\s[^<>]*?)?(/?)>");
    static ref SINGLE_QUOTED_KEY: LazyPattern = Regex::new(r"'([^'\n]*)'(\s*:)");
    static ref BARE_KEY: LazyPattern = Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)(\s*:)");
    static ref MISSING_COMMA: LazyPattern =
        Regex::new(r#"("|\d|true|false|null|\]|\})([ \t]*\n\s*)("|\{|\[)"#);
    static ref TRAILING_COMMA: LazyPattern = Regex::new(r",(\s*[}\]])");
}

const ERROR_RULES: &[Rule] = &[
    Rule {
        name: "json_repair",
        enabled: |c| c.enable_json_correction,
        apply: json_repair,
    },
    Rule {
        name: "markup_tags",
        enabled: |c| c.enable_xml_html_correction,
        apply: markup_tags,
    },
    Rule {
        name: "code_syntax",
        enabled: |c| c.enable_programming_syntax_correction,
        apply: code_syntax,
    },
    Rule {
        name: "balance_brackets",
        enabled: |c| c.enable_programming_syntax_correction,
        apply: balance_brackets,
    },
    Rule {
        name: "balance_dollars",
        enabled: |c| c.enable_math_correction,
        apply: balance_dollars,
    },
    Rule {
        name: "balance_math_braces",
        enabled: |c| c.enable_math_correction,
        apply: balance_math_braces,
    },
    Rule {
        name: "wrap_bare_math",
        enabled: |c| c.enable_math_correction,
        apply: wrap_bare_math,
    },
    Rule {
        name: "rebalance_dollars",
        enabled: |c| c.enable_math_correction,
        apply: balance_dollars,
    },
];

pub struct ErrorCorrector {
    config: Arc<CorrectionConfig>,
    cache: Arc<CorrectionCache>,
    metrics: Arc<PerformanceMetrics>,
}

impl ErrorCorrector {
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

        let corrected = run_rules(ERROR_RULES, &self.config, text);

        let elapsed = started.elapsed();
        let budget = Duration::from_millis(self.config.max_processing_time_ms);
        if self.metrics.record_processing(elapsed, budget) {
            warn!(
                stage = CACHE_STAGE,
                elapsed_ms = elapsed.as_millis() as u64,
                input_len = text.len(),
                "Error correction exceeded its time budget"
            );
        }

        if cacheable {
            self.cache.insert(key, text, corrected.clone());
        }
        corrected
    }
}

/// Rewrite the body of every fenced block; `f` gets the lowercased language
/// tag and the body without its fence lines.
fn map_fenced_blocks(text: &str, mut f: impl FnMut(&str, &str) -> String) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let Some(info) = fence_info(lines[i]) else {
            out.push(lines[i].to_string());
            i += 1;
            continue;
        };
        out.push(lines[i].to_string());
        let lang = info.to_ascii_lowercase();
        let body_start = i + 1;
        let mut end = body_start;
        while end < lines.len() && fence_info(lines[end]).is_none() {
            end += 1;
        }
        if end > body_start {
            out.push(f(&lang, &lines[body_start..end].join("\n")));
        }
        if end < lines.len() {
            out.push(lines[end].to_string());
        }
        i = end + 1;
    }
    out.join("\n")
}

/// The text with fenced blocks and inline code spans removed.
fn prose_only(text: &str) -> String {
    let mut in_fence = false;
    let mut out = String::with_capacity(text.len());
    for line in text.split('\n') {
        if fence_info(line).is_some() {
            in_fence = !in_fence;
        } else if !in_fence {
            let bytes = line.as_bytes();
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
                if let Some(close) = find_backtick_run(bytes, i, i - run_start) {
                    out.push_str(&line[plain_start..run_start]);
                    i = close + (i - run_start);
                    plain_start = i;
                }
            }
            out.push_str(&line[plain_start..]);
        }
        out.push('\n');
    }
    out
}

fn looks_like_json(text: &str) -> bool {
    if text.contains("](") {
        return false;
    }
    let mut chars = text.chars().filter(|c| !c.is_whitespace());
    match (chars.next(), chars.next()) {
        (Some('{'), Some(next)) => {
            (next == '"' || next == '\'' || next.is_ascii_alphabetic() || next == '}')
                && text.contains(':')
        }
        (Some('['), Some(next)) => {
            matches!(next, '{' | '[' | '"' | '-' | ']') || next.is_ascii_digit()
        }
        _ => false,
    }
}

fn json_repair(text: &str) -> CorrectionResult<String> {
    if text.contains("```") {
        let mut failure = None;
        let out = map_fenced_blocks(text, |lang, body| {
            if !JSON_LANGS.contains(&lang) {
                return body.to_string();
            }
            repair_json(body).unwrap_or_else(|e| {
                failure = Some(e);
                body.to_string()
            })
        });
        return match failure {
            Some(e) => Err(e),
            None => Ok(out),
        };
    }
    let trimmed = text.trim();
    if !looks_like_json(trimmed) {
        return Ok(text.to_string());
    }
    let lead = &text[..text.len() - text.trim_start().len()];
    let trail = &text[text.trim_end().len()..];
    Ok(format!("{lead}{}{trail}", repair_json(trimmed)?))
}

fn repair_json(source: &str) -> CorrectionResult<String> {
    if source.trim().is_empty() || serde_json::from_str::<serde_json::Value>(source).is_ok() {
        return Ok(source.to_string());
    }
    let repaired = compiled(&SINGLE_QUOTED_KEY)?.replace_all(source, "\"${1}\"${2}");
    let repaired = compiled(&BARE_KEY)?.replace_all(&repaired, "${1}\"${2}\"${3}");
    let repaired = compiled(&MISSING_COMMA)?.replace_all(&repaired, "${1},${2}${3}");
    let repaired = close_json_structures(&repaired);
    Ok(compiled(&TRAILING_COMMA)?
        .replace_all(&repaired, "${1}")
        .into_owned())
}

/// What a bracket scan treats as structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BracketScan {
    /// Braces and square brackets
    Json,
    /// All three bracket kinds
    Code,
    /// All three, with `//` line comments skipped
    CLike,
}

fn closer_for(open: char) -> Option<char> {
    match open {
        '(' => Some(')'),
        '[' => Some(']'),
        '{' => Some('}'),
        _ => None,
    }
}

/// Closers still owed at the end of `source`, innermost first, and whether
/// a string literal is left open. A closer that matches a deeper opener
/// closes everything above it; one that matches nothing is ignored.
fn open_brackets(source: &str, scan: BracketScan) -> (Vec<char>, bool) {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = source.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '/' if scan == BracketScan::CLike && chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '(' if scan == BracketScan::Json => {}
            '{' | '[' | '(' => stack.extend(closer_for(ch)),
            ')' if scan == BracketScan::Json => {}
            '}' | ']' | ')' => {
                if let Some(pos) = stack.iter().rposition(|&c| c == ch) {
                    stack.truncate(pos);
                }
            }
            _ => {}
        }
    }
    stack.reverse();
    (stack, in_string)
}

fn close_json_structures(source: &str) -> String {
    let (closers, in_string) = open_brackets(source, BracketScan::Json);
    if closers.is_empty() && !in_string {
        return source.to_string();
    }
    let mut out = source.trim_end().to_string();
    if in_string {
        out.push('"');
    }
    out.extend(closers);
    out
}

#[derive(Debug)]
struct OpenTag {
    lower: String,
    name: String,
}

fn unclosed_tags(text: &str, known_only: bool) -> CorrectionResult<Vec<OpenTag>> {
    let re = compiled(&TAG)?;
    let mut stack: Vec<OpenTag> = Vec::new();
    for caps in re.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        // `Vec<String>` and friends
        if text[..whole.start()]
            .chars()
            .next_back()
            .is_some_and(char::is_alphanumeric)
        {
            continue;
        }
        let name = &caps[2];
        if name.len() == 1 && name.chars().all(|c| c.is_ascii_uppercase()) {
            continue;
        }
        let lower = name.to_ascii_lowercase();
        if VOID_TAGS.contains(&lower.as_str()) || !caps[4].is_empty() {
            continue;
        }
        if known_only && !PROSE_TAGS.contains(&lower.as_str()) {
            continue;
        }
        if caps[1].is_empty() {
            stack.push(OpenTag {
                lower,
                name: name.to_string(),
            });
        } else if let Some(pos) = stack.iter().rposition(|t| t.lower == lower) {
            stack.truncate(pos);
        }
    }
    Ok(stack)
}

fn closing_tags(open: &[OpenTag]) -> String {
    open.iter().rev().map(|t| format!("</{}>", t.name)).collect()
}

fn markup_tags(text: &str) -> CorrectionResult<String> {
    let mut failure = None;
    let text = map_fenced_blocks(text, |lang, body| {
        if !MARKUP_LANGS.contains(&lang) {
            return body.to_string();
        }
        match unclosed_tags(body, false) {
            Ok(open) if !open.is_empty() => format!("{body}\n{}", closing_tags(&open)),
            Ok(_) => body.to_string(),
            Err(e) => {
                failure = Some(e);
                body.to_string()
            }
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }

    let open = unclosed_tags(&prose_only(&text), true)?;
    if open.is_empty() {
        return Ok(text);
    }
    let mut out = text.trim_end().to_string();
    out.push_str(&closing_tags(&open));
    Ok(out)
}

fn code_syntax(text: &str) -> CorrectionResult<String> {
    Ok(map_fenced_blocks(text, |lang, body| {
        if PYTHON_LANGS.contains(&lang) {
            return reindent_python(body).unwrap_or_else(|| body.to_string());
        }
        body.to_string()
    }))
}

fn balance_brackets(text: &str) -> CorrectionResult<String> {
    let text = map_fenced_blocks(text, |lang, body| {
        if JSON_LANGS.contains(&lang)
            || MARKUP_LANGS.contains(&lang)
            || UNBRACKETED_LANGS.contains(&lang)
        {
            return body.to_string();
        }
        let scan = if C_LIKE_LANGS.contains(&lang) {
            BracketScan::CLike
        } else {
            BracketScan::Code
        };
        let (closers, in_string) = open_brackets(body, scan);
        if closers.is_empty() || in_string {
            return body.to_string();
        }
        let closers: String = closers.into_iter().collect();
        format!("{}\n{closers}", body.trim_end())
    });
    Ok(map_prose_lines(&text, |line| {
        if line.trim_start().starts_with('|') {
            return line.to_string();
        }
        close_prose_line(&close_code_spans(line))
    }))
}

/// An inline code span: the opening run starts at `start`, the content is
/// `content`, and the closing run ends at `end`.
struct CodeSpan {
    start: usize,
    content: std::ops::Range<usize>,
    end: usize,
}

fn code_spans(line: &str) -> Vec<CodeSpan> {
    let bytes = line.as_bytes();
    let mut spans = Vec::new();
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
        let run = i - start;
        if let Some(close) = find_backtick_run(bytes, i, run) {
            spans.push(CodeSpan {
                start,
                content: i..close,
                end: close + run,
            });
            i = close + run;
        }
    }
    spans
}

/// Close brackets left open inside each inline code span, before its
/// closing backticks.
fn close_code_spans(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut last = 0;
    for span in code_spans(line) {
        let content = &line[span.content.clone()];
        out.push_str(&line[last..span.content.start]);
        let (closers, in_string) = open_brackets(content, BracketScan::Code);
        if closers.is_empty() || in_string {
            out.push_str(content);
        } else {
            let kept = content.trim_end();
            out.push_str(kept);
            out.extend(closers);
            out.push_str(&content[kept.len()..]);
        }
        out.push_str(&line[span.content.end..span.end]);
        last = span.end;
    }
    out.push_str(&line[last..]);
    out
}

/// Close a call or index left open in prose, such as `f(x, g(y)`. Only
/// brackets opened right after a name count; a line with any other open
/// bracket is left alone. Code spans and math are masked out first.
fn close_prose_line(line: &str) -> String {
    let mut masked = String::with_capacity(line.len());
    let mut last = 0;
    for span in code_spans(line) {
        masked.push_str(&line[last..span.start]);
        masked.push('0');
        last = span.end;
    }
    masked.push_str(&line[last..]);
    let masked = mask_math(&masked);

    let mut stack: Vec<(char, bool)> = Vec::new();
    let mut prev: Option<char> = None;
    for ch in masked.chars() {
        if let Some(closer) = closer_for(ch) {
            let call = prev.is_some_and(|p| p.is_alphanumeric() || p == '_');
            stack.push((closer, call));
        } else if matches!(ch, ')' | ']' | '}')
            && let Some(pos) = stack.iter().rposition(|&(c, _)| c == ch)
        {
            stack.truncate(pos);
        }
        prev = Some(ch);
    }
    if stack.is_empty() || !stack.iter().all(|&(_, call)| call) {
        return line.to_string();
    }
    let mut out = line.trim_end().to_string();
    out.extend(stack.iter().rev().map(|&(c, _)| c));
    out
}

fn starts_with_keyword(stmt: &str, keyword: &str) -> bool {
    stmt.strip_prefix(keyword)
        .is_some_and(|rest| !rest.starts_with(|c: char| c.is_alphanumeric() || c == '_'))
}

/// Rebuild indentation for a python block that lost all of it.
fn reindent_python(body: &str) -> Option<String> {
    let lines: Vec<&str> = body.split('\n').collect();
    let flat = lines.iter().all(|l| !l.starts_with([' ', '\t']));
    let opens_block = lines.iter().any(|l| l.trim_end().ends_with(':'));
    if !flat || !opens_block {
        return None;
    }

    let mut level: usize = 0;
    let mut after_exit = false;
    let mut out = Vec::with_capacity(lines.len());
    for line in lines {
        let stmt = line.trim();
        if stmt.is_empty() {
            out.push(String::new());
            continue;
        }
        if !after_exit && PY_DEDENT.iter().any(|k| starts_with_keyword(stmt, k)) {
            level = level.saturating_sub(1);
        }
        out.push(format!("{}{stmt}", "    ".repeat(level)));
        after_exit = false;
        if stmt.ends_with(':') {
            level += 1;
        } else if PY_EXIT.iter().any(|k| starts_with_keyword(stmt, k)) {
            level = level.saturating_sub(1);
            after_exit = true;
        }
    }
    Some(out.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corrector(config: CorrectionConfig) -> ErrorCorrector {
        ErrorCorrector::new(
            Arc::new(config),
            Arc::new(CorrectionCache::new(16)),
            Arc::new(PerformanceMetrics::new()),
        )
    }

    #[test]
    fn test_json_fence_closed() {
        let out = json_repair("```json\n{\"a\":1,\n```").unwrap();
        assert_eq!(out, "```json\n{\"a\":1}\n```");
    }

    #[test]
    fn test_whole_text_json_closed() {
        assert_eq!(json_repair("{\"a\": [1, 2").unwrap(), "{\"a\": [1, 2]}");
    }

    #[test]
    fn test_valid_json_untouched() {
        let text = "```json\n{\"a\": {\"b\": [1, 2]}}\n```";
        assert_eq!(json_repair(text).unwrap(), text);
    }

    #[test]
    fn test_json_keys_quoted() {
        assert_eq!(
            repair_json("{name: \"x\", 'age': 3}").unwrap(),
            "{\"name\": \"x\", \"age\": 3}"
        );
    }

    #[test]
    fn test_json_missing_commas() {
        let out = repair_json("{\n\"a\": 1\n\"b\": 2\n}").unwrap();
        assert_eq!(out, "{\n\"a\": 1,\n\"b\": 2\n}");
        assert!(serde_json::from_str::<serde_json::Value>(&out).is_ok());
    }

    #[test]
    fn test_prose_with_brackets_is_not_json() {
        let text = "[docs](http://x) explain it";
        assert_eq!(json_repair(text).unwrap(), text);
    }

    #[test]
    fn test_unclosed_tag_appended() {
        assert_eq!(markup_tags("<b>bold").unwrap(), "<b>bold</b>");
        assert_eq!(
            markup_tags("<div><span>x").unwrap(),
            "<div><span>x</span></div>"
        );
    }

    #[test]
    fn test_generics_and_void_tags_untouched() {
        for text in [
            "a Vec<String> here",
            "line<br>break",
            "see <br> and <img src=\"a.png\"/>",
            "use `<div>` for layout",
            "<p>closed</p>",
        ] {
            assert_eq!(markup_tags(text).unwrap(), text);
        }
    }

    #[test]
    fn test_prose_placeholders_not_closed() {
        for text in ["read from <stdin> until EOF", "replace <path> with yours", "a <T> param"] {
            assert_eq!(markup_tags(text).unwrap(), text);
        }
        assert_eq!(
            markup_tags("pipe <stdin> into <em>it").unwrap(),
            "pipe <stdin> into <em>it</em>"
        );
    }

    #[test]
    fn test_custom_elements_closed_in_markup_fence() {
        let out = markup_tags("```xml\n<config><item>one\n```").unwrap();
        assert_eq!(out, "```xml\n<config><item>one\n</item></config>\n```");
    }

    #[test]
    fn test_markup_fence_closed() {
        let out = markup_tags("```html\n<ul><li>one\n```").unwrap();
        assert_eq!(out, "```html\n<ul><li>one\n</li></ul>\n```");
    }

    #[test]
    fn test_python_reindented() {
        let text = "```python\ndef f(x):\nif x:\nreturn 1\nelse:\nreturn 2\n```";
        let out = code_syntax(text).unwrap();
        assert_eq!(
            out,
            "```python\ndef f(x):\n    if x:\n        return 1\n    else:\n        return 2\n```"
        );
    }

    #[test]
    fn test_indented_python_untouched() {
        let text = "```python\ndef f():\n    return 1\n```";
        assert_eq!(code_syntax(text).unwrap(), text);
    }

    #[test]
    fn test_c_like_brackets_closed() {
        let out = balance_brackets("```js\nfunction f() {\n  return [1, 2\n```").unwrap();
        assert_eq!(out, "```js\nfunction f() {\n  return [1, 2\n]}\n```");
    }

    #[test]
    fn test_brackets_in_strings_and_comments_ignored() {
        let text = "```rust\nlet s = \"(\"; // {\n```";
        assert_eq!(balance_brackets(text).unwrap(), text);
    }

    #[test]
    fn test_brackets_closed_in_any_code_fence() {
        let out = balance_brackets("```text\ncall f(x, g(y)\n```").unwrap();
        assert_eq!(out, "```text\ncall f(x, g(y)\n)\n```");
        let out = balance_brackets("```\nmap[key](arg\n```").unwrap();
        assert_eq!(out, "```\nmap[key](arg\n)\n```");
        // `//` is not a comment outside C-like languages
        let out = balance_brackets("```bash\ncurl http://x/$(id\n```").unwrap();
        assert_eq!(out, "```bash\ncurl http://x/$(id\n)\n```");
    }

    #[test]
    fn test_nested_mismatch_closes_through_outer() {
        // `]` closes the `[` below the open `(`
        let (closers, _) = open_brackets("{a[b(c]", BracketScan::Code);
        assert_eq!(closers, vec!['}']);
        let (closers, _) = open_brackets("f(x]", BracketScan::Code);
        assert_eq!(closers, vec![')']);
        let out = balance_brackets("```go\nif (a[0] {\n```").unwrap();
        assert_eq!(out, "```go\nif (a[0] {\n})\n```");
    }

    #[test]
    fn test_diff_and_json_fences_skipped() {
        for text in ["```diff\n- call(a\n+ call(a, b)\n```", "```json\n{\"a\": [1\n```"] {
            assert_eq!(balance_brackets(text).unwrap(), text);
        }
    }

    #[test]
    fn test_inline_code_span_closed() {
        assert_eq!(
            balance_brackets("Run `print(len(xs)` first").unwrap(),
            "Run `print(len(xs))` first"
        );
        assert_eq!(balance_brackets("Use `f()` here").unwrap(), "Use `f()` here");
    }

    #[test]
    fn test_prose_call_closed() {
        assert_eq!(balance_brackets("then call f(x, g(y)").unwrap(), "then call f(x, g(y))");
        assert_eq!(balance_brackets("index xs[0").unwrap(), "index xs[0]");
    }

    #[test]
    fn test_prose_brackets_left_alone() {
        for text in [
            "see (the note below",
            "sad :(",
            "[docs](http://x",
            "f(x and (see note",
            "cost $f(x$ here",
            "| a(b | c |",
        ] {
            assert_eq!(balance_brackets(text).unwrap(), text);
        }
    }

    #[test]
    fn test_math_wrapped_by_corrector() {
        let c = corrector(CorrectionConfig::default());
        assert_eq!(c.correct("so a^2+b^2=c^2 holds"), "so $a^2+b^2=c^2$ holds");
    }

    #[test]
    fn test_disabled_is_identity() {
        let c = corrector(CorrectionConfig::disabled());
        let text = "{\"a\":1, <b>x a^2";
        assert_eq!(c.correct(text), text);
    }

    #[test]
    fn test_correct_is_idempotent() {
        let c = corrector(CorrectionConfig::default());
        let once = c.correct("```json\n{\"a\": [1,\n```\n\n<em>note and x^2");
        assert_eq!(c.correct(&once), once);
        let once = c.correct("```text\ncall f(x, g(y)\n```\nThen `g(1` and h(2");
        assert_eq!(c.correct(&once), once);
    }
}
