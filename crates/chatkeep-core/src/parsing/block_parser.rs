//! Segments finalized message text into typed content blocks.
//!
//! Single left-to-right scan. At each cursor position, in priority order:
//! fenced code (line start), pipe table (line start), inline code, `$$` or
//! `\[` display math, `\(` or `$` inline math, otherwise plain text.

use super::math_heuristic::looks_like_math;
use super::table::{extract_table, split_table_cells};
use crate::formatting::rules::{fence_info, find_backtick_run, is_escaped};
use crate::models::ContentBlock;

/// Parse `text` into blocks. Never drops content: when nothing visible
/// comes out of non-blank input, the whole text is returned as one block.
pub fn parse(text: &str) -> Vec<ContentBlock> {
    let blocks = BlockParser::new(text).run();
    if !text.trim().is_empty() && !blocks.iter().any(ContentBlock::has_content) {
        return vec![ContentBlock::text(text)];
    }
    blocks
}

struct BlockParser<'a> {
    text: &'a str,
    pos: usize,
    blocks: Vec<ContentBlock>,
    pending: String,
    after_block: bool,
}

impl<'a> BlockParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            blocks: Vec::new(),
            pending: String::new(),
            after_block: false,
        }
    }

    fn run(mut self) -> Vec<ContentBlock> {
        let text = self.text;
        let bytes = text.as_bytes();
        while self.pos < bytes.len() {
            let at_line_start = self.pos == 0 || bytes[self.pos - 1] == b'\n';
            if at_line_start && (self.try_fence() || self.try_table()) {
                continue;
            }
            match bytes[self.pos] {
                b'`' => self.inline_code(),
                b'$' if !is_escaped(text, self.pos) => {
                    if bytes.get(self.pos + 1) == Some(&b'$') {
                        self.display_dollars();
                    } else {
                        self.inline_dollar();
                    }
                }
                b'\\' if !is_escaped(text, self.pos) => match bytes.get(self.pos + 1) {
                    Some(b'[') => self.bracket_math(r"\]", true),
                    Some(b'(') => self.bracket_math(r"\)", false),
                    _ => self.push_char(),
                },
                _ => self.push_char(),
            }
        }
        self.flush_text(true);
        self.blocks
    }

    fn push_char(&mut self) {
        if let Some(ch) = self.text[self.pos..].chars().next() {
            self.pending.push(ch);
            self.pos += ch.len_utf8();
        }
    }

    /// The rest of the input is literal text.
    fn take_rest_literal(&mut self) {
        self.pending.push_str(&self.text[self.pos..]);
        self.pos = self.text.len();
    }

    /// Move buffered text into a Text block. Newlines are trimmed where the
    /// text borders a block-level element.
    fn flush_text(&mut self, before_block: bool) {
        let mut content = std::mem::take(&mut self.pending);
        if self.after_block {
            content = content.trim_start_matches(['\n', '\r']).to_string();
        }
        if before_block {
            content = content.trim_end_matches(['\n', '\r']).to_string();
        }
        if !content.trim().is_empty() {
            self.blocks.push(ContentBlock::text(content));
            self.after_block = false;
        }
    }

    fn push_block(&mut self, block: ContentBlock) {
        let block_level = block.is_block_level();
        self.flush_text(block_level);
        self.blocks.push(block);
        self.after_block = block_level;
    }

    fn line_end(&self, from: usize) -> usize {
        self.text[from..]
            .find('\n')
            .map(|p| from + p)
            .unwrap_or(self.text.len())
    }

    fn try_fence(&mut self) -> bool {
        let text = self.text;
        let open_end = self.line_end(self.pos);
        let Some(info) = fence_info(&text[self.pos..open_end]) else {
            return false;
        };
        if open_end >= text.len() {
            self.take_rest_literal();
            return true;
        }

        let body_start = open_end + 1;
        let mut cursor = body_start;
        let close = loop {
            if cursor > text.len() {
                break None;
            }
            let end = self.line_end(cursor);
            if fence_info(&text[cursor..end]).is_some() {
                break Some((cursor, end));
            }
            if end >= text.len() {
                break None;
            }
            cursor = end + 1;
        };
        let Some((close_start, close_end)) = close else {
            self.take_rest_literal();
            return true;
        };

        let body = text[body_start..close_start].trim_end_matches(['\n', '\r']);
        let language = info.to_string();
        self.pos = (close_end + 1).min(text.len());
        self.emit_fence(&language, body);
        true
    }

    fn emit_fence(&mut self, language: &str, body: &str) {
        let lower = language.to_ascii_lowercase();
        match lower.as_str() {
            "markdown" | "md" => {
                self.flush_text(true);
                for block in parse(body) {
                    self.after_block = block.is_block_level();
                    self.blocks.push(block);
                }
            }
            "math" | "latex" | "tex" => self.push_block(ContentBlock::display_math(body.trim())),
            "" | "text" if fenced_table(body) => {
                self.flush_text(true);
                for block in parse(body) {
                    self.after_block = block.is_block_level();
                    self.blocks.push(block);
                }
            }
            "" => self.push_block(ContentBlock::code(body, None)),
            _ => self.push_block(ContentBlock::code(body, Some(language))),
        }
    }

    fn try_table(&mut self) -> bool {
        let text = self.text;
        let line = &text[self.pos..self.line_end(self.pos)];
        if !line.contains('|') || split_table_cells(line).len() < 2 {
            return false;
        }
        let lines: Vec<&str> = text[self.pos..]
            .split('\n')
            .take_while(|l| !l.trim().is_empty())
            .collect();
        let Some(found) = extract_table(&lines) else {
            return false;
        };
        let consumed: usize = lines[..found.lines].iter().map(|l| l.len() + 1).sum();
        self.pos = (self.pos + consumed).min(text.len());
        if let Some(lead) = found.lead {
            self.flush_text(true);
            self.blocks.push(ContentBlock::text(lead));
        }
        self.push_block(found.table);
        true
    }

    fn inline_code(&mut self) {
        let text = self.text;
        let bytes = text.as_bytes();
        let start = self.pos;
        let mut run_end = start;
        while run_end < bytes.len() && bytes[run_end] == b'`' {
            run_end += 1;
        }
        let run = run_end - start;
        let end = find_backtick_run(bytes, run_end, run)
            .map(|close| close + run)
            .unwrap_or(run_end);
        self.pending.push_str(&text[start..end]);
        self.pos = end;
    }

    fn display_dollars(&mut self) {
        let text = self.text;
        let open = self.pos;
        match find_unescaped(text, "$$", open + 2) {
            Some(close) if !text[open + 2..close].trim().is_empty() => {
                let latex = text[open + 2..close].trim().to_string();
                self.pos = close + 2;
                self.push_block(ContentBlock::display_math(latex));
            }
            Some(close) => {
                self.pending.push_str(&text[open..close + 2]);
                self.pos = close + 2;
            }
            None => self.take_rest_literal(),
        }
    }

    fn inline_dollar(&mut self) {
        let text = self.text;
        let open = self.pos;
        if let Some(close) = find_single_dollar(text, open + 1) {
            let payload = &text[open + 1..close];
            if looks_like_math(payload) {
                self.pos = close + 1;
                self.push_block(ContentBlock::inline_math(payload));
                return;
            }
        }
        self.pending.push('$');
        self.pos += 1;
    }

    fn bracket_math(&mut self, closer: &str, display: bool) {
        let text = self.text;
        let open = self.pos;
        match find_unescaped(text, closer, open + 2) {
            Some(close) if !text[open + 2..close].trim().is_empty() => {
                let latex = text[open + 2..close].trim();
                let block = if display {
                    ContentBlock::display_math(latex)
                } else {
                    ContentBlock::inline_math(latex)
                };
                self.pos = close + closer.len();
                self.push_block(block);
            }
            Some(close) => {
                self.pending.push_str(&text[open..close + closer.len()]);
                self.pos = close + closer.len();
            }
            None => self.take_rest_literal(),
        }
    }
}

/// A blank or `text` fence whose body starts with a header and alignment row.
fn fenced_table(body: &str) -> bool {
    let lines: Vec<&str> = body.split('\n').collect();
    lines.len() >= 2
        && split_table_cells(lines[0]).len() >= 2
        && lines[1].contains('-')
        && extract_table(&lines).is_some_and(|found| found.lead.is_none())
}

/// Next occurrence of `needle` at or after `from` whose first byte is not
/// backslash-escaped.
fn find_unescaped(text: &str, needle: &str, from: usize) -> Option<usize> {
    let mut search = from;
    while search <= text.len() {
        let found = search + text.get(search..)?.find(needle)?;
        if !is_escaped(text, found) {
            return Some(found);
        }
        search = found + needle.len();
    }
    None
}

/// Closing `$` for inline math: unescaped, not part of `$$`, and within the
/// same paragraph.
fn find_single_dollar(text: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' if bytes.get(i + 1) == Some(&b'\n') => return None,
            b'$' if !is_escaped(text, i) => {
                if bytes.get(i + 1) == Some(&b'$') {
                    return None;
                }
                return Some(i);
            }
            _ => {}
        }
        i += 1;
    }
    None
}
