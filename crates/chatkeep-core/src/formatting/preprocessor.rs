//! Stage A: cheap cleanup of each streamed delta before it is buffered.

use std::sync::Arc;

use regex::Regex;

use super::config::{CorrectionConfig, CorrectionIntensity};
use super::format_corrector::FormatCorrector;
use super::rules::{LazyPattern, compiled, fence_info, map_outside_inline_code, map_outside_math};

/// Deltas longer than this may not shrink below half their size
const SHRINK_FLOOR_MIN_LEN: usize = 20;

lazy_static::lazy_static! {
    static ref NEWLINE_RUN: LazyPattern = Regex::new(r"\n{3,}");
    static ref SPACE_BEFORE_PUNCT: LazyPattern = Regex::new(r"(\p{L})[ \t]+([,;!?])");
    static ref REPEATED_COMMA: LazyPattern = Regex::new(r",{2,}");
    static ref PAREN_OPEN_GAP: LazyPattern = Regex::new(r"\([ \t]+(\S)");
    static ref PAREN_CLOSE_GAP: LazyPattern = Regex::new(r"([^\s(])[ \t]+\)");
    static ref FENCE_GLUED: LazyPattern = Regex::new(r"([^`\s])(```)");
    static ref HEADER_GLUED: LazyPattern = Regex::new(r"^(#{1,6})([^\s#\d!])");
}

const INVISIBLE: &[char] = &['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'];

pub struct RealtimePreprocessor {
    config: Arc<CorrectionConfig>,
    format: Arc<FormatCorrector>,
}

impl RealtimePreprocessor {
    pub fn new(config: Arc<CorrectionConfig>, format: Arc<FormatCorrector>) -> Self {
        Self { config, format }
    }

    /// Clean one delta. `context` describes the text emitted so far for this
    /// stream and is advanced past the returned text.
    pub fn process(&self, delta: &str, context: &mut DeltaContext) -> String {
        if !self.config.enable_realtime_preprocessing {
            context.advance(delta);
            return delta.to_string();
        }

        // `\r` closing the previous delta already became a newline
        let delta = match delta.strip_prefix('\n') {
            Some(rest) if context.pending_cr => rest,
            _ => delta,
        };
        context.pending_cr = delta.ends_with('\r');
        if delta.is_empty() {
            return String::new();
        }

        let in_fence = context.inside_fence();
        let mut out = light_cleanup(delta, in_fence || delta.contains("```"));
        if self.config.correction_intensity >= CorrectionIntensity::Moderate {
            out = self.moderate_pass(&out, context.at_line_start(), in_fence);
        }
        let out = apply_floor(delta, out);
        context.advance(&out);
        out
    }

    fn moderate_pass(&self, text: &str, mut at_line_start: bool, mut in_fence: bool) -> String {
        let aggressive = self.config.correction_intensity == CorrectionIntensity::Aggressive;
        let mut out = String::with_capacity(text.len());
        for line in text.split_inclusive('\n') {
            let (body, newline) = match line.strip_suffix('\n') {
                Some(body) => (body, "\n"),
                None => (line, ""),
            };
            let fixed = if at_line_start && fence_info(body).is_some() {
                in_fence = !in_fence;
                body.to_string()
            } else if in_fence {
                body.to_string()
            } else {
                let fixed = fix_prose_line(body, at_line_start);
                // a glued fence was split onto its own line
                for part in fixed.split('\n').skip(1) {
                    if fence_info(part).is_some() {
                        in_fence = !in_fence;
                    }
                }
                if aggressive && at_line_start && !newline.is_empty() {
                    self.format.correct_line_local(&fixed)
                } else {
                    fixed
                }
            };
            out.push_str(&fixed);
            out.push_str(newline);
            at_line_start = !newline.is_empty();
        }
        out
    }
}

/// What the preprocessor needs to know about the text a stream has emitted
/// so far, updated per delta instead of rescanning the buffer.
#[derive(Clone, Debug, Default)]
pub struct DeltaContext {
    /// Fence parity over completed lines
    in_fence: bool,
    /// Start of the unfinished last line, enough to recognise a fence
    line_head: String,
    /// Text after the head's backtick run has begun
    past_fence_run: bool,
    /// A backtick after the fence run: an inline span, not a fence
    head_closed_inline: bool,
    mid_line: bool,
    pending_cr: bool,
}

impl DeltaContext {
    /// Context for a buffer that was replaced wholesale.
    pub fn from_text(text: &str) -> Self {
        let mut context = Self::default();
        context.advance(text);
        context
    }

    /// Whether the emitted text ends inside an unterminated code fence.
    pub fn inside_fence(&self) -> bool {
        self.in_fence != self.head_is_fence()
    }

    fn head_is_fence(&self) -> bool {
        self.line_head.trim_start().starts_with("```") && !self.head_closed_inline
    }

    pub fn at_line_start(&self) -> bool {
        !self.mid_line
    }

    fn advance(&mut self, emitted: &str) {
        let mut rest = emitted;
        while let Some(pos) = rest.find('\n') {
            self.push_head(&rest[..pos]);
            if self.head_is_fence() {
                self.in_fence = !self.in_fence;
            }
            self.line_head.clear();
            self.past_fence_run = false;
            self.head_closed_inline = false;
            self.mid_line = false;
            rest = &rest[pos + 1..];
        }
        self.push_head(rest);
    }

    fn push_head(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        self.mid_line = true;
        for ch in fragment.chars() {
            if self.line_head.trim_start().len() < 3 {
                self.line_head.push(ch);
                continue;
            }
            if !self.line_head.trim_start().starts_with("```") || self.head_closed_inline {
                break;
            }
            if ch != '`' {
                self.past_fence_run = true;
            } else if self.past_fence_run {
                self.head_closed_inline = true;
            }
        }
    }
}

fn light_cleanup(delta: &str, keep_blank_lines: bool) -> String {
    let text = delta
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace(INVISIBLE, "")
        .replace('\u{00A0}', " ");
    if keep_blank_lines {
        return text;
    }
    match compiled(&NEWLINE_RUN) {
        Ok(re) => re.replace_all(&text, "\n\n").into_owned(),
        Err(_) => text,
    }
}

fn fix_prose_line(line: &str, at_line_start: bool) -> String {
    let line = map_outside_inline_code(line, |segment| map_outside_math(segment, fix_prose_segment));
    if !at_line_start {
        return line;
    }
    match compiled(&HEADER_GLUED) {
        Ok(re) => re.replace(&line, "$1 $2").into_owned(),
        Err(_) => line,
    }
}

fn fix_prose_segment(segment: &str) -> String {
    let mut s = segment.to_string();
    for (pattern, replacement) in [
        (&*SPACE_BEFORE_PUNCT, "$1$2"),
        (&*REPEATED_COMMA, ","),
        (&*PAREN_OPEN_GAP, "($1"),
        (&*PAREN_CLOSE_GAP, "$1)"),
        (&*FENCE_GLUED, "$1\n$2"),
    ] {
        if let Ok(re) = pattern {
            s = re.replace_all(&s, replacement).into_owned();
        }
    }
    s
}

/// Never let cleanup blank a delta or eat most of a larger one.
fn apply_floor(original: &str, cleaned: String) -> String {
    if cleaned.trim().is_empty() && !original.trim().is_empty() {
        return original.to_string();
    }
    let before = original.chars().count();
    if before > SHRINK_FLOOR_MIN_LEN && cleaned.chars().count() * 2 < before {
        return original.to_string();
    }
    cleaned
}
