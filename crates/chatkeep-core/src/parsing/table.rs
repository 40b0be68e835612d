//! Pipe-table recognition.
//!
//! Accepts three shapes:
//! - header line followed by an alignment row (`| --- | :-: |`)
//! - header line followed directly by a row of the same width; the
//!   alignment row is synthesised
//! - alignment row and first data row glued onto one line
//!
//! A leading clause before the first `|` of the header ("Results:" or a
//! list marker) is returned separately instead of becoming a column.

use regex::Regex;

use crate::formatting::rules::{LazyPattern, compiled, is_escaped};
use crate::models::{ColumnAlignment, ContentBlock};

lazy_static::lazy_static! {
    static ref ALIGNMENT_CELL: LazyPattern = Regex::new(r"^:?-+:?$");
    static ref LIST_MARKER: LazyPattern = Regex::new(r"^(?:[-*+•]|\d{1,3}[.)])(?:\s|$)");
}

/// A table found at the start of a run of lines
#[derive(Clone, Debug, PartialEq)]
pub struct TableMatch {
    /// Clause peeled off the header line
    pub lead: Option<String>,
    pub table: ContentBlock,
    /// Source lines the table spans, header included
    pub lines: usize,
}

/// Split a table row into trimmed cells, honouring `\|` escapes.
pub fn split_table_cells(line: &str) -> Vec<String> {
    let mut row = line.trim();
    row = row.strip_prefix('|').unwrap_or(row);
    if row.ends_with('|') && !is_escaped(row, row.len() - 1) {
        row = &row[..row.len() - 1];
    }
    let mut cells = Vec::new();
    let mut current = String::new();
    for (i, ch) in row.char_indices() {
        if ch == '|' && !is_escaped(row, i) {
            cells.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(ch);
        }
    }
    cells.push(current.trim().to_string());
    cells
}

fn is_alignment_row(line: &str) -> bool {
    let Ok(cell) = compiled(&ALIGNMENT_CELL) else {
        return false;
    };
    line.contains('-') && split_table_cells(line).iter().all(|c| cell.is_match(c))
}

fn first_unescaped_pipe(line: &str) -> Option<usize> {
    line.char_indices()
        .find(|&(i, ch)| ch == '|' && !is_escaped(line, i))
        .map(|(i, _)| i)
}

/// Separate "Results: | A | B |" into its clause and the header proper.
fn peel_lead(line: &str) -> (Option<String>, &str) {
    let Some(pipe) = first_unescaped_pipe(line) else {
        return (None, line);
    };
    let lead = line[..pipe].trim();
    if lead.is_empty() {
        return (None, line);
    }
    let is_marker = compiled(&LIST_MARKER).is_ok_and(|re| re.is_match(lead));
    if lead.ends_with(':') || is_marker {
        (Some(lead.to_string()), &line[pipe..])
    } else {
        (None, line)
    }
}

/// Alignment row glued to the first data row, e.g. `|---|---| 1 | 2 |`.
fn split_combined_row(line: &str, columns: usize) -> Option<(Vec<ColumnAlignment>, Vec<String>)> {
    let pattern = format!(r"^\s*\|?((?:\s*:?-+:?\s*\|){{{columns}}})(.*)$");
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(line)?;
    let rest = caps.get(2)?.as_str();
    if rest.trim().is_empty() || !rest.chars().any(|c| c != '|' && !c.is_whitespace()) {
        return None;
    }
    let alignment = split_table_cells(caps.get(1)?.as_str())
        .iter()
        .map(|c| ColumnAlignment::from_separator_cell(c))
        .collect();
    Some((alignment, split_table_cells(rest)))
}

fn fit_row(mut cells: Vec<String>, columns: usize) -> Vec<String> {
    cells.resize(columns, String::new());
    cells
}

/// Try to read a table whose header is `lines[0]`.
pub fn extract_table(lines: &[&str]) -> Option<TableMatch> {
    let (header_line, second) = match lines {
        [header, second, ..] => (*header, *second),
        _ => return None,
    };
    if !header_line.contains('|') {
        return None;
    }
    let (lead, header_part) = peel_lead(header_line);
    let header = split_table_cells(header_part);
    let columns = header.len();
    if columns < 2 {
        return None;
    }

    let mut rows = Vec::new();
    let alignment: Vec<ColumnAlignment>;
    if is_alignment_row(second) {
        alignment = split_table_cells(second)
            .iter()
            .map(|c| ColumnAlignment::from_separator_cell(c))
            .collect();
    } else if let Some((parsed, first_row)) = split_combined_row(second, columns) {
        alignment = parsed;
        rows.push(fit_row(first_row, columns));
    } else if second.contains('|') && split_table_cells(second).len() == columns {
        alignment = vec![ColumnAlignment::None; columns];
        rows.push(split_table_cells(second));
    } else {
        return None;
    }

    let mut consumed = 2;
    for line in &lines[2..] {
        if line.trim().is_empty() || !line.contains('|') {
            break;
        }
        rows.push(fit_row(split_table_cells(line), columns));
        consumed += 1;
    }

    let mut alignment = alignment;
    alignment.resize(columns, ColumnAlignment::None);
    Some(TableMatch {
        lead,
        table: ContentBlock::Table {
            header,
            rows,
            alignment,
        },
        lines: consumed,
    })
}
