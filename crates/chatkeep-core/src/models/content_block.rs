use serde::{Deserialize, Serialize};

/// Column alignment parsed from a table separator row
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnAlignment {
    #[default]
    None,
    Left,
    Center,
    Right,
}

impl ColumnAlignment {
    /// Parse a separator cell such as `:---`, `---:` or `:-:`
    pub fn from_separator_cell(cell: &str) -> Self {
        let cell = cell.trim();
        match (cell.starts_with(':'), cell.ends_with(':') && cell.len() > 1) {
            (true, true) => ColumnAlignment::Center,
            (true, false) => ColumnAlignment::Left,
            (false, true) => ColumnAlignment::Right,
            (false, false) => ColumnAlignment::None,
        }
    }

    /// Canonical separator cell for this alignment
    pub fn separator_cell(&self) -> &'static str {
        match self {
            ColumnAlignment::None => "---",
            ColumnAlignment::Left => ":---",
            ColumnAlignment::Center => ":---:",
            ColumnAlignment::Right => "---:",
        }
    }
}

/// A typed, ordered segment of a finalized message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Regular markdown text (inline code spans are kept verbatim inside)
    Text { content: String },
    /// Fenced code block
    CodeBlock {
        content: String,
        language: Option<String>,
    },
    /// Display math from `$$...$$`, `\[...\]` or a ```math fence
    MathBlock { latex: String, display_mode: bool },
    /// Inline math from `\(...\)` or `$...$`
    InlineMath { latex: String },
    Table {
        header: Vec<String>,
        rows: Vec<Vec<String>>,
        alignment: Vec<ColumnAlignment>,
    },
}

impl ContentBlock {
    pub fn text(content: impl Into<String>) -> Self {
        ContentBlock::Text {
            content: content.into(),
        }
    }

    pub fn code(content: impl Into<String>, language: Option<&str>) -> Self {
        ContentBlock::CodeBlock {
            content: content.into(),
            language: language.map(str::to_string),
        }
    }

    pub fn display_math(latex: impl Into<String>) -> Self {
        ContentBlock::MathBlock {
            latex: latex.into(),
            display_mode: true,
        }
    }

    pub fn inline_math(latex: impl Into<String>) -> Self {
        ContentBlock::InlineMath {
            latex: latex.into(),
        }
    }

    /// Block-level elements break paragraphs; inline math does not.
    pub fn is_block_level(&self) -> bool {
        !matches!(
            self,
            ContentBlock::Text { .. } | ContentBlock::InlineMath { .. }
        )
    }

    /// The semantic content of the block without its delimiters.
    pub fn semantic_text(&self) -> String {
        match self {
            ContentBlock::Text { content } => content.clone(),
            ContentBlock::CodeBlock { content, .. } => content.clone(),
            ContentBlock::MathBlock { latex, .. } | ContentBlock::InlineMath { latex } => {
                latex.clone()
            }
            ContentBlock::Table { header, rows, .. } => {
                let mut lines = vec![header.join(" ")];
                lines.extend(rows.iter().map(|row| row.join(" ")));
                lines.join("\n")
            }
        }
    }

    /// A block is valid when it carries visible content.
    pub fn has_content(&self) -> bool {
        match self {
            ContentBlock::Table { header, rows, .. } => {
                header.iter().chain(rows.iter().flatten()).any(|c| !c.trim().is_empty())
            }
            other => !other.semantic_text().trim().is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_from_separator_cell() {
        assert_eq!(ColumnAlignment::from_separator_cell("---"), ColumnAlignment::None);
        assert_eq!(ColumnAlignment::from_separator_cell(":---"), ColumnAlignment::Left);
        assert_eq!(ColumnAlignment::from_separator_cell("---:"), ColumnAlignment::Right);
        assert_eq!(ColumnAlignment::from_separator_cell(" :-: "), ColumnAlignment::Center);
        assert_eq!(ColumnAlignment::from_separator_cell(":"), ColumnAlignment::Left);
    }

    #[test]
    fn test_block_serializes_with_type_tag() {
        let json = serde_json::to_value(ContentBlock::display_math("x^2")).unwrap();
        assert_eq!(json["type"], "math_block");
        assert_eq!(json["display_mode"], true);
    }

    #[test]
    fn test_empty_table_has_no_content() {
        let table = ContentBlock::Table {
            header: vec![" ".into()],
            rows: vec![],
            alignment: vec![ColumnAlignment::None],
        };
        assert!(!table.has_content());
        assert!(table.is_block_level());
    }
}
