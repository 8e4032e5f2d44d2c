//! The pipe-table sub-format used by table fields.
//!
//! Cells are single-line. A literal `|` is written `\|`; a run of backslashes directly
//! before a literal `|` is doubled first, so `escape_cell` and `unescape_cell` are exact
//! inverses. The first row is always the header; a dash separator right after it is
//! optional and never treated as data.

use crate::error::{CellError, TableError, ValueError};
use crate::model::{CellResponse, CellType, CellValue, Column, TableRowResponse};
use crate::values::{self, RawValue, Sentinel};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Grid {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Parses pipe-table text. Blank lines are ignored; every other line must be a row.
pub fn parse_grid(text: &str) -> Result<Grid, TableError> {
    let mut lines = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !trimmed.starts_with('|') {
            return Err(TableError::NotARow {
                line: i + 1,
                text: trimmed.to_string(),
            });
        }
        lines.push(split_row(trimmed));
    }

    let mut lines = lines.into_iter();
    let Some(header_cells) = lines.next() else {
        return Ok(Grid::default());
    };
    let headers: Vec<String> = header_cells.iter().map(|c| unescape_cell(c)).collect();

    let mut rows = Vec::new();
    for (i, cells) in lines.enumerate() {
        if i == 0 && is_separator_row(&cells) {
            continue;
        }
        rows.push(cells.iter().map(|c| unescape_cell(c)).collect());
    }
    Ok(Grid { headers, rows })
}

/// Splits one `| a | b |` line into trimmed, still-escaped cell texts.
pub fn split_row(line: &str) -> Vec<String> {
    let line = line.trim();
    let body = line.strip_prefix('|').unwrap_or(line);

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut backslashes = 0usize;
    let mut ended_on_delimiter = false;
    for c in body.chars() {
        ended_on_delimiter = false;
        if c == '|' && backslashes % 2 == 0 {
            cells.push(current.trim().to_string());
            current.clear();
            ended_on_delimiter = true;
            backslashes = 0;
            continue;
        }
        if c == '\\' {
            backslashes += 1;
        } else {
            backslashes = 0;
        }
        current.push(c);
    }
    if !ended_on_delimiter {
        cells.push(current.trim().to_string());
    }
    cells
}

pub fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|cell| {
            let inner = cell.trim().trim_start_matches(':').trim_end_matches(':');
            !inner.is_empty() && inner.chars().all(|c| c == '-')
        })
}

/// Escapes cell text for writing between pipes. Line breaks and control
/// characters other than tab are rejected.
pub fn escape_cell(text: &str) -> Result<String, CellError> {
    for c in text.chars() {
        if c == '\n' || c == '\r' {
            return Err(CellError::Newline {
                text: text.to_string(),
            });
        }
        if c.is_control() && c != '\t' {
            return Err(CellError::ControlCharacter {
                text: text.to_string(),
                code: c as u32,
            });
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut backslashes = 0usize;
    for c in text.chars() {
        match c {
            '\\' => backslashes += 1,
            '|' => {
                push_backslashes(&mut out, backslashes * 2 + 1);
                out.push('|');
                backslashes = 0;
            }
            _ => {
                push_backslashes(&mut out, backslashes);
                out.push(c);
                backslashes = 0;
            }
        }
    }
    push_backslashes(&mut out, backslashes);
    Ok(out)
}

pub fn unescape_cell(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut backslashes = 0usize;
    for c in text.chars() {
        match c {
            '\\' => backslashes += 1,
            '|' => {
                push_backslashes(&mut out, backslashes / 2);
                out.push('|');
                backslashes = 0;
            }
            _ => {
                push_backslashes(&mut out, backslashes);
                out.push(c);
                backslashes = 0;
            }
        }
    }
    push_backslashes(&mut out, backslashes);
    out
}

fn push_backslashes(out: &mut String, count: usize) {
    out.extend(std::iter::repeat('\\').take(count));
}

/// Decodes unescaped cell text into a cell response for a column of `cell_type`.
pub fn parse_cell(text: &str, cell_type: CellType) -> Result<CellResponse, ValueError> {
    match values::classify(text) {
        RawValue::Null => Ok(CellResponse::null()),
        RawValue::Sentinel(Sentinel::Skip(reason)) => Ok(CellResponse::Skipped { reason }),
        RawValue::Sentinel(Sentinel::Abort(reason)) => Ok(CellResponse::Aborted { reason }),
        RawValue::Text(text) => {
            let value = match cell_type {
                CellType::String => CellValue::String(text.to_string()),
                CellType::Number => CellValue::Number(values::parse_number(text)?),
                CellType::Url => CellValue::Url(values::parse_url(text)?),
                CellType::Date => CellValue::Date(values::parse_date(text)?),
                CellType::Year => CellValue::Year(values::parse_year(text)?),
            };
            Ok(CellResponse::Answered { value: Some(value) })
        }
    }
}

/// The unescaped text form of a cell, the inverse of `parse_cell`.
pub fn format_cell(cell: &CellResponse) -> String {
    match cell {
        CellResponse::Answered { value: None } => String::new(),
        CellResponse::Answered { value: Some(value) } => match value {
            CellValue::String(s) | CellValue::Url(s) | CellValue::Date(s) => s.clone(),
            CellValue::Number(n) => values::format_number(*n),
            CellValue::Year(y) => y.to_string(),
        },
        CellResponse::Skipped { reason } => {
            values::format_sentinel(&Sentinel::Skip(reason.clone()))
        }
        CellResponse::Aborted { reason } => {
            values::format_sentinel(&Sentinel::Abort(reason.clone()))
        }
    }
}

pub fn render_row(cells: &[String]) -> Result<String, CellError> {
    let mut line = String::from("|");
    for cell in cells {
        let escaped = escape_cell(cell)?;
        if escaped.is_empty() {
            line.push_str("  |");
        } else {
            line.push(' ');
            line.push_str(&escaped);
            line.push_str(" |");
        }
    }
    Ok(line)
}

/// Renders a header, separator and one line per row, without a trailing newline.
pub fn render_table(columns: &[Column], rows: &[TableRowResponse]) -> Result<String, CellError> {
    let headers: Vec<String> = columns.iter().map(|c| c.label.clone()).collect();
    let mut lines = vec![render_row(&headers)?];
    lines.push(format!("|{}", "---|".repeat(columns.len())));
    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| {
                row.get(&column.id)
                    .map(format_cell)
                    .unwrap_or_default()
            })
            .collect();
        lines.push(render_row(&cells)?);
    }
    Ok(lines.join("\n"))
}
