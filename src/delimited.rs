use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::util::ensure_directory;

#[derive(Debug, Clone)]
pub struct DelimitedTable {
    pub delimiter: char,
    pub header: Vec<String>,
    pub rows: Vec<DelimitedRow>,
}

#[derive(Debug, Clone)]
pub struct DelimitedRow {
    pub line_number: usize,
    pub fields: Vec<String>,
}

impl DelimitedTable {
    pub fn column(&self, candidates: &[&str]) -> Option<usize> {
        let wanted = candidates
            .iter()
            .map(|value| header_key(value))
            .collect::<Vec<String>>();
        self.header
            .iter()
            .position(|name| wanted.contains(&header_key(name)))
    }

    pub fn require_column(&self, candidates: &[&str]) -> Result<usize> {
        let Some(index) = self.column(candidates) else {
            bail!(
                "missing required column (expected one of: {})",
                candidates.join(", ")
            );
        };
        Ok(index)
    }
}

impl DelimitedRow {
    pub fn get(&self, index: usize) -> &str {
        self.fields.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn get_opt(&self, index: Option<usize>) -> Option<&str> {
        index
            .map(|value| self.get(value).trim())
            .filter(|value| !value.is_empty())
    }
}

pub fn read_table(path: &Path, delimiter: Option<char>) -> Result<DelimitedTable> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_table(&raw, delimiter).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn parse_table(raw: &str, delimiter: Option<char>) -> Result<DelimitedTable> {
    let mut lines = raw
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((_, header_line)) = lines.next() else {
        bail!("table is empty");
    };
    let header_line = header_line.trim_start_matches('\u{feff}');
    let delimiter = delimiter.unwrap_or_else(|| detect_delimiter(header_line));

    let header = split_line(header_line, delimiter)
        .into_iter()
        .map(|value| value.trim().to_string())
        .collect::<Vec<String>>();

    let rows = lines
        .map(|(line_number, line)| DelimitedRow {
            line_number,
            fields: split_line(line, delimiter),
        })
        .collect::<Vec<DelimitedRow>>();

    Ok(DelimitedTable {
        delimiter,
        header,
        rows,
    })
}

pub fn detect_delimiter(header_line: &str) -> char {
    ['|', '\t', ',']
        .into_iter()
        .max_by_key(|candidate| {
            (
                header_line.matches(*candidate).count(),
                delimiter_preference(*candidate),
            )
        })
        .filter(|candidate| header_line.contains(*candidate))
        .unwrap_or(',')
}

fn delimiter_preference(delimiter: char) -> u8 {
    match delimiter {
        '|' => 2,
        '\t' => 1,
        _ => 0,
    }
}

pub fn split_line(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::<String>::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(character) = chars.next() {
        if in_quotes {
            if character == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(character);
            }
            continue;
        }

        if character == '"' && current.trim().is_empty() {
            current.clear();
            in_quotes = true;
        } else if character == delimiter {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(character);
        }
    }

    fields.push(current);
    fields
}

pub fn format_row(fields: &[&str], delimiter: char) -> String {
    fields
        .iter()
        .map(|field| quote_field(field, delimiter))
        .collect::<Vec<String>>()
        .join(&delimiter.to_string())
}

fn quote_field(field: &str, delimiter: char) -> String {
    let needs_quotes = field.contains(delimiter)
        || field.contains('"')
        || field.contains('\n')
        || field.starts_with(' ')
        || field.ends_with(' ');
    if needs_quotes {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn write_table(
    path: &Path,
    delimiter: char,
    header: &[&str],
    rows: &[Vec<String>],
) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }

    let mut out = String::new();
    out.push_str(&format_row(header, delimiter));
    out.push('\n');
    for row in rows {
        let fields = row.iter().map(String::as_str).collect::<Vec<&str>>();
        out.push_str(&format_row(&fields, delimiter));
        out.push('\n');
    }

    let mut file = fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(out.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(())
}

fn header_key(value: &str) -> String {
    value
        .chars()
        .filter(|character| character.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}
