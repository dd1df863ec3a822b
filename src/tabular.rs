// Splits delimited text (CSV) into a header list and header-keyed rows.
use crate::import::Row;
use anyhow::{Result, bail};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Parses comma-separated text with `"` quoting (`""` escapes a quote, quoted
/// cells may span lines). The first record is the header. Blank lines are
/// skipped; cells past the header width are dropped and short rows simply
/// lack the trailing keys.
pub fn parse_csv(text: &str) -> Result<Table> {
    parse_delimited(text, ',')
}

pub fn parse_delimited(text: &str, delimiter: char) -> Result<Table> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = split_records(text, delimiter)?.into_iter();

    let Some(header_record) = records.next() else {
        bail!("No header row found");
    };
    let headers: Vec<String> = header_record.iter().map(|h| h.trim().to_string()).collect();
    for (i, h) in headers.iter().enumerate() {
        if h.is_empty() {
            bail!("Header {} is empty", i + 1);
        }
        if headers[..i].contains(h) {
            bail!("Duplicate header '{}'", h);
        }
    }

    let rows = records
        .map(|record| {
            headers
                .iter()
                .cloned()
                .zip(record)
                .collect::<Row>()
        })
        .collect();

    Ok(Table { headers, rows })
}

fn split_records(text: &str, delimiter: char) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();
    let mut line = 1;

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    cell.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    cell.push(c);
                }
                _ => cell.push(c),
            }
            continue;
        }
        match c {
            '"' if cell.trim().is_empty() => {
                cell.clear();
                in_quotes = true;
            }
            c if c == delimiter => record.push(std::mem::take(&mut cell)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                line += 1;
                finish_record(&mut records, &mut record, &mut cell);
            }
            _ => cell.push(c),
        }
    }
    if in_quotes {
        bail!("Unterminated quoted cell (line {})", line);
    }
    finish_record(&mut records, &mut record, &mut cell);
    Ok(records)
}

fn finish_record(records: &mut Vec<Vec<String>>, record: &mut Vec<String>, cell: &mut String) {
    record.push(std::mem::take(cell));
    let fields = std::mem::take(record);
    // Blank line
    if fields.len() == 1 && fields[0].trim().is_empty() {
        return;
    }
    records.push(fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_csv() {
        let table = parse_csv("Title,Type\nTask 1,task\nLaunch,release\n").unwrap();
        assert_eq!(table.headers, vec!["Title", "Type"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[1]["Title"], "Launch");
    }

    #[test]
    fn test_quotes_crlf_and_bom() {
        let text = "\u{feff}Title,Notes\r\n\"Hello, world\",\"say \"\"hi\"\"\"\r\n\"multi\nline\",x\r\n";
        let table = parse_csv(text).unwrap();
        assert_eq!(table.headers, vec!["Title", "Notes"]);
        assert_eq!(table.rows[0]["Title"], "Hello, world");
        assert_eq!(table.rows[0]["Notes"], "say \"hi\"");
        assert_eq!(table.rows[1]["Title"], "multi\nline");
    }

    #[test]
    fn test_short_rows_and_blank_lines() {
        let table = parse_csv("A,B,C\n1\n\n2,3,4,5\n").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0].get("A").map(String::as_str), Some("1"));
        assert!(!table.rows[0].contains_key("B"));
        assert_eq!(table.rows[1].len(), 3);
    }

    #[test]
    fn test_errors() {
        assert!(parse_csv("").is_err());
        assert!(parse_csv("A,A\n1,2").is_err());
        assert!(parse_csv("A,,B\n").is_err());
        assert!(parse_csv("A\n\"open").is_err());
    }

    #[test]
    fn test_other_delimiter() {
        let table = parse_delimited("Title;Tags\nT;a,b\n", ';').unwrap();
        assert_eq!(table.rows[0]["Tags"], "a,b");
    }
}
