use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CsvReadError {
    #[error("CSV input has no header line")]
    MissingHeader,
    #[error("unterminated quoted field starting on line {line}")]
    UnterminatedQuote { line: usize },
    #[error("line {line} has {found} fields but the header has {expected}")]
    FieldCount {
        line: usize,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

/// Parses comma-separated text. Quoted fields may hold commas, doubled
/// quotes and line breaks; both LF and CRLF terminate records.
pub fn parse_csv(input: &str) -> Result<CsvTable, CsvReadError> {
    let mut records = split_records(input)?.into_iter();
    let Some((_, headers)) = records.next() else {
        return Err(CsvReadError::MissingHeader);
    };

    let mut table = CsvTable {
        headers,
        records: Vec::new(),
    };
    for (line, record) in records {
        if record.len() != table.headers.len() {
            return Err(CsvReadError::FieldCount {
                line,
                expected: table.headers.len(),
                found: record.len(),
            });
        }
        table.records.push(record);
    }
    Ok(table)
}

fn split_records(input: &str) -> Result<Vec<(usize, Vec<String>)>, CsvReadError> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quote_line = 0;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    current.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    current.push(ch);
                }
                other => current.push(other),
            }
            continue;
        }

        match ch {
            '"' if current.is_empty() => {
                in_quotes = true;
                quote_line = line;
            }
            ',' => fields.push(std::mem::take(&mut current)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                fields.push(std::mem::take(&mut current));
                records.push((record_line, std::mem::take(&mut fields)));
                line += 1;
                record_line = line;
            }
            other => current.push(other),
        }
    }

    if in_quotes {
        return Err(CsvReadError::UnterminatedQuote { line: quote_line });
    }
    if !current.is_empty() || !fields.is_empty() {
        fields.push(current);
        records.push((record_line, fields));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{parse_csv, CsvReadError};

    #[test]
    fn parses_quoted_fields_and_crlf() {
        let table = parse_csv("id,note\r\n1,\"a, \"\"b\"\"\r\nc\"\r\n2,\r\n").expect("valid csv");
        assert_eq!(table.headers, ["id", "note"]);
        assert_eq!(
            table.records,
            [
                vec!["1".to_string(), "a, \"b\"\r\nc".to_string()],
                vec!["2".to_string(), String::new()],
            ]
        );
    }

    #[test]
    fn accepts_missing_trailing_newline() {
        let table = parse_csv("a,b\nx,y").expect("valid csv");
        assert_eq!(table.records, [vec!["x".to_string(), "y".to_string()]]);
    }

    #[test]
    fn reports_malformed_input() {
        assert_eq!(parse_csv(""), Err(CsvReadError::MissingHeader));
        assert_eq!(
            parse_csv("a\n\"open"),
            Err(CsvReadError::UnterminatedQuote { line: 2 })
        );
        assert_eq!(
            parse_csv("a,b\n1\n"),
            Err(CsvReadError::FieldCount {
                line: 2,
                expected: 2,
                found: 1
            })
        );
    }
}
