//! Text form of a record: `key=value` lines and `key<<EOF` heredoc blocks.

use super::{is_valid_key, Record, RecordError, Value, HEREDOC_SENTINEL};
use std::fmt;

fn heredoc_opening(line: &str) -> Option<&str> {
    let key = line.strip_suffix(&format!("<<{}", HEREDOC_SENTINEL))?;
    is_valid_key(key).then_some(key)
}

fn is_ignorable(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty()
        || trimmed.starts_with('#')
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
}

fn split_entry(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    is_valid_key(key).then_some((key, value))
}

impl Record {
    /// Parses the text form. Comments (`#`) and section lines (`[name]`) are skipped.
    pub fn parse(input: &str) -> Result<Record, RecordError> {
        let mut record = Record::new();
        let mut lines = input.lines().enumerate();

        while let Some((idx, line)) = lines.next() {
            if is_ignorable(line) {
                continue;
            }

            if let Some(key) = heredoc_opening(line) {
                let mut body: Vec<&str> = Vec::new();
                let mut terminated = false;
                for (_, inner) in lines.by_ref() {
                    if inner == HEREDOC_SENTINEL {
                        terminated = true;
                        break;
                    }
                    body.push(inner);
                }
                if !terminated {
                    return Err(RecordError::UnterminatedHeredoc {
                        key: key.to_string(),
                        line_number: idx + 1,
                    });
                }
                record.put(key.to_string(), Value::Block(body.join("\n")));
                continue;
            }

            match split_entry(line) {
                Some((key, value)) => {
                    record.put(key.to_string(), Value::Line(value.to_string()));
                }
                None => {
                    return Err(RecordError::MalformedLine {
                        line_number: idx + 1,
                        line: line.to_string(),
                    })
                }
            }
        }

        Ok(record)
    }
}

/// Returns `true` when every line outside heredoc bodies is blank, a comment, a section
/// header, a heredoc boundary or a `key=value` entry.
pub fn validate_text(input: &str) -> bool {
    Record::parse(input).is_ok()
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.entries() {
            match value {
                Value::Line(v) => writeln!(f, "{}={}", key, v)?,
                Value::Block(v) => {
                    writeln!(f, "{}<<{}", key, HEREDOC_SENTINEL)?;
                    if !v.is_empty() {
                        writeln!(f, "{}", v)?;
                    }
                    writeln!(f, "{}", HEREDOC_SENTINEL)?;
                }
            }
        }
        Ok(())
    }
}
