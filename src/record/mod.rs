//! Flat key/value records exchanged between the scanner, the registry and every module.
//!
//! A record is an ordered list of `key=value` entries. Two conventions sit on top of
//! the flat keys:
//!
//! - **Arrays**: an array `A` is stored as `A_0 .. A_{n-1}` plus `A_count=n`. A missing
//!   `A_count` means the array is empty.
//! - **Multi-line values**: stored as heredoc blocks terminated by a line equal to
//!   [`HEREDOC_SENTINEL`] in the text form.
//!
//! Records never nest; hierarchy is expressed with key prefixes (`suites_0_name`) and
//! the [`Record::scoped`] / [`Record::merge_scoped`] helpers.
//!
//! # Example
//!
//! ```
//! use suitey::record::Record;
//!
//! let mut record = Record::new();
//! record.set("language", "rust");
//! record.append_to_array("indicators", "Cargo.toml");
//!
//! assert_eq!(record.get("language"), Some("rust"));
//! assert_eq!(record.get_array("indicators"), vec!["Cargo.toml".to_string()]);
//! ```

mod text;

pub use text::validate_text;

use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// Line that terminates a multi-line block in the text form
pub const HEREDOC_SENTINEL: &str = "EOF";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Invalid key '{0}': keys must be non-empty and contain no '=', whitespace or '<<'")]
    InvalidKey(String),

    #[error("Value for '{key}' contains the reserved heredoc sentinel line 'EOF'")]
    SentinelInValue { key: String },

    #[error("Single-line value for '{key}' contains a newline")]
    NewlineInValue { key: String },

    #[error("Line {line_number} is not a key=value entry: {line}")]
    MalformedLine { line_number: usize, line: String },

    #[error("Heredoc block for '{key}' starting at line {line_number} is never terminated")]
    UnterminatedHeredoc { key: String, line_number: usize },
}

/// Value stored under a record key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Line(String),
    Block(String),
}

impl Value {
    pub fn as_str(&self) -> &str {
        match self {
            Value::Line(s) | Value::Block(s) => s,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Value::Block(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Record {
    entries: Vec<(String, Value)>,
    index: HashMap<String, usize>,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for Record {}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn has(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Returns the value stored under `key`, single-line or multi-line alike
    pub fn get(&self, key: &str) -> Option<&str> {
        self.value(key).map(Value::as_str)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&pos| &self.entries[pos].1)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// `true` only for the literal value `true`
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).map(|v| v.trim() == "true").unwrap_or(false)
    }

    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Sets a value, replacing any earlier entry. Values containing a newline are
    /// stored as heredoc blocks so the text form stays parseable.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        let value = if value.contains('\n') {
            Value::Block(value)
        } else {
            Value::Line(value)
        };
        self.put(key.into(), value);
        self
    }

    /// Builder form of [`Record::set`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Stores a heredoc value. Values containing a line equal to the sentinel are rejected.
    pub fn set_multiline(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<&mut Self, RecordError> {
        let key = key.into();
        let value = value.into();
        if value.lines().any(|line| line == HEREDOC_SENTINEL) {
            return Err(RecordError::SentinelInValue { key });
        }
        self.put(key, Value::Block(value));
        Ok(self)
    }

    pub fn get_multiline(&self, key: &str) -> Option<&str> {
        self.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.index.remove(key)?;
        let (_, value) = self.entries.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Some(value)
    }

    /// Number of elements of array `name`; `0` when the count is missing or not numeric
    pub fn array_count(&self, name: &str) -> usize {
        self.get_parsed::<usize>(&count_key(name)).unwrap_or(0)
    }

    /// Elements of array `name` in index order. Holes read as empty strings.
    pub fn get_array(&self, name: &str) -> Vec<String> {
        (0..self.array_count(name))
            .map(|i| self.get(&element_key(name, i)).unwrap_or_default().to_string())
            .collect()
    }

    pub fn append_to_array(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        let n = self.array_count(name);
        self.set(element_key(name, n), value);
        self.set(count_key(name), (n + 1).to_string());
        self
    }

    pub fn replace_array<I, S>(&mut self, name: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clear_array(name);
        let mut n = 0;
        for value in values {
            self.set(element_key(name, n), value);
            n += 1;
        }
        self.set(count_key(name), n.to_string());
        self
    }

    pub fn clear_array(&mut self, name: &str) {
        for i in 0..self.array_count(name) {
            self.remove(&element_key(name, i));
        }
        self.remove(&count_key(name));
    }

    /// Copies every entry of `other` into `self`, overwriting keys that already exist
    pub fn merge(&mut self, other: &Record) -> &mut Self {
        for (key, value) in &other.entries {
            self.put(key.clone(), value.clone());
        }
        self
    }

    /// Sub-record of every key under `prefix_`, with the prefix stripped
    pub fn scoped(&self, prefix: &str) -> Record {
        let lead = format!("{}_", prefix);
        let mut scoped = Record::new();
        for (key, value) in &self.entries {
            if let Some(rest) = key.strip_prefix(&lead) {
                scoped.put(rest.to_string(), value.clone());
            }
        }
        scoped
    }

    /// Writes every entry of `other` under `prefix_`
    pub fn merge_scoped(&mut self, prefix: &str, other: &Record) -> &mut Self {
        for (key, value) in &other.entries {
            self.put(format!("{}_{}", prefix, key), value.clone());
        }
        self
    }

    /// Appends `item` as the next element of a record array, e.g. `suites_3_*`
    pub fn push_scoped(&mut self, name: &str, item: &Record) -> usize {
        let n = self.array_count(name);
        self.merge_scoped(&element_key(name, n), item);
        self.set(count_key(name), (n + 1).to_string());
        n
    }

    /// Reads every element of a record array written by [`Record::push_scoped`]
    pub fn scoped_array(&self, name: &str) -> Vec<Record> {
        (0..self.array_count(name))
            .map(|i| self.scoped(&element_key(name, i)))
            .collect()
    }

    /// Checks the in-memory invariants: valid keys, no newlines in single-line values
    /// and no sentinel inside blocks.
    pub fn validate(&self) -> Result<(), RecordError> {
        for (key, value) in &self.entries {
            if !is_valid_key(key) {
                return Err(RecordError::InvalidKey(key.clone()));
            }
            match value {
                Value::Line(v) if v.contains('\n') => {
                    return Err(RecordError::NewlineInValue { key: key.clone() })
                }
                Value::Block(v) if v.lines().any(|l| l == HEREDOC_SENTINEL) => {
                    return Err(RecordError::SentinelInValue { key: key.clone() })
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn put(&mut self, key: String, value: Value) {
        match self.index.get(&key) {
            Some(&pos) => self.entries[pos].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }
}

pub fn count_key(name: &str) -> String {
    format!("{}_count", name)
}

pub fn element_key(name: &str, index: usize) -> String {
    format!("{}_{}", name, index)
}

pub(crate) fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.contains('=')
        && !key.contains("<<")
        && !key.chars().any(char::is_whitespace)
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get() {
        let mut record = Record::new().with("a", "1").with("b", "2");
        record.set("a", "3");

        assert_eq!(record.get("a"), Some("3"));
        assert_eq!(record.get("b"), Some("2"));
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_set_replaces_multiline_entry() {
        let mut record = Record::new();
        record.set_multiline("output", "line one\nline two").unwrap();
        record.set("output", "flat");

        assert_eq!(record.value("output"), Some(&Value::Line("flat".to_string())));
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn test_multiline_round_trip() {
        let mut record = Record::new().with("status", "failed");
        record
            .set_multiline("output", "thread 'a' panicked\nnote: run with RUST_BACKTRACE=1")
            .unwrap();

        assert_eq!(
            record.get_multiline("output"),
            Some("thread 'a' panicked\nnote: run with RUST_BACKTRACE=1")
        );
        assert!(record.value("output").unwrap().is_block());
        assert_eq!(record.get("status"), Some("failed"));
    }

    #[test]
    fn test_array_count_missing_is_zero() {
        let record = Record::new();
        assert_eq!(record.array_count("files"), 0);
        assert!(record.get_array("files").is_empty());
    }

    #[test]
    fn test_array_count_non_numeric_is_zero() {
        let record = Record::new().with("files_count", "many");
        assert_eq!(record.array_count("files"), 0);
    }

    #[test]
    fn test_append_to_array() {
        let mut record = Record::new();
        record.replace_array("files", ["a.rs", "b.rs"]);
        record.append_to_array("files", "c.rs");

        assert_eq!(record.array_count("files"), 3);
        assert_eq!(record.get("files_2"), Some("c.rs"));
    }

    #[test]
    fn test_replace_array_shrinks() {
        let mut record = Record::new();
        record.replace_array("files", ["a", "b", "c"]);
        record.replace_array("files", ["z"]);

        assert_eq!(record.get_array("files"), vec!["z".to_string()]);
        assert!(!record.has("files_1"));
        assert!(!record.has("files_2"));
    }

    #[test]
    fn test_multiline_rejects_sentinel() {
        let mut record = Record::new();
        let err = record
            .set_multiline("script", "echo hi\nEOF\necho bye")
            .unwrap_err();
        assert_eq!(
            err,
            RecordError::SentinelInValue {
                key: "script".to_string()
            }
        );
        assert!(!record.has("script"));
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut record = Record::new().with("a", "1").with("b", "2").with("c", "3");
        record.remove("b");
        record.set("d", "4");

        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["a", "c", "d"]);
        assert_eq!(record.get("c"), Some("3"));
    }

    #[test]
    fn test_scoped_round_trip() {
        let suite = Record::new().with("name", "unit").with("framework", "cargo");
        let mut record = Record::new();
        record.push_scoped("suites", &suite);
        record.push_scoped("suites", &suite.clone().with("name", "integration"));

        let suites = record.scoped_array("suites");
        assert_eq!(suites.len(), 2);
        assert_eq!(suites[1].get("name"), Some("integration"));
        assert_eq!(record.get("suites_0_framework"), Some("cargo"));
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_set_with_newline_stays_parseable() {
        let record = Record::new()
            .with("output", "running 1 test\ntest a ... ok\n")
            .with("status", "passed");
        assert!(record.value("output").unwrap().is_block());
        assert!(record.validate().is_ok());

        let parsed = Record::parse(&record.to_string()).unwrap();
        assert_eq!(parsed.get("output"), Some("running 1 test\ntest a ... ok\n"));
        assert_eq!(parsed.get("status"), Some("passed"));
    }

    #[test]
    fn test_validate_rejects_sentinel_set_through_set() {
        let record = Record::new().with("k", "a\nEOF\nb");
        assert_eq!(
            record.validate(),
            Err(RecordError::SentinelInValue {
                key: "k".to_string()
            })
        );
    }

    #[test]
    fn test_get_bool_and_parsed() {
        let record = Record::new()
            .with("detected", "true")
            .with("other", "yes")
            .with("cores", " 4 ");

        assert!(record.get_bool("detected"));
        assert!(!record.get_bool("other"));
        assert!(!record.get_bool("missing"));
        assert_eq!(record.get_parsed::<u32>("cores"), Some(4));
    }
}
