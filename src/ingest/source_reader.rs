//! source_reader.rs
//!
//! Reads a tabular payload (CSV or a JSON array of records) from a local path
//! or an http(s) URL, fully into memory, and turns it into `SourceRecord`s.
//!
//! Values stay loosely typed here: CSV cells are always text, JSON keeps its
//! numbers and string arrays. Coercion into the index schema happens later in
//! `transform::doc_normalizer`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported input shape: {0}")]
    UnsupportedShape(String),
}

/// A single loosely-typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Text(String),
    Number(f64),
    List(Vec<String>),
}

/// One input row. Absent keys mean "no value".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceRecord {
    /// 1-based position in the input, used in reports.
    pub row: usize,
    fields: BTreeMap<String, RawValue>,
}

impl SourceRecord {
    pub fn new(row: usize) -> Self {
        Self {
            row,
            fields: BTreeMap::new(),
        }
    }

    pub fn with<K: Into<String>>(mut self, key: K, value: RawValue) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert<K: Into<String>>(&mut self, key: K, value: RawValue) {
        self.fields.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Finite, restartable sequence of records.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    records: Vec<SourceRecord>,
}

impl RecordSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SourceRecord> {
        self.records.iter()
    }
}

impl From<Vec<SourceRecord>> for RecordSet {
    fn from(records: Vec<SourceRecord>) -> Self {
        Self { records }
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a SourceRecord;
    type IntoIter = std::slice::Iter<'a, SourceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceLocation {
    Url(String),
    Path(PathBuf),
}

impl SourceLocation {
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.starts_with("http://") || s.starts_with("https://") {
            SourceLocation::Url(s.to_string())
        } else {
            SourceLocation::Path(PathBuf::from(s))
        }
    }

    fn name(&self) -> &str {
        match self {
            SourceLocation::Url(u) => u.split(['?', '#']).next().unwrap_or(u),
            SourceLocation::Path(p) => p.to_str().unwrap_or_default(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::Url(u) => write!(f, "{u}"),
            SourceLocation::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceFormat {
    Csv,
    Json,
}

impl SourceFormat {
    /// `.json` means a JSON array of records; anything else is read as CSV.
    pub fn infer(location: &SourceLocation) -> Self {
        let ext = Path::new(location.name())
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") => SourceFormat::Json,
            _ => SourceFormat::Csv,
        }
    }
}

/// Reads the whole payload once and decodes it.
pub async fn read_records(
    location: &SourceLocation,
    format: SourceFormat,
    http: &reqwest::Client,
) -> Result<RecordSet, SourceError> {
    let bytes = match location {
        SourceLocation::Path(path) => std::fs::read(path).map_err(|source| SourceError::Io {
            path: path.clone(),
            source,
        })?,
        SourceLocation::Url(url) => {
            debug!(%url, "fetching source payload");
            let resp = http.get(url).send().await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(SourceError::Status { status, body });
            }
            resp.bytes().await?.to_vec()
        }
    };

    let records = match format {
        SourceFormat::Csv => decode_csv(&bytes)?,
        SourceFormat::Json => decode_json(&bytes)?,
    };
    info!(source = %location, ?format, records = records.len(), "read source records");
    Ok(records)
}

/// Header row names the fields; empty cells are treated as absent.
pub fn decode_csv(bytes: &[u8]) -> Result<RecordSet, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();

    let mut out = Vec::new();
    for (i, row) in reader.records().enumerate() {
        let row = row?;
        let mut record = SourceRecord::new(i + 1);
        for (name, cell) in headers.iter().zip(row.iter()) {
            if cell.trim().is_empty() {
                continue;
            }
            record.insert(name.trim(), RawValue::Text(cell.to_string()));
        }
        out.push(record);
    }
    Ok(out.into())
}

/// Expects a top-level array of flat objects (`null` means absent).
pub fn decode_json(bytes: &[u8]) -> Result<RecordSet, SourceError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Array(items) = value else {
        return Err(SourceError::UnsupportedShape(
            "expected a top-level JSON array of records".into(),
        ));
    };

    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let row = i + 1;
        let Value::Object(obj) = item else {
            return Err(SourceError::UnsupportedShape(format!(
                "record {row} is not a JSON object"
            )));
        };
        let mut record = SourceRecord::new(row);
        for (key, v) in obj {
            if let Some(raw) = raw_from_json(row, &key, v)? {
                record.insert(key, raw);
            }
        }
        out.push(record);
    }
    Ok(out.into())
}

fn raw_from_json(row: usize, key: &str, v: Value) -> Result<Option<RawValue>, SourceError> {
    let raw = match v {
        Value::Null => return Ok(None),
        Value::String(s) => RawValue::Text(s),
        Value::Bool(b) => RawValue::Text(b.to_string()),
        Value::Number(n) => match n.as_f64() {
            Some(f) => RawValue::Number(f),
            None => RawValue::Text(n.to_string()),
        },
        Value::Array(items) => {
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => list.push(s),
                    Value::Number(n) => list.push(n.to_string()),
                    Value::Null => {}
                    other => {
                        return Err(SourceError::UnsupportedShape(format!(
                            "record {row} field '{key}' holds a non-scalar list item: {other}"
                        )));
                    }
                }
            }
            RawValue::List(list)
        }
        Value::Object(_) => {
            return Err(SourceError::UnsupportedShape(format!(
                "record {row} field '{key}' is a nested object"
            )));
        }
    };
    Ok(Some(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;

    #[test]
    fn csv_rows_become_text_records_with_absent_empty_cells() {
        let csv = "book_id,authors,isbn\n1,\"Suzanne Collins\",439023483\n2,,\n";
        let set = decode_csv(csv.as_bytes()).unwrap();
        assert_eq!(set.len(), 2);

        let first = set.iter().next().unwrap();
        assert_eq!(first.row, 1);
        assert_eq!(first.get("authors"), Some(&RawValue::Text("Suzanne Collins".into())));

        let second = set.iter().nth(1).unwrap();
        assert_eq!(second.row, 2);
        assert_eq!(second.get("authors"), None);
        assert_eq!(second.get("isbn"), None);
        assert_eq!(second.get("book_id"), Some(&RawValue::Text("2".into())));
    }

    #[test]
    fn ragged_csv_is_an_error() {
        let csv = "a,b\n1,2\n3\n";
        assert!(matches!(decode_csv(csv.as_bytes()), Err(SourceError::Csv(_))));
    }

    #[test]
    fn json_keeps_numbers_lists_and_drops_nulls() {
        let json = r#"[{"book_id": 7, "authors": ["A", "B"], "title": null, "rating": 4.5}]"#;
        let set = decode_json(json.as_bytes()).unwrap();
        let rec = set.iter().next().unwrap();
        assert_eq!(rec.get("book_id"), Some(&RawValue::Number(7.0)));
        assert_eq!(rec.get("authors"), Some(&RawValue::List(vec!["A".into(), "B".into()])));
        assert_eq!(rec.get("title"), None);
        assert_eq!(rec.get("rating"), Some(&RawValue::Number(4.5)));
    }

    #[rstest]
    #[case(r#"{"book_id": 1}"#)]
    #[case(r#"[1, 2]"#)]
    #[case(r#"[{"nested": {"a": 1}}]"#)]
    fn json_rejects_unsupported_shapes(#[case] input: &str) {
        assert!(matches!(
            decode_json(input.as_bytes()),
            Err(SourceError::UnsupportedShape(_))
        ));
    }

    #[rstest]
    #[case("data/books.csv", SourceFormat::Csv)]
    #[case("data/books.JSON", SourceFormat::Json)]
    #[case("https://example.com/books.json?raw=true", SourceFormat::Json)]
    #[case("https://example.com/export", SourceFormat::Csv)]
    fn infers_format_from_extension(#[case] input: &str, #[case] expected: SourceFormat) {
        assert_eq!(SourceFormat::infer(&SourceLocation::parse(input)), expected);
    }

    #[tokio::test]
    async fn reads_csv_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("books.csv");
        fs::write(&path, "book_id,title\n1,Dune\n2,Emma\n3,Ulysses\n").unwrap();

        let location = SourceLocation::parse(path.to_str().unwrap());
        let set = read_records(&location, SourceFormat::infer(&location), &reqwest::Client::new())
            .await
            .unwrap();
        assert_eq!(set.len(), 3);
    }

    #[tokio::test]
    async fn missing_file_reports_the_path() {
        let location = SourceLocation::Path(PathBuf::from("/definitely/not/here.csv"));
        let err = read_records(&location, SourceFormat::Csv, &reqwest::Client::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.csv"));
    }
}
