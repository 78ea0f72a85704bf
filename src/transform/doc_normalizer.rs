//! doc_normalizer.rs
//!
//! Maps loosely-typed `SourceRecord`s onto the fixed document schema of the
//! target index.
//!
//! Responsibilities:
//! - Derive the document key (`id`) from a designated source field
//! - Coerce every mapped field (text, integer, number, delimited list)
//! - Degrade missing values to fixed defaults instead of failing
//!
//! Only a missing or unusable key rejects a record. Normalization is pure: the
//! same record always yields the same document.

use serde::Serialize;
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::warn;

use crate::ingest::source_reader::{RawValue, RecordSet, SourceRecord};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum NormalizeError {
    #[error("row {row}: missing key field '{field}'")]
    MissingKey { row: usize, field: String },

    #[error("row {row}: key {key:?} may only contain letters, digits, '_', '-' or '='")]
    InvalidKey { row: usize, key: String },
}

/// How a single source value is turned into an index value.
#[derive(Debug, Clone, PartialEq)]
pub enum Coercion {
    /// string → string; missing → null
    Text,
    /// string/number → integer (truncated); missing → 0
    Integer,
    /// numeric → numeric, integral values stay integers; missing → 0
    Number,
    /// delimited string → list of strings; missing → null
    List { delimiter: char },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub target: String,
    pub source: String,
    pub coercion: Coercion,
}

impl FieldRule {
    pub fn new<S: Into<String>>(name: S, coercion: Coercion) -> Self {
        let name = name.into();
        Self {
            source: name.clone(),
            target: name,
            coercion,
        }
    }

    /// Reads from a differently-named source column.
    pub fn from_source<S: Into<String>>(mut self, source: S) -> Self {
        self.source = source.into();
        self
    }
}

/// Target schema: the key source plus one rule per index field.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSchema {
    pub id_source: String,
    pub fields: Vec<FieldRule>,
}

impl DocumentSchema {
    /// Mapping for the good-books sample dataset.
    pub fn good_books() -> Self {
        use Coercion::*;
        let mut fields = vec![
            FieldRule::new("goodreads_book_id", Integer),
            FieldRule::new("best_book_id", Integer),
            FieldRule::new("work_id", Integer),
            FieldRule::new("books_count", Number),
            FieldRule::new("isbn", Text),
            FieldRule::new("isbn13", Text),
            FieldRule::new("authors", List { delimiter: ',' }),
            FieldRule::new("original_publication_year", Integer),
            FieldRule::new("original_title", Text),
            FieldRule::new("title", Text),
            FieldRule::new("language_code", Text),
            FieldRule::new("average_rating", Number),
            FieldRule::new("ratings_count", Integer),
            FieldRule::new("work_ratings_count", Integer),
            FieldRule::new("work_text_reviews_count", Number),
        ];
        fields.extend((1..=5).map(|n| FieldRule::new(format!("ratings_{n}"), Integer)));
        fields.push(FieldRule::new("image_url", Text));
        fields.push(FieldRule::new("small_image_url", Text));

        Self {
            id_source: "book_id".into(),
            fields,
        }
    }
}

/// A document ready for upload: the key plus typed schema fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedDoc {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl NormalizedDoc {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// A source row that could not become a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MalformedRecord {
    pub row: usize,
    pub reason: String,
}

impl From<&NormalizeError> for MalformedRecord {
    fn from(err: &NormalizeError) -> Self {
        let row = match err {
            NormalizeError::MissingKey { row, .. } | NormalizeError::InvalidKey { row, .. } => *row,
        };
        Self {
            row,
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Normalized {
    pub documents: Vec<NormalizedDoc>,
    pub malformed: Vec<MalformedRecord>,
}

pub struct DocNormalizer {
    schema: DocumentSchema,
}

impl DocNormalizer {
    pub fn new(schema: DocumentSchema) -> Self {
        Self { schema }
    }

    pub fn normalize(&self, record: &SourceRecord) -> Result<NormalizedDoc, NormalizeError> {
        let id = self.document_key(record)?;

        let mut fields = Map::new();
        for rule in &self.schema.fields {
            let value = coerce(record, rule);
            fields.insert(rule.target.clone(), value);
        }
        Ok(NormalizedDoc { id, fields })
    }

    /// Normalizes every record, setting rejected ones aside.
    pub fn normalize_all(&self, records: &RecordSet) -> Normalized {
        let mut out = Normalized::default();
        for record in records {
            match self.normalize(record) {
                Ok(doc) => out.documents.push(doc),
                Err(err) => {
                    warn!(row = record.row, error = %err, "skipping malformed record");
                    out.malformed.push(MalformedRecord::from(&err));
                }
            }
        }
        out
    }

    fn document_key(&self, record: &SourceRecord) -> Result<String, NormalizeError> {
        let key = record
            .get(&self.schema.id_source)
            .and_then(text_of)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| NormalizeError::MissingKey {
                row: record.row,
                field: self.schema.id_source.clone(),
            })?;

        if !is_valid_key(&key) {
            return Err(NormalizeError::InvalidKey {
                row: record.row,
                key,
            });
        }
        Ok(key)
    }
}

impl Default for DocNormalizer {
    fn default() -> Self {
        Self::new(DocumentSchema::good_books())
    }
}

/// Document keys may only contain ASCII letters, digits, `_`, `-` and `=`.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '='))
}

/// ---- helpers ----

fn coerce(record: &SourceRecord, rule: &FieldRule) -> Value {
    let raw = record.get(&rule.source).filter(|v| !is_blank(v));
    match (&rule.coercion, raw) {
        (Coercion::Text, None) => Value::Null,
        (Coercion::Text, Some(v)) => text_of(v).map(Value::String).unwrap_or(Value::Null),

        (Coercion::Integer, None) => Value::from(0),
        (Coercion::Integer, Some(v)) => match number_of(v).and_then(integer_of) {
            Some(i) => Value::from(i),
            None => {
                unparseable(record.row, rule, v);
                Value::from(0)
            }
        },

        (Coercion::Number, None) => Value::from(0),
        (Coercion::Number, Some(v)) => match number_of(v).and_then(json_number) {
            Some(n) => Value::Number(n),
            None => {
                unparseable(record.row, rule, v);
                Value::from(0)
            }
        },

        (Coercion::List { .. }, None) => Value::Null,
        (Coercion::List { delimiter }, Some(v)) => {
            let items: Vec<Value> = match v {
                RawValue::List(items) => items
                    .iter()
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
                other => text_of(other)
                    .unwrap_or_default()
                    .split(*delimiter)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            };
            Value::Array(items)
        }
    }
}

fn is_blank(v: &RawValue) -> bool {
    match v {
        RawValue::Text(s) => s.trim().is_empty(),
        RawValue::Number(f) => f.is_nan(),
        RawValue::List(items) => items.is_empty(),
    }
}

fn text_of(v: &RawValue) -> Option<String> {
    match v {
        RawValue::Text(s) => Some(s.clone()),
        RawValue::Number(f) => Some(render_number(*f)),
        RawValue::List(items) => Some(items.join(",")),
    }
}

fn number_of(v: &RawValue) -> Option<f64> {
    match v {
        RawValue::Number(f) => Some(*f),
        RawValue::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(|i| i as f64)
                .ok()
                .or_else(|| s.parse::<f64>().ok())
        }
        RawValue::List(_) => None,
    }
    .filter(|f| f.is_finite())
}

/// Truncates toward zero; `None` outside the i64 range.
fn integer_of(f: f64) -> Option<i64> {
    let t = f.trunc();
    (t >= i64::MIN as f64 && t <= i64::MAX as f64).then_some(t as i64)
}

fn json_number(f: f64) -> Option<Number> {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        Some(Number::from(f as i64))
    } else {
        Number::from_f64(f)
    }
}

/// Integral floats render without a fractional part ("9780439023480", not "9.78e12").
fn render_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

fn unparseable(row: usize, rule: &FieldRule, v: &RawValue) {
    warn!(
        row,
        field = %rule.target,
        value = ?v,
        "value is not numeric; using default 0"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn book(id: &str) -> SourceRecord {
        SourceRecord::new(1)
            .with("book_id", RawValue::Text(id.into()))
            .with("authors", RawValue::Text("A,B,C".into()))
            .with("average_rating", RawValue::Text("4.34".into()))
            .with("original_publication_year", RawValue::Text("2008.0".into()))
            .with("isbn13", RawValue::Number(9780439023480.0))
            .with("title", RawValue::Text("The Hunger Games".into()))
    }

    #[test]
    fn coerces_book_fields() {
        let doc = DocNormalizer::default().normalize(&book("1")).unwrap();

        assert_eq!(doc.id, "1");
        assert_eq!(doc.get("authors"), Some(&json!(["A", "B", "C"])));
        assert_eq!(doc.get("average_rating"), Some(&json!(4.34)));
        assert_eq!(doc.get("original_publication_year"), Some(&json!(2008)));
        assert_eq!(doc.get("isbn13"), Some(&json!("9780439023480")));
        assert_eq!(doc.get("title"), Some(&json!("The Hunger Games")));
        assert_eq!(doc.fields.len(), DocumentSchema::good_books().fields.len());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let rec = SourceRecord::new(3).with("book_id", RawValue::Number(42.0));
        let doc = DocNormalizer::default().normalize(&rec).unwrap();

        assert_eq!(doc.id, "42");
        assert_eq!(doc.get("authors"), Some(&Value::Null));
        assert_eq!(doc.get("ratings_count"), Some(&json!(0)));
        assert_eq!(doc.get("books_count"), Some(&json!(0)));
        assert_eq!(doc.get("original_title"), Some(&Value::Null));
    }

    #[test]
    fn missing_key_is_malformed() {
        let rec = SourceRecord::new(9).with("title", RawValue::Text("No key".into()));
        let err = DocNormalizer::default().normalize(&rec).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::MissingKey {
                row: 9,
                field: "book_id".into()
            }
        );
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn blank_key_is_malformed(#[case] key: &str) {
        let err = DocNormalizer::default().normalize(&book(key)).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingKey { .. }));
    }

    #[rstest]
    #[case("a/b")]
    #[case("key with space")]
    #[case("ключ")]
    fn keys_with_reserved_characters_are_rejected(#[case] key: &str) {
        let err = DocNormalizer::default().normalize(&book(key)).unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidKey { .. }));
    }

    #[test]
    fn normalization_is_idempotent() {
        let n = DocNormalizer::default();
        let rec = book("abc-1");
        assert_eq!(n.normalize(&rec).unwrap(), n.normalize(&rec).unwrap());
    }

    #[rstest]
    #[case("lots")]
    #[case("1e30")]
    #[case("-1e30")]
    fn unparseable_numbers_fall_back_to_zero(#[case] raw: &str) {
        let rec = book("5").with("ratings_count", RawValue::Text(raw.into()));
        let doc = DocNormalizer::default().normalize(&rec).unwrap();
        assert_eq!(doc.get("ratings_count"), Some(&json!(0)));
    }

    #[test]
    fn integers_truncate_toward_zero_within_range() {
        let rec = book("5")
            .with("ratings_count", RawValue::Text("-7.9".into()))
            .with("work_ratings_count", RawValue::Text("9223372036854775807".into()));
        let doc = DocNormalizer::default().normalize(&rec).unwrap();
        assert_eq!(doc.get("ratings_count"), Some(&json!(-7)));
        assert_eq!(doc.get("work_ratings_count"), Some(&json!(i64::MAX)));
    }

    #[test]
    fn list_values_pass_through_trimmed() {
        let rec = book("5").with(
            "authors",
            RawValue::List(vec![" Jane Austen ".into(), "".into(), "Tony Tanner".into()]),
        );
        let doc = DocNormalizer::default().normalize(&rec).unwrap();
        assert_eq!(doc.get("authors"), Some(&json!(["Jane Austen", "Tony Tanner"])));
    }

    #[test]
    fn custom_schema_reads_renamed_source_columns() {
        let schema = DocumentSchema {
            id_source: "HotelId".into(),
            fields: vec![
                FieldRule::new("hotelName", Coercion::Text).from_source("HotelName"),
                FieldRule::new("tags", Coercion::List { delimiter: '|' }).from_source("Tags"),
            ],
        };
        let rec = SourceRecord::new(1)
            .with("HotelId", RawValue::Text("3".into()))
            .with("HotelName", RawValue::Text("Triple Landscape Hotel".into()))
            .with("Tags", RawValue::Text("bar|air conditioning".into()));

        let doc = DocNormalizer::new(schema).normalize(&rec).unwrap();
        assert_eq!(doc.get("hotelName"), Some(&json!("Triple Landscape Hotel")));
        assert_eq!(doc.get("tags"), Some(&json!(["bar", "air conditioning"])));
    }

    #[test]
    fn normalize_all_sets_aside_malformed_rows() {
        let records: RecordSet = vec![
            book("1"),
            SourceRecord::new(2).with("title", RawValue::Text("orphan".into())),
            book("3"),
        ]
        .into();

        let out = DocNormalizer::default().normalize_all(&records);
        let ids: Vec<_> = out.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["1", "3"]);
        assert_eq!(out.malformed.len(), 1);
        assert_eq!(out.malformed[0].row, 2);
    }

    #[test]
    fn serializes_flat_with_id() {
        let rec = SourceRecord::new(1).with("book_id", RawValue::Text("8".into()));
        let schema = DocumentSchema {
            id_source: "book_id".into(),
            fields: vec![FieldRule::new("title", Coercion::Text)],
        };
        let doc = DocNormalizer::new(schema).normalize(&rec).unwrap();
        assert_eq!(serde_json::to_value(&doc).unwrap(), json!({"id": "8", "title": null}));
    }
}
