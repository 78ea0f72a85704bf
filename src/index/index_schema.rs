//! index_schema.rs
//!
//! Serde model of a search index definition (subset of the service's REST
//! shape), loaded from a JSON schema file or built in code for the
//! good-books dataset. Properties this model does not name are kept in
//! `extra` so a fetched definition can be written back unchanged.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid index definition '{index}': {reason}")]
    Invalid { index: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggesters: Vec<Suggester>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scoring_profiles: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors_options: Option<CorsOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic: Option<SemanticSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub searchable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filterable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sortable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facetable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrievable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    /// Sub-fields of an `Edm.ComplexType` field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDefinition>,
    /// Vector, analyzer and storage settings passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FieldDefinition {
    fn simple(name: &str, field_type: &str) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            filterable: Some(true),
            sortable: Some(!field_type.starts_with("Collection(")),
            ..Self::default()
        }
    }

    fn searchable(name: &str, field_type: &str) -> Self {
        Self {
            searchable: Some(true),
            ..Self::simple(name, field_type)
        }
    }

    fn facetable(mut self) -> Self {
        self.facetable = Some(true);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggester {
    pub name: String,
    #[serde(default = "default_search_mode")]
    pub search_mode: String,
    pub source_fields: Vec<String>,
}

fn default_search_mode() -> String {
    "analyzingInfixMatching".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsOptions {
    pub allowed_origins: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_in_seconds: Option<u64>,
}

impl Default for CorsOptions {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".into()],
            max_age_in_seconds: Some(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_configuration: Option<String>,
    #[serde(default)]
    pub configurations: Vec<SemanticConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticConfiguration {
    pub name: String,
    pub prioritized_fields: PrioritizedFields,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrioritizedFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_field: Option<SemanticField>,
    #[serde(default)]
    pub prioritized_content_fields: Vec<SemanticField>,
    #[serde(default)]
    pub prioritized_keywords_fields: Vec<SemanticField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticField {
    pub field_name: String,
}

impl SemanticField {
    pub fn new<S: Into<String>>(field_name: S) -> Self {
        Self {
            field_name: field_name.into(),
        }
    }
}

impl IndexDefinition {
    /// Reads a schema file. A missing `corsOptions` gets the permissive
    /// default (`*`, 60s).
    pub fn load<P: AsRef<Path>>(path: P, name: &str) -> Result<Self, SchemaError> {
        let text = std::fs::read_to_string(path)?;
        let mut def: IndexDefinition = serde_json::from_str(&text)?;
        def.name = name.to_string();
        def.cors_options.get_or_insert_with(CorsOptions::default);
        def.validate()?;
        Ok(def)
    }

    /// Schema matching `DocumentSchema::good_books()`.
    pub fn good_books(name: &str) -> Self {
        let mut fields = vec![
            FieldDefinition {
                key: Some(true),
                ..FieldDefinition::simple("id", "Edm.String")
            },
            FieldDefinition::simple("goodreads_book_id", "Edm.Int64"),
            FieldDefinition::simple("best_book_id", "Edm.Int64"),
            FieldDefinition::simple("work_id", "Edm.Int64"),
            FieldDefinition::simple("books_count", "Edm.Int64"),
            FieldDefinition::simple("isbn", "Edm.String"),
            FieldDefinition::simple("isbn13", "Edm.String"),
            FieldDefinition::searchable("authors", "Collection(Edm.String)").facetable(),
            FieldDefinition::simple("original_publication_year", "Edm.Int64").facetable(),
            FieldDefinition::searchable("original_title", "Edm.String"),
            FieldDefinition::searchable("title", "Edm.String"),
            FieldDefinition::simple("language_code", "Edm.String").facetable(),
            FieldDefinition::simple("average_rating", "Edm.Double").facetable(),
            FieldDefinition::simple("ratings_count", "Edm.Int64"),
            FieldDefinition::simple("work_ratings_count", "Edm.Int64"),
            FieldDefinition::simple("work_text_reviews_count", "Edm.Int64"),
        ];
        fields.extend((1..=5).map(|n| FieldDefinition::simple(&format!("ratings_{n}"), "Edm.Int64")));
        fields.push(FieldDefinition::simple("image_url", "Edm.String"));
        fields.push(FieldDefinition::simple("small_image_url", "Edm.String"));

        Self {
            name: name.to_string(),
            fields,
            suggesters: vec![Suggester {
                name: "sg".into(),
                search_mode: default_search_mode(),
                source_fields: vec!["title".into(), "authors".into()],
            }],
            scoring_profiles: Vec::new(),
            cors_options: Some(CorsOptions::default()),
            semantic: None,
            extra: Map::new(),
        }
    }

    /// Adds (or replaces) a semantic configuration and makes it the default.
    pub fn with_semantic_configuration(mut self, config: SemanticConfiguration) -> Self {
        let settings = self.semantic.get_or_insert_with(SemanticSettings::default);
        settings.configurations.retain(|c| c.name != config.name);
        settings.default_configuration = Some(config.name.clone());
        settings.configurations.push(config);
        self
    }

    pub fn key_field(&self) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.key == Some(true))
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        let invalid = |reason: String| SchemaError::Invalid {
            index: self.name.clone(),
            reason,
        };

        let keys: Vec<_> = self.fields.iter().filter(|f| f.key == Some(true)).collect();
        match keys.as_slice() {
            [key] if key.field_type == "Edm.String" => {}
            [key] => {
                return Err(invalid(format!(
                    "key field '{}' must be Edm.String, found {}",
                    key.name, key.field_type
                )));
            }
            [] => return Err(invalid("no key field".into())),
            _ => return Err(invalid(format!("{} key fields, expected one", keys.len()))),
        }

        for s in &self.suggesters {
            if let Some(missing) = s
                .source_fields
                .iter()
                .find(|f| !self.fields.iter().any(|d| &d.name == *f))
            {
                return Err(invalid(format!(
                    "suggester '{}' references unknown field '{missing}'",
                    s.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::doc_normalizer::DocumentSchema;
    use serde_json::json;
    use std::collections::BTreeSet;

    #[test]
    fn good_books_matches_normalizer_schema() {
        let def = IndexDefinition::good_books("good-books");
        def.validate().unwrap();

        let index_fields: BTreeSet<_> = def.fields.iter().map(|f| f.name.clone()).collect();
        let mut doc_fields: BTreeSet<_> = DocumentSchema::good_books()
            .fields
            .into_iter()
            .map(|r| r.target)
            .collect();
        doc_fields.insert("id".into());
        assert_eq!(index_fields, doc_fields);
    }

    #[test]
    fn serializes_in_service_shape() {
        let v = serde_json::to_value(IndexDefinition::good_books("books")).unwrap();
        assert_eq!(v["name"], "books");
        assert_eq!(v["fields"][0], json!({
            "name": "id", "type": "Edm.String", "key": true, "filterable": true, "sortable": true
        }));
        assert_eq!(v["corsOptions"], json!({"allowedOrigins": ["*"], "maxAgeInSeconds": 60}));
        assert_eq!(v["suggesters"][0]["sourceFields"], json!(["title", "authors"]));
        assert!(v.get("semantic").is_none());
    }

    #[test]
    fn loads_schema_file_and_keeps_unknown_properties() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotels.json");
        std::fs::write(
            &path,
            r##"{
                "name": "ignored",
                "fields": [
                    {"name": "hotelId", "type": "Edm.String", "key": true},
                    {"name": "address", "type": "Edm.ComplexType", "fields": [
                        {"name": "city", "type": "Edm.String", "searchable": true}
                    ]}
                ],
                "similarity": {"@odata.type": "#Microsoft.Azure.Search.BM25Similarity"}
            }"##,
        )
        .unwrap();

        let def = IndexDefinition::load(&path, "hotels-quickstart").unwrap();
        assert_eq!(def.name, "hotels-quickstart");
        assert_eq!(def.fields[1].fields[0].name, "city");
        assert_eq!(def.cors_options, Some(CorsOptions::default()));
        assert!(def.extra.contains_key("similarity"));
    }

    #[test]
    fn field_level_properties_survive_a_round_trip() {
        let raw = json!({
            "name": "vectors",
            "fields": [
                {"name": "id", "type": "Edm.String", "key": true},
                {"name": "content", "type": "Edm.String", "searchable": true,
                 "searchAnalyzer": "en.lucene", "indexAnalyzer": "en.lucene",
                 "synonymMaps": ["books-synonyms"]},
                {"name": "contentVector", "type": "Collection(Edm.Single)",
                 "searchable": true, "dimensions": 1536,
                 "vectorSearchProfile": "p1", "stored": false}
            ]
        });

        let def: IndexDefinition = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(def.fields[2].extra["dimensions"], 1536);

        let back = serde_json::to_value(&def).unwrap();
        assert_eq!(back["fields"], raw["fields"]);
    }

    #[test]
    fn rejects_missing_or_non_string_key() {
        let mut def = IndexDefinition::good_books("b");
        def.fields[0].key = None;
        assert!(matches!(def.validate(), Err(SchemaError::Invalid { .. })));

        let mut def = IndexDefinition::good_books("b");
        def.fields[0].field_type = "Edm.Int64".into();
        assert!(def.validate().unwrap_err().to_string().contains("must be Edm.String"));
    }

    #[test]
    fn rejects_suggester_on_unknown_field() {
        let mut def = IndexDefinition::good_books("b");
        def.suggesters[0].source_fields.push("publisher".into());
        assert!(def.validate().unwrap_err().to_string().contains("publisher"));
    }

    #[test]
    fn semantic_configuration_replaces_same_name() {
        let config = |title: &str| SemanticConfiguration {
            name: "books-semantic".into(),
            prioritized_fields: PrioritizedFields {
                title_field: Some(SemanticField::new(title)),
                prioritized_content_fields: vec![SemanticField::new("original_title")],
                prioritized_keywords_fields: vec![SemanticField::new("authors")],
            },
        };
        let def = IndexDefinition::good_books("b")
            .with_semantic_configuration(config("original_title"))
            .with_semantic_configuration(config("title"));

        let semantic = def.semantic.unwrap();
        assert_eq!(semantic.configurations.len(), 1);
        assert_eq!(semantic.default_configuration.as_deref(), Some("books-semantic"));
        assert_eq!(
            semantic.configurations[0].prioritized_fields.title_field,
            Some(SemanticField::new("title"))
        );
    }
}
