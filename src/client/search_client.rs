//! search_client.rs
//!
//! Thin REST client for the hosted search service: document upload, index
//! lifecycle (create/update, get, delete), document lookup, queries and
//! autocomplete.
//!
//! Every request carries the `api-key` header and the `api-version` query
//! parameter from `SearchConfig`. The client holds no other state, so one
//! instance can be shared by concurrent uploads.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::SearchConfig;
use crate::index::index_schema::IndexDefinition;
use crate::transform::doc_normalizer::{NormalizedDoc, is_valid_key};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TransportError {
    /// Timeouts, connection failures, throttling and server-side errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            TransportError::Status { status, .. } => {
                *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || status.is_server_error()
            }
            TransportError::Decode(_) => false,
        }
    }

    /// Authentication/authorization failures; retrying or moving on to the
    /// next batch cannot succeed either.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Status { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }
}

/// How the service should apply each uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IndexAction {
    #[default]
    Upload,
    MergeOrUpload,
}

/// Per-document outcome reported by the upload endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingResult {
    pub key: String,
    pub status: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    pub status_code: u16,
}

/// The capability the upload driver depends on.
#[async_trait]
pub trait DocumentUploader: Send + Sync {
    async fn upload_batch(
        &self,
        docs: &[NormalizedDoc],
        action: IndexAction,
    ) -> Result<Vec<IndexingResult>, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Simple,
    Full,
    Semantic,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub search: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_type: Option<QueryType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_fields: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orderby: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<usize>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub count: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scoring_profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_configuration: Option<String>,
    /// Semantic captions, e.g. `extractive`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captions: Option<String>,
    /// Semantic answers, e.g. `extractive` or `extractive|count-3`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answers: Option<String>,
}

impl SearchRequest {
    pub fn new<S: Into<String>>(search: S) -> Self {
        Self {
            search: search.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(rename = "@odata.count", default)]
    pub count: Option<u64>,
    #[serde(rename = "@search.answers", default)]
    pub answers: Option<Vec<SemanticAnswer>>,
    #[serde(default)]
    pub value: Vec<SearchHit>,
}

impl SearchResponse {
    pub fn answers(&self) -> &[SemanticAnswer] {
        self.answers.as_deref().unwrap_or_default()
    }
}

/// Extractive caption or answer; `highlights` carries `<em>` markup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SemanticText {
    pub text: String,
    #[serde(default)]
    pub highlights: Option<String>,
}

impl SemanticText {
    /// Highlights when the service produced any, plain text otherwise.
    pub fn display(&self) -> &str {
        match self.highlights.as_deref() {
            Some(h) if !h.trim().is_empty() => h,
            _ => &self.text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SemanticAnswer {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(flatten)]
    pub answer: SemanticText,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "@search.score", default)]
    pub score: Option<f64>,
    #[serde(rename = "@search.rerankerScore", default)]
    pub reranker_score: Option<f64>,
    #[serde(rename = "@search.captions", default)]
    pub captions: Option<Vec<SemanticText>>,
    /// Retrieved fields, plus any other `@search.*` annotations.
    #[serde(flatten)]
    pub document: Map<String, Value>,
}

impl SearchHit {
    /// Document fields without service annotations, in key order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.document.iter().filter(|(k, _)| !k.starts_with('@'))
    }

    pub fn caption(&self) -> Option<&SemanticText> {
        self.captions.as_ref().and_then(|c| c.first())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum AutocompleteMode {
    OneTerm,
    TwoTerms,
    OneTermWithContext,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutocompleteRequest {
    pub search: String,
    pub suggester_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autocomplete_mode: Option<AutocompleteMode>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fuzzy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<usize>,
}

impl AutocompleteRequest {
    pub fn new<S: Into<String>, G: Into<String>>(search: S, suggester_name: G) -> Self {
        Self {
            search: search.into(),
            suggester_name: suggester_name.into(),
            autocomplete_mode: None,
            fuzzy: false,
            filter: None,
            top: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutocompleteItem {
    pub text: String,
    pub query_plus_text: String,
}

#[derive(Debug, Deserialize)]
struct AutocompleteResponse {
    #[serde(default)]
    value: Vec<AutocompleteItem>,
}

#[derive(Debug, Serialize)]
struct IndexBatchRequest<'a> {
    value: Vec<IndexBatchAction<'a>>,
}

#[derive(Debug, Serialize)]
struct IndexBatchAction<'a> {
    #[serde(rename = "@search.action")]
    action: IndexAction,
    #[serde(flatten)]
    doc: &'a NormalizedDoc,
}

#[derive(Debug, Deserialize)]
struct IndexBatchResponse {
    value: Vec<IndexingResult>,
}

#[derive(Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    config: SearchConfig,
}

impl SearchClient {
    pub fn new(config: SearchConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn index_name(&self) -> &str {
        &self.config.index_name
    }

    /// The underlying HTTP client, for fetching source payloads.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn index_url(&self, name: &str) -> String {
        format!("{}/indexes/{}", self.config.endpoint, name)
    }

    fn docs_url(&self, op: &str) -> String {
        format!("{}/docs/{}", self.index_url(&self.config.index_name), op)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("api-key", &self.config.api_key)
            .query(&[("api-version", self.config.api_version.as_str())])
    }

    /// Uploads one batch. HTTP 200 and 207 (partial success) both return the
    /// per-document results; any other status is a transport failure.
    pub async fn upload_documents(
        &self,
        docs: &[NormalizedDoc],
        action: IndexAction,
    ) -> Result<Vec<IndexingResult>, TransportError> {
        let body = IndexBatchRequest {
            value: docs
                .iter()
                .map(|doc| IndexBatchAction { action, doc })
                .collect(),
        };
        debug!(index = %self.config.index_name, docs = docs.len(), "uploading batch");

        let resp = self
            .request(Method::POST, self.docs_url("index"))
            .json(&body)
            .send()
            .await?;
        let text = read_success(resp).await?;
        let parsed: IndexBatchResponse = serde_json::from_str(&text)?;
        Ok(parsed.value)
    }

    pub async fn create_or_update_index(&self, def: &IndexDefinition) -> Result<(), TransportError> {
        let resp = self
            .request(Method::PUT, self.index_url(&def.name))
            .header("Prefer", "return=minimal")
            .json(def)
            .send()
            .await?;
        read_success(resp).await?;
        Ok(())
    }

    /// `None` when the index does not exist.
    pub async fn get_index(&self, name: &str) -> Result<Option<IndexDefinition>, TransportError> {
        let resp = self.request(Method::GET, self.index_url(name)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let text = read_success(resp).await?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Returns `false` when there was nothing to delete.
    pub async fn delete_index(&self, name: &str) -> Result<bool, TransportError> {
        let resp = self.request(Method::DELETE, self.index_url(name)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        read_success(resp).await?;
        Ok(true)
    }

    /// Fetches one document by key; `None` when no such document exists.
    pub async fn get_document(
        &self,
        key: &str,
        select: Option<&str>,
    ) -> Result<Option<Map<String, Value>>, TransportError> {
        // Keys outside the service's key alphabet cannot be stored.
        if !is_valid_key(key) {
            return Ok(None);
        }
        let mut req = self.request(Method::GET, self.docs_url(key));
        if let Some(select) = select {
            req = req.query(&[("$select", select)]);
        }
        let resp = req.send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let text = read_success(resp).await?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    pub async fn autocomplete(
        &self,
        req: &AutocompleteRequest,
    ) -> Result<Vec<AutocompleteItem>, TransportError> {
        let resp = self
            .request(Method::POST, self.docs_url("autocomplete"))
            .json(req)
            .send()
            .await?;
        let text = read_success(resp).await?;
        let parsed: AutocompleteResponse = serde_json::from_str(&text)?;
        Ok(parsed.value)
    }

    pub async fn search(&self, req: &SearchRequest) -> Result<SearchResponse, TransportError> {
        let resp = self
            .request(Method::POST, self.docs_url("search"))
            .json(req)
            .send()
            .await?;
        let text = read_success(resp).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl DocumentUploader for SearchClient {
    async fn upload_batch(
        &self,
        docs: &[NormalizedDoc],
        action: IndexAction,
    ) -> Result<Vec<IndexingResult>, TransportError> {
        self.upload_documents(docs, action).await
    }
}

async fn read_success(resp: reqwest::Response) -> Result<String, TransportError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(TransportError::Status { status, body });
    }
    Ok(resp.text().await?)
}
