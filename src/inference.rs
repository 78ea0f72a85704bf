//! inference.rs
//!
//! Query side of the index:
//!   1. `search` runs a simple/full/semantic query and renders the hits,
//!      with semantic captions and answers when requested
//!   2. `lookup` and `autocomplete` render a keyed document and suggester
//!      completions
//!   3. `ask` retrieves the top-k hits, formats them as sources, and asks the
//!      chat model to answer only from those sources
//!
//! Ranking and answer generation happen remotely; this module only assembles
//! requests and prompts.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use crate::client::llm_client::LlmClient;
use crate::client::search_client::{
    AutocompleteRequest, QueryType, SearchClient, SearchHit, SearchRequest, SearchResponse,
};

const SOURCE_SEPARATOR: &str = "\n=================\n";

#[derive(Debug, Clone)]
pub struct AskOptions {
    pub top: usize,
    /// Fields retrieved and shown to the model; `None` means all retrievable.
    pub select: Option<String>,
    /// Runs a semantic query with this configuration when set.
    pub semantic_configuration: Option<String>,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            top: 5,
            select: None,
            semantic_configuration: None,
        }
    }
}

#[derive(Debug)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SearchHit>,
}

pub async fn search(client: &SearchClient, req: &SearchRequest) -> Result<String> {
    let resp = client
        .search(req)
        .await
        .with_context(|| format!("search for {:?} failed", req.search))?;
    info!(hits = resp.value.len(), total = ?resp.count, "search complete");

    Ok(render_response(&resp))
}

/// Renders one document by key, or `None` when it does not exist.
pub async fn lookup(client: &SearchClient, key: &str, select: Option<&str>) -> Result<Option<String>> {
    let doc = client
        .get_document(key, select)
        .await
        .with_context(|| format!("lookup of document {key:?} failed"))?;
    Ok(doc.map(|fields| {
        fields
            .iter()
            .map(|(k, v)| format!("{k}: {}\n", display_value(v)))
            .collect()
    }))
}

pub async fn autocomplete(client: &SearchClient, req: &AutocompleteRequest) -> Result<String> {
    let items = client
        .autocomplete(req)
        .await
        .with_context(|| format!("autocomplete for {:?} failed", req.search))?;
    let mut out = format!("Autocomplete suggestions for {:?}:\n", req.search);
    for item in &items {
        out.push_str(&format!("  {}\n", item.query_plus_text));
    }
    Ok(out)
}

pub async fn ask(
    search: &SearchClient,
    llm: &LlmClient,
    question: &str,
    options: &AskOptions,
) -> Result<Answer> {
    let question = question.trim();

    let mut req = SearchRequest::new(question);
    req.top = Some(options.top);
    req.select = options.select.clone();
    if let Some(config) = &options.semantic_configuration {
        req.query_type = Some(QueryType::Semantic);
        req.semantic_configuration = Some(config.clone());
    }

    let resp = search
        .search(&req)
        .await
        .context("retrieving sources failed")?;
    let sources = format_sources(&resp.value);
    info!(sources = resp.value.len(), "retrieved sources");

    let prompt = grounded_prompt(question, &sources);
    let text = llm
        .complete(&prompt)
        .await
        .context("chat completion failed")?;

    Ok(Answer {
        text,
        sources: resp.value,
    })
}

/// Prompt that restricts the model to the retrieved sources.
pub fn grounded_prompt(query: &str, sources: &str) -> String {
    let sources = if sources.trim().is_empty() {
        "(no sources found)"
    } else {
        sources
    };
    format!(
        r#"You are an assistant that helps users learn from the information found in the source material.
Answer the query using only the sources provided below.
Use bullets if the answer has multiple points.
If the answer is longer than 3 sentences, provide a summary.
Answer ONLY with the facts listed in the list of sources below. Cite your source when you answer the question.
If there isn't enough information below, say you don't know.
Do not generate answers that don't use the sources below.

Query: {query}

Sources:
{sources}
"#
    )
}

/// One line per hit: `field: value` pairs in key order.
pub fn format_sources(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| {
            hit.fields()
                .map(|(k, v)| format!("{k}: {}", display_value(v)))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect::<Vec<_>>()
        .join(SOURCE_SEPARATOR)
}

fn render_response(resp: &SearchResponse) -> String {
    let mut out = String::new();
    if let Some(total) = resp.count {
        out.push_str(&format!("Total documents matching query: {total}\n\n"));
    }
    for hit in &resp.value {
        out.push_str(&render_hit(hit));
        out.push('\n');
    }
    if !resp.answers().is_empty() {
        out.push_str("Semantic answers:\n");
        for a in resp.answers() {
            let key = a.key.as_deref().unwrap_or("?");
            out.push_str(&format!("  [{key}] {}\n", a.answer.display()));
        }
    }
    out
}

fn render_hit(hit: &SearchHit) -> String {
    let mut out = String::new();
    if let Some(score) = hit.reranker_score.or(hit.score) {
        out.push_str(&format!("@score: {score:.4}\n"));
    }
    for (k, v) in hit.fields() {
        out.push_str(&format!("{k}: {}\n", display_value(v)));
    }
    if let Some(caption) = hit.caption() {
        out.push_str(&format!("caption: {}\n", caption.display()));
    }
    out
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
