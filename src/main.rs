// src/main.rs
//! Command-line entry point for the search-service tooling:
//! - ingest: CSV/JSON → normalized documents → batched upload
//! - create-index / get-index / delete-index
//! - get-document, autocomplete
//! - search, and ask (grounded answers over search results)
//! - interactive: menu-driven version of the above
//!
//! Connection settings come from the environment (`.env` is loaded first);
//! see `config.rs`.

mod client;
mod config;
mod index;
mod indexing;
mod inference;
mod ingest;
mod terminal;
mod transform;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use crate::client::llm_client::LlmClient;
use crate::client::retry::RetryPolicy;
use crate::client::search_client::{
    AutocompleteMode, AutocompleteRequest, IndexAction, QueryType, SearchClient, SearchRequest,
};
use crate::config::{LlmConfig, SearchConfig};
use crate::index::batcher::BatchSize;
use crate::index::index_schema::{
    IndexDefinition, PrioritizedFields, SemanticConfiguration, SemanticField,
};
use crate::indexing::{CancelFlag, IngestOptions};
use crate::inference::AskOptions;
use crate::ingest::source_reader::SourceFormat;
use crate::transform::doc_normalizer::DocNormalizer;

/// Sample dataset used when no source is given.
pub(crate) const GOOD_BOOKS_URL: &str =
    "https://raw.githubusercontent.com/Azure-Samples/azure-search-sample-data/main/good-books/books.csv";

#[derive(Parser)]
#[command(name = "search-ingest")]
#[command(about = "Bulk ingestion and query tooling for a hosted search index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Target index (overrides SEARCH_INDEX_NAME)
    #[arg(long, global = true)]
    index: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Normalize a CSV/JSON source and upload it in batches
    Ingest(IngestArgs),
    /// Create or update the index definition
    CreateIndex {
        /// JSON index schema; the built-in good-books schema when omitted
        #[arg(long)]
        schema: Option<PathBuf>,
        /// Add a semantic configuration with this name (good-books schema only)
        #[arg(long)]
        semantic_config: Option<String>,
    },
    /// Show the index definition
    GetIndex,
    /// Delete the index
    DeleteIndex,
    /// Fetch one document by key
    GetDocument {
        key: String,
        #[arg(long)]
        select: Option<String>,
    },
    /// Complete a partial query from a suggester
    Autocomplete(AutocompleteArgs),
    /// Query the index
    Search(SearchArgs),
    /// Answer a question from the top search results
    Ask {
        question: String,
        #[arg(long, default_value = "5")]
        top: usize,
        #[arg(long)]
        select: Option<String>,
        /// Semantic configuration to rank sources with
        #[arg(long)]
        semantic: Option<String>,
    },
    /// Menu-driven mode
    Interactive,
}

#[derive(Args, Clone)]
pub(crate) struct IngestArgs {
    /// File path or http(s) URL
    #[arg(default_value = GOOD_BOOKS_URL)]
    pub source: String,

    /// Input format; inferred from the extension when omitted
    #[arg(long, value_enum)]
    pub format: Option<SourceFormat>,

    #[arg(long, env = "INGEST_BATCH_SIZE", default_value = "1000")]
    pub batch_size: BatchSize,

    /// Batches uploaded concurrently
    #[arg(long, env = "INGEST_CONCURRENCY", default_value = "1")]
    pub concurrency: usize,

    /// Retries per batch for transient failures
    #[arg(long, env = "INGEST_MAX_RETRIES", default_value = "3")]
    pub max_retries: usize,

    /// Initial backoff between retries, in milliseconds
    #[arg(long, env = "INGEST_RETRY_BASE_MS", default_value = "500")]
    pub retry_base_ms: u64,

    /// Merge into existing documents instead of replacing them
    #[arg(long)]
    pub merge: bool,

    /// Write the run report as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl IngestArgs {
    pub(crate) fn new(source: String) -> Self {
        Self {
            source,
            format: None,
            batch_size: BatchSize::default(),
            concurrency: 1,
            max_retries: RetryPolicy::default().max_retries,
            retry_base_ms: 500,
            merge: false,
            report: None,
        }
    }

    fn options(&self) -> IngestOptions {
        IngestOptions {
            batch_size: self.batch_size,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.retry_base_ms),
                ..RetryPolicy::default()
            },
            concurrency: self.concurrency.max(1),
            action: if self.merge {
                IndexAction::MergeOrUpload
            } else {
                IndexAction::Upload
            },
        }
    }
}

#[derive(Args, Clone, Default)]
pub(crate) struct SearchArgs {
    /// Search text; `*` matches everything
    #[arg(default_value = "*")]
    pub text: String,
    #[arg(long, value_enum)]
    pub query_type: Option<QueryType>,
    #[arg(long)]
    pub select: Option<String>,
    #[arg(long)]
    pub search_fields: Option<String>,
    #[arg(long)]
    pub filter: Option<String>,
    #[arg(long)]
    pub order_by: Option<String>,
    #[arg(long)]
    pub top: Option<usize>,
    #[arg(long)]
    pub scoring_profile: Option<String>,
    /// Semantic configuration; implies a semantic query
    #[arg(long)]
    pub semantic: Option<String>,
    /// Include the total match count
    #[arg(long)]
    pub count: bool,
    /// Ask for extractive captions (semantic queries)
    #[arg(long, requires = "semantic")]
    pub captions: bool,
    /// Ask for extractive answers (semantic queries)
    #[arg(long, requires = "semantic")]
    pub answers: bool,
}

impl SearchArgs {
    fn request(&self) -> SearchRequest {
        let mut req = SearchRequest::new(self.text.clone());
        req.query_type = self.query_type;
        req.select = self.select.clone();
        req.search_fields = self.search_fields.clone();
        req.filter = self.filter.clone();
        req.orderby = self.order_by.clone();
        req.top = self.top;
        req.count = self.count;
        req.scoring_profile = self.scoring_profile.clone();
        if let Some(config) = &self.semantic {
            req.query_type = Some(QueryType::Semantic);
            req.semantic_configuration = Some(config.clone());
        }
        req.captions = self.captions.then(|| "extractive".to_string());
        req.answers = self.answers.then(|| "extractive".to_string());
        req
    }
}

#[derive(Args, Clone)]
pub(crate) struct AutocompleteArgs {
    /// Partial query text
    pub text: String,
    #[arg(long, default_value = "sg")]
    pub suggester: String,
    #[arg(long, value_enum, default_value = "two-terms")]
    pub mode: AutocompleteMode,
    /// Tolerate one misspelled character
    #[arg(long)]
    pub fuzzy: bool,
    #[arg(long)]
    pub top: Option<usize>,
}

impl AutocompleteArgs {
    pub(crate) fn new(text: String) -> Self {
        Self {
            text,
            suggester: "sg".into(),
            mode: AutocompleteMode::TwoTerms,
            fuzzy: false,
            top: None,
        }
    }

    fn request(&self) -> AutocompleteRequest {
        let mut req = AutocompleteRequest::new(self.text.clone(), self.suggester.clone());
        req.autocomplete_mode = Some(self.mode);
        req.fuzzy = self.fuzzy;
        req.top = self.top;
        req
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let search = search_config(cli.index.as_deref())?;

    match cli.command.unwrap_or(Command::Interactive) {
        Command::Ingest(args) => run_ingest(search, &args).await,
        Command::CreateIndex {
            schema,
            semantic_config,
        } => run_create_index(search, schema, semantic_config).await,
        Command::GetIndex => run_get_index(search).await,
        Command::DeleteIndex => run_delete_index(search).await,
        Command::GetDocument { key, select } => {
            run_get_document(search, &key, select.as_deref()).await
        }
        Command::Autocomplete(args) => run_autocomplete(search, &args).await,
        Command::Search(args) => run_search(search, &args).await,
        Command::Ask {
            question,
            top,
            select,
            semantic,
        } => {
            let options = AskOptions {
                top,
                select,
                semantic_configuration: semantic,
            };
            run_ask(search, &question, &options).await
        }
        Command::Interactive => terminal::terminal(search).await,
    }
}

fn search_config(index_override: Option<&str>) -> Result<SearchConfig> {
    let config = match index_override {
        Some(index) => SearchConfig::from_lookup(|key| match key {
            "SEARCH_INDEX_NAME" => Some(index.to_string()),
            _ => std::env::var(key).ok(),
        }),
        None => SearchConfig::from_env(),
    }
    .context("search service configuration")?;
    info!(endpoint = %config.endpoint, index = %config.index_name, "search service");
    Ok(config)
}

pub(crate) async fn run_ingest(search: SearchConfig, args: &IngestArgs) -> Result<()> {
    let client = SearchClient::new(search)?;
    let options = args.options();

    let cancel = CancelFlag::default();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received Ctrl+C; finishing in-flight batches");
            on_signal.cancel();
        }
    });

    let report = indexing::index(
        &client,
        &args.source,
        args.format,
        &DocNormalizer::default(),
        &options,
        cancel,
    )
    .await?;

    println!("{report}");
    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    report.outcome()?;
    Ok(())
}

pub(crate) async fn run_create_index(
    search: SearchConfig,
    schema: Option<PathBuf>,
    semantic_config: Option<String>,
) -> Result<()> {
    let name = search.index_name.clone();
    let client = SearchClient::new(search)?;

    let mut def = match &schema {
        Some(path) => IndexDefinition::load(path, &name)
            .with_context(|| format!("loading schema {}", path.display()))?,
        None => IndexDefinition::good_books(&name),
    };
    if let Some(config_name) = semantic_config {
        if schema.is_some() {
            bail!("--semantic-config only applies to the built-in good-books schema");
        }
        def = def.with_semantic_configuration(SemanticConfiguration {
            name: config_name,
            prioritized_fields: PrioritizedFields {
                title_field: Some(SemanticField::new("title")),
                prioritized_content_fields: vec![SemanticField::new("original_title")],
                prioritized_keywords_fields: vec![SemanticField::new("authors")],
            },
        });
    }
    def.validate()?;

    client
        .create_or_update_index(&def)
        .await
        .with_context(|| format!("creating index '{name}'"))?;
    let key = def.key_field().map(|f| f.name.as_str()).unwrap_or_default();
    println!(
        "Index {name} created or updated ({} fields, key '{key}')",
        def.fields.len()
    );
    Ok(())
}

pub(crate) async fn run_get_index(search: SearchConfig) -> Result<()> {
    let name = search.index_name.clone();
    let client = SearchClient::new(search)?;
    match client.get_index(&name).await? {
        Some(def) => println!("{}", serde_json::to_string_pretty(&def)?),
        None => bail!("index '{name}' does not exist"),
    }
    Ok(())
}

pub(crate) async fn run_delete_index(search: SearchConfig) -> Result<()> {
    let name = search.index_name.clone();
    let client = SearchClient::new(search)?;
    if client.delete_index(&name).await? {
        println!("Index {name} deleted");
    } else {
        println!("Index {name} did not exist");
    }
    Ok(())
}

pub(crate) async fn run_get_document(
    search: SearchConfig,
    key: &str,
    select: Option<&str>,
) -> Result<()> {
    let name = search.index_name.clone();
    let client = SearchClient::new(search)?;
    match inference::lookup(&client, key, select).await? {
        Some(out) => print!("{out}"),
        None => bail!("no document with key '{key}' in index '{name}'"),
    }
    Ok(())
}

pub(crate) async fn run_autocomplete(search: SearchConfig, args: &AutocompleteArgs) -> Result<()> {
    let client = SearchClient::new(search)?;
    let out = inference::autocomplete(&client, &args.request()).await?;
    print!("{out}");
    Ok(())
}

pub(crate) async fn run_search(search: SearchConfig, args: &SearchArgs) -> Result<()> {
    let client = SearchClient::new(search)?;
    let out = inference::search(&client, &args.request()).await?;
    print!("{out}");
    Ok(())
}

pub(crate) async fn run_ask(search: SearchConfig, question: &str, options: &AskOptions) -> Result<()> {
    let client = SearchClient::new(search)?;
    let llm = LlmClient::new(LlmConfig::from_env().context("chat model configuration")?)?;
    let answer = inference::ask(&client, &llm, question, options).await?;
    println!("{}\n", answer.text);
    println!("({} sources)", answer.sources.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_ingest_with_tuning_flags() {
        let cli = Cli::try_parse_from([
            "search-ingest",
            "--index",
            "books",
            "ingest",
            "books.json",
            "--batch-size",
            "250",
            "--concurrency",
            "4",
            "--merge",
        ])
        .unwrap();
        assert_eq!(cli.index.as_deref(), Some("books"));
        let Some(Command::Ingest(args)) = cli.command else {
            panic!("expected ingest");
        };
        let opts = args.options();
        assert_eq!(opts.batch_size.get(), 250);
        assert_eq!(opts.concurrency, 4);
        assert_eq!(opts.action, IndexAction::MergeOrUpload);
    }

    #[test]
    fn cli_rejects_oversized_batches() {
        assert!(
            Cli::try_parse_from(["search-ingest", "ingest", "x.csv", "--batch-size", "5000"]).is_err()
        );
    }

    #[test]
    fn captions_and_answers_require_a_semantic_config() {
        assert!(Cli::try_parse_from(["search-ingest", "search", "hotels", "--captions"]).is_err());

        let cli = Cli::try_parse_from([
            "search-ingest",
            "search",
            "historic hotel",
            "--semantic",
            "my-semantic-config",
            "--captions",
            "--answers",
        ])
        .unwrap();
        let Some(Command::Search(args)) = cli.command else {
            panic!("expected search");
        };
        let req = args.request();
        assert_eq!(req.captions.as_deref(), Some("extractive"));
        assert_eq!(req.answers.as_deref(), Some("extractive"));
    }

    #[test]
    fn autocomplete_defaults_to_two_terms_on_sg() {
        let cli = Cli::try_parse_from(["search-ingest", "autocomplete", "sa"]).unwrap();
        let Some(Command::Autocomplete(args)) = cli.command else {
            panic!("expected autocomplete");
        };
        let req = args.request();
        assert_eq!(req.suggester_name, "sg");
        assert_eq!(req.autocomplete_mode, Some(AutocompleteMode::TwoTerms));
        assert!(!req.fuzzy);
    }

    #[test]
    fn get_document_takes_key_and_select() {
        let cli =
            Cli::try_parse_from(["search-ingest", "get-document", "3", "--select", "id,title"])
                .unwrap();
        let Some(Command::GetDocument { key, select }) = cli.command else {
            panic!("expected get-document");
        };
        assert_eq!(key, "3");
        assert_eq!(select.as_deref(), Some("id,title"));
    }

    #[test]
    fn search_args_with_semantic_config_imply_semantic_query() {
        let args = SearchArgs {
            text: "hotels".into(),
            semantic: Some("my-semantic-config".into()),
            ..SearchArgs::default()
        };
        let req = args.request();
        assert_eq!(req.query_type, Some(QueryType::Semantic));
        assert_eq!(req.semantic_configuration.as_deref(), Some("my-semantic-config"));
    }
}
