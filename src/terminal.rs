use std::fmt::{Display, Formatter};

use anyhow::Result;
use inquire::{Confirm, CustomType, Select, Text};

use crate::config::SearchConfig;
use crate::inference::AskOptions;
use crate::{AutocompleteArgs, GOOD_BOOKS_URL, IngestArgs, SearchArgs};

#[derive(Debug, Clone, Copy)]
enum Mode {
    Ingest,
    CreateIndex,
    GetIndex,
    DeleteIndex,
    GetDocument,
    Autocomplete,
    Search,
    Ask,
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Mode::Ingest => "Ingest documents",
            Mode::CreateIndex => "Create or update index",
            Mode::GetIndex => "Show index",
            Mode::DeleteIndex => "Delete index",
            Mode::GetDocument => "Look up a document",
            Mode::Autocomplete => "Autocomplete",
            Mode::Search => "Search",
            Mode::Ask => "Ask a question",
        };
        f.write_str(label)
    }
}

pub async fn terminal(search: SearchConfig) -> Result<()> {
    let modes = vec![
        Mode::Search,
        Mode::Ask,
        Mode::GetDocument,
        Mode::Autocomplete,
        Mode::Ingest,
        Mode::CreateIndex,
        Mode::GetIndex,
        Mode::DeleteIndex,
    ];
    let mode = Select::new(
        &format!("Select operation on '{}':", search.index_name),
        modes,
    )
    .prompt()?;

    match mode {
        Mode::Ingest => {
            let source = Text::new("Source file or URL:")
                .with_default(GOOD_BOOKS_URL)
                .prompt()?;
            let mut args = IngestArgs::new(source);
            args.batch_size = CustomType::new("Batch size:")
                .with_default(args.batch_size)
                .with_error_message("enter a number between 1 and 1000")
                .prompt()?;
            args.merge = Confirm::new("Merge into existing documents?")
                .with_default(false)
                .prompt()?;
            crate::run_ingest(search, &args).await?;
        }
        Mode::CreateIndex => {
            let semantic = Text::new("Semantic configuration name (blank for none):").prompt()?;
            let semantic = Some(semantic.trim().to_string()).filter(|s| !s.is_empty());
            crate::run_create_index(search, None, semantic).await?;
        }
        Mode::GetIndex => crate::run_get_index(search).await?,
        Mode::DeleteIndex => {
            let sure = Confirm::new(&format!("Delete index '{}'?", search.index_name))
                .with_default(false)
                .prompt()?;
            if sure {
                crate::run_delete_index(search).await?;
            }
        }
        Mode::GetDocument => {
            let key = Text::new("Document key:").prompt()?;
            crate::run_get_document(search, key.trim(), None).await?;
        }
        Mode::Autocomplete => {
            let text = Text::new("Partial query:").prompt()?;
            crate::run_autocomplete(search, &AutocompleteArgs::new(text)).await?;
        }
        Mode::Search => {
            let text = Text::new("Search text:").with_default("*").prompt()?;
            let top = CustomType::<usize>::new("Max results:")
                .with_default(10)
                .prompt()?;
            let args = SearchArgs {
                text,
                top: Some(top),
                count: true,
                ..SearchArgs::default()
            };
            crate::run_search(search, &args).await?;
        }
        Mode::Ask => {
            let question = Text::new("Question:").prompt()?;
            crate::run_ask(search, &question, &AskOptions::default()).await?;
        }
    }

    Ok(())
}
