pub mod llm_client;
pub mod retry;
pub mod search_client;
