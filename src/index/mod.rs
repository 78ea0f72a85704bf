pub mod batcher;
pub mod index_schema;
