pub mod doc_normalizer;
