pub mod source_reader;
