pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod consensus;
pub mod domain;
pub mod error;
pub mod fasta;
pub mod fetch;
pub mod flags;
pub mod output;
pub mod parse;
pub mod pipeline;
pub mod retry;
pub mod sink;
pub mod specimen;
pub mod submit;
pub mod transport;
