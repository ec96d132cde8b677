pub mod alignment;
pub mod config;
pub mod diagnostics;
pub mod diversity;
pub mod effects;
pub mod embedding;
pub mod encoder;
pub mod error;
pub mod index;
pub mod persistence;
pub mod pipeline;
pub mod ppmi;
pub mod protocol;
pub mod quality;
pub mod query;
pub mod ridge;
pub mod scoring;
pub mod server;
pub mod sparse;
pub mod store;
pub mod synthesis;
pub mod transport;
pub mod types;
pub mod vectors;
pub mod vocab;
