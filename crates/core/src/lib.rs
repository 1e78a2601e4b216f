//! Clinical analysis pipeline: input classification, image findings,
//! similar-case retrieval and diagnostic synthesis.

pub mod api;
pub mod classifier;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod imaging;
pub mod indexer;
pub mod models;
pub mod narrator;
pub mod pipeline;
pub mod rules;
pub mod search;
pub mod synthesizer;
pub mod vectorstore;

pub use error::{ErrorKind, PipelineError, StageFailure};
pub use pipeline::PipelineOrchestrator;
