//! # Translation Pipeline
//!
//! - **chunking**: sentence-boundary splitting of long transcripts
//! - **orchestrator**: recognition → translation → synthesis for one utterance

pub mod chunking;
pub mod orchestrator;

pub use orchestrator::{PipelineOrchestrator, PipelineResult, Utterance};
