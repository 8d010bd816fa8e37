//! Git commit message generator library
//!
//! Turns the staged diff of a repository into a conventional commit message
//! using a pretrained seq2seq model running locally through candle.
pub mod config;
pub mod decoding;
pub mod diff;
pub mod error;
pub mod formatter;
pub mod git;
pub mod hooks;
pub mod model;
pub mod pipeline;
pub mod style;
pub mod types;

// Re-export commonly used types
pub use config::Configuration;
pub use error::{CommitGenError, Result};
pub use git::{GitRepo, StagedChanges};
pub use model::{Seq2SeqGenerator, TextGenerator};
pub use pipeline::CommitMessageGenerator;
pub use types::GenerationOutcome;
