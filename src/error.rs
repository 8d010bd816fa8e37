use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommitGenError {
   #[error("Git command failed: {0}")]
   GitError(String),

   #[error("Failed to load config {path}: {reason}")]
   ConfigError { path: String, reason: String },

   #[error("Model error: {0}")]
   ModelError(String),

   #[error("Tokenizer error: {0}")]
   TokenizerError(String),

   #[error("Tensor error: {0}")]
   Candle(#[from] candle_core::Error),

   #[error("Model download failed: {0}")]
   Hub(#[from] hf_hub::api::sync::ApiError),

   #[error("Hook installation failed: {0}")]
   HookError(String),

   #[error("IO error: {0}")]
   IoError(#[from] std::io::Error),

   #[error("JSON error: {0}")]
   JsonError(#[from] serde_json::Error),
}

impl CommitGenError {
   /// Wrap a `tokenizers` error, which only exposes a boxed `dyn Error`.
   pub fn tokenizer(err: impl std::fmt::Display) -> Self {
      Self::TokenizerError(err.to_string())
   }
}

pub type Result<T> = std::result::Result<T, CommitGenError>;
