use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Result of one generation run, as reported to the caller.
///
/// Serializes as `{"status": "success" | "error", "message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum GenerationOutcome {
   Success { message: String },
   Error { message: String },
}

impl GenerationOutcome {
   pub fn success(message: impl Into<String>) -> Self {
      Self::Success { message: message.into() }
   }

   pub fn error(message: impl Into<String>) -> Self {
      Self::Error { message: message.into() }
   }

   pub const fn is_success(&self) -> bool {
      matches!(self, Self::Success { .. })
   }

   /// The commit message on success, the diagnostic otherwise.
   pub fn message(&self) -> &str {
      match self {
         Self::Success { message } | Self::Error { message } => message,
      }
   }
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Generate a conventional commit message for staged changes", long_about = None)]
pub struct Args {
   /// Commit message file to write (passed by the prepare-commit-msg hook);
   /// prints to stdout when omitted
   pub commit_msg_file: Option<PathBuf>,

   /// Install the prepare-commit-msg hook into the enclosing repository
   #[arg(long)]
   pub install_hooks: bool,

   /// Directory to run git commands in (also where the project config is
   /// looked up)
   #[arg(long, default_value = ".")]
   pub dir: PathBuf,

   /// Extra config file applied after the user and project files
   #[arg(long)]
   pub config: Vec<PathBuf>,

   /// Model id or local model directory (overrides `model.name`)
   #[arg(long, short = 'm')]
   pub model: Option<String>,

   /// Print the resolved configuration and exit
   #[arg(long)]
   pub print_config: bool,

   /// Print the result as JSON instead of plain text
   #[arg(long, conflicts_with = "commit_msg_file")]
   pub json: bool,
}
