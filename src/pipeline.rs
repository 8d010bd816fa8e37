//! Staged diff → excerpt → model → formatted message.

use tracing::{debug, info};

use crate::{
   config::Configuration,
   diff::select_excerpt,
   error::Result,
   formatter::format_message,
   git::StagedChanges,
   model::TextGenerator,
   types::GenerationOutcome,
};

pub const NO_STAGED_CHANGES: &str = "No staged changes found";
pub const GENERATION_FAILED: &str = "Error generating commit message";

/// Runs one generation over the staged changes of a repository.
#[derive(Debug)]
pub struct CommitMessageGenerator<R, G> {
   repo:      R,
   generator: G,
   config:    Configuration,
}

impl<R: StagedChanges, G: TextGenerator> CommitMessageGenerator<R, G> {
   pub const fn new(repo: R, generator: G, config: Configuration) -> Self {
      Self { repo, generator, config }
   }

   pub const fn config(&self) -> &Configuration {
      &self.config
   }

   pub const fn repo(&self) -> &R {
      &self.repo
   }

   /// Generate a message for the staged changes.
   ///
   /// Never fails: errors come back as [`GenerationOutcome::Error`].
   pub fn run(&self) -> GenerationOutcome {
      match self.try_run() {
         Ok(outcome) => outcome,
         Err(e) => GenerationOutcome::error(format!("{GENERATION_FAILED}: {e}")),
      }
   }

   fn try_run(&self) -> Result<GenerationOutcome> {
      let Some(diff) = self.repo.staged_diff()?.filter(|d| !d.is_empty()) else {
         return Ok(GenerationOutcome::error(NO_STAGED_CHANGES));
      };

      let excerpt = select_excerpt(&diff);
      if excerpt.is_empty() {
         debug!("Staged diff has no added or removed lines");
         return Ok(GenerationOutcome::error(NO_STAGED_CHANGES));
      }
      debug!("Excerpt: {} chars from {} byte diff", excerpt.chars().count(), diff.len());

      let raw = self.generator.generate(&excerpt, &self.config)?;
      info!("Model output: {raw:?}");

      Ok(GenerationOutcome::success(format_message(&raw, &self.config)))
   }
}
