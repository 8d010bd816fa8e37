use std::{path::PathBuf, process::Command};

use crate::error::{CommitGenError, Result};

/// Read access to the changes staged for the next commit.
#[cfg_attr(test, mockall::automock)]
pub trait StagedChanges {
   /// Staged changes as unified-diff text; `None` when nothing is staged.
   fn staged_diff(&self) -> Result<Option<String>>;

   /// Paths of the staged files.
   fn staged_files(&self) -> Result<Vec<String>>;
}

/// `git` CLI wrapper rooted at a working directory.
#[derive(Debug, Clone)]
pub struct GitRepo {
   dir: PathBuf,
}

impl GitRepo {
   pub fn new(dir: impl Into<PathBuf>) -> Self {
      Self { dir: dir.into() }
   }

   fn run(&self, args: &[&str]) -> Result<String> {
      let output = Command::new("git")
         .args(args)
         .current_dir(&self.dir)
         .output()
         .map_err(|e| CommitGenError::GitError(format!("Failed to run git {}: {e}", args.join(" "))))?;

      if !output.status.success() {
         let stderr = String::from_utf8_lossy(&output.stderr);
         return Err(CommitGenError::GitError(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
         )));
      }

      Ok(String::from_utf8_lossy(&output.stdout).to_string())
   }
}

impl StagedChanges for GitRepo {
   fn staged_diff(&self) -> Result<Option<String>> {
      let diff = self.run(&["diff", "--cached"])?;
      if diff.trim().is_empty() {
         return Ok(None);
      }
      Ok(Some(diff))
   }

   fn staged_files(&self) -> Result<Vec<String>> {
      let names = self.run(&["diff", "--cached", "--name-only"])?;
      Ok(names
         .lines()
         .filter(|line| !line.is_empty())
         .map(str::to_string)
         .collect())
   }
}
