//! `prepare-commit-msg` hook installation.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{CommitGenError, Result};

pub const HOOK_NAME: &str = "prepare-commit-msg";

/// First comment line of every hook this tool writes.
pub const HOOK_MARKER: &str = "# Installed by git-commit-generator";

/// Outcome of [`install_hooks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledHook {
   pub repo_root: PathBuf,
   pub hook_path: PathBuf,
   /// Where a pre-existing hook was moved, if there was one.
   pub backup:    Option<PathBuf>,
}

/// Walk up from `start` to the directory that contains `.git/`.
pub fn find_git_root(start: &Path) -> Result<PathBuf> {
   let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
   start
      .ancestors()
      .find(|dir| dir.join(".git").is_dir())
      .map(Path::to_path_buf)
      .ok_or_else(|| {
         CommitGenError::HookError(format!(
            "Not a git repository (or any parent directory): {}",
            start.display()
         ))
      })
}

/// Hook script that runs `program` on the message file git passes as `$1`.
///
/// Only a plain `git commit` (empty `$2`) is handled. Messages from `-m`,
/// templates, merges, squashes and amends are left alone.
pub fn hook_script(program: &str) -> String {
   let quoted = program.replace('\'', r"'\''");
   format!(
      "#!/bin/sh\n{HOOK_MARKER}\nif [ -n \"$2\" ]; then\n   exit 0\nfi\n'{quoted}' \"$1\" || exit 1\n"
   )
}

fn is_own_hook(path: &Path) -> bool {
   std::fs::read_to_string(path).is_ok_and(|script| script.contains(HOOK_MARKER))
}

/// Install the hook into the repository enclosing `start`.
///
/// A foreign hook is renamed to `<hook>.backup` first; a hook written by an
/// earlier install is replaced in place. Fails rather than overwrite an
/// existing backup.
pub fn install_hooks(start: &Path) -> Result<InstalledHook> {
   let program = std::env::current_exe()
      .map(|p| p.display().to_string())
      .unwrap_or_else(|_| env!("CARGO_PKG_NAME").to_string());
   install_hook_with(start, &program)
}

pub fn install_hook_with(start: &Path, program: &str) -> Result<InstalledHook> {
   let repo_root = find_git_root(start)?;
   let hooks_dir = repo_root.join(".git").join("hooks");
   std::fs::create_dir_all(&hooks_dir)?;

   let hook_path = hooks_dir.join(HOOK_NAME);
   let backup = if !hook_path.exists() {
      None
   } else if is_own_hook(&hook_path) {
      debug!("Replacing previously installed {HOOK_NAME} hook");
      None
   } else {
      let backup_path = hook_path.with_extension("backup");
      if backup_path.exists() {
         return Err(CommitGenError::HookError(format!(
            "{} already exists; move it or the current {HOOK_NAME} hook away first",
            backup_path.display()
         )));
      }
      std::fs::rename(&hook_path, &backup_path)?;
      info!("Backed up existing {HOOK_NAME} hook to {}", backup_path.display());
      Some(backup_path)
   };

   std::fs::write(&hook_path, hook_script(program))?;
   make_executable(&hook_path)?;

   Ok(InstalledHook { repo_root, hook_path, backup })
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
   use std::os::unix::fs::PermissionsExt;

   let mut perms = std::fs::metadata(path)?.permissions();
   perms.set_mode(perms.mode() | 0o111);
   std::fs::set_permissions(path, perms)?;
   Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
   Ok(())
}
