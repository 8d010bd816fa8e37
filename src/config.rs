//! Layered configuration.
//!
//! The resolved [`Configuration`] is built from, in order:
//! 1. the defaults embedded from `config/default.toml`
//! 2. the user file (`~/.git-commit-generator.toml`, or
//!    `GIT_COMMIT_GENERATOR_CONFIG`)
//! 3. the project file (`.git-commit-generator.toml` in the working directory)
//! 4. any explicitly requested files (`--config`)
//!
//! Later layers win. Tables merge recursively; every other value, arrays
//! included, is replaced wholesale.

use std::path::{Path, PathBuf};

use rust_embed::RustEmbed;
use serde::de::DeserializeOwned;
use toml::{Table, Value};
use tracing::{debug, warn};

use crate::error::{CommitGenError, Result};

/// File name looked up in the home and project directories.
pub const CONFIG_FILE_NAME: &str = ".git-commit-generator.toml";

/// Environment variable that replaces the user config path.
pub const CONFIG_ENV_VAR: &str = "GIT_COMMIT_GENERATOR_CONFIG";

const DEFAULTS_FILE: &str = "default.toml";

/// Built-in defaults (compiled into the binary)
#[derive(RustEmbed)]
#[folder = "config/"]
struct Defaults;

/// Where each override layer is read from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
   pub user:     Option<PathBuf>,
   pub project:  Option<PathBuf>,
   /// Explicitly requested files; a missing one is reported as a warning.
   pub explicit: Vec<PathBuf>,
}

impl ConfigSources {
   /// Standard locations: the user file and the project file under `project_dir`.
   pub fn discover(project_dir: &Path) -> Self {
      let user = std::env::var(CONFIG_ENV_VAR)
         .map(PathBuf::from)
         .ok()
         .or_else(user_config_path);
      Self { user, project: Some(project_dir.join(CONFIG_FILE_NAME)), explicit: Vec::new() }
   }
}

/// Get the user config path (platform-safe)
/// Tries HOME (Unix/Linux/macOS) then USERPROFILE (Windows)
pub fn user_config_path() -> Option<PathBuf> {
   std::env::var("HOME")
      .or_else(|_| std::env::var("USERPROFILE"))
      .ok()
      .map(|home| PathBuf::from(home).join(CONFIG_FILE_NAME))
}

/// Nested key/value configuration addressed by dotted keys (`model.num_beams`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
   root: Table,
}

impl Configuration {
   /// Resolve from the standard locations relative to the current directory.
   pub fn resolve() -> Self {
      let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
      Self::resolve_from(&ConfigSources::discover(&cwd))
   }

   /// Resolve the built-in defaults plus every layer in `sources`.
   ///
   /// Never fails: an unreadable layer is logged and skipped.
   pub fn resolve_from(sources: &ConfigSources) -> Self {
      let mut config = Self::defaults();

      let implicit = [&sources.user, &sources.project];
      for path in implicit.into_iter().flatten() {
         if !path.exists() {
            debug!("No config at {}, skipping", path.display());
            continue;
         }
         config.merge(load_layer(path));
      }

      for path in &sources.explicit {
         if !path.exists() {
            warn!("Config file {} does not exist, skipping", path.display());
            continue;
         }
         config.merge(load_layer(path));
      }

      config
   }

   /// The embedded base layer alone.
   pub fn defaults() -> Self {
      let root = match Defaults::get(DEFAULTS_FILE) {
         Some(file) => match std::str::from_utf8(file.data.as_ref())
            .map_err(|e| e.to_string())
            .and_then(|s| toml::from_str::<Table>(s).map_err(|e| e.to_string()))
         {
            Ok(table) => table,
            Err(reason) => {
               warn!("Built-in config is invalid: {reason}");
               Table::new()
            },
         },
         None => {
            warn!("Built-in config {DEFAULTS_FILE} is missing");
            Table::new()
         },
      };
      Self { root }
   }

   pub const fn from_table(root: Table) -> Self {
      Self { root }
   }

   /// Apply an override layer on top of this configuration.
   pub fn merge(&mut self, overlay: Table) {
      merge_tables(&mut self.root, overlay);
   }

   /// Raw value at a dotted key.
   ///
   /// Returns `None` as soon as an intermediate value is not a table.
   pub fn get_value(&self, key: &str) -> Option<&Value> {
      let mut segments = key.split('.');
      let mut current = self.root.get(segments.next()?)?;
      for segment in segments {
         current = current.as_table()?.get(segment)?;
      }
      Some(current)
   }

   /// Typed value at a dotted key, or `default` when it is missing, shadowed
   /// by a non-table intermediate, or of the wrong type.
   pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
      let Some(value) = self.get_value(key) else {
         return default;
      };
      match value.clone().try_into::<T>() {
         Ok(v) => v,
         Err(e) => {
            warn!("Ignoring config key `{key}`: {e}");
            default
         },
      }
   }

   /// Set a dotted key, creating (or replacing non-table) intermediates.
   pub fn set(&mut self, key: &str, value: impl Into<Value>) {
      let mut segments: Vec<&str> = key.split('.').collect();
      let Some(leaf) = segments.pop() else {
         return;
      };

      let mut table = &mut self.root;
      for segment in segments {
         let entry = table
            .entry(segment.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
         if !entry.is_table() {
            *entry = Value::Table(Table::new());
         }
         let Some(next) = entry.as_table_mut() else {
            return;
         };
         table = next;
      }
      table.insert(leaf.to_string(), value.into());
   }

   /// Render the resolved configuration as TOML.
   pub fn to_toml_string(&self) -> Result<String> {
      toml::to_string(&self.root).map_err(|e| CommitGenError::ConfigError {
         path:   "<resolved>".to_string(),
         reason: e.to_string(),
      })
   }
}

/// Load one override layer, degrading to an empty table on any failure.
fn load_layer(path: &Path) -> Table {
   match read_table(path) {
      Ok(table) => {
         debug!("Loaded config layer {}", path.display());
         table
      },
      Err(e) => {
         warn!("{e}");
         Table::new()
      },
   }
}

fn read_table(path: &Path) -> Result<Table> {
   let contents = std::fs::read_to_string(path).map_err(|e| CommitGenError::ConfigError {
      path:   path.display().to_string(),
      reason: e.to_string(),
   })?;
   toml::from_str::<Table>(&contents).map_err(|e| CommitGenError::ConfigError {
      path:   path.display().to_string(),
      reason: e.to_string(),
   })
}

fn merge_tables(base: &mut Table, overlay: Table) {
   for (key, value) in overlay {
      match (base.get_mut(&key), value) {
         (Some(Value::Table(base_table)), Value::Table(overlay_table)) => {
            merge_tables(base_table, overlay_table);
         },
         (_, value) => {
            base.insert(key, value);
         },
      }
   }
}
