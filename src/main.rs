use std::process::ExitCode;

use clap::Parser;
use git_commit_generator::{
   CommitMessageGenerator, GenerationOutcome, GitRepo, Seq2SeqGenerator, StagedChanges,
   config::{ConfigSources, Configuration},
   error::Result,
   hooks::install_hooks,
   style,
   types::Args,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr so stdout stays clean for the message (`RUST_LOG`
/// overrides the default `warn` level).
fn init_logging() {
   let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
   tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .with_target(false)
      .init();
}

/// Defaults, user file, project file under `--dir`, then `--config` files
fn load_config(args: &Args) -> Configuration {
   let mut sources = ConfigSources::discover(&args.dir);
   sources.explicit.clone_from(&args.config);
   let mut config = Configuration::resolve_from(&sources);
   apply_cli_overrides(&mut config, args);
   config
}

fn apply_cli_overrides(config: &mut Configuration, args: &Args) {
   if let Some(ref model) = args.model {
      config.set("model.name", model.as_str());
   }
}

fn run_install_hooks(args: &Args) -> ExitCode {
   match install_hooks(&args.dir) {
      Ok(installed) => {
         if let Some(backup) = installed.backup {
            eprintln!("Existing hook backed up to {}", style::dim(&backup.display().to_string()));
         }
         style::report_success(&format!(
            "Installed prepare-commit-msg hook in {}",
            installed.repo_root.display()
         ));
         ExitCode::SUCCESS
      },
      Err(e) => {
         style::report_error(&e.to_string());
         ExitCode::FAILURE
      },
   }
}

/// Write the message where the caller asked for it.
fn emit(outcome: &GenerationOutcome, args: &Args) -> Result<()> {
   if args.json {
      println!("{}", serde_json::to_string(outcome)?);
      return Ok(());
   }
   if let GenerationOutcome::Success { message } = outcome {
      match &args.commit_msg_file {
         Some(path) => std::fs::write(path, message)?,
         None => println!("{message}"),
      }
   }
   Ok(())
}

fn main() -> ExitCode {
   dotenvy::dotenv().ok();
   init_logging();
   let args = Args::parse();

   if args.install_hooks {
      return run_install_hooks(&args);
   }

   let config = load_config(&args);
   if args.print_config {
      return match config.to_toml_string() {
         Ok(rendered) => {
            print!("{rendered}");
            ExitCode::SUCCESS
         },
         Err(e) => {
            style::report_error(&e.to_string());
            ExitCode::FAILURE
         },
      };
   }

   let model_name: String = config.get("model.name", String::new());
   info!("Using model {}", style::model(&model_name));

   let generator =
      CommitMessageGenerator::new(GitRepo::new(&args.dir), Seq2SeqGenerator::new(), config);
   if let Ok(files) = generator.repo().staged_files() {
      info!("{} staged file(s)", files.len());
   }

   let outcome = generator.run();
   if let Err(e) = emit(&outcome, &args) {
      style::report_error(&format!("Failed to write commit message: {e}"));
      return ExitCode::FAILURE;
   }

   match outcome {
      GenerationOutcome::Success { .. } => ExitCode::SUCCESS,
      GenerationOutcome::Error { message } => {
         if !args.json {
            style::report_error(&message);
         }
         ExitCode::FAILURE
      },
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_apply_cli_overrides_model() {
      let mut config = Configuration::defaults();
      let args = Args { model: Some("./models/t5".to_string()), ..Default::default() };
      apply_cli_overrides(&mut config, &args);
      assert_eq!(config.get("model.name", String::new()), "./models/t5");
   }

   #[test]
   fn test_apply_cli_overrides_none_keeps_config() {
      let mut config = Configuration::defaults();
      apply_cli_overrides(&mut config, &Args::default());
      assert_eq!(config, Configuration::defaults());
   }

   #[test]
   fn test_emit_writes_message_file() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("COMMIT_EDITMSG");
      let args = Args { commit_msg_file: Some(path.clone()), ..Default::default() };

      emit(&GenerationOutcome::success("feat: Add new line to file.txt"), &args).unwrap();
      assert_eq!(std::fs::read_to_string(&path).unwrap(), "feat: Add new line to file.txt");
   }

   #[test]
   fn test_emit_error_leaves_message_file_untouched() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("COMMIT_EDITMSG");
      std::fs::write(&path, "# template").unwrap();
      let args = Args { commit_msg_file: Some(path.clone()), ..Default::default() };

      emit(&GenerationOutcome::error("No staged changes found"), &args).unwrap();
      assert_eq!(std::fs::read_to_string(&path).unwrap(), "# template");
   }
}
