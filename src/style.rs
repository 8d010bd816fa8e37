//! Terminal styling for diagnostics.
//!
//! Everything styled here goes to stderr; stdout only ever carries the commit
//! message. Respects `NO_COLOR`.

use std::sync::OnceLock;

use owo_colors::OwoColorize;

/// Whether color output is enabled (cached on first call).
static COLOR_ENABLED: OnceLock<bool> = OnceLock::new();

pub fn colors_enabled() -> bool {
   *COLOR_ENABLED.get_or_init(|| {
      // NO_COLOR takes precedence (https://no-color.org/)
      if std::env::var("NO_COLOR").is_ok() {
         return false;
      }
      supports_color::on(supports_color::Stream::Stderr).is_some_and(|level| level.has_basic)
   })
}

pub mod icons {
   pub const SUCCESS: &str = "✓";
   pub const ERROR: &str = "✗";
}

fn paint(s: &str, styled: impl FnOnce(&str) -> String) -> String {
   if colors_enabled() { styled(s) } else { s.to_string() }
}

/// Completed actions (green, bold).
pub fn success(s: &str) -> String {
   paint(s, |s| s.green().bold().to_string())
}

/// Failures (red, bold).
pub fn error(s: &str) -> String {
   paint(s, |s| s.red().bold().to_string())
}

/// Paths and other secondary details.
pub fn dim(s: &str) -> String {
   paint(s, |s| s.dimmed().to_string())
}

pub fn model(s: &str) -> String {
   paint(s, |s| s.magenta().to_string())
}

/// Print an error line to stderr.
pub fn report_error(msg: &str) {
   eprintln!("{} {}", error(icons::ERROR), error(msg));
}

/// Print a success line to stderr.
pub fn report_success(msg: &str) {
   eprintln!("{} {}", success(icons::SUCCESS), msg);
}
