//! Commit type classification and template rendering.

use crate::config::Configuration;

/// Type used when the generated text carries no recognised prefix.
pub const FALLBACK_TYPE: &str = "chore";

/// Template used when `commit_format.template` is unset.
pub const DEFAULT_TEMPLATE: &str = "{type}: {message}";

/// Formatting settings read from the `commit_format` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSettings {
   pub types:        Vec<String>,
   pub template:     String,
   pub default_type: String,
}

impl Default for FormatSettings {
   fn default() -> Self {
      Self {
         types:        Vec::new(),
         template:     DEFAULT_TEMPLATE.to_string(),
         default_type: FALLBACK_TYPE.to_string(),
      }
   }
}

impl FormatSettings {
   pub fn from_config(config: &Configuration) -> Self {
      let defaults = Self::default();
      Self {
         types:        config.get("commit_format.types", defaults.types),
         template:     config.get("commit_format.template", defaults.template),
         default_type: config.get("commit_format.default_type", defaults.default_type),
      }
   }
}

/// Classify and render a raw model output with the configured settings.
pub fn format_message(raw_message: &str, config: &Configuration) -> String {
   format_with(raw_message, &FormatSettings::from_config(config))
}

pub fn format_with(raw_message: &str, settings: &FormatSettings) -> String {
   let (commit_type, body) = classify(raw_message, &settings.types)
      .unwrap_or((settings.default_type.as_str(), raw_message));
   render_template(&settings.template, commit_type, body)
}

/// Find the first listed type that prefixes `message` (case-insensitively,
/// immediately followed by `:`).
///
/// Returns the type as listed and the remaining body, with the colon and at
/// most one following whitespace character removed.
pub fn classify<'a, 'm>(message: &'m str, types: &'a [String]) -> Option<(&'a str, &'m str)> {
   types.iter().find_map(|commit_type| {
      let rest = strip_prefix_ignore_case(message, commit_type)?;
      let rest = rest.strip_prefix(':')?;
      let body = match rest.chars().next() {
         Some(c) if c.is_whitespace() => &rest[c.len_utf8()..],
         _ => rest,
      };
      Some((commit_type.as_str(), body))
   })
}

fn strip_prefix_ignore_case<'m>(text: &'m str, prefix: &str) -> Option<&'m str> {
   let mut text_chars = text.char_indices();
   for expected in prefix.chars() {
      let (_, actual) = text_chars.next()?;
      if !actual.to_lowercase().eq(expected.to_lowercase()) {
         return None;
      }
   }
   let consumed = text_chars.next().map_or(text.len(), |(idx, _)| idx);
   Some(&text[consumed..])
}

/// Substitute `{type}` and `{message}` in a single pass.
///
/// `{{` and `}}` produce literal braces; any other `{...}` is kept as-is.
pub fn render_template(template: &str, commit_type: &str, message: &str) -> String {
   let mut out = String::with_capacity(template.len() + commit_type.len() + message.len());
   let mut rest = template;

   while let Some(pos) = rest.find(['{', '}']) {
      out.push_str(&rest[..pos]);
      let tail = &rest[pos..];

      if let Some(after) = tail.strip_prefix("{{") {
         out.push('{');
         rest = after;
      } else if let Some(after) = tail.strip_prefix("}}") {
         out.push('}');
         rest = after;
      } else if let Some(after) = tail.strip_prefix("{type}") {
         out.push_str(commit_type);
         rest = after;
      } else if let Some(after) = tail.strip_prefix("{message}") {
         out.push_str(message);
         rest = after;
      } else {
         // lone brace
         out.push_str(&tail[..1]);
         rest = &tail[1..];
      }
   }
   out.push_str(rest);
   out
}

#[cfg(test)]
mod tests {
   use super::*;

   fn settings(types: &[&str]) -> FormatSettings {
      FormatSettings {
         types: types.iter().map(|t| (*t).to_string()).collect(),
         ..FormatSettings::default()
      }
   }

   #[test]
   fn test_format_matching_prefix() {
      let s = settings(&["feat", "fix", "chore"]);
      assert_eq!(
         format_with("feat: Add new line to file.txt", &s),
         "feat: Add new line to file.txt"
      );
   }

   #[test]
   fn test_format_is_case_insensitive_and_case_preserving() {
      let s = settings(&["Feat", "fix"]);
      assert_eq!(format_with("FEAT: shout", &s), "Feat: shout");
      assert_eq!(format_with("Fix: lowercase listed", &s), "fix: lowercase listed");
   }

   #[test]
   fn test_format_first_listed_type_wins() {
      let s = settings(&["Docs", "docs"]);
      assert_eq!(classify("docs: readme", &s.types), Some(("Docs", "readme")));

      let s = settings(&["docs", "Docs"]);
      assert_eq!(classify("DOCS: readme", &s.types), Some(("docs", "readme")));
   }

   #[test]
   fn test_format_requires_colon_right_after_type() {
      let s = settings(&["fix"]);
      assert_eq!(classify("fixed the bug", &s.types), None);
      assert_eq!(classify("fix : spaced", &s.types), None);
      assert_eq!(classify("fix(parser): scoped", &s.types), None);
   }

   #[test]
   fn test_format_fallback_keeps_full_message() {
      let s = settings(&["feat", "fix"]);
      assert_eq!(format_with("Update README", &s), "chore: Update README");
      assert_eq!(format_with("", &s), "chore: ");
   }

   #[test]
   fn test_format_strips_only_one_whitespace() {
      let s = settings(&["fix"]);
      assert_eq!(classify("fix:  two spaces", &s.types), Some(("fix", " two spaces")));
      assert_eq!(classify("fix:tight", &s.types), Some(("fix", "tight")));
      assert_eq!(classify("fix:", &s.types), Some(("fix", "")));
   }

   #[test]
   fn test_format_custom_template_and_default_type() {
      let s = FormatSettings {
         types:        vec!["feat".to_string()],
         template:     "[{type}] {message} {{ci skip}}".to_string(),
         default_type: "misc".to_string(),
      };
      assert_eq!(format_with("feat: thing", &s), "[feat] thing {ci skip}");
      assert_eq!(format_with("other", &s), "[misc] other {ci skip}");
   }

   #[test]
   fn test_render_template_does_not_rescan_substitutions() {
      assert_eq!(render_template("{type}: {message}", "{message}", "{type}"), "{message}: {type}");
      assert_eq!(render_template("{scope} {", "t", "m"), "{scope} {");
      assert_eq!(render_template("}{message}", "t", "m"), "}m");
   }

   #[test]
   fn test_classify_handles_non_ascii() {
      let types = vec!["ǅx".to_string()];
      assert_eq!(classify("ǆx: ok", &types), Some(("ǅx", "ok")));
      assert_eq!(classify("é", &types), None);
      assert_eq!(classify("日本語: body", &["feat".to_string()]), None);
   }

   #[test]
   fn test_format_message_reads_configuration() {
      let mut config = Configuration::defaults();
      assert_eq!(format_message("perf: faster", &config), "perf: faster");

      config.set("commit_format.template", "{message} ({type})");
      assert_eq!(format_message("nothing matched", &config), "nothing matched (chore)");
   }
}
