//! Diff excerpt selection for model input

/// Maximum excerpt length, in characters.
pub const MAX_EXCERPT_CHARS: usize = 512;

/// Reduce a unified diff to the added/removed lines, capped at
/// [`MAX_EXCERPT_CHARS`] characters.
///
/// `+++`/`---` file headers start with the same markers and are kept.
/// Context-only input produces an empty excerpt.
pub fn select_excerpt(raw_diff: &str) -> String {
   select_excerpt_with_limit(raw_diff, MAX_EXCERPT_CHARS)
}

/// [`select_excerpt`] with an explicit character limit.
pub fn select_excerpt_with_limit(raw_diff: &str, max_chars: usize) -> String {
   let changed = raw_diff
      .split('\n')
      .filter(|line| line.starts_with('+') || line.starts_with('-'))
      .collect::<Vec<_>>()
      .join("\n");
   truncate_chars(changed, max_chars)
}

/// Keep the first `max_chars` chars (Unicode scalar values, not bytes).
fn truncate_chars(mut text: String, max_chars: usize) -> String {
   if let Some((byte_idx, _)) = text.char_indices().nth(max_chars) {
      text.truncate(byte_idx);
   }
   text
}
