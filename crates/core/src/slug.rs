//! Path-segment sanitization.
//!
//! Every externally-supplied string that becomes a filesystem or store path
//! segment (job ids, output subdirectories, character names) passes through
//! [`safe_slug`] before it is interpolated into any path or command.

/// Maximum length of a sanitized path segment.
pub const MAX_SLUG_LEN: usize = 96;

/// Sanitize a string for use as a filename or path component.
///
/// Collapses to `[A-Za-z0-9_-]`: any directory components are stripped so
/// traversal attempts reduce to their final segment, spaces become
/// underscores, everything else outside the allowed set is removed, and the
/// result is truncated to [`MAX_SLUG_LEN`]. May return an empty string --
/// callers reject empty slugs.
pub fn safe_slug(text: &str) -> String {
    let base = text.rsplit(['/', '\\']).next().unwrap_or("");
    let mut slug: String = base
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    slug.truncate(MAX_SLUG_LEN);
    slug
}

/// Whether `text` is already a valid path segment: non-empty, at most
/// [`MAX_SLUG_LEN`] bytes, and matching `[A-Za-z0-9_-]+`.
pub fn is_valid_slug(text: &str) -> bool {
    !text.is_empty()
        && text.len() <= MAX_SLUG_LEN
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
