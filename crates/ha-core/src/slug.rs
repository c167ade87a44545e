//! Slug rules
//!
//! Slugs are the restricted identifiers used for package names and the
//! segments of an entity id: lowercase ASCII letters, digits and single
//! underscores, never starting or ending with an underscore.

/// Separator used when slugifying free text
const SEPARATOR: char = '_';

/// Convert arbitrary text into a slug
///
/// Every character outside `[a-z0-9]` (after lowercasing) becomes a
/// separator, runs of separators collapse into one, and separators at
/// either end are dropped.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_separator = false;

    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_separator && !slug.is_empty() {
                slug.push(SEPARATOR);
            }
            pending_separator = false;
            slug.push(c);
        } else {
            pending_separator = true;
        }
    }

    slug
}

/// Check whether a string is already a slug (slugifying it is a no-op)
pub fn is_valid_slug(s: &str) -> bool {
    !s.is_empty() && slugify(s) == s
}

/// Check the character rules of an entity id segment
///
/// Lowercase alphanumerics and underscores, not starting or ending with an
/// underscore. Unlike [`is_valid_slug`], repeated underscores are allowed.
pub(crate) fn is_valid_segment(s: &str) -> bool {
    if s.is_empty() || s.starts_with(SEPARATOR) || s.ends_with(SEPARATOR) {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == SEPARATOR)
}
