//! Word counting.
//!
//! The same rule runs when a chapter is created and every time its content
//! is saved, so counts from both paths are comparable.

/// Count whitespace-separated tokens.
///
/// Leading and trailing whitespace is ignored and runs of whitespace count
/// as a single separator, so empty or blank text is zero words.
pub fn count_words(text: &str) -> u32 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0;
    }
    trimmed.split_whitespace().count() as u32
}

/// Word count of optional chapter content.
pub fn count_optional(content: Option<&str>) -> u32 {
    content.map(count_words).unwrap_or(0)
}
