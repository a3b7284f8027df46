//! Proofreading suggestions and where they land in the text.
//!
//! The proofreading service only returns the text it objects to and a
//! replacement; positions are recovered here by searching the content.
//! Nothing in this module touches word counts or chapter order.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::format::check_range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionCategory {
    Grammar,
    Style,
    Spelling,
}

/// One suggestion as returned by the proofreading service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(alias = "text")]
    pub matched_text: String,

    #[serde(alias = "suggestion")]
    pub replacement: String,

    #[serde(alias = "type")]
    pub category: SuggestionCategory,
}

/// A suggestion pinned to a byte range of the content it was made for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedSuggestion {
    #[serde(flatten)]
    pub suggestion: Suggestion,
    pub start: usize,
    pub end: usize,
}

impl LocatedSuggestion {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Pin suggestions to the first occurrence of their text at or after
/// `from` (the start of the proofread selection).
///
/// Suggestions whose text cannot be found are dropped.
pub fn locate_suggestions(
    content: &str,
    from: usize,
    suggestions: Vec<Suggestion>,
) -> Vec<LocatedSuggestion> {
    if from > content.len() || !content.is_char_boundary(from) {
        return Vec::new();
    }

    let haystack = &content[from..];
    suggestions
        .into_iter()
        .filter_map(|suggestion| {
            if suggestion.matched_text.is_empty() {
                return None;
            }
            let offset = haystack.find(&suggestion.matched_text)?;
            let start = from + offset;
            let end = start + suggestion.matched_text.len();
            Some(LocatedSuggestion {
                suggestion,
                start,
                end,
            })
        })
        .collect()
}

/// Replace the suggestion's range with its replacement.
///
/// Fails with [`Error::StaleSuggestion`] when the range no longer holds the
/// text the suggestion was made for.
pub fn apply_suggestion(content: &str, located: &LocatedSuggestion) -> Result<String> {
    let range = located.range();
    check_range(content, &range).map_err(|_| Error::StaleSuggestion {
        start: range.start,
        end: range.end,
    })?;
    if content[range.clone()] != located.suggestion.matched_text {
        return Err(Error::StaleSuggestion {
            start: range.start,
            end: range.end,
        });
    }

    let mut out = String::with_capacity(content.len() + located.suggestion.replacement.len());
    out.push_str(&content[..range.start]);
    out.push_str(&located.suggestion.replacement);
    out.push_str(&content[range.end..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestion(text: &str, replacement: &str) -> Suggestion {
        Suggestion {
            matched_text: text.into(),
            replacement: replacement.into(),
            category: SuggestionCategory::Spelling,
        }
    }

    #[test]
    fn test_locate_after_selection_start() {
        let content = "teh cat saw teh dog";
        let located = locate_suggestions(content, 4, vec![suggestion("teh", "the")]);
        assert_eq!(located.len(), 1);
        assert_eq!(located[0].range(), 12..15);
    }

    #[test]
    fn test_unknown_text_is_dropped() {
        let located = locate_suggestions("fine text", 0, vec![suggestion("missing", "x")]);
        assert!(located.is_empty());
    }

    #[test]
    fn test_apply_and_stale() {
        let content = "I has a pen";
        let located = locate_suggestions(content, 0, vec![suggestion("has", "have")]);
        let fixed = apply_suggestion(content, &located[0]).unwrap();
        assert_eq!(fixed, "I have a pen");

        let err = apply_suggestion("I had a pen", &located[0]).unwrap_err();
        assert!(matches!(err, Error::StaleSuggestion { start: 2, end: 5 }));
    }

    #[test]
    fn test_service_field_names_are_accepted() {
        let raw = r#"[{"text": "teh", "suggestion": "the", "type": "spelling"}]"#;
        let parsed: Vec<Suggestion> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed[0], suggestion("teh", "the"));
    }
}
