//! Inline emphasis markers.
//!
//! Chapter content is plain text; emphasis is written inline the way
//! markdown does it and the editor toolbar only ever wraps a selection.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emphasis {
    Bold,
    Italic,
    Underline,
}

impl Emphasis {
    pub fn marker(&self) -> &'static str {
        match self {
            Emphasis::Bold => "**",
            Emphasis::Italic => "*",
            Emphasis::Underline => "_",
        }
    }
}

/// Result of wrapping a selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formatted {
    pub content: String,
    /// Byte offset just past the closing marker
    pub cursor: usize,
}

/// Wrap `selection` (byte offsets) of `content` in the marker for `emphasis`.
///
/// An empty selection leaves the content unchanged with the cursor where it
/// was.
pub fn apply_emphasis(content: &str, selection: Range<usize>, emphasis: Emphasis) -> Result<Formatted> {
    check_range(content, &selection)?;

    if selection.is_empty() {
        return Ok(Formatted {
            content: content.to_string(),
            cursor: selection.start,
        });
    }

    let marker = emphasis.marker();
    let mut out = String::with_capacity(content.len() + marker.len() * 2);
    out.push_str(&content[..selection.start]);
    out.push_str(marker);
    out.push_str(&content[selection.clone()]);
    out.push_str(marker);
    let cursor = out.len();
    out.push_str(&content[selection.end..]);

    Ok(Formatted {
        content: out,
        cursor,
    })
}

/// Reject ranges that are inverted, out of bounds, or split a UTF-8 char.
pub(crate) fn check_range(content: &str, range: &Range<usize>) -> Result<()> {
    if range.start > range.end
        || range.end > content.len()
        || !content.is_char_boundary(range.start)
        || !content.is_char_boundary(range.end)
    {
        return Err(Error::InvalidInput(format!(
            "selection {}..{} is not valid for content of {} bytes",
            range.start,
            range.end,
            content.len()
        )));
    }
    Ok(())
}
