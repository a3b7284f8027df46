//! Manuscript export: a whole book as one markdown document.

use serde::Serialize;

use crate::error::Result;
use crate::models::{Book, BookStatus, Chapter};

#[derive(Serialize)]
struct ManuscriptFrontmatter<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subtitle: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    genre: Option<&'a str>,
    status: BookStatus,
    word_count: u32,
    target_word_count: u32,
    chapters: usize,
}

/// Render `book` and its chapters (in order) as markdown with a YAML front
/// matter block.
pub fn render_manuscript(book: &Book, chapters: &[Chapter]) -> Result<String> {
    let mut ordered: Vec<&Chapter> = chapters.iter().collect();
    ordered.sort_by_key(|c| c.order);

    let frontmatter = ManuscriptFrontmatter {
        title: &book.title,
        subtitle: book.subtitle.as_deref(),
        genre: book.genre.as_deref(),
        status: book.status,
        word_count: ordered.iter().map(|c| c.word_count).sum(),
        target_word_count: book.target_word_count,
        chapters: ordered.len(),
    };
    let yaml = serde_yaml::to_string(&frontmatter)?;

    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&yaml);
    out.push_str("---\n\n");
    out.push_str(&format!("# {}\n", book.title));
    if let Some(subtitle) = &book.subtitle {
        out.push_str(&format!("\n_{}_\n", subtitle));
    }

    for chapter in ordered {
        out.push_str(&format!("\n## Chapter {}: {}\n", chapter.order, chapter.title));
        let body = chapter.content_str().trim();
        if !body.is_empty() {
            out.push('\n');
            out.push_str(body);
            out.push('\n');
        }
    }

    Ok(out)
}
