//! Document title extraction.

use std::sync::LazyLock;

use pagetitles_shared::{PageTitlesError, Result};
use scraper::{Html, Selector};

static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("static selector parses"));

/// Parse `html` and return the text of its first `title` element.
///
/// The text is returned exactly as the parser produced it: entities decoded,
/// whitespace untouched. A document without any `title` element is a
/// [`PageTitlesError::Parse`].
pub fn extract_title(html: &str) -> Result<String> {
    let doc = Html::parse_document(html);
    first_title(&doc).ok_or_else(|| PageTitlesError::parse("no title element found"))
}

/// The first `title` element in depth-first document order, if any.
pub fn first_title(doc: &Html) -> Option<String> {
    doc.select(&TITLE)
        .next()
        .map(|el| el.text().collect::<String>())
}
