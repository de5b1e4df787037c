//! Keyword search over the parsed budget document.

use crate::error::CorpusError;
use crate::models::{Corpus, PageElement, PageHit};
use regex::{Regex, RegexBuilder};
use std::path::Path;
use tracing::debug;

/// Search the corpus file at `structured_json_path` for `keyword`.
///
/// The file is re-read on every call; the worker holds no state between calls.
pub fn search_budget_text(
    keyword: &str,
    structured_json_path: &Path,
) -> Result<Vec<PageHit>, CorpusError> {
    let corpus = Corpus::load(structured_json_path)?;
    Ok(search_pages(&corpus.elements, keyword))
}

/// Return every element whose text matches `keyword`, in document order.
///
/// Matching is case-insensitive. The keyword is tried as a regular
/// expression first and as a literal when it is not a valid pattern.
/// A blank keyword matches nothing.
pub fn search_pages(elements: &[PageElement], keyword: &str) -> Vec<PageHit> {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return Vec::new();
    }

    let Some(matcher) = keyword_matcher(keyword) else {
        return Vec::new();
    };

    let hits: Vec<PageHit> = elements
        .iter()
        .filter(|e| matcher.is_match(&e.content_markdown))
        .map(|e| PageHit {
            page: e.page,
            text: e.content_markdown.trim().to_string(),
        })
        .collect();

    debug!("Keyword {:?} matched {} element(s)", keyword, hits.len());
    hits
}

fn keyword_matcher(keyword: &str) -> Option<Regex> {
    RegexBuilder::new(keyword)
        .case_insensitive(true)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(keyword))
                .case_insensitive(true)
                .build()
        })
        .ok()
}
