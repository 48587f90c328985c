//! CSS-selector extraction over fetched markup.

use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};

use super::ScrapeError;

/// Parse every selector, failing on the first malformed one.
pub fn compile_selectors(
    selectors: &HashMap<String, String>,
) -> Result<Vec<(String, Selector)>, ScrapeError> {
    selectors
        .iter()
        .map(|(key, css)| {
            Selector::parse(css)
                .map(|selector| (key.clone(), selector))
                .map_err(|e| ScrapeError::InvalidSelector {
                    key: key.clone(),
                    message: e.to_string(),
                })
        })
        .collect()
}

/// Trimmed text of an element with whitespace-only fragments dropped.
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn page_title(document: &Html) -> Option<String> {
    let title = Selector::parse("title").ok()?;
    document
        .select(&title)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

/// Text of every match per key. A key with no matches maps to an empty list.
pub fn extract_fields(
    document: &Html,
    selectors: &[(String, Selector)],
) -> HashMap<String, Vec<String>> {
    selectors
        .iter()
        .map(|(key, selector)| {
            let values = document
                .select(selector)
                .map(element_text)
                .filter(|text| !text.is_empty())
                .collect();
            (key.clone(), values)
        })
        .collect()
}
