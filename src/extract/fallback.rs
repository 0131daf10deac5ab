use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::category::CategoryRow;

use super::html::{self, Element};

/// Visa category codes as they appear outside tables.
static VISA_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"EB-\d|F-?\d+[A-Z]?|DV|IR-|K-|V-|T-|U-|VAWA").unwrap());

/// Cutoff values: "DD MMM YY" or the word Current.
static CUTOFF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,2}\s+[A-Z]{3}\s+\d{2}|Current").unwrap());

/// Looser line filter for the free-text pass.
static TEXT_LINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"EB-\d|F-\d|DV").unwrap());

/// Block and inline containers worth scanning when a page carries no tables.
const CONTAINER_TAGS: &[&str] = &["div", "p", "li", "span", "td", "dd"];

const MIN_CONTAINER_TEXT: usize = 10;
const MIN_LINE_TEXT: usize = 5;

/// Container strategy: scan block/inline containers for category codes and
/// nearby cutoff dates. Used only on documents with no tables at all.
pub fn extract_from_containers(raw_markup: &str) -> Vec<CategoryRow> {
    let elements = html::element_spans(raw_markup, CONTAINER_TAGS);
    let mut seen = HashSet::new();
    let mut categories = Vec::new();

    for (idx, element) in elements.iter().enumerate() {
        if element.text.len() <= MIN_CONTAINER_TEXT || !VISA_CODE_RE.is_match(&element.text) {
            continue;
        }
        let Some(row) = row_from_text(&element.text, || parent_text(&elements, idx)) else {
            continue;
        };
        // Nested containers repeat the same text; keep the first occurrence
        if seen.insert(row.canonical()) {
            categories.push(row);
        }
    }

    if !categories.is_empty() {
        debug!("Extracted {} categories from container structure", categories.len());
    }
    categories
}

/// Free-text strategy, the last resort: scan stripped document lines.
pub fn extract_from_text(raw_markup: &str) -> Vec<CategoryRow> {
    let text = html::strip_tags(raw_markup);
    let categories: Vec<CategoryRow> = text
        .lines()
        .filter(|line| line.len() > MIN_LINE_TEXT && TEXT_LINE_RE.is_match(line))
        .filter_map(|line| row_from_text(line, || None))
        .collect();

    if !categories.is_empty() {
        debug!("Extracted {} categories from text", categories.len());
    }
    categories
}

/// Build a row from a fragment of text: the first code match becomes
/// `visa_category`, then up to two date-like values become `cutoff_date` and
/// `final_action_date`. `fallback_text` supplies the enclosing container's
/// text when the fragment itself carries no dates. Rows without at least one
/// date are discarded.
fn row_from_text<F>(text: &str, fallback_text: F) -> Option<CategoryRow>
where
    F: FnOnce() -> Option<String>,
{
    let code = VISA_CODE_RE.find(text)?.as_str().to_string();

    let mut dates: Vec<String> = CUTOFF_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();
    if dates.is_empty() {
        if let Some(parent) = fallback_text() {
            dates = CUTOFF_RE
                .find_iter(&parent)
                .map(|m| m.as_str().to_string())
                .collect();
        }
    }
    if dates.is_empty() {
        return None;
    }

    let mut row = CategoryRow::new();
    row.set("visa_category", code);
    row.set("cutoff_date", dates[0].clone());
    if let Some(second) = dates.get(1) {
        row.set("final_action_date", second.clone());
    }
    Some(row)
}

/// Text of the smallest element strictly enclosing `elements[idx]`.
fn parent_text(elements: &[Element], idx: usize) -> Option<String> {
    let child = &elements[idx];
    elements
        .iter()
        .enumerate()
        .filter(|(i, e)| {
            *i != idx
                && e.start <= child.start
                && e.end >= child.end
                && (e.start < child.start || e.end > child.end)
        })
        .min_by_key(|(_, e)| e.end - e.start)
        .map(|(_, e)| e.text.clone())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_with_code_and_dates() {
        let html = r#"<div class="row">EB-2 India cutoff 15 MAY 13 final 01 JUN 13</div>"#;
        let rows = extract_from_containers(html);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("visa_category"), Some("EB-2"));
        assert_eq!(rows[0].get("cutoff_date"), Some("15 MAY 13"));
        assert_eq!(rows[0].get("final_action_date"), Some("01 JUN 13"));
    }

    #[test]
    fn current_counts_as_a_date_value() {
        let html = "<p>EB-1 all countries: Current</p>";
        let rows = extract_from_containers(html);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("cutoff_date"), Some("Current"));
    }

    #[test]
    fn dates_fall_back_to_enclosing_container() {
        let html = "<li><span>Category F2A entry</span> advances to 01 FEB 20</li>";
        let rows = extract_from_containers(html);
        // The span holds the code, its parent li holds the date
        assert!(rows
            .iter()
            .any(|r| r.get("visa_category") == Some("F2A") && r.get("cutoff_date") == Some("01 FEB 20")));
    }

    #[test]
    fn code_without_any_date_is_skipped() {
        let html = "<div>EB-3 documentation and filing instructions</div>";
        assert!(extract_from_containers(html).is_empty());
    }

    #[test]
    fn nested_duplicates_collapse() {
        let html = "<div><p>EB-5 set-aside: 01 DEC 24</p></div>";
        let rows = extract_from_containers(html);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn short_container_text_is_ignored() {
        let html = "<span>DV only</span>";
        assert!(extract_from_containers(html).is_empty());
    }

    #[test]
    fn text_lines_yield_rows() {
        let text = "Employment preferences\nEB-1 China 01 JAN 26\nEB-2 China 01 SEP 21\nnothing here";
        let rows = extract_from_text(text);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("visa_category"), Some("EB-1"));
        assert_eq!(rows[0].get("cutoff_date"), Some("01 JAN 26"));
        assert_eq!(rows[1].get("cutoff_date"), Some("01 SEP 21"));
    }

    #[test]
    fn text_line_without_date_is_skipped() {
        assert!(extract_from_text("EB-1 priority workers discussion").is_empty());
    }
}
