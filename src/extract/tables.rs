use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::category::CategoryRow;

use super::html;

/// Ordered substring rules for header normalization. Specific phrases come
/// before generic ones ("family preference" must win over "category"), so
/// the first matching rule applies.
const HEADER_RULES: &[(&str, &str)] = &[
    ("visa category", "visa_category"),
    ("preference level", "preference_level"),
    ("family preference", "family_preference"),
    ("employment preference", "employment_preference"),
    ("final action date", "final_action_date"),
    ("cutoff date", "cutoff_date"),
    ("action date", "action_date"),
    ("processing date", "processing_date"),
    ("category", "category"),
    ("current", "current"),
];

static WS_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Normalize a column header to a stable field name.
pub fn normalize_header(header: &str) -> String {
    let lower = header.to_lowercase().trim().to_string();
    for (phrase, field) in HEADER_RULES {
        if lower.contains(phrase) {
            return (*field).to_string();
        }
    }
    WS_RUN_RE.replace_all(&lower, "_").into_owned()
}

/// Tabular strategy: one `CategoryRow` per data row, zipping cell values
/// positionally against the normalized headers of row 0.
pub fn extract_rows(tables: &[String]) -> Vec<CategoryRow> {
    let mut categories = Vec::new();
    for table in tables {
        categories.extend(parse_table(table));
    }
    categories
}

fn parse_table(table: &str) -> Vec<CategoryRow> {
    let rows = html::tag_blocks(table, "tr");
    if rows.len() < 2 {
        return Vec::new();
    }

    let headers: Vec<String> = html::cell_blocks(&rows[0])
        .iter()
        .map(|cell| normalize_header(&html::text_of(cell)))
        .collect();
    debug!("Table headers: {:?}", headers);

    let mut categories = Vec::new();
    for row in &rows[1..] {
        let cells: Vec<String> = html::cell_blocks(row)
            .iter()
            .map(|cell| html::text_of(cell))
            .collect();
        if cells.is_empty() {
            continue;
        }

        let mut category = CategoryRow::new();
        for (idx, header) in headers.iter().enumerate() {
            // Cells beyond the header count are ignored
            if let Some(value) = cells.get(idx) {
                category.set(header.clone(), value.clone());
            }
        }

        if category.has_data_fields() {
            categories.push(category);
        }
    }

    if !categories.is_empty() {
        debug!("Extracted {} rows from table", categories.len());
    }
    categories
}

// ── Tests ──
