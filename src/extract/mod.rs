pub mod date;
pub mod fallback;
pub mod html;
pub mod tables;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::category::CategoryRow;

/// One extraction run's normalized snapshot of the bulletin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bulletin {
    pub bulletin_date: String,
    pub extracted_at: String,
    pub categories: Vec<CategoryRow>,
    pub total_categories: usize,
}

impl Bulletin {
    pub fn new(bulletin_date: String, categories: Vec<CategoryRow>) -> Self {
        let total_categories = categories.len();
        Self {
            bulletin_date,
            extracted_at: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            categories,
            total_categories,
        }
    }
}

/// Extract a `Bulletin` from the raw markup of one bulletin page.
///
/// Parsing strategies run in priority order and the first one to produce any
/// rows wins: proper tables, then block/inline containers (only on documents
/// with no tables at all), then raw text lines. Never errors; a document
/// nothing could be read from yields an empty category list, which callers
/// must judge against history before trusting.
pub fn extract(raw_markup: &str) -> Bulletin {
    let text = html::strip_tags(raw_markup);
    let bulletin_date = date::discover(&text);

    let table_blocks = html::tag_blocks(raw_markup, "table");
    debug!("Found {} table elements", table_blocks.len());

    let mut categories = tables::extract_rows(&table_blocks);

    // Containers are only worth scanning when the document has no tables at
    // all; a present-but-unreadable table falls through to the text pass.
    if categories.is_empty() && table_blocks.is_empty() {
        debug!("No tables found, trying container structure");
        categories = fallback::extract_from_containers(raw_markup);
    }

    if categories.is_empty() {
        debug!("No structured rows found, trying text extraction");
        categories = fallback::extract_from_text(raw_markup);
    }

    if categories.is_empty() {
        warn!("No visa categories extracted; possible source format change");
    } else {
        debug!("Extracted {} visa categories", categories.len());
    }

    Bulletin::new(bulletin_date, categories)
}

// ── Tests ──
