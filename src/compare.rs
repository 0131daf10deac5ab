use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::category::{self, CategoryRow};
use crate::extract::Bulletin;

/// How a single field moved between two runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Advanced,
    Retrogressed,
    BecameCurrent,
    LostCurrent,
    Changed,
    Added,
    Removed,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Direction::Advanced => "ADVANCED",
            Direction::Retrogressed => "RETROGRESSED",
            Direction::BecameCurrent => "BECAME_CURRENT",
            Direction::LostCurrent => "LOST_CURRENT",
            Direction::Changed => "CHANGED",
            Direction::Added => "ADDED",
            Direction::Removed => "REMOVED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub previous: Option<String>,
    pub current: Option<String>,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDiff {
    pub category_key: String,
    pub field_changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub categories_added: usize,
    pub categories_removed: usize,
    pub categories_changed: usize,
    pub total_field_changes: usize,
}

/// Structured diff between two bulletins. Construction never fails; a
/// comparison that could not run carries its reason in `error` alongside
/// neutral aggregates, and callers must check `error` before trusting the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub compared_at: String,
    pub current_run_bulletin_date: Option<String>,
    pub previous_run_bulletin_date: Option<String>,
    pub has_changes: bool,
    pub summary: ComparisonSummary,
    pub categories_added: Vec<CategoryRow>,
    pub categories_removed: Vec<CategoryRow>,
    pub categories_changed: Vec<CategoryDiff>,
    pub error: Option<String>,
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Index rows by identity key. Later rows silently win on key collision;
/// that is the documented alignment rule, so the collision is only logged.
fn build_index(categories: &[CategoryRow]) -> BTreeMap<String, &CategoryRow> {
    let mut index: BTreeMap<String, &CategoryRow> = BTreeMap::new();
    for row in categories {
        let key = row.identity_key();
        if index.insert(key.clone(), row).is_some() {
            warn!("Duplicate category key '{}'; keeping the later row", key);
        }
    }
    index
}

/// Classify one field present on both sides. None when the values agree,
/// including when both merely spell "Current" differently.
fn diff_value(field: &str, current: &str, previous: &str) -> Option<FieldChange> {
    let c = current.trim();
    let p = previous.trim();

    if c == p {
        return None;
    }
    if category::is_current(c) && category::is_current(p) {
        return None;
    }

    let direction = if category::is_current(c) {
        Direction::BecameCurrent
    } else if category::is_current(p) {
        Direction::LostCurrent
    } else {
        match (category::parse_cutoff_date(c), category::parse_cutoff_date(p)) {
            (Some(c_date), Some(p_date)) => {
                if c_date > p_date {
                    Direction::Advanced
                } else {
                    Direction::Retrogressed
                }
            }
            _ => Direction::Changed,
        }
    };

    Some(FieldChange {
        field: field.to_string(),
        previous: Some(p.to_string()),
        current: Some(c.to_string()),
        direction,
    })
}

/// Field-level diff for one category. None when nothing differs.
fn diff_category(key: &str, current: &CategoryRow, previous: &CategoryRow) -> Option<CategoryDiff> {
    let all_fields: BTreeSet<&str> = current.field_names().chain(previous.field_names()).collect();

    let mut field_changes = Vec::new();
    for field in all_fields {
        if category::is_identity_field(field) {
            continue;
        }
        match (current.get(field), previous.get(field)) {
            (Some(c), Some(p)) => {
                if let Some(change) = diff_value(field, c, p) {
                    field_changes.push(change);
                }
            }
            (Some(c), None) => field_changes.push(FieldChange {
                field: field.to_string(),
                previous: None,
                current: Some(c.to_string()),
                direction: Direction::Added,
            }),
            (None, Some(p)) => field_changes.push(FieldChange {
                field: field.to_string(),
                previous: Some(p.to_string()),
                current: None,
                direction: Direction::Removed,
            }),
            (None, None) => {}
        }
    }

    if field_changes.is_empty() {
        return None;
    }
    Some(CategoryDiff {
        category_key: key.to_string(),
        field_changes,
    })
}

/// Compare two extraction runs and report every category added, removed, or
/// changed, in sorted key order throughout.
pub fn compare(current: &Bulletin, previous: &Bulletin) -> ComparisonResult {
    let current_index = build_index(&current.categories);
    let previous_index = build_index(&previous.categories);

    let categories_added: Vec<CategoryRow> = current_index
        .iter()
        .filter(|(key, _)| !previous_index.contains_key(*key))
        .map(|(_, row)| (*row).clone())
        .collect();
    let categories_removed: Vec<CategoryRow> = previous_index
        .iter()
        .filter(|(key, _)| !current_index.contains_key(*key))
        .map(|(_, row)| (*row).clone())
        .collect();

    let mut categories_changed = Vec::new();
    let mut total_field_changes = 0;
    for (key, current_row) in &current_index {
        let Some(previous_row) = previous_index.get(key) else {
            continue;
        };
        if let Some(diff) = diff_category(key, current_row, previous_row) {
            total_field_changes += diff.field_changes.len();
            categories_changed.push(diff);
        }
    }

    let has_changes =
        !categories_added.is_empty() || !categories_removed.is_empty() || !categories_changed.is_empty();

    ComparisonResult {
        compared_at: timestamp(),
        current_run_bulletin_date: Some(current.bulletin_date.clone()),
        previous_run_bulletin_date: Some(previous.bulletin_date.clone()),
        has_changes,
        summary: ComparisonSummary {
            categories_added: categories_added.len(),
            categories_removed: categories_removed.len(),
            categories_changed: categories_changed.len(),
            total_field_changes,
        },
        categories_added,
        categories_removed,
        categories_changed,
        error: None,
    }
}

/// Compare two untyped JSON documents (loaded files, stored history rows).
/// Inputs that are not valid bulletin shapes produce a result with `error`
/// set and every aggregate empty, never a panic or an `Err`.
pub fn compare_json(current: &serde_json::Value, previous: &serde_json::Value) -> ComparisonResult {
    let parsed_current: Result<Bulletin, _> = serde_json::from_value(current.clone());
    let parsed_previous: Result<Bulletin, _> = serde_json::from_value(previous.clone());

    match (parsed_current, parsed_previous) {
        (Ok(c), Ok(p)) => compare(&c, &p),
        (c_res, p_res) => {
            let error = c_res
                .err()
                .map(|e| format!("invalid current bulletin: {}", e))
                .or_else(|| p_res.err().map(|e| format!("invalid previous bulletin: {}", e)));
            failed_comparison(bulletin_date_of(current), bulletin_date_of(previous), error)
        }
    }
}

fn bulletin_date_of(value: &serde_json::Value) -> Option<String> {
    value
        .get("bulletin_date")
        .and_then(|v| v.as_str())
        .map(String::from)
}

fn failed_comparison(
    current_date: Option<String>,
    previous_date: Option<String>,
    error: Option<String>,
) -> ComparisonResult {
    ComparisonResult {
        compared_at: timestamp(),
        current_run_bulletin_date: current_date,
        previous_run_bulletin_date: previous_date,
        has_changes: false,
        summary: ComparisonSummary::default(),
        categories_added: Vec::new(),
        categories_removed: Vec::new(),
        categories_changed: Vec::new(),
        error,
    }
}

/// Synthetic comparison for a first run with no history to diff against.
pub fn empty_comparison(current: &Bulletin) -> ComparisonResult {
    failed_comparison(Some(current.bulletin_date.clone()), None, None)
}

/// Subscription codes touched by a comparison: changed keys (diversity-visa
/// region keys collapse to the single "DV" code) plus the codes of added and
/// removed rows.
pub fn changed_subscription_codes(diff: &ComparisonResult) -> BTreeSet<String> {
    let mut codes = BTreeSet::new();
    for cat_diff in &diff.categories_changed {
        let key = &cat_diff.category_key;
        if key.starts_with("DV-") {
            codes.insert("DV".to_string());
        } else {
            codes.insert(key.clone());
        }
    }
    for row in diff.categories_added.iter().chain(&diff.categories_removed) {
        if let Some(code) = row.subscription_code() {
            codes.insert(code);
        }
    }
    codes
}

// ── Report rendering ──

const RULE: &str = "============================================================";

/// Render a comparison as a multi-line terminal report. Added categories
/// print first, then removed, then changed, each in the comparison's sorted
/// key order; other components rely on that ordering.
pub fn render_comparison(diff: &ComparisonResult) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(RULE.to_string());
    lines.push("BULLETIN COMPARISON".to_string());
    lines.push(RULE.to_string());

    if let Some(error) = &diff.error {
        lines.push(format!("[ERROR] Comparison failed: {}", error));
        return lines.join("\n");
    }

    let unknown = || "Unknown".to_string();
    lines.push(format!(
        "Previous: {}",
        diff.previous_run_bulletin_date.clone().unwrap_or_else(unknown)
    ));
    lines.push(format!(
        "Current:  {}",
        diff.current_run_bulletin_date.clone().unwrap_or_else(unknown)
    ));
    lines.push(format!("Compared: {}", diff.compared_at));
    lines.push(String::new());

    if !diff.has_changes {
        lines.push("No changes detected between the two bulletins.".to_string());
        lines.push(RULE.to_string());
        return lines.join("\n");
    }

    lines.push("Changes detected:".to_string());
    lines.push(format!("  Categories added:    {}", diff.summary.categories_added));
    lines.push(format!("  Categories removed:  {}", diff.summary.categories_removed));
    lines.push(format!("  Categories changed:  {}", diff.summary.categories_changed));
    lines.push(format!("  Total field changes: {}", diff.summary.total_field_changes));

    for row in &diff.categories_added {
        lines.push(format!("\n  [ADDED]   {}", row.identity_key()));
    }
    for row in &diff.categories_removed {
        lines.push(format!("\n  [REMOVED] {}", row.identity_key()));
    }
    for cat_diff in &diff.categories_changed {
        lines.push(format!("\n  {}:", cat_diff.category_key));
        for change in &cat_diff.field_changes {
            let previous = change.previous.as_deref().unwrap_or("(none)");
            let current = change.current.as_deref().unwrap_or("(none)");
            lines.push(format!(
                "    {}: {} → {}  [{}]",
                change.field,
                previous,
                current,
                change.direction.label()
            ));
        }
    }

    lines.push(String::new());
    lines.push(RULE.to_string());
    lines.join("\n")
}

// ── Tests ──
