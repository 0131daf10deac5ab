use std::collections::btree_map;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Fields that identify a category row rather than carrying date values.
pub const IDENTITY_FIELDS: &[&str] = &[
    "visa_category",
    "preference_level",
    "family_preference",
    "employment_preference",
    "category",
    // Actual header names on current bulletin pages
    "family-sponsored",
    "employment-based",
    "region",
];

/// Employment-based ordinals as printed in bulletin tables, with the codes
/// subscribers use.
const EB_ORDINALS: &[(&str, &str)] = &[
    ("1st", "EB-1"),
    ("2nd", "EB-2"),
    ("3rd", "EB-3"),
    ("4th", "EB-4"),
    ("5th", "EB-5"),
];

/// Values meaning "immediately available / no backlog".
const CURRENT_VALUES: &[&str] = &["c", "current"];

/// Cutoff date formats seen in bulletins (e.g. "01 JAN 26" or "01JAN26").
const DATE_FORMATS: &[&str] = &["%d %b %y", "%d%b%y", "%d %b %Y", "%d%b%Y"];

/// Fallback identity fields, checked in order, for rows that predate the
/// family-sponsored / employment-based / region header convention.
const LEGACY_IDENTITY_FIELDS: &[&str] = &[
    "visa_category",
    "preference_level",
    "family_preference",
    "employment_preference",
    "category",
];

pub fn is_identity_field(name: &str) -> bool {
    IDENTITY_FIELDS.contains(&name)
}

/// True if the value reads as "Current" regardless of spelling ("C", "current", ...).
pub fn is_current(value: &str) -> bool {
    CURRENT_VALUES.contains(&value.trim().to_lowercase().as_str())
}

/// Parse a cutoff date string under any accepted format. None if unparseable.
pub fn parse_cutoff_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

fn eb_code(raw: &str) -> String {
    let clean = raw.trim();
    if let Some((_, code)) = EB_ORDINALS.iter().find(|(ordinal, _)| clean == *ordinal) {
        return (*code).to_string();
    }
    // Prefix match for entries like "1st Preference"
    let lower = clean.to_lowercase();
    if let Some((_, code)) = EB_ORDINALS
        .iter()
        .find(|(ordinal, _)| lower.starts_with(ordinal))
    {
        return (*code).to_string();
    }
    clean.to_string() // e.g. "Other Workers"
}

/// One visa category's field values for one bulletin. The column set varies
/// by bulletin (country list changes), so rows are an open mapping with a
/// reserved identity-field subset rather than a fixed struct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryRow(BTreeMap<String, String>);

impl CategoryRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let mut row = Self::new();
        for (field, value) in pairs {
            row.set(*field, *value);
        }
        row
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if the row carries at least one value beyond its identity fields.
    /// Rows that fail this are not worth emitting as categories.
    pub fn has_data_fields(&self) -> bool {
        self.0.keys().any(|k| !is_identity_field(k))
    }

    /// Deterministic sorted field=value representation. Used for exact-duplicate
    /// detection and as the identity key of last resort.
    pub fn canonical(&self) -> String {
        let pairs: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        pairs.join("|")
    }

    fn non_empty(&self, field: &str) -> Option<&str> {
        self.get(field).filter(|v| !v.is_empty())
    }

    /// Stable identity key used to align this row with its counterpart in
    /// another bulletin. Diversity-visa rows stay split per region ("DV-AFRICA").
    pub fn identity_key(&self) -> String {
        // Family-sponsored: the value IS the code (F1, F2A, F2B, F3, F4)
        if let Some(fs) = self.non_empty("family-sponsored") {
            return fs.trim().to_string();
        }
        if let Some(eb) = self.non_empty("employment-based") {
            return eb_code(eb);
        }
        if let Some(region) = self.non_empty("region") {
            return format!("DV-{}", region.trim());
        }
        for field in LEGACY_IDENTITY_FIELDS {
            if let Some(value) = self.non_empty(field) {
                return value.trim().to_string();
            }
        }
        // No identity field at all. Deterministic, but unstable if the source
        // document varies field casing between runs.
        self.canonical()
    }

    /// Subscription category code for this row ("EB-2", "F2A", "DV"). Differs
    /// from the identity key only in collapsing all diversity-visa regions to
    /// the single "DV" code subscribers choose. None if the row carries no
    /// identity at all.
    pub fn subscription_code(&self) -> Option<String> {
        if let Some(fs) = self.non_empty("family-sponsored") {
            return Some(fs.trim().to_string());
        }
        if let Some(eb) = self.non_empty("employment-based") {
            return Some(eb_code(eb));
        }
        if self.non_empty("region").is_some() {
            return Some("DV".to_string());
        }
        for field in LEGACY_IDENTITY_FIELDS {
            if let Some(value) = self.non_empty(field) {
                return Some(value.trim().to_string());
            }
        }
        None
    }
}

/// All bulletin rows matching a subscriber's chosen category code.
pub fn rows_for_code<'a>(code: &str, categories: &'a [CategoryRow]) -> Vec<&'a CategoryRow> {
    categories
        .iter()
        .filter(|row| row.subscription_code().as_deref() == Some(code))
        .collect()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_uses_family_sponsored_verbatim() {
        let row = CategoryRow::from_pairs(&[("family-sponsored", "F2A"), ("china", "01 JAN 26")]);
        assert_eq!(row.identity_key(), "F2A");
    }

    #[test]
    fn key_maps_eb_ordinal() {
        let row = CategoryRow::from_pairs(&[("employment-based", "2nd"), ("india", "15 MAY 13")]);
        assert_eq!(row.identity_key(), "EB-2");
    }

    #[test]
    fn key_maps_eb_ordinal_prefix() {
        let row = CategoryRow::from_pairs(&[("employment-based", "3rd Preference"), ("china", "C")]);
        assert_eq!(row.identity_key(), "EB-3");
    }

    #[test]
    fn key_keeps_unmapped_eb_value() {
        let row = CategoryRow::from_pairs(&[("employment-based", "Other Workers"), ("china", "C")]);
        assert_eq!(row.identity_key(), "Other Workers");
    }

    #[test]
    fn key_scopes_diversity_visa_by_region() {
        let row = CategoryRow::from_pairs(&[("region", "AFRICA"), ("cutoff", "01 OCT 25")]);
        assert_eq!(row.identity_key(), "DV-AFRICA");
    }

    #[test]
    fn key_falls_back_to_visa_category() {
        let row = CategoryRow::from_pairs(&[("visa_category", "EB-1"), ("china", "01 JAN 26")]);
        assert_eq!(row.identity_key(), "EB-1");
    }

    #[test]
    fn key_falls_back_to_preference_level() {
        let row = CategoryRow::from_pairs(&[("preference_level", "Employment-Based"), ("china", "C")]);
        assert_eq!(row.identity_key(), "Employment-Based");
    }

    #[test]
    fn key_without_identity_is_deterministic() {
        let row = CategoryRow::from_pairs(&[("china", "01 JAN 26"), ("india", "01 FEB 25")]);
        let key = row.identity_key();
        assert!(!key.is_empty());
        assert_eq!(key, row.identity_key());
    }

    #[test]
    fn family_sponsored_wins_over_region() {
        let row = CategoryRow::from_pairs(&[("family-sponsored", "F1"), ("region", "ASIA")]);
        assert_eq!(row.identity_key(), "F1");
    }

    #[test]
    fn subscription_code_collapses_dv_regions() {
        let africa = CategoryRow::from_pairs(&[("region", "AFRICA"), ("cutoff", "01 OCT 25")]);
        let asia = CategoryRow::from_pairs(&[("region", "ASIA"), ("cutoff", "15 NOV 25")]);
        assert_eq!(africa.subscription_code().as_deref(), Some("DV"));
        assert_eq!(asia.subscription_code().as_deref(), Some("DV"));
        // The comparison key stays split
        assert_ne!(africa.identity_key(), asia.identity_key());
    }

    #[test]
    fn subscription_code_none_without_identity() {
        let row = CategoryRow::from_pairs(&[("china", "01 JAN 26")]);
        assert_eq!(row.subscription_code(), None);
    }

    #[test]
    fn rows_for_code_matches_all_dv_regions() {
        let rows = vec![
            CategoryRow::from_pairs(&[("region", "AFRICA"), ("cutoff", "01 OCT 25")]),
            CategoryRow::from_pairs(&[("region", "ASIA"), ("cutoff", "15 NOV 25")]),
            CategoryRow::from_pairs(&[("family-sponsored", "F1"), ("all", "01 JAN 17")]),
        ];
        assert_eq!(rows_for_code("DV", &rows).len(), 2);
        assert_eq!(rows_for_code("F1", &rows).len(), 1);
        assert!(rows_for_code("EB-1", &rows).is_empty());
    }

    #[test]
    fn current_spellings() {
        assert!(is_current("C"));
        assert!(is_current("c"));
        assert!(is_current("Current"));
        assert!(is_current("CURRENT"));
        assert!(is_current(" current "));
        assert!(!is_current("01 JAN 26"));
        assert!(!is_current(""));
    }

    #[test]
    fn parses_all_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert_eq!(parse_cutoff_date("01 JAN 26"), Some(expected));
        assert_eq!(parse_cutoff_date("01JAN26"), Some(expected));
        assert_eq!(parse_cutoff_date("01 JAN 2026"), Some(expected));
        assert_eq!(parse_cutoff_date("01JAN2026"), Some(expected));
    }

    #[test]
    fn rejects_non_dates() {
        assert_eq!(parse_cutoff_date("Current"), None);
        assert_eq!(parse_cutoff_date("C"), None);
        assert_eq!(parse_cutoff_date("garbage"), None);
        assert_eq!(parse_cutoff_date(""), None);
    }

    #[test]
    fn has_data_fields_excludes_identity_only_rows() {
        let identity_only = CategoryRow::from_pairs(&[("visa_category", "EB-1")]);
        assert!(!identity_only.has_data_fields());
        let with_data = CategoryRow::from_pairs(&[("visa_category", "EB-1"), ("china", "C")]);
        assert!(with_data.has_data_fields());
    }

    #[test]
    fn canonical_is_sorted_and_stable() {
        let a = CategoryRow::from_pairs(&[("b", "2"), ("a", "1")]);
        let b = CategoryRow::from_pairs(&[("a", "1"), ("b", "2")]);
        assert_eq!(a.canonical(), "a=1|b=2");
        assert_eq!(a.canonical(), b.canonical());
    }
}
