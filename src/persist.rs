use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::info;

use crate::extract::Bulletin;

pub const DEFAULT_OUTPUT_FILE: &str = "visa_bulletin_data.json";

/// Write a bulletin as pretty JSON, creating parent directories as needed.
pub fn save_json(bulletin: &Bulletin, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(bulletin)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(
        "Saved {} categories to {}",
        bulletin.total_categories,
        path.display()
    );
    Ok(())
}

/// Write a bulletin under a timestamped name for historical archiving.
/// Returns the path written.
pub fn save_with_timestamp(bulletin: &Bulletin, output_dir: &Path) -> Result<PathBuf> {
    let filename = format!(
        "visa_bulletin_{}.json",
        Local::now().format("%Y%m%d_%H%M%S")
    );
    let path = output_dir.join(filename);
    save_json(bulletin, &path)?;
    Ok(path)
}

/// Load a previously saved bulletin.
pub fn load_json(path: &Path) -> Result<Bulletin> {
    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let bulletin: Bulletin =
        serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))?;
    Ok(bulletin)
}

/// Readable terminal summary of a bulletin, capped at `max_categories` rows.
pub fn format_bulletin(bulletin: &Bulletin, max_categories: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push("Visa Bulletin Data".to_string());
    lines.push("==================".to_string());
    lines.push(format!("Bulletin Date: {}", bulletin.bulletin_date));
    lines.push(format!("Extracted At: {}", bulletin.extracted_at));
    lines.push(format!("Total Categories: {}", bulletin.total_categories));
    lines.push(String::new());
    lines.push("Categories:".to_string());
    lines.push("-".repeat(50));

    for (i, category) in bulletin.categories.iter().take(max_categories).enumerate() {
        lines.push(format!("\n{}. {}", i + 1, category.identity_key()));
        for (field, value) in category.fields() {
            lines.push(format!("   {}: {}", field, value));
        }
    }

    if bulletin.categories.len() > max_categories {
        lines.push(format!(
            "\n... and {} more categories",
            bulletin.categories.len() - max_categories
        ));
    }

    lines.join("\n")
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::CategoryRow;

    fn sample() -> Bulletin {
        Bulletin {
            bulletin_date: "January 2026".to_string(),
            extracted_at: "2026-01-15T10:00:00".to_string(),
            categories: vec![
                CategoryRow::from_pairs(&[("visa_category", "EB-1"), ("china", "01 JAN 26")]),
                CategoryRow::from_pairs(&[("visa_category", "EB-2"), ("china", "C")]),
            ],
            total_categories: 2,
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("visa_tracker_{}_{}", std::process::id(), name))
    }

    #[test]
    fn save_and_load_round_trip() {
        let path = temp_path("round_trip.json");
        let bulletin = sample();
        save_json(&bulletin, &path).unwrap();
        let loaded = load_json(&path).unwrap();
        assert_eq!(loaded, bulletin);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = temp_path("nested_dir");
        let path = dir.join("deeper").join("out.json");
        save_json(&sample(), &path).unwrap();
        assert!(path.exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_rejects_invalid_json() {
        let path = temp_path("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load_json(&path).is_err());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn load_missing_file_is_an_error() {
        assert!(load_json(Path::new("/nonexistent/visa.json")).is_err());
    }

    #[test]
    fn display_format_caps_categories() {
        let text = format_bulletin(&sample(), 1);
        assert!(text.contains("Bulletin Date: January 2026"));
        assert!(text.contains("Total Categories: 2"));
        assert!(text.contains("1. EB-1"));
        assert!(!text.contains("2. EB-2"));
        assert!(text.contains("... and 1 more categories"));
    }
}
