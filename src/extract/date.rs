use std::sync::LazyLock;

use chrono::Local;
use regex::Regex;
use tracing::debug;

const MONTHS: &str = "January|February|March|April|May|June|July|August|September|October|November|December";

static CURRENT_BULLETIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?is)current\s+bulletin.*?({})\s+(\d{{4}})", MONTHS)).unwrap()
});
static JANUARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)January\s+(\d{4})").unwrap());
static MONTH_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)({})\s+(\d{{4}})", MONTHS)).unwrap());

/// Discover the bulletin's month/year label from the document text.
///
/// An explicit "current ... bulletin" marker wins over arbitrary mentions;
/// a literal January is next (the publication cycle leads with it); then the
/// first month+year anywhere; finally the calendar month of the run. Never
/// fails, and is idempotent for a fixed input.
pub fn discover(text: &str) -> String {
    if let Some(caps) = CURRENT_BULLETIN_RE.captures(text) {
        let date = format!("{} {}", &caps[1], &caps[2]);
        debug!("Found current bulletin marker: {}", date);
        return date;
    }

    if let Some(caps) = JANUARY_RE.captures(text) {
        let date = format!("January {}", &caps[1]);
        debug!("Found January bulletin: {}", date);
        return date;
    }

    if let Some(caps) = MONTH_YEAR_RE.captures(text) {
        let date = format!("{} {}", &caps[1], &caps[2]);
        debug!("Extracted bulletin date: {}", date);
        return date;
    }

    let fallback = Local::now().format("%B %Y").to_string();
    debug!("Bulletin date not found, using current month: {}", fallback);
    fallback
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_bulletin_marker_wins() {
        let text = "Archive: March 2025. Current Bulletin for February 2026.";
        assert_eq!(discover(text), "February 2026");
    }

    #[test]
    fn marker_allows_intervening_text_across_lines() {
        let text = "CURRENT BULLETIN\nUpdated monthly.\nThis edition covers April 2026.";
        assert_eq!(discover(text), "April 2026");
    }

    #[test]
    fn january_preferred_without_marker() {
        let text = "Bulletins: March 2026, February 2026, January 2026";
        assert_eq!(discover(text), "January 2026");
    }

    #[test]
    fn first_month_year_as_fallback() {
        let text = "April 2026 Bulletin\nPrevious: March 2026";
        assert_eq!(discover(text), "April 2026");
    }

    #[test]
    fn source_casing_preserved_in_fallback_match() {
        assert_eq!(discover("march 2025"), "march 2025");
    }

    #[test]
    fn synthesizes_label_when_nothing_matches() {
        let date = discover("no dates here at all");
        // "<Month> <4-digit year>"
        let parts: Vec<&str> = date.split(' ').collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].len(), 4);
    }

    #[test]
    fn idempotent_for_fixed_input() {
        let text = "Current Bulletin for January 2026";
        assert_eq!(discover(text), discover(text));
        assert_eq!(discover(text), "January 2026");
    }
}
