use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Datelike, Local};
use regex::Regex;
use tracing::{debug, info};

use crate::extract::html;

pub const LANDING_URL: &str =
    "https://travel.state.gov/content/travel/en/legal/visa-law0/visa-bulletin.html";
const BASE_DOMAIN: &str = "https://travel.state.gov";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\s+([^>]*)>").unwrap());
static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).unwrap());
static CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)class\s*=\s*["']([^"']*)["']"#).unwrap());
static RECENT_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<ul[^>]*id\s*=\s*["']recent_bulletins["'][^>]*>(.*?)</ul>"#).unwrap()
});

pub fn client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build HTTP client")
}

pub async fn fetch_page(client: &reqwest::Client, url: &str) -> Result<String> {
    debug!("Fetching URL: {}", url);
    let response = client
        .get(url)
        .header(
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        )
        .header("Accept-Language", "en-US,en;q=0.5")
        .send()
        .await
        .with_context(|| format!("Failed to connect to {}", url))?
        .error_for_status()
        .with_context(|| format!("HTTP error from {}", url))?;
    let body = response
        .text()
        .await
        .with_context(|| format!("Failed to read body from {}", url))?;
    debug!("Fetched {} bytes", body.len());
    Ok(body)
}

fn absolute(href: &str) -> String {
    if href.starts_with('/') {
        format!("{}{}", BASE_DOMAIN, href)
    } else {
        href.to_string()
    }
}

fn anchor_href(fragment: &str, require_btn_class: bool) -> Option<String> {
    for caps in ANCHOR_RE.captures_iter(fragment) {
        let attrs = &caps[1];
        if require_btn_class {
            let has_btn = CLASS_RE
                .captures(attrs)
                .is_some_and(|c| c[1].split_whitespace().any(|cls| cls.starts_with("btn")));
            if !has_btn {
                continue;
            }
        }
        if let Some(href) = HREF_RE.captures(attrs) {
            return Some(href[1].to_string());
        }
    }
    None
}

/// Bulletin page URL for a given month, following the site's path convention.
pub fn construct_bulletin_url(year: i32, month: &str) -> String {
    format!(
        "{}/content/travel/en/legal/visa-law0/visa-bulletin/{}/visa-bulletin-for-{}-{}.html",
        BASE_DOMAIN,
        year,
        month.to_lowercase(),
        year
    )
}

/// Locate the current bulletin's URL on the landing page.
///
/// Tries the "Current Visa Bulletin" call-to-action button first, then the
/// first entry of the recent-bulletins list, and finally constructs the URL
/// from today's date, so a link is always produced.
pub fn discover_bulletin_url(landing_html: &str) -> String {
    // Strategy 1: list item whose heading names the current bulletin
    for item in html::tag_blocks(landing_html, "li") {
        let heading_matches = html::tag_blocks(&item, "h2").iter().any(|h2| {
            let text = html::text_of(h2).to_lowercase();
            text.contains("current") && text.contains("bulletin")
        });
        if !heading_matches {
            continue;
        }
        if let Some(href) = anchor_href(&item, true) {
            let url = absolute(&href);
            debug!("Found current bulletin URL via heading button: {}", url);
            return url;
        }
    }

    // Strategy 2: first link in the recent-bulletins list
    if let Some(caps) = RECENT_LIST_RE.captures(landing_html) {
        if let Some(href) = anchor_href(&caps[1], false) {
            let url = absolute(&href);
            debug!("Found bulletin URL via recent list: {}", url);
            return url;
        }
    }

    // Strategy 3: construct from today's date
    let now = Local::now();
    let url = construct_bulletin_url(now.year(), &now.format("%B").to_string());
    debug!("Using constructed bulletin URL: {}", url);
    url
}

/// Fetch the landing page, locate the current bulletin, and fetch it.
/// Returns the bulletin's URL and raw HTML.
pub async fn fetch_current_bulletin() -> Result<(String, String)> {
    let client = client()?;
    info!("Fetching landing page: {}", LANDING_URL);
    let landing = fetch_page(&client, LANDING_URL).await?;

    let bulletin_url = discover_bulletin_url(&landing);
    info!("Fetching bulletin page: {}", bulletin_url);
    let bulletin_html = fetch_page(&client, &bulletin_url).await?;

    Ok((bulletin_url, bulletin_html))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_current_bulletin_button() {
        let landing = r#"
            <ul>
              <li><h2>Archived Bulletins</h2><a href="/archive.html">Archive</a></li>
              <li>
                <h2>Current Visa Bulletin</h2>
                <a class="btn btn-lg btn-success" href="/content/travel/en/legal/visa-law0/visa-bulletin/2026/visa-bulletin-for-january-2026.html">View</a>
              </li>
            </ul>"#;
        let url = discover_bulletin_url(landing);
        assert_eq!(
            url,
            "https://travel.state.gov/content/travel/en/legal/visa-law0/visa-bulletin/2026/visa-bulletin-for-january-2026.html"
        );
    }

    #[test]
    fn plain_links_in_current_section_are_not_buttons() {
        let landing = r#"
            <li>
              <h2>Current Visa Bulletin</h2>
              <a href="/not-the-button.html">read more</a>
            </li>
            <ul id="recent_bulletins">
              <li><a href="/recent-january.html">January 2026</a></li>
            </ul>"#;
        assert_eq!(
            discover_bulletin_url(landing),
            "https://travel.state.gov/recent-january.html"
        );
    }

    #[test]
    fn falls_back_to_recent_bulletins_list() {
        let landing = r#"
            <ul id="recent_bulletins">
              <li><a href="/bulletin-feb-2026.html">February 2026</a></li>
              <li><a href="/bulletin-jan-2026.html">January 2026</a></li>
            </ul>"#;
        assert_eq!(
            discover_bulletin_url(landing),
            "https://travel.state.gov/bulletin-feb-2026.html"
        );
    }

    #[test]
    fn absolute_hrefs_pass_through() {
        let landing = r#"
            <li><h2>Current Visa Bulletin</h2>
            <a class="btn" href="https://elsewhere.test/b.html">View</a></li>"#;
        assert_eq!(discover_bulletin_url(landing), "https://elsewhere.test/b.html");
    }

    #[test]
    fn constructs_url_when_landing_is_unrecognizable() {
        let url = discover_bulletin_url("<p>maintenance page</p>");
        assert!(url.starts_with(
            "https://travel.state.gov/content/travel/en/legal/visa-law0/visa-bulletin/"
        ));
        assert!(url.ends_with(".html"));
    }

    #[test]
    fn bulletin_url_convention() {
        assert_eq!(
            construct_bulletin_url(2026, "February"),
            "https://travel.state.gov/content/travel/en/legal/visa-law0/visa-bulletin/2026/visa-bulletin-for-february-2026.html"
        );
    }
}
