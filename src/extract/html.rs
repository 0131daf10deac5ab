//! Tag-slicing helpers for the bulletin pages. The documents are simple
//! server-rendered HTML, so a case-insensitive paired-tag scan with depth
//! matching is enough; no DOM is built.

/// ASCII-only lowercase copy. Byte offsets stay valid against the original.
fn to_lower(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii() { c.to_ascii_lowercase() } else { c })
        .collect()
}

/// Find the next `<tag ...>` at or after `from`. Returns (start of '<',
/// position just past the closing '>').
fn find_open(lc: &str, tag: &str, from: usize) -> Option<(usize, usize)> {
    let pat = format!("<{}", tag);
    let mut pos = from;
    loop {
        let at = pos + lc.get(pos..)?.find(&pat)?;
        let after_name = at + pat.len();
        // Reject prefix collisions like <td> matching <tdata>
        match lc.as_bytes().get(after_name) {
            Some(b'>') => return Some((at, after_name + 1)),
            Some(c) if c.is_ascii_whitespace() || *c == b'/' => {
                let gt = at + lc[at..].find('>')?;
                return Some((at, gt + 1));
            }
            _ => pos = after_name,
        }
    }
}

/// Find the `</tag>` matching an open tag whose '>' sits just before `from`,
/// skipping over nested pairs of the same tag. Returns (start of '<',
/// position just past the closing '>').
fn find_matching_close(lc: &str, tag: &str, from: usize) -> Option<(usize, usize)> {
    let close_pat = format!("</{}", tag);
    let mut depth = 0usize;
    let mut pos = from;
    loop {
        let close_at = pos + lc.get(pos..)?.find(&close_pat)?;
        match find_open(lc, tag, pos) {
            Some((open_at, open_end)) if open_at < close_at => {
                depth += 1;
                pos = open_end;
            }
            _ => {
                let gt = close_at + lc[close_at..].find('>')?;
                if depth == 0 {
                    return Some((close_at, gt + 1));
                }
                depth -= 1;
                pos = gt + 1;
            }
        }
    }
}

/// Inner HTML of every `<tag>...</tag>` pair, nested occurrences included,
/// in document order. Case-insensitive; unterminated blocks are dropped.
pub fn tag_blocks(html: &str, tag: &str) -> Vec<String> {
    let lc = to_lower(html);
    let mut blocks = Vec::new();
    let mut pos = 0;
    while let Some((_, open_end)) = find_open(&lc, tag, pos) {
        match find_matching_close(&lc, tag, open_end) {
            Some((close_at, _)) => {
                blocks.push(html[open_end..close_at].to_string());
                // Continue inside the block so nested same-tag elements are found too
                pos = open_end;
            }
            None => break,
        }
    }
    blocks
}

/// Inner HTML of every `<th>`/`<td>` cell in a table row, in order.
pub fn cell_blocks(row_html: &str) -> Vec<String> {
    let lc = to_lower(row_html);
    let mut cells = Vec::new();
    let mut pos = 0;
    loop {
        let th = find_open(&lc, "th", pos);
        let td = find_open(&lc, "td", pos);
        let (tag, open) = match (th, td) {
            (Some(a), Some(b)) => {
                if a.0 <= b.0 {
                    ("th", a)
                } else {
                    ("td", b)
                }
            }
            (Some(a), None) => ("th", a),
            (None, Some(b)) => ("td", b),
            (None, None) => break,
        };
        match find_matching_close(&lc, tag, open.1) {
            Some((close_at, close_end)) => {
                cells.push(row_html[open.1..close_at].to_string());
                pos = close_end;
            }
            None => break,
        }
    }
    cells
}

/// An element located in the source document, with its stripped text.
/// The byte span lets callers find the smallest enclosing element.
#[derive(Debug, Clone)]
pub struct Element {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// All elements of the given tag names, nested occurrences included,
/// sorted by position in the document.
pub fn element_spans(html: &str, tags: &[&str]) -> Vec<Element> {
    let lc = to_lower(html);
    let mut elements = Vec::new();
    for tag in tags {
        let mut pos = 0;
        while let Some((open_at, open_end)) = find_open(&lc, tag, pos) {
            match find_matching_close(&lc, tag, open_end) {
                Some((close_at, close_end)) => {
                    elements.push(Element {
                        start: open_at,
                        end: close_end,
                        text: text_of(&html[open_end..close_at]),
                    });
                    pos = open_end;
                }
                None => break,
            }
        }
    }
    elements.sort_by_key(|e| (e.start, e.end));
    elements
}

/// Drop all tags and decode the handful of entities the bulletin pages use.
/// Whitespace and newlines between tags are preserved for line-oriented callers.
pub fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    decode_entities(&out)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Collapse whitespace runs to single spaces and trim.
pub fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stripped, whitespace-normalized text of an HTML fragment.
pub fn text_of(fragment: &str) -> String {
    normalize_ws(&strip_tags(fragment))
}

// ── Tests ──
