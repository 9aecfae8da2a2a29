//! Minimal tag scanning for the flat CCTV XML feeds.
//!
//! The feeds are a long list of identical `<CCTV>` blocks with scalar children,
//! so a block regex plus child-tag string search is enough.

use once_cell::sync::Lazy;
use regex::Regex;

static CCTV_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<CCTV>(.*?)</CCTV>").expect("static regex"));

/// Inner text of every `<CCTV>...</CCTV>` block, in document order.
pub fn cctv_blocks(xml: &str) -> impl Iterator<Item = &str> {
    CCTV_BLOCK
        .captures_iter(xml)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
}

/// Trimmed, entity-decoded text of the first `<tag>` child, or `None` when the
/// tag is absent or empty. Tag names match case-insensitively.
pub fn child_text(block: &str, tag: &str) -> Option<String> {
    let lower = block.to_ascii_lowercase();
    let tag_lower = tag.to_ascii_lowercase();
    let open = format!("<{}>", tag_lower);
    let close = format!("</{}>", tag_lower);

    let start = lower.find(&open)? + open.len();
    let end = start + lower[start..].find(&close)?;
    let raw = block[start..end].trim();
    let text = strip_cdata(raw);
    let decoded = decode_entities(text.trim());
    if decoded.is_empty() {
        None
    } else {
        Some(decoded)
    }
}

fn strip_cdata(raw: &str) -> &str {
    raw.strip_prefix("<![CDATA[")
        .and_then(|r| r.strip_suffix("]]>"))
        .unwrap_or(raw)
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
