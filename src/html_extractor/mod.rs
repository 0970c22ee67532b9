//! HTML detection, noise filtering, tokenisation, and link extraction
//! (spec.md §4.6 "HtmlExtractor"). Sits in the hot path of the fetch
//! pipeline: cheap admissibility checks first, then a bounded streaming
//! tokeniser, never a backtracking regex engine.

mod tokenizer;

use url::Url;

use crate::utils::constants::{MAX_CONTENT_SIZE, MAX_LINKS_PER_PAGE, MIN_CONTENT_SIZE};
use tokenizer::Event;

const QUALITY_ALNUM_FLOOR: usize = 200;
const QUALITY_SCAN_WINDOW: usize = 64 * 1024;
const MAX_LINK_BYTES: usize = 2048;

/// Returns true if `bytes` look like HTML: any `<` within the first KiB.
#[must_use]
pub fn is_html(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(1024)];
    window.contains(&b'<')
}

/// Size-and-content admissibility gate (spec.md §4.6 `is_quality`): bounded
/// size, an HTML-ish doctype/tag marker, and enough non-markup text to be
/// worth indexing.
#[must_use]
pub fn is_quality(bytes: &[u8]) -> bool {
    if bytes.len() < MIN_CONTENT_SIZE || bytes.len() > MAX_CONTENT_SIZE {
        return false;
    }

    let head = &bytes[..bytes.len().min(4096)];
    let head_lower: Vec<u8> = head.iter().map(u8::to_ascii_lowercase).collect();
    let has_marker = contains_subslice(&head_lower, b"<!doctype") || contains_subslice(&head_lower, b"<html");
    if !has_marker {
        return false;
    }

    let window = &bytes[..bytes.len().min(QUALITY_SCAN_WINDOW)];
    count_alnum_outside_tags(window) > QUALITY_ALNUM_FLOOR
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn count_alnum_outside_tags(bytes: &[u8]) -> usize {
    let mut count = 0usize;
    let mut in_tag = false;
    for &b in bytes {
        match b {
            b'<' => in_tag = true,
            b'>' => in_tag = false,
            _ if !in_tag && b.is_ascii_alphanumeric() => count += 1,
            _ => {}
        }
    }
    count
}

/// Bounded linear scan that strips `<script>`, `<style>`, `<!-- -->`, and
/// `<noscript>` spans (spec.md §4.6 `filter_noise`). Falls back to the
/// original input untouched if the removal would have dropped more than
/// 70% of the bytes, guarding against a pathological page that is mostly
/// one giant unterminated script block.
#[must_use]
pub fn filter_noise(bytes: &[u8]) -> std::borrow::Cow<'_, [u8]> {
    let Some(filtered) = filter_noise_owned(bytes) else {
        return std::borrow::Cow::Borrowed(bytes);
    };
    if !bytes.is_empty() && filtered.len() * 10 < bytes.len() * 3 {
        // Safety rail: dropped more than 70%, keep the original.
        return std::borrow::Cow::Borrowed(bytes);
    }
    std::borrow::Cow::Owned(filtered)
}

/// Returns the noise-stripped bytes as an owned buffer, or `None` if no
/// spans were found (caller can reuse the original slice in that case).
fn filter_noise_owned(bytes: &[u8]) -> Option<Vec<u8>> {
    const PAIRS: [(&[u8], &[u8]); 3] = [
        (b"<script", b"</script>"),
        (b"<style", b"</style>"),
        (b"<noscript", b"</noscript>"),
    ];

    let mut out = Vec::with_capacity(bytes.len());
    let mut pos = 0usize;
    let mut stripped_any = false;
    let len = bytes.len();

    while pos < len {
        if bytes[pos..].starts_with(b"<!--") {
            if let Some(end_rel) = find_subslice(&bytes[pos..], b"-->") {
                pos += end_rel + 3;
                stripped_any = true;
                continue;
            }
            out.push(bytes[pos]);
            pos += 1;
            continue;
        }

        let mut matched_pair = false;
        for (open, close) in PAIRS {
            if starts_with_tag(&bytes[pos..], open) {
                if let Some(close_rel) = find_subslice(&bytes[pos..], close) {
                    pos += close_rel + close.len();
                    stripped_any = true;
                    matched_pair = true;
                    break;
                }
                // Unterminated: drop to EOF.
                pos = len;
                stripped_any = true;
                matched_pair = true;
                break;
            }
        }
        if matched_pair {
            continue;
        }

        out.push(bytes[pos]);
        pos += 1;
    }

    stripped_any.then_some(out)
}

fn starts_with_tag(haystack: &[u8], tag: &[u8]) -> bool {
    haystack.len() > tag.len() && haystack.starts_with(tag) && {
        let next = haystack[tag.len()];
        next == b'>' || next == b' ' || next == b'\t' || next == b'\n' || next == b'/'
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Extracts outbound links from an anchor-bearing HTML document, resolving
/// relative forms against `base_url` (spec.md §4.6 Stage 3). No
/// deduplication: identity is the Frontier/MetadataStore's job. Bounded to
/// `MAX_LINKS_PER_PAGE` entries.
#[must_use]
pub fn extract_links(html: &[u8], base_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };

    let mut links = Vec::new();
    let mut in_anchor = false;
    let mut pending_href: Option<String> = None;

    tokenizer::tokenize(html, |event| {
        if links.len() >= MAX_LINKS_PER_PAGE {
            return;
        }
        match event {
            Event::TagOpen { name, is_closing } if name.eq_ignore_ascii_case("a") => {
                in_anchor = !is_closing;
                if is_closing {
                    pending_href = None;
                }
            }
            Event::Attribute { name, value: Some(value) } if in_anchor && name.eq_ignore_ascii_case("href") => {
                pending_href = Some(value.to_string());
            }
            Event::TagClose { name, .. } if name.eq_ignore_ascii_case("a") => {
                if let Some(href) = pending_href.take() {
                    if let Some(resolved) = resolve_href(&base, &href) {
                        links.push(resolved);
                    }
                }
                in_anchor = false;
            }
            _ => {}
        }
    });

    links
}

fn resolve_href(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.len() > MAX_LINK_BYTES || href.starts_with('#') {
        return None;
    }
    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") {
        return None;
    }

    base.join(href).ok().map(|u| u.to_string())
}

pub struct HtmlExtractor;

impl HtmlExtractor {
    /// Runs the full prefilter (spec.md §4.6 Stage 1) and, if the document
    /// passes, returns the noise-filtered bytes ready for tokenisation.
    #[must_use]
    pub fn prefilter(bytes: &[u8]) -> Option<std::borrow::Cow<'_, [u8]>> {
        if !is_html(bytes) || !is_quality(bytes) {
            return None;
        }
        Some(filter_noise(bytes))
    }

    #[must_use]
    pub fn links(html: &[u8], base_url: &str) -> Vec<String> {
        extract_links(html, base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_html_by_leading_angle_bracket() {
        assert!(is_html(b"<!DOCTYPE html><html></html>"));
        assert!(!is_html(b"just plain text with no markup at all here"));
    }

    #[test]
    fn quality_rejects_too_small_or_too_large() {
        assert!(!is_quality(b"<html>x</html>"));
        let huge = vec![b'a'; MAX_CONTENT_SIZE + 1];
        assert!(!is_quality(&huge));
    }

    #[test]
    fn quality_requires_doctype_or_html_marker() {
        let mut body = b"<div>".to_vec();
        body.extend(std::iter::repeat(b'x').take(1000));
        body.extend(b"</div>");
        assert!(!is_quality(&body));
    }

    #[test]
    fn quality_passes_realistic_page() {
        let mut body = b"<!DOCTYPE html><html><body><p>".to_vec();
        body.extend(std::iter::repeat(b'a').take(600));
        body.extend(b"</p></body></html>");
        assert!(is_quality(&body));
    }

    #[test]
    fn filter_noise_strips_script_and_style_and_comments() {
        let html = b"<p>keep</p><script>var x = 1 < 2;</script><style>.a{}</style><!-- gone -->tail";
        let filtered = filter_noise(html);
        let text = String::from_utf8_lossy(&filtered);
        assert!(!text.contains("var x"));
        assert!(!text.contains(".a{}"));
        assert!(!text.contains("gone"));
        assert!(text.contains("keep"));
        assert!(text.contains("tail"));
    }

    #[test]
    fn filter_noise_keeps_original_when_mostly_noise() {
        let mut html = b"<script>".to_vec();
        html.extend(std::iter::repeat(b'x').take(10_000));
        html.extend(b"</script>tiny");
        let filtered = filter_noise(&html);
        assert_eq!(filtered.len(), html.len());
    }

    #[test]
    fn extracts_absolute_protocol_relative_root_relative_and_relative_links() {
        let html = br#"
            <a href="https://other.test/b">abs</a>
            <a href="//cdn.test/img">proto-relative</a>
            <a href="/root">root-relative</a>
            <a href="child">relative</a>
        "#;
        let links = extract_links(html, "https://example.org/dir/page.html");
        assert!(links.contains(&"https://other.test/b".to_string()));
        assert!(links.contains(&"https://cdn.test/img".to_string()));
        assert!(links.contains(&"https://example.org/root".to_string()));
        assert!(links.contains(&"https://example.org/dir/child".to_string()));
    }

    #[test]
    fn discards_fragment_only_javascript_and_mailto_links() {
        let html = br#"
            <a href="#top">frag</a>
            <a href="javascript:void(0)">js</a>
            <a href="mailto:a@example.org">mail</a>
            <a href="">empty</a>
        "#;
        let links = extract_links(html, "https://example.org/");
        assert!(links.is_empty());
    }

    #[test]
    fn discards_oversized_links() {
        let long_path = "a".repeat(3000);
        let html = format!(r#"<a href="/{long_path}">x</a>"#);
        let links = extract_links(html.as_bytes(), "https://example.org/");
        assert!(links.is_empty());
    }

    #[test]
    fn caps_links_at_max_per_page() {
        let mut html = String::new();
        for i in 0..(MAX_LINKS_PER_PAGE + 20) {
            html.push_str(&format!(r#"<a href="/p{i}">x</a>"#));
        }
        let links = extract_links(html.as_bytes(), "https://example.org/");
        assert_eq!(links.len(), MAX_LINKS_PER_PAGE);
    }
}
