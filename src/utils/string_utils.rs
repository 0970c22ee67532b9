//! UTF-8-safe string truncation and domain-name helpers shared by the
//! extractor, politeness layer, and storage sink.

/// Safely truncate a string to a maximum number of characters (not bytes),
/// respecting UTF-8 boundaries. Used to bound the HTML snapshot embedded in
/// a stored `Document` (spec.md §6 `raw/` batches: `html (bounded)`).
///
/// # Examples
/// ```
/// # use crawler::utils::string_utils::safe_truncate_chars;
/// assert_eq!(safe_truncate_chars("Hello, World!", 5), "Hello");
/// assert_eq!(safe_truncate_chars("Hi", 100), "Hi");
/// ```
#[inline]
#[must_use]
pub fn safe_truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        None => s,
        Some((byte_idx, _)) => &s[..byte_idx],
    }
}

/// Extracts the registrable domain (effective TLD+1) from a lowercased host
/// or URL string, used to key rate limiting, robots, and blacklist state
/// (spec.md GLOSSARY "Registrable domain"). This is a pragmatic label-count
/// heuristic, not a full public-suffix-list lookup: the last two labels are
/// taken, unless the host ends in a known two-label public suffix (e.g.
/// `co.uk`), in which case the last three are taken.
#[must_use]
pub fn registrable_domain(url_or_host: &str) -> String {
    let host = extract_host(url_or_host);
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return host.to_string();
    }

    const TWO_LABEL_SUFFIXES: &[&str] = &["co.uk", "com.au", "co.jp", "org.uk", "gov.uk", "ac.uk"];
    let last_two = format!("{}.{}", labels[labels.len() - 2], labels[labels.len() - 1]);
    if TWO_LABEL_SUFFIXES.contains(&last_two.as_str()) && labels.len() >= 3 {
        labels[labels.len() - 3..].join(".")
    } else {
        last_two
    }
}

/// Extracts the host from an absolute URL, or returns the input unchanged
/// if it has no scheme separator.
#[must_use]
pub fn extract_host(url_or_host: &str) -> &str {
    let after_scheme = match url_or_host.find("://") {
        Some(idx) => &url_or_host[idx + 3..],
        None => url_or_host,
    };
    let end = after_scheme.find(['/', '?', '#', ':']).unwrap_or(after_scheme.len());
    let host = &after_scheme[..end];
    host.strip_prefix("www.").unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "caf\u{e9} au lait";
        assert_eq!(safe_truncate_chars(text, 4), "caf\u{e9}");
    }

    #[test]
    fn registrable_domain_strips_subdomains() {
        assert_eq!(registrable_domain("https://blog.example.com/post"), "example.com");
        assert_eq!(registrable_domain("www.example.com"), "example.com");
    }

    #[test]
    fn registrable_domain_handles_two_label_suffix() {
        assert_eq!(registrable_domain("https://shop.example.co.uk/"), "example.co.uk");
    }

    #[test]
    fn registrable_domain_passes_through_bare_domain() {
        assert_eq!(registrable_domain("example.com"), "example.com");
    }
}
