/// Content hash used for change detection (spec.md §3 "UrlMetadata",
/// §4.3). Not cryptographic: xxh3 is fast enough to run on every fetched
/// body without becoming the bottleneck.
#[must_use]
pub fn content_hash(body: &[u8]) -> String {
    format!("{:016x}", xxhash_rust::xxh3::xxh3_64(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_same_hash() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
    }

    #[test]
    fn different_bytes_different_hash() {
        assert_ne!(content_hash(b"hello"), content_hash(b"world"));
    }
}
