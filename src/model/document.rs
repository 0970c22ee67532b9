use std::collections::HashSet;
use std::time::SystemTime;

/// A fetched page, ready for extraction and sinking (spec.md §3 "Document").
///
/// Created by a fetch completion; consumed by `StorageSink` and
/// `HtmlExtractor`; discarded after sink ingestion.
#[derive(Debug, Clone)]
pub struct Document {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    pub content_hash: String,
    pub fetched_at: SystemTime,
    pub depth: u16,
    pub referring_domain: String,
    pub extracted_links: HashSet<String>,
}
