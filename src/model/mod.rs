//! Core data types shared across the frontier, fetch, politeness and
//! storage subsystems (spec.md §3).

mod document;
mod domain_state;
mod metadata;
mod robots_record;
mod url_record;

pub use document::Document;
pub use domain_state::DomainState;
pub use metadata::UrlMetadata;
pub use robots_record::RobotsRecord;
pub use url_record::{EnqueueOutcome, RejectReason, UrlRecord};

/// Maximum length, in bytes, of a URL accepted into the frontier.
pub const MAX_URL_LEN: usize = 2048;
