pub mod constants;
pub mod hash;
pub mod string_utils;

pub use constants::*;
pub use hash::content_hash;
pub use string_utils::{extract_host, registrable_domain, safe_truncate_chars};
