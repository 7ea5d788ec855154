//! Shared constants used across the application.

/// User agent string presented by the headless browser during page captures.
pub const ARCHIVAL_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Page size used by list/search when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Upper bound on list/search page size.
pub const MAX_PAGE_SIZE: i64 = 200;
