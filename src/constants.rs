//! Shared constants used across the application.

/// User agent string sent with every forum API request.
pub const SYNC_USER_AGENT: &str = "snaphunt-sync/0.1";
