/// Position of a render backend in the configured registry.
pub type BackendIndex = usize;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
