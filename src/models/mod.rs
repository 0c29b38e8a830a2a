pub mod attr;
pub mod log;
pub mod metric;
pub mod query;
pub mod span;

/// Current wall-clock time in Unix nanoseconds.
pub fn now_unix_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
