// Task service constants (ADR: No magic values)
use std::time::Duration;

/// Default reclaim period (60s)
pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(60);

/// Smallest accepted reclaim period (100ms)
pub const MIN_RECLAIM_INTERVAL: Duration = Duration::from_millis(100);

/// Message recorded when a panic payload is neither `&str` nor `String`
pub const UNKNOWN_PANIC_MESSAGE: &str = "Unknown panic";
