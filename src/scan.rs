//! Collapses camera frame bursts into a single scan attempt
use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_DEDUP_WINDOW_MS: i64 = 1_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDisposition {
    Fresh,
    Duplicate,
}

#[derive(Debug)]
pub struct ScanDebouncer {
    window: Duration,
    last: Option<(String, DateTime<Utc>)>,
}

impl ScanDebouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn observe(&mut self, raw: &str) -> ScanDisposition {
        self.observe_at(raw, Utc::now())
    }

    /// A scan repeating the previous text inside the window is a duplicate and
    /// does not restart the window.
    pub fn observe_at(&mut self, raw: &str, now: DateTime<Utc>) -> ScanDisposition {
        if let Some((text, seen_at)) = &self.last {
            if text == raw && now - *seen_at < self.window {
                return ScanDisposition::Duplicate;
            }
        }
        self.last = Some((raw.to_string(), now));
        ScanDisposition::Fresh
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl Default for ScanDebouncer {
    fn default() -> Self {
        Self::new(Duration::milliseconds(DEFAULT_DEDUP_WINDOW_MS))
    }
}
