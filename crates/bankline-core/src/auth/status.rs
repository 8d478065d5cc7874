use std::time::Duration;

use serde::Serialize;

/// Countdown snapshot pushed to the host on every tick.
/// Derived from the last activity time; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionStatus {
    /// Milliseconds until forced logout, never negative
    pub time_remaining: u64,
    pub show_warning: bool,
    /// Currently the same as `show_warning`
    pub show_still_active_prompt: bool,
    /// `M:SS`, seconds rounded up
    pub formatted_time: String,
}

impl SessionStatus {
    /// Status after `elapsed` of inactivity against a `timeout` budget
    pub fn compute(elapsed: Duration, timeout: Duration, warning_threshold: Duration) -> Self {
        let remaining = timeout.saturating_sub(elapsed);
        let time_remaining = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX);
        let show_warning = time_remaining > 0 && remaining <= warning_threshold;

        Self {
            time_remaining,
            show_warning,
            show_still_active_prompt: show_warning,
            formatted_time: format_countdown(time_remaining),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.time_remaining == 0
    }
}

/// Format milliseconds as `M:SS`, rounding partial seconds up so the
/// display never reads 0:00 while time is left.
pub fn format_countdown(millis: u64) -> String {
    let total_seconds = millis.div_ceil(1000);
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}
