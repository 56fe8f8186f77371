use chrono::{DateTime, TimeDelta, Utc};

use crate::vm::Vm;

/// Display value when a VM has no uptime (not running, or no start time).
pub const UPTIME_UNAVAILABLE: &str = "N/A";

/// Format a duration as `7d12h45m`, `2h30m`, `5m30s` or `45s`.
///
/// The duration is rounded to the nearest second (half away from zero)
/// before splitting. Each tier drops the units finer than its second-largest
/// one, so seconds never appear once hours are present.
pub fn format_uptime(d: TimeDelta) -> String {
    let total = round_to_seconds(d);

    // Integer division/remainder truncate toward zero, so negative input
    // never reaches the coarser tiers.
    let days = total / 86_400;
    let hours = total / 3_600 % 24;
    let minutes = total / 60 % 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{days}d{hours}h{minutes}m")
    } else if hours > 0 {
        format!("{hours}h{minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

fn round_to_seconds(d: TimeDelta) -> i64 {
    let secs = d.num_seconds();
    // subsec_nanos carries the same sign as the whole duration
    let nanos = d.subsec_nanos();
    if nanos >= 500_000_000 {
        secs + 1
    } else if nanos <= -500_000_000 {
        secs - 1
    } else {
        secs
    }
}

/// Uptime ready for display, or [`UPTIME_UNAVAILABLE`].
pub fn uptime_display(vm: &Vm, now: DateTime<Utc>) -> String {
    match vm.uptime(now) {
        Ok(uptime) => format_uptime(uptime),
        Err(_) => UPTIME_UNAVAILABLE.to_string(),
    }
}
