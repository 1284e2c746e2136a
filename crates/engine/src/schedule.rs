//! Business-hours gating.
//!
//! A shop may restrict sending to a daily window in its own timezone. A
//! message that would go out outside the window is pushed to the next window
//! start. Windows with `start > end` run overnight (22:00-06:00).

use std::time::Duration;

use chrono::{DateTime, Days, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Parse an IANA timezone name, falling back to `fallback` when unknown.
pub fn parse_timezone(name: &str, fallback: Tz) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::warn!(timezone = name, fallback = %fallback, "Unknown shop timezone");
            fallback
        }
    }
}

/// Whether `time` lies in `[start, end)`. Equal bounds mean always open.
pub fn within_window(time: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start == end {
        true
    } else if start < end {
        start <= time && time < end
    } else {
        time >= start || time < end
    }
}

/// Earliest instant at or after `send_at` that lies inside the window.
pub fn next_allowed(
    send_at: DateTime<Utc>,
    tz: Tz,
    start: NaiveTime,
    end: NaiveTime,
) -> DateTime<Utc> {
    let local = send_at.with_timezone(&tz);
    if within_window(local.time(), start, end) {
        return send_at;
    }

    // Outside the window the next opening is today's start if it is still
    // ahead, otherwise tomorrow's.
    let date = local.date_naive();
    let date = if local.time() < start {
        date
    } else {
        date.checked_add_days(Days::new(1)).unwrap_or(date)
    };

    resolve_local(tz, date.and_time(start)).unwrap_or(send_at)
}

/// Delay to apply to a message planned `delay` from `now`, after gating.
pub fn gated_delay(
    now: DateTime<Utc>,
    delay: Duration,
    tz: Tz,
    window: Option<(NaiveTime, NaiveTime)>,
) -> Duration {
    let Some((start, end)) = window else {
        return delay;
    };

    let planned = now + chrono::Duration::milliseconds(delay.as_millis() as i64);
    let allowed = next_allowed(planned, tz, start, end);
    (allowed - now).to_std().unwrap_or(delay)
}

/// Map a local wall-clock time to UTC. Times skipped by a DST jump resolve to
/// the first valid instant after the gap.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
}
