//! Temporal values as supplied by the database driver, plus the rendering
//! rules the export applies to them.
//!
//! Sources may carry 1 ns precision while downstream runtimes commonly hold
//! 100 ns, so every nanosecond-bearing field is truncated toward zero to the
//! nearest 100 ns before rendering. Date-only values pass through unchanged.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Timelike};

#[derive(Debug, Clone, PartialEq)]
pub enum Temporal {
    Date(NaiveDate),
    LocalTime(NaiveTime),
    LocalDateTime(NaiveDateTime),
    /// A time-of-day with a UTC offset.
    Time {
        time: NaiveTime,
        offset: FixedOffset,
    },
    /// A zoned date-time. `zone` carries the named zone when the driver
    /// supplied one; the offset is always present.
    DateTime {
        datetime: DateTime<FixedOffset>,
        zone: Option<String>,
    },
    Duration(GraphDuration),
}

/// A calendar-aware duration in the source's component form. Components are
/// independently signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphDuration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanos: i32,
}

fn trunc_nanos(n: u32) -> u32 {
    n - (n % 100)
}

impl Temporal {
    /// Truncate sub-second precision toward zero to a multiple of 100 ns.
    pub fn truncate_to_100ns(&self) -> Temporal {
        match self {
            Temporal::Date(d) => Temporal::Date(*d),
            Temporal::LocalTime(t) => {
                Temporal::LocalTime(t.with_nanosecond(trunc_nanos(t.nanosecond())).unwrap_or(*t))
            }
            Temporal::LocalDateTime(dt) => Temporal::LocalDateTime(
                dt.with_nanosecond(trunc_nanos(dt.nanosecond())).unwrap_or(*dt),
            ),
            Temporal::Time { time, offset } => Temporal::Time {
                time: time
                    .with_nanosecond(trunc_nanos(time.nanosecond()))
                    .unwrap_or(*time),
                offset: *offset,
            },
            Temporal::DateTime { datetime, zone } => Temporal::DateTime {
                datetime: datetime
                    .with_nanosecond(trunc_nanos(datetime.nanosecond()))
                    .unwrap_or(*datetime),
                zone: zone.clone(),
            },
            Temporal::Duration(d) => Temporal::Duration(GraphDuration {
                nanos: d.nanos - (d.nanos % 100),
                ..*d
            }),
        }
    }

    /// Render as an ISO-8601-compatible string. Callers are expected to have
    /// applied `truncate_to_100ns` first; rendering itself does not truncate.
    pub fn to_iso_string(&self) -> String {
        let mut out = String::with_capacity(32);
        match self {
            Temporal::Date(d) => {
                out.push_str(&d.to_string());
            }
            Temporal::LocalTime(t) => {
                fmt_time(t, &mut out);
            }
            Temporal::LocalDateTime(dt) => {
                out.push_str(&dt.date().to_string());
                out.push('T');
                fmt_time(&dt.time(), &mut out);
            }
            Temporal::Time { time, offset } => {
                fmt_time(time, &mut out);
                fmt_offset(offset.local_minus_utc(), &mut out);
            }
            Temporal::DateTime { datetime, zone } => {
                out.push_str(&datetime.date_naive().to_string());
                out.push('T');
                fmt_time(&datetime.time(), &mut out);
                fmt_offset(datetime.offset().fix().local_minus_utc(), &mut out);
                if let Some(zone) = zone {
                    out.push('[');
                    out.push_str(zone);
                    out.push(']');
                }
            }
            Temporal::Duration(d) => {
                fmt_duration(d, &mut out);
            }
        }
        out
    }
}

fn fmt_time(t: &NaiveTime, out: &mut String) {
    use std::fmt::Write;
    let _ = write!(out, "{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second());
    fmt_fraction(t.nanosecond() % 1_000_000_000, out);
}

// Fractional seconds with trailing zeros trimmed. A zero fraction emits
// nothing.
fn fmt_fraction(nanos: u32, out: &mut String) {
    if nanos == 0 {
        return;
    }
    let digits = format!("{nanos:09}");
    let trimmed = digits.trim_end_matches('0');
    out.push('.');
    out.push_str(trimmed);
}

fn fmt_offset(seconds: i32, out: &mut String) {
    use std::fmt::Write;
    if seconds == 0 {
        out.push('Z');
        return;
    }
    let sign = if seconds < 0 { '-' } else { '+' };
    let abs = seconds.unsigned_abs();
    let _ = write!(out, "{}{:02}:{:02}", sign, abs / 3600, (abs % 3600) / 60);
    if abs % 60 != 0 {
        let _ = write!(out, ":{:02}", abs % 60);
    }
}

fn fmt_duration(d: &GraphDuration, out: &mut String) {
    use std::fmt::Write;

    let years = d.months / 12;
    let months = d.months % 12;
    // Mixed-sign (seconds, nanos) pairs normalize through a single total.
    let total_nanos = d.seconds as i128 * 1_000_000_000 + d.nanos as i128;
    let secs_part = total_nanos / 1_000_000_000;
    let frac_part = (total_nanos % 1_000_000_000).unsigned_abs() as u32;
    let hours = secs_part / 3600;
    let minutes = (secs_part % 3600) / 60;
    let seconds = secs_part % 60;

    out.push('P');
    if years != 0 {
        let _ = write!(out, "{years}Y");
    }
    if months != 0 {
        let _ = write!(out, "{months}M");
    }
    if d.days != 0 {
        let _ = write!(out, "{}D", d.days);
    }

    let has_time = hours != 0 || minutes != 0 || seconds != 0 || frac_part != 0;
    if has_time {
        out.push('T');
        if hours != 0 {
            let _ = write!(out, "{hours}H");
        }
        if minutes != 0 {
            let _ = write!(out, "{minutes}M");
        }
        if seconds != 0 || frac_part != 0 {
            if total_nanos < 0 && seconds == 0 {
                // Sign lives entirely in the fraction.
                out.push('-');
            }
            let _ = write!(out, "{seconds}");
            fmt_fraction(frac_part, out);
            out.push('S');
        }
    } else if years == 0 && months == 0 && d.days == 0 {
        out.push_str("T0S");
    }
}
