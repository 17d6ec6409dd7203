// src/services/availability.rs
use chrono::{DateTime, Datelike, Duration, NaiveDate};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::models::profile::{Availability, AvailabilityException, DayOfWeek, TimeSlot};

lazy_static::lazy_static! {
    static ref TIME_RE: Regex = Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").expect("valid time regex");
}

/// Why a requested date/time cannot be booked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityError {
    #[error("Time must use the 24-hour HH:mm format")]
    InvalidTime,
    #[error("Invalid date")]
    InvalidDate,
    #[error("Counselor is not accepting sessions")]
    CounselorUnavailable,
    #[error("Counselor is unavailable on this date: {0}")]
    DateBlocked(String),
    #[error("Counselor has no availability on {0}")]
    NoScheduleForDay(DayOfWeek),
    #[error("Requested time {0} is outside the counselor's available hours")]
    OutsideSlots(String),
}

impl AvailabilityError {
    /// Stable machine-readable reason, rendered next to the message.
    pub fn tag(&self) -> &'static str {
        match self {
            AvailabilityError::InvalidTime => "invalid_time",
            AvailabilityError::InvalidDate => "invalid_date",
            AvailabilityError::CounselorUnavailable => "counselor_unavailable",
            AvailabilityError::DateBlocked(_) => "date_blocked",
            AvailabilityError::NoScheduleForDay(_) => "no_schedule_for_day",
            AvailabilityError::OutsideSlots(_) => "outside_slots",
        }
    }
}

/// `HH:mm` to minutes since midnight.
pub fn parse_time_to_minutes(value: &str) -> Option<u32> {
    let caps = TIME_RE.captures(value.trim())?;
    let hours: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: u32 = caps.get(2)?.as_str().parse().ok()?;
    Some(hours * 60 + minutes)
}

pub fn format_minutes(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp and keeps the calendar day.
pub fn parse_calendar_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_utc().date());
    }
    // Plain date followed by a time component, e.g. "2025-03-03T09:00"
    raw.get(..10)
        .filter(|_| raw.as_bytes().get(10) == Some(&b'T'))
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

pub fn weekday_of(date: NaiveDate) -> DayOfWeek {
    date.weekday().into()
}

pub fn find_exception(availability: &Availability, date: NaiveDate) -> Option<&AvailabilityException> {
    availability.exceptions.iter().find(|exception| exception.date == date)
}

fn slot_contains(slot: &TimeSlot, minutes: u32) -> bool {
    match (parse_time_to_minutes(&slot.start), parse_time_to_minutes(&slot.end)) {
        (Some(start), Some(end)) => start <= minutes && minutes < end,
        _ => false,
    }
}

/// Decides whether `time` on `date` falls inside an open slot of the
/// counselor's schedule. Conflicts with existing sessions are checked
/// separately in `services::scheduling`.
pub fn is_within_counselor_availability(
    is_available: bool,
    availability: &Availability,
    date: NaiveDate,
    time: &str,
) -> Result<(), AvailabilityError> {
    let minutes = parse_time_to_minutes(time).ok_or(AvailabilityError::InvalidTime)?;

    if !is_available {
        return Err(AvailabilityError::CounselorUnavailable);
    }

    if let Some(exception) = find_exception(availability, date) {
        if !exception.is_available {
            let reason = exception
                .reason
                .clone()
                .filter(|reason| !reason.trim().is_empty())
                .unwrap_or_else(|| "Counselor unavailable".to_string());
            return Err(AvailabilityError::DateBlocked(reason));
        }
        // An open exception makes the whole date bookable.
        return Ok(());
    }

    let weekday = weekday_of(date);
    let schedule = availability
        .day(weekday)
        .filter(|entry| !entry.slots.is_empty())
        .ok_or(AvailabilityError::NoScheduleForDay(weekday))?;

    if schedule.slots.iter().any(|slot| slot_contains(slot, minutes)) {
        Ok(())
    } else {
        Err(AvailabilityError::OutsideSlots(format_minutes(minutes)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub day: DayOfWeek,
    pub slots: Vec<TimeSlot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Open slots for `days` consecutive days starting at `from`. Blocked dates
/// and days without a schedule are left out.
pub fn open_slots(
    is_available: bool,
    availability: &Availability,
    from: NaiveDate,
    days: u32,
) -> Vec<DayAvailability> {
    if !is_available {
        return Vec::new();
    }

    (0..days)
        .filter_map(|offset| from.checked_add_signed(Duration::days(offset as i64)))
        .filter_map(|date| {
            let day = weekday_of(date);
            match find_exception(availability, date) {
                Some(exception) if !exception.is_available => None,
                Some(exception) => Some(DayAvailability {
                    date,
                    day,
                    slots: Vec::new(),
                    note: Some(
                        exception
                            .reason
                            .clone()
                            .unwrap_or_else(|| "Open by exception".to_string()),
                    ),
                }),
                None => availability
                    .day(day)
                    .filter(|entry| !entry.slots.is_empty())
                    .map(|entry| DayAvailability {
                        date,
                        day,
                        slots: entry.slots.clone(),
                        note: None,
                    }),
            }
        })
        .collect()
}

/// First `(date, start)` at or after `from` that the schedule accepts,
/// scanning at most `horizon_days` days.
pub fn next_available_slot(
    is_available: bool,
    availability: &Availability,
    from: NaiveDate,
    horizon_days: u32,
) -> Option<(NaiveDate, String)> {
    open_slots(is_available, availability, from, horizon_days)
        .into_iter()
        .find_map(|day| {
            if day.slots.is_empty() {
                // Date opened by exception: any valid time, report the day start
                return Some((day.date, "00:00".to_string()));
            }
            day.slots
                .iter()
                .filter(|slot| {
                    matches!(
                        (parse_time_to_minutes(&slot.start), parse_time_to_minutes(&slot.end)),
                        (Some(start), Some(end)) if start < end
                    )
                })
                .min_by_key(|slot| parse_time_to_minutes(&slot.start))
                .map(|slot| (day.date, slot.start.clone()))
        })
}

/// Checks a weekly schedule before it is stored: valid `HH:mm` bounds,
/// `start < end`, and no weekday listed twice.
pub fn validate_weekly_schedule(availability: &Availability) -> Result<(), String> {
    let mut seen = Vec::new();
    for entry in &availability.weekly_schedule {
        if seen.contains(&entry.day) {
            return Err(format!("{} appears more than once in the weekly schedule", entry.day));
        }
        seen.push(entry.day);

        for slot in &entry.slots {
            let start = parse_time_to_minutes(&slot.start)
                .ok_or_else(|| format!("Invalid start time '{}' on {}", slot.start, entry.day))?;
            let end = parse_time_to_minutes(&slot.end)
                .ok_or_else(|| format!("Invalid end time '{}' on {}", slot.end, entry.day))?;
            if start >= end {
                return Err(format!(
                    "Slot {}-{} on {} must start before it ends",
                    slot.start, slot.end, entry.day
                ));
            }
        }
    }

    if availability.max_sessions_per_day == 0 {
        return Err("maxSessionsPerDay must be at least 1".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::profile::DaySchedule;

    fn monday_nine_to_ten() -> Availability {
        Availability {
            weekly_schedule: vec![DaySchedule {
                day: DayOfWeek::Monday,
                slots: vec![TimeSlot {
                    start: "09:00".to_string(),
                    end: "10:00".to_string(),
                    is_virtual: true,
                }],
            }],
            ..Availability::default()
        }
    }

    // 2025-03-03 is a Monday
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time_to_minutes("00:00"), Some(0));
        assert_eq!(parse_time_to_minutes("09:59"), Some(599));
        assert_eq!(parse_time_to_minutes("23:59"), Some(1439));
        assert_eq!(parse_time_to_minutes("24:00"), None);
        assert_eq!(parse_time_to_minutes("9:00"), None);
        assert_eq!(parse_time_to_minutes("09:60"), None);
        assert_eq!(format_minutes(599), "09:59");
    }

    #[test]
    fn test_parse_calendar_date() {
        assert_eq!(parse_calendar_date("2025-03-03"), Some(monday()));
        assert_eq!(parse_calendar_date("2025-03-03T00:00:00.000Z"), Some(monday()));
        assert_eq!(parse_calendar_date("2025-03-03T14:30"), Some(monday()));
        assert_eq!(parse_calendar_date("03/03/2025"), None);
        assert_eq!(weekday_of(monday()), DayOfWeek::Monday);
    }

    #[test]
    fn test_half_open_slot_bounds() {
        let availability = monday_nine_to_ten();
        assert!(is_within_counselor_availability(true, &availability, monday(), "09:00").is_ok());
        assert!(is_within_counselor_availability(true, &availability, monday(), "09:59").is_ok());
        assert_eq!(
            is_within_counselor_availability(true, &availability, monday(), "10:00"),
            Err(AvailabilityError::OutsideSlots("10:00".to_string()))
        );
        assert_eq!(
            is_within_counselor_availability(true, &availability, monday(), "08:59").unwrap_err().tag(),
            "outside_slots"
        );
    }

    #[test]
    fn test_blocking_exception_rejects_whole_day() {
        let mut availability = monday_nine_to_ten();
        availability.exceptions.push(AvailabilityException {
            date: monday(),
            is_available: false,
            reason: Some("Conference".to_string()),
        });

        for time in ["09:00", "09:30", "09:59"] {
            assert_eq!(
                is_within_counselor_availability(true, &availability, monday(), time),
                Err(AvailabilityError::DateBlocked("Conference".to_string()))
            );
        }

        let next_monday = monday() + Duration::days(7);
        assert!(is_within_counselor_availability(true, &availability, next_monday, "09:00").is_ok());
    }

    #[test]
    fn test_open_exception_accepts_any_valid_time() {
        let mut availability = monday_nine_to_ten();
        let saturday = monday() + Duration::days(5);
        availability.exceptions.push(AvailabilityException {
            date: saturday,
            is_available: true,
            reason: None,
        });

        assert!(is_within_counselor_availability(true, &availability, saturday, "17:00").is_ok());
        assert_eq!(
            is_within_counselor_availability(true, &availability, saturday, "7pm"),
            Err(AvailabilityError::InvalidTime)
        );
    }

    #[test]
    fn test_missing_or_empty_day_rejects() {
        let mut availability = monday_nine_to_ten();
        let tuesday = monday() + Duration::days(1);
        assert_eq!(
            is_within_counselor_availability(true, &availability, tuesday, "09:00"),
            Err(AvailabilityError::NoScheduleForDay(DayOfWeek::Tuesday))
        );

        availability.weekly_schedule[0].slots.clear();
        assert_eq!(
            is_within_counselor_availability(true, &availability, monday(), "09:00"),
            Err(AvailabilityError::NoScheduleForDay(DayOfWeek::Monday))
        );
    }

    #[test]
    fn test_unavailable_counselor_rejects() {
        let availability = monday_nine_to_ten();
        assert_eq!(
            is_within_counselor_availability(false, &availability, monday(), "09:00"),
            Err(AvailabilityError::CounselorUnavailable)
        );
        assert!(open_slots(false, &availability, monday(), 7).is_empty());
    }

    #[test]
    fn test_midnight_crossing_slot_never_matches() {
        let availability = Availability {
            weekly_schedule: vec![DaySchedule {
                day: DayOfWeek::Monday,
                slots: vec![TimeSlot {
                    start: "22:00".to_string(),
                    end: "02:00".to_string(),
                    is_virtual: false,
                }],
            }],
            ..Availability::default()
        };
        assert!(is_within_counselor_availability(true, &availability, monday(), "23:00").is_err());
        assert!(is_within_counselor_availability(true, &availability, monday(), "01:00").is_err());
    }

    #[test]
    fn test_next_available_slot_skips_blocked_dates() {
        let mut availability = monday_nine_to_ten();
        availability.exceptions.push(AvailabilityException {
            date: monday(),
            is_available: false,
            reason: None,
        });

        let tuesday = monday() + Duration::days(1);
        assert_eq!(
            next_available_slot(true, &availability, tuesday, 14),
            Some((monday() + Duration::days(7), "09:00".to_string()))
        );
        assert_eq!(next_available_slot(true, &availability, monday(), 7), None);
    }

    #[test]
    fn test_open_slots_lists_scheduled_days() {
        let availability = monday_nine_to_ten();
        let listing = open_slots(true, &availability, monday(), 14);
        assert_eq!(listing.len(), 2);
        assert!(listing.iter().all(|day| day.day == DayOfWeek::Monday));
        assert_eq!(listing[0].slots[0].start, "09:00");
    }

    #[test]
    fn test_validate_weekly_schedule() {
        let mut availability = monday_nine_to_ten();
        assert!(validate_weekly_schedule(&availability).is_ok());

        availability.weekly_schedule[0].slots[0].end = "08:00".to_string();
        assert!(validate_weekly_schedule(&availability).is_err());

        availability.weekly_schedule[0].slots[0].end = "25:00".to_string();
        assert!(validate_weekly_schedule(&availability).is_err());

        let mut duplicated = monday_nine_to_ten();
        duplicated.weekly_schedule.push(duplicated.weekly_schedule[0].clone());
        assert!(validate_weekly_schedule(&duplicated).is_err());
    }
}
