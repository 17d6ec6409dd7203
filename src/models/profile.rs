use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

pub const DEFAULT_PROFILE_PICTURE: &str = "/assets/avatars/profile-placeholder.png";
pub const DEFAULT_TIMEZONE: &str = "Africa/Kigali";

string_enum! {
    pub enum Gender {
        Male => "male",
        Female => "female",
    }
}

string_enum! {
    pub enum CancerType {
        Unspecified => "",
        Breast => "breast",
        Prostate => "prostate",
        Lung => "lung",
        Cervical => "cervical",
        Colon => "colon",
        Other => "other",
    }
}

string_enum! {
    pub enum ServiceMode {
        InPerson => "in-person",
        Virtual => "virtual",
        Hybrid => "hybrid",
    }
}

string_enum! {
    pub enum DayOfWeek {
        Monday => "monday",
        Tuesday => "tuesday",
        Wednesday => "wednesday",
        Thursday => "thursday",
        Friday => "friday",
        Saturday => "saturday",
        Sunday => "sunday",
    }
}

impl From<chrono::Weekday> for DayOfWeek {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Mon => DayOfWeek::Monday,
            chrono::Weekday::Tue => DayOfWeek::Tuesday,
            chrono::Weekday::Wed => DayOfWeek::Wednesday,
            chrono::Weekday::Thu => DayOfWeek::Thursday,
            chrono::Weekday::Fri => DayOfWeek::Friday,
            chrono::Weekday::Sat => DayOfWeek::Saturday,
            chrono::Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

/// A bookable window inside a weekday, `HH:mm` strings, end exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub start: String,
    pub end: String,
    #[serde(default = "default_true")]
    pub is_virtual: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub day: DayOfWeek,
    #[serde(default)]
    pub slots: Vec<TimeSlot>,
}

/// A date-specific override of the weekly schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityException {
    #[serde(deserialize_with = "deserialize_calendar_date")]
    pub date: NaiveDate,
    #[serde(default)]
    pub is_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub weekly_schedule: Vec<DaySchedule>,
    #[serde(default)]
    pub exceptions: Vec<AvailabilityException>,
    #[serde(default = "default_max_sessions")]
    pub max_sessions_per_day: u32,
}

impl Default for Availability {
    fn default() -> Self {
        Availability {
            timezone: default_timezone(),
            weekly_schedule: Vec::new(),
            exceptions: Vec::new(),
            max_sessions_per_day: default_max_sessions(),
        }
    }
}

impl Availability {
    pub fn day(&self, day: DayOfWeek) -> Option<&DaySchedule> {
        self.weekly_schedule.iter().find(|entry| entry.day == day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub email: bool,
    pub sms: bool,
    pub message: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        NotificationPreferences {
            email: true,
            sms: false,
            message: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: i32,
    #[serde(rename = "user")]
    pub user_id: i32,
    pub first_name: String,
    pub last_name: String,
    pub gender: Gender,
    pub date_of_birth: NaiveDate,
    pub district: String,
    pub telephone: String,
    pub profile_picture: String,
    pub cancer_type: CancerType,
    pub cv: Option<String>,
    pub medical_license: Option<String>,
    pub specialization: Vec<String>,
    pub specialties: Vec<String>,
    pub years_of_experience: Option<i32>,
    pub bio: Option<String>,
    pub qualifications: Option<String>,
    pub languages: Vec<String>,
    pub service_modes: Vec<ServiceMode>,
    pub is_available: bool,
    pub availability: Json<Availability>,
    pub rating_average: f64,
    pub rating_count: i32,
    pub last_review_at: Option<DateTime<Utc>>,
    pub feedback_highlights: Vec<String>,
    pub notification_preferences: Json<NotificationPreferences>,
    pub application_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub specialization: Option<StringOrList>,
    pub specialties: Option<Vec<String>>,
    pub languages: Option<Vec<String>>,
    pub service_modes: Option<Vec<ServiceMode>>,
    pub years_of_experience: Option<i32>,
    pub qualifications: Option<String>,
    pub profile_picture: Option<String>,
    pub telephone: Option<String>,
    pub district: Option<String>,
    pub cancer_type: Option<CancerType>,
}

/// Accepts either a single string or a list of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StringOrList::One(value) => vec![value],
            StringOrList::Many(values) => values,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAvailabilityRequest {
    pub weekly_schedule: Option<Vec<DaySchedule>>,
    pub exceptions: Option<Vec<AvailabilityException>>,
    pub timezone: Option<String>,
    pub max_sessions_per_day: Option<u32>,
    pub is_available: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNotificationsRequest {
    pub email: Option<bool>,
    pub sms: Option<bool>,
    pub message: Option<bool>,
}

impl NotificationPreferences {
    pub fn merged(self, update: &UpdateNotificationsRequest) -> Self {
        NotificationPreferences {
            email: update.email.unwrap_or(self.email),
            sms: update.sms.unwrap_or(self.sms),
            message: update.message.unwrap_or(self.message),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
    pub confirm_password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateContactRequest {
    pub email: Option<String>,
    pub telephone: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_max_sessions() -> u32 {
    6
}

fn deserialize_calendar_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
    let raw = String::deserialize(deserializer)?;
    crate::services::availability::parse_calendar_date(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_availability_defaults_from_empty_document() {
        let availability: Availability = serde_json::from_value(json!({})).unwrap();
        assert_eq!(availability, Availability::default());
        assert_eq!(availability.timezone, "Africa/Kigali");
        assert_eq!(availability.max_sessions_per_day, 6);
    }

    #[test]
    fn test_exception_accepts_timestamp_dates() {
        let availability: Availability = serde_json::from_value(json!({
            "weeklySchedule": [
                { "day": "monday", "slots": [{ "start": "09:00", "end": "10:00" }] }
            ],
            "exceptions": [
                { "date": "2025-03-03T00:00:00.000Z", "reason": "Conference" }
            ]
        }))
        .unwrap();

        let exception = &availability.exceptions[0];
        assert_eq!(exception.date, NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());
        assert!(!exception.is_available);
        assert!(availability.weekly_schedule[0].slots[0].is_virtual);
        assert!(availability.day(DayOfWeek::Monday).is_some());
        assert!(availability.day(DayOfWeek::Friday).is_none());
    }

    #[test]
    fn test_notification_merge_keeps_unset_flags() {
        let update: UpdateNotificationsRequest = serde_json::from_value(json!({ "sms": true })).unwrap();
        let merged = NotificationPreferences::default().merged(&update);
        assert!(merged.email);
        assert!(merged.sms);
        assert!(merged.message);
    }

    #[test]
    fn test_unknown_day_is_rejected() {
        let parsed = serde_json::from_value::<DaySchedule>(json!({ "day": "funday", "slots": [] }));
        assert!(parsed.is_err());
    }
}
