use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Declares a string-backed option enum: a fixed set of known values plus an
/// `Other` variant so stored values outside the option list survive a
/// read-modify-write cycle untouched.
macro_rules! option_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($variant,)+
            Other(String),
        }

        impl $name {
            pub const KNOWN: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $text,)+
                    Self::Other(text) => text.as_str(),
                }
            }

            pub fn is_known(&self) -> bool {
                !matches!(self, Self::Other(_))
            }
        }

        impl From<String> for $name {
            fn from(text: String) -> Self {
                match text.as_str() {
                    $($text => Self::$variant,)+
                    _ => Self::Other(text),
                }
            }
        }

        impl From<&str> for $name {
            fn from(text: &str) -> Self {
                Self::from(text.to_string())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                match value {
                    $name::Other(text) => text,
                    known => known.as_str().to_string(),
                }
            }
        }

        impl FromStr for $name {
            type Err = Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self::from(s))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

option_enum! {
    /// Task progress. Matching against it is case-sensitive.
    pub enum Status {
        Completed => "completed",
        InProgress => "in progress",
        Pending => "pending",
        NotStarted => "not started",
    }
}

option_enum! {
    pub enum Project {
        MyGraPari => "MyGraPARI",
        Om => "OM",
        LrtSumsel => "LRT_Sumsel",
    }
}

option_enum! {
    pub enum Deploy {
        Local => "Local",
        Dev => "Dev",
        Production => "Production",
    }
}

impl Status {
    pub fn label(&self) -> &str {
        match self {
            Self::Completed => "Completed",
            Self::InProgress => "In Progress",
            Self::Pending => "Pending",
            Self::NotStarted => "Not started",
            Self::Other(text) => text.as_str(),
        }
    }

    /// Resolves a form choice given either as the stored value or as its label.
    pub fn from_choice(text: &str) -> Option<Self> {
        let status = Self::from(text);
        if status.is_known() {
            return Some(status);
        }
        [Self::Completed, Self::InProgress, Self::Pending, Self::NotStarted]
            .into_iter()
            .find(|known| known.label() == text)
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::NotStarted
    }
}

/// Opaque record identity. Assigned once by the editor, never by the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKey(String);

impl TaskKey {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskKey {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl From<String> for TaskKey {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub key: TaskKey,

    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Project>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<Deploy>,

    /// Calendar date as stored, normally `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TaskRecord {
    /// Fields searched by free text, in display order. Absent fields are skipped.
    pub fn text_fields(&self) -> impl Iterator<Item = &str> {
        [
            Some(self.name.as_str()),
            Some(self.description.as_str()),
            self.project.as_ref().map(Project::as_str),
            self.status.as_ref().map(Status::as_str),
            self.note.as_deref(),
            self.deploy.as_ref().map(Deploy::as_str),
        ]
        .into_iter()
        .flatten()
    }

    pub fn deadline_date(&self) -> Option<NaiveDate> {
        self.deadline.as_deref().and_then(parse_calendar_date)
    }
}

/// Reads an explicit `null` the same as a missing field.
fn null_as_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Parses a stored deadline into a calendar day. Accepts a bare date as well
/// as a timestamp, whose time of day is dropped.
pub fn parse_calendar_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, DATE_FORMAT) {
        return Some(date);
    }
    if let Ok(stamp) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(stamp.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|stamp| stamp.date())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_option_values_round_trip() {
        let raw = r#"{
            "key": "k1",
            "name": "A",
            "description": "d",
            "project": "Billing",
            "deploy": "Dev",
            "deadline": "2024-01-01",
            "status": "blocked",
            "owner": "ops"
        }"#;

        let record: TaskRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.project, Some(Project::Other("Billing".to_string())));
        assert_eq!(record.deploy, Some(Deploy::Dev));
        assert_eq!(record.status, Some(Status::Other("blocked".to_string())));
        assert_eq!(record.extra.get("owner"), Some(&serde_json::json!("ops")));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["project"], "Billing");
        assert_eq!(back["status"], "blocked");
        assert_eq!(back["owner"], "ops");
        assert!(back.get("note").is_none());
    }

    #[test]
    fn status_matching_is_case_sensitive() {
        assert_eq!(Status::from("pending"), Status::Pending);
        assert_eq!(Status::from("Pending"), Status::Other("Pending".to_string()));
        assert_eq!(Status::from("in progress").label(), "In Progress");
    }

    #[test]
    fn text_fields_skip_absent_values() {
        let record: TaskRecord =
            serde_json::from_str(r#"{"key":"k","name":"Deploy API","description":"ship"}"#)
                .unwrap();
        let fields: Vec<&str> = record.text_fields().collect();
        assert_eq!(fields, vec!["Deploy API", "ship"]);
    }

    #[test]
    fn null_text_fields_read_as_empty() {
        let record: TaskRecord = serde_json::from_str(
            r#"{"key":"b","name":"B","description":null,"status":"pending"}"#,
        )
        .unwrap();
        assert_eq!(record.name, "B");
        assert_eq!(record.description, "");
        assert_eq!(record.status, Some(Status::Pending));
        assert!(record.extra.is_empty());

        let record: TaskRecord =
            serde_json::from_str(r#"{"key":"c","name":null}"#).unwrap();
        assert_eq!(record.name, "");
        assert_eq!(record.text_fields().collect::<Vec<_>>(), vec!["", ""]);
    }

    #[test]
    fn calendar_dates_ignore_time_of_day() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(parse_calendar_date("2024-01-01"), Some(day));
        assert_eq!(parse_calendar_date("2024-01-01T17:45:00"), Some(day));
        assert_eq!(parse_calendar_date("2024-01-01T23:10:00+07:00"), Some(day));
        assert_eq!(parse_calendar_date("01/01/2024"), None);
        assert_eq!(parse_calendar_date(""), None);
    }

    #[test]
    fn generated_keys_are_unique() {
        assert_ne!(TaskKey::generate(), TaskKey::generate());
    }
}
