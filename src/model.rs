use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

/// A registered account. `password` holds the PHC hash string, never plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password: String,
}

/// Owner reference as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Owner {
    pub id: i64,
    pub username: String,
}

/// Registration request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Scheduling and status metadata shared by tasks and subtasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskFields {
    pub title: Option<String>,
    #[serde(deserialize_with = "deserialize_date")]
    pub created_date: Option<NaiveDate>,
    #[serde(deserialize_with = "deserialize_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(deserialize_with = "deserialize_date")]
    pub due_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: bool,
    pub completed: bool,
    pub archived: bool,
}

impl TaskFields {
    pub fn titled(title: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            ..Self::default()
        }
    }

    /// Returns display icon: x=completed, -=archived, !=priority, .=open
    pub fn icon(&self) -> &'static str {
        if self.completed {
            "x"
        } else if self.archived {
            "-"
        } else if self.priority {
            "!"
        } else {
            "."
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: i64,
    #[serde(flatten)]
    pub fields: TaskFields,
    pub user: Owner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subtask {
    pub id: i64,
    #[serde(rename = "parentTaskID")]
    pub parent_task_id: i64,
    #[serde(flatten)]
    pub fields: TaskFields,
    pub user: Owner,
}

/// Task as submitted by a client. Any `user` in the payload is ignored.
///
/// An absent or zero `id` means "assign a new one".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskBody {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(flatten)]
    pub fields: TaskFields,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubtaskBody {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default, rename = "parentTaskID")]
    pub parent_task_id: i64,
    #[serde(flatten)]
    pub fields: TaskFields,
}

/// Parse a calendar date sent by a client.
///
/// Accepts a bare `YYYY-MM-DD` or a full timestamp as browsers emit from
/// `Date.toISOString()`. A timestamp with an offset is converted to UTC
/// before the date is taken; one without an offset keeps its own date.
pub fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    let raw = raw.trim();
    if let Ok(date) = raw.parse::<NaiveDate>() {
        return Ok(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc).date_naive());
    }
    raw.parse::<NaiveDateTime>()
        .map(|ts| ts.date())
        .map_err(|_| format!("invalid date '{raw}'"))
}

fn deserialize_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_date(&raw).map(Some).map_err(de::Error::custom),
        None => Ok(None),
    }
}

/// Normalizes a client-supplied id: zero and negatives mean "not yet stored".
pub fn assigned_id(id: Option<i64>) -> Option<i64> {
    id.filter(|&id| id > 0)
}
