//! Resumption records.
//!
//! A record is the minimal state a new host session needs to find a process
//! started by a previous one: the kind-tag of the task and the OS process id.
//! The JSON layout is shared with the scheduler's own persistence file, so the
//! key names and their order are fixed:
//!
//! ```text
//! {
//!   "taskType": "<kind-tag>",
//!   "processId": "<integer>"
//! }
//! ```

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

use crate::errors::{Result, TaskError};

pub const KIND_KEY: &str = "taskType";
pub const PROCESS_ID_KEY: &str = "processId";

/// Process id written when there is nothing to resume.
pub const NO_PROCESS: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumptionRecord {
    #[serde(rename = "taskType")]
    pub kind: String,
    #[serde(
        rename = "processId",
        serialize_with = "pid_as_string",
        deserialize_with = "pid_from_string_or_int"
    )]
    pub process_id: i64,
}

impl ResumptionRecord {
    pub fn new(kind: impl Into<String>, pid: Option<u32>) -> Self {
        Self {
            kind: kind.into(),
            process_id: pid.map(i64::from).unwrap_or(NO_PROCESS),
        }
    }

    /// The live pid this record points at, if any.
    pub fn pid(&self) -> Option<u32> {
        u32::try_from(self.process_id).ok().filter(|pid| *pid > 0)
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        let record: Self = serde_json::from_str(text)?;
        if record.kind.trim().is_empty() {
            return Err(TaskError::InvalidRecord(format!("empty {}", KIND_KEY)));
        }
        Ok(record)
    }
}

fn pid_as_string<S: Serializer>(pid: &i64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&pid.to_string())
}

fn pid_from_string_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(pid) => Ok(pid),
        Raw::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("{} is not an integer: {:?}", PROCESS_ID_KEY, text))),
    }
}
