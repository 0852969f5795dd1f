// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    Complete,
    /// Waiting for its backoff retry; claimable once `run_at` passes
    FailedRetryable,
    FailedPermanent,
    Revoked,
    Expired,
}

impl TaskState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::FailedRetryable => "FAILED_RETRYABLE",
            Self::FailedPermanent => "FAILED_PERMANENT",
            Self::Revoked => "REVOKED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete | Self::FailedPermanent | Self::Revoked | Self::Expired
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETE" => Ok(Self::Complete),
            "FAILED_RETRYABLE" => Ok(Self::FailedRetryable),
            "FAILED_PERMANENT" => Ok(Self::FailedPermanent),
            "REVOKED" => Ok(Self::Revoked),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(format!("unknown task state: {}", other)),
        }
    }
}

/// A persisted unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub queue: String,
    pub task_name: String,
    pub args: Value,
    pub kwargs: Value,
    pub task_hash: String,
    pub verbose_name: Option<String>,
    pub owner: Option<String>,
    pub priority: i64,
    pub run_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub state: TaskState,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn label(&self) -> &str {
        self.verbose_name.as_deref().unwrap_or(&self.task_name)
    }

    pub fn attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Everything needed to insert a task record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub queue: String,
    pub task_name: String,
    pub args: Value,
    pub kwargs: Value,
    pub priority: i64,
    pub run_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_attempts: u32,
    pub owner: Option<String>,
    pub verbose_name: Option<String>,
    /// Drop unlocked, unfinished records with the same hash before inserting
    pub replace_existing: bool,
}

impl NewTask {
    pub fn new(queue: impl Into<String>, task_name: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            task_name: task_name.into(),
            args: json!([]),
            kwargs: json!({}),
            priority: 0,
            run_at: Utc::now(),
            expires_at: None,
            max_attempts: 1,
            owner: None,
            verbose_name: None,
            replace_existing: false,
        }
    }

    pub fn task_hash(&self) -> String {
        task_hash(&self.task_name, &self.args, &self.kwargs)
    }
}

/// De-duplication identity of a task: SHA-256 over its name and canonically serialized arguments.
pub fn task_hash(task_name: &str, args: &Value, kwargs: &Value) -> String {
    let params = canonical_json(&json!([args, kwargs]));
    let mut hasher = Sha256::new();
    hasher.update(task_name.as_bytes());
    hasher.update(params.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Serialize with object keys sorted, whatever map ordering serde_json was built with.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_ignores_key_order_but_not_values() {
        let a = task_hash("index_source", &json!(["s1"]), &json!({"a": 1, "b": 2}));
        let b = task_hash("index_source", &json!(["s1"]), &json!({"b": 2, "a": 1}));
        let c = task_hash("index_source", &json!(["s2"]), &json!({"a": 1, "b": 2}));
        let d = task_hash("download_media", &json!(["s1"]), &json!({"a": 1, "b": 2}));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"z": [1, {"b": true, "a": null}], "a": "x"});
        assert_eq!(canonical_json(&value), r#"{"a":"x","z":[1,{"a":null,"b":true}]}"#);
    }

    #[test]
    fn states_parse_back() {
        for state in [
            TaskState::Pending,
            TaskState::Running,
            TaskState::Complete,
            TaskState::FailedRetryable,
            TaskState::FailedPermanent,
            TaskState::Revoked,
            TaskState::Expired,
        ] {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
        assert!(TaskState::Expired.is_terminal());
        assert!(!TaskState::FailedRetryable.is_terminal());
    }
}
