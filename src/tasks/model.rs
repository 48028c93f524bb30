//! Task wire types: dispatched tasks, produced results, and reports.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::service::FieldType;

/// A binary payload with its declared content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskData {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(rename = "type")]
    pub content_type: String,
}

impl TaskData {
    pub fn new(data: impl Into<Vec<u8>>, content_type: FieldType) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.as_str().to_string(),
        }
    }

    pub fn json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_vec(value)?, FieldType::ApplicationJson))
    }

    pub fn field_type(&self) -> Option<FieldType> {
        self.content_type.parse().ok()
    }
}

/// Field name → payload.
pub type FieldMap = BTreeMap<String, TaskData>;

/// An input as dispatched: inline bytes or a reference into storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskPayload {
    Inline {
        #[serde(rename = "type")]
        content_type: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    Stored {
        #[serde(rename = "type")]
        content_type: String,
        handle: String,
    },
}

impl TaskPayload {
    pub fn content_type(&self) -> &str {
        match self {
            Self::Inline { content_type, .. } | Self::Stored { content_type, .. } => content_type,
        }
    }
}

impl From<TaskData> for TaskPayload {
    fn from(data: TaskData) -> Self {
        Self::Inline {
            content_type: data.content_type,
            data: data.data,
        }
    }
}

/// One unit of dispatched work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(default = "Uuid::new_v4")]
    pub task_id: Uuid,
    pub data_in: BTreeMap<String, TaskPayload>,
    /// Where the engine wants the report delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl Task {
    pub fn new(data_in: BTreeMap<String, TaskPayload>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            data_in,
            callback_url: None,
        }
    }

    /// Convenience for a task with a single inline input.
    pub fn inline(field: impl Into<String>, data: TaskData) -> Self {
        let mut data_in = BTreeMap::new();
        data_in.insert(field.into(), TaskPayload::from(data));
        Self::new(data_in)
    }

    pub fn with_callback(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }
}

/// Output of a completed task, already persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub outputs: FieldMap,
    /// Storage handle of each output, keyed like `outputs`.
    pub handles: BTreeMap<String, String>,
}

/// Final state of a task as reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Finished,
    Error,
}

/// Reference to a stored output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRef {
    pub handle: String,
    #[serde(rename = "type")]
    pub content_type: String,
}

/// What the dispatching engine receives once a task is done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: Uuid,
    pub status: TaskStatus,
    #[serde(default)]
    pub data_out: BTreeMap<String, OutputRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub reported_at: DateTime<Utc>,
}

impl TaskReport {
    pub fn finished(result: &TaskResult) -> Self {
        let data_out = result
            .handles
            .iter()
            .filter_map(|(field, handle)| {
                result.outputs.get(field).map(|data| {
                    (
                        field.clone(),
                        OutputRef {
                            handle: handle.clone(),
                            content_type: data.content_type.clone(),
                        },
                    )
                })
            })
            .collect();

        Self {
            task_id: result.task_id,
            status: TaskStatus::Finished,
            data_out,
            error: None,
            reported_at: Utc::now(),
        }
    }

    /// A failure report never carries outputs.
    pub fn failed(task_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Error,
            data_out: BTreeMap::new(),
            error: Some(error.into()),
            reported_at: Utc::now(),
        }
    }
}

/// Base64 (standard alphabet) for binary payloads in JSON bodies.
pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_untagged_picks_inline_or_stored() {
        let inline: TaskPayload =
            serde_json::from_str(r#"{"type": "image/png", "data": "AQID"}"#).unwrap();
        assert_eq!(
            inline,
            TaskPayload::Inline {
                content_type: "image/png".into(),
                data: vec![1, 2, 3]
            }
        );

        let stored: TaskPayload =
            serde_json::from_str(r#"{"type": "image/jpeg", "handle": "abc"}"#).unwrap();
        assert_eq!(stored.content_type(), "image/jpeg");
        assert!(matches!(stored, TaskPayload::Stored { ref handle, .. } if handle == "abc"));
    }

    #[test]
    fn bad_base64_is_rejected() {
        let parsed: Result<TaskPayload, _> =
            serde_json::from_str(r#"{"type": "image/png", "data": "not base64!"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn task_without_id_gets_one() {
        let task: Task = serde_json::from_str(
            r#"{"data_in": {"image": {"type": "image/png", "data": ""}}, "callback_url": "http://e/tasks/1"}"#,
        )
        .unwrap();
        assert!(!task.task_id.is_nil());
        assert_eq!(task.callback_url.as_deref(), Some("http://e/tasks/1"));
    }

    #[test]
    fn failed_report_has_no_outputs() {
        let report = TaskReport::failed(Uuid::new_v4(), "boom");
        assert_eq!(report.status, TaskStatus::Error);
        assert!(report.data_out.is_empty());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn finished_report_references_every_output() {
        let mut outputs = FieldMap::new();
        outputs.insert(
            "result".into(),
            TaskData::json(&serde_json::json!({"Red": 1})).unwrap(),
        );
        let mut handles = BTreeMap::new();
        handles.insert("result".to_string(), "h-1".to_string());
        let result = TaskResult {
            task_id: Uuid::new_v4(),
            outputs,
            handles,
        };

        let report = TaskReport::finished(&result);
        assert_eq!(report.status, TaskStatus::Finished);
        assert_eq!(report.data_out["result"].handle, "h-1");
        assert_eq!(report.data_out["result"].content_type, "application/json");
    }
}
