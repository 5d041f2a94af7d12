use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

// --- DATA STRUCTURES ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Aborted,
    TimedOut,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Aborted => "ABORTED",
            JobStatus::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// Model families the engine knows how to run. Anything else deserializes to
/// `Unknown` and executes on the test image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Yolo,
    Rcnn,
    Test,
    #[serde(other)]
    Unknown,
}

impl Architecture {
    pub fn slug(&self) -> &'static str {
        match self {
            Architecture::Yolo => "yolo",
            Architecture::Rcnn => "rcnn",
            Architecture::Test | Architecture::Unknown => "test",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub architecture: Architecture,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The immutable payload of one inference request. Frozen at enqueue time;
/// the full JSON encoding is handed to the container as its last argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    pub user_email: String,
    pub call_cost: i64,
    #[serde(rename = "resultUUID")]
    pub result_request_id: String,
    pub model: ModelDescriptor,
    #[serde(default)]
    pub dataset: serde_json::Value,
    #[serde(default)]
    pub images: Vec<serde_json::Value>,
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
}

/// The completion record a container emits on stdout, fished out of the log
/// stream by the extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReturnData {
    pub user_email: String,
    pub call_cost: i64,
    #[serde(rename = "resultUUID")]
    pub result_request_id: String,
    pub images: Vec<serde_json::Value>,
    pub results: Vec<serde_json::Value>,
}

/// What travels the queue list. Immutable once enqueued, so acknowledging by
/// re-serialized value is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub data: JobData,
}

/// The mutable, queue-side view of a job used for status polling. Owned by
/// the dispatcher while the job runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub data: JobData,
}

impl JobRecord {
    pub fn new(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            status: JobStatus::Queued,
            progress: 0,
            error: None,
            billing_error: None,
            exit_code: None,
            created_at: Utc::now(),
            finished_at: None,
            data: job.data.clone(),
        }
    }

    /// Progress only moves forward. Checkpoints are advisory, never control flow.
    pub fn advance(&mut self, pct: u8) {
        if pct > self.progress {
            self.progress = pct.min(100);
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Aborted | JobStatus::TimedOut
        )
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub token: i64,
}

/// Body of POST /jobs.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    #[validate(email(message = "userEmail must be a valid address"))]
    pub user_email: String,
    #[validate(range(min = 0, message = "callCost cannot be negative"))]
    pub call_cost: i64,
    pub model: ModelDescriptor,
    #[serde(default)]
    pub dataset: serde_json::Value,
    #[validate(length(min = 1, message = "at least one image is required"))]
    pub images: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_never_moves_backwards() {
        let job = Job {
            id: "j-1".to_string(),
            name: "inference".to_string(),
            data: serde_json::from_value(serde_json::json!({
                "userEmail": "a@b.com",
                "callCost": 1,
                "resultUUID": "u1",
                "model": { "architecture": "test" }
            }))
            .unwrap(),
        };
        let mut record = JobRecord::new(&job);
        record.advance(40);
        record.advance(20);
        assert_eq!(record.progress, 40);
        record.advance(60);
        assert_eq!(record.progress, 60);
    }

    #[test]
    fn status_wire_format_is_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&JobStatus::TimedOut).unwrap(),
            "\"TIMED_OUT\""
        );
        assert_eq!(
            serde_json::from_str::<JobStatus>("\"ABORTED\"").unwrap(),
            JobStatus::Aborted
        );
    }

    #[test]
    fn unrecognized_architecture_deserializes_to_unknown() {
        let model: ModelDescriptor =
            serde_json::from_value(serde_json::json!({ "architecture": "resnet" })).unwrap();
        assert_eq!(model.architecture, Architecture::Unknown);
        assert_eq!(model.architecture.slug(), "test");
    }

    #[test]
    fn job_data_keeps_wire_field_names() {
        let data: JobData = serde_json::from_value(serde_json::json!({
            "userEmail": "a@b.com",
            "callCost": 5,
            "resultUUID": "u1",
            "model": { "architecture": "yolo", "weights": "v8n" },
            "dataset": { "name": "set-1" },
            "images": [{ "id": "img-1" }],
            "results": []
        }))
        .unwrap();
        assert_eq!(data.user_email, "a@b.com");
        assert_eq!(data.result_request_id, "u1");

        let encoded = serde_json::to_value(&data).unwrap();
        assert!(encoded.get("resultUUID").is_some());
        assert!(encoded.get("userEmail").is_some());
    }
}
