//! Wire types exchanged with the coordinator and the URLs they travel on.

use std::fmt;

use reqwest::Url;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, WorkerError};

/// Identity of one worker process, fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// One unit of work handed out by the coordinator.
///
/// Only `uuid` is interpreted here; the full object is kept as received and
/// passed to the engine untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    uuid: String,
    body: Map<String, Value>,
}

impl Job {
    pub fn from_value(value: Value) -> std::result::Result<Self, String> {
        let Value::Object(body) = value else {
            return Err("job is not a JSON object".to_string());
        };
        let uuid = match body.get("uuid") {
            Some(Value::String(uuid)) if !uuid.is_empty() => uuid.clone(),
            Some(_) => return Err("job uuid is not a non-empty string".to_string()),
            None => return Err("job has no uuid".to_string()),
        };
        Ok(Self { uuid, body })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.body.clone()).to_string()
    }
}

impl<'de> Deserialize<'de> for Job {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Job::from_value(value).map_err(D::Error::custom)
    }
}

impl Serialize for Job {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

/// Coordinator answer to a work request. `work` is absent when the queue is empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkResponse {
    #[serde(default)]
    pub work: Option<Job>,
}

impl WorkResponse {
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| WorkerError::MalformedResponse(e.to_string()))
    }

    pub fn empty() -> Self {
        Self { work: None }
    }

    pub fn with_job(job: Job) -> Self {
        Self { work: Some(job) }
    }
}

/// Opaque engine output for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkResult(pub Value);

impl WorkResult {
    /// Compact JSON text. The same string is stored locally and posted.
    pub fn to_json(&self) -> String {
        self.0.to_string()
    }
}

fn api_url(base: &str, version: u32, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| WorkerError::Config(format!("invalid coordinator url {base}: {e}")))?;
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            WorkerError::Config(format!("coordinator url {base} cannot have a path"))
        })?;
        path.pop_if_empty()
            .push("api")
            .push(&format!("v{version}"))
            .extend(segments);
    }
    Ok(url)
}

/// `{base}/api/v{version}/work?worker_id={worker_id}`
pub fn work_url(base: &str, version: u32, worker_id: &WorkerId) -> Result<Url> {
    let mut url = api_url(base, version, &["work"])?;
    url.query_pairs_mut()
        .append_pair("worker_id", &worker_id.to_string());
    Ok(url)
}

/// `{base}/api/v{version}/work/results/{worker_id}/{job_uuid}`
pub fn results_url(base: &str, version: u32, worker_id: &WorkerId, job_uuid: &str) -> Result<Url> {
    let worker_id = worker_id.to_string();
    api_url(base, version, &["work", "results", &worker_id, job_uuid])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn worker_ids_are_unique() {
        let ids: std::collections::HashSet<WorkerId> =
            (0..10_000).map(|_| WorkerId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn worker_id_displays_hyphenated() {
        let id = WorkerId::generate();
        let text = id.to_string();
        assert_eq!(text.len(), 36);
        assert_eq!(text.parse::<Uuid>().unwrap(), *id.as_uuid());
    }

    #[test]
    fn response_with_work() {
        let resp =
            WorkResponse::parse(r#"{"work": {"uuid": "J1", "target": "10.0.0.1", "port": 22}}"#)
                .unwrap();
        let job = resp.work.unwrap();
        assert_eq!(job.uuid(), "J1");
        assert_eq!(job.body()["target"], json!("10.0.0.1"));
        assert_eq!(job.body()["port"], json!(22));
    }

    #[test]
    fn response_without_work_is_empty_queue() {
        assert!(WorkResponse::parse("{}").unwrap().work.is_none());
        assert!(WorkResponse::parse(r#"{"work": null}"#).unwrap().work.is_none());
        assert!(WorkResponse::parse(r#"{"status": "idle"}"#).unwrap().work.is_none());
    }

    #[test]
    fn malformed_responses_are_errors() {
        let bodies = [
            "",
            "not json",
            r#"{"work": {"target": "x"}}"#,
            r#"{"work": {"uuid": 7}}"#,
            r#"{"work": "J1"}"#,
        ];
        for body in bodies {
            let err = WorkResponse::parse(body).unwrap_err();
            assert!(matches!(err, WorkerError::MalformedResponse(_)), "body {body:?}");
        }
    }

    #[test]
    fn job_serializes_unmodified() {
        let raw = json!({"uuid": "abc", "target": "host", "opts": {"timeout": 3}});
        let job = Job::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&job).unwrap(), raw);
    }

    #[test]
    fn result_json_is_compact() {
        let result = WorkResult(json!({"score": 42}));
        assert_eq!(result.to_json(), r#"{"score":42}"#);
    }

    #[test]
    fn work_url_carries_worker_id() {
        let id = WorkerId::generate();
        let url = work_url("https://127.0.0.1:8000", 1, &id).unwrap();
        assert_eq!(
            url.as_str(),
            format!("https://127.0.0.1:8000/api/v1/work?worker_id={id}")
        );
    }

    #[test]
    fn results_url_carries_job_uuid() {
        let id = WorkerId::generate();
        let url = results_url("https://scanner.example:8443/", 2, &id, "abc").unwrap();
        assert_eq!(
            url.as_str(),
            format!("https://scanner.example:8443/api/v2/work/results/{id}/abc")
        );
    }

    #[test]
    fn results_url_escapes_job_uuid() {
        let id = WorkerId::generate();
        let url = results_url("https://127.0.0.1:8000", 1, &id, "a/b c").unwrap();
        assert!(url.path().ends_with("/a%2Fb%20c"));
    }
}
