use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::queue::JobQueue;
use crate::storage::ObjectStore;

/// Shared handler context, bound once at startup.
///
/// A client is `None` only when it could not be constructed; `/readyz` reports
/// that and the job endpoints answer 503 instead of touching it.
#[derive(Clone, Default)]
pub struct AppState {
    pub queue: Option<Arc<dyn JobQueue>>,
    pub store: Option<Arc<dyn ObjectStore>>,
}

impl AppState {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            queue: Some(queue),
            store: Some(store),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.queue.is_some() && self.store.is_some()
    }
}

/// Body of `POST /jobs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobRequest {
    #[serde(default)]
    pub text: String,
}

/// What travels through the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMessage {
    pub id: String,
    pub text: String,
}

/// What the worker stores and `GET /jobs/{id}` returns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub id: String,
    pub text: String,
    pub output: String,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub id: String,
}

impl JobMessage {
    pub fn new(id: impl Into<String>, request: JobRequest) -> Self {
        Self {
            id: id.into(),
            text: request.text,
        }
    }
}

impl JobResult {
    pub fn new(message: JobMessage, output: String, processed_at: DateTime<Utc>) -> Self {
        Self {
            id: message.id,
            text: message.text,
            output,
            processed_at,
        }
    }
}

/// Object key under which the result for `id` is stored.
pub fn result_key(id: &str) -> String {
    format!("jobs/{}.json", id)
}

/// Decode a `POST /jobs` body.
///
/// Only the first JSON value is read; bytes after it are ignored. `null`
/// is an empty request, and the `text` key falls back to a case-insensitive
/// match when no exact key is present. Anything that is not an object or
/// `null` is rejected.
pub fn decode_request(body: &[u8]) -> serde_json::Result<JobRequest> {
    let value = serde_json::Deserializer::from_slice(body)
        .into_iter::<Value>()
        .next()
        .unwrap_or_else(|| Err(serde_json::Error::custom("empty request body")))?;

    let fields = match value {
        Value::Null => return Ok(JobRequest::default()),
        Value::Object(fields) => fields,
        other => return Err(not_an_object(&other)),
    };

    let text = fields.get("text").or_else(|| {
        fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("text"))
            .map(|(_, value)| value)
    });

    match text {
        None => Ok(JobRequest::default()),
        Some(value) => {
            let text: Option<String> = serde_json::from_value(value.clone())?;
            Ok(JobRequest {
                text: text.unwrap_or_default(),
            })
        }
    }
}

pub fn encode_message(message: &JobMessage) -> serde_json::Result<String> {
    serde_json::to_string(message)
}

pub fn decode_message(body: &str) -> serde_json::Result<JobMessage> {
    from_object(serde_json::from_str(body)?)
}

pub fn encode_result(result: &JobResult) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(result)
}

pub fn decode_result(body: &[u8]) -> serde_json::Result<JobResult> {
    from_object(serde_json::from_slice(body)?)
}

/// Derived structs also accept JSON arrays; the wire shapes are objects only.
fn from_object<T: DeserializeOwned>(value: Value) -> serde_json::Result<T> {
    if value.is_object() {
        serde_json::from_value(value)
    } else {
        Err(not_an_object(&value))
    }
}

fn not_an_object(value: &Value) -> serde_json::Error {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    };
    serde_json::Error::custom(format!("expected a JSON object, found {}", found))
}
