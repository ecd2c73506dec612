//! Log events and their flat, ECS-style rendering.

use std::collections::BTreeMap;
use std::error::Error;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::context;
use crate::env;

const ECS_VERSION: &str = "1.2.0";

/// Error details captured with an event.
///
/// `message` holds the formatted error text and `stack_trace` the formatted
/// cause chain. Both are computed once, at capture time, so later encoding
/// never has to touch the original error again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub error_type: Option<String>,
    pub message: String,
    pub stack_trace: Option<String>,
}

impl ErrorInfo {
    /// Capture `err`, formatting its cause chain immediately.
    pub fn from_error(err: &(dyn Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        ErrorInfo {
            error_type: None,
            message: err.to_string(),
            stack_trace: if chain.is_empty() { None } else { Some(chain.join("\n")) },
        }
    }
}

/// One emitted log call, before context merging.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub logger: String,
    pub message: Option<String>,
    pub module_path: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub thread_name: Option<String>,
    pub thread_id: Option<String>,
    pub error: Option<ErrorInfo>,
    /// Caller-supplied fields, merged into the record last.
    pub extra: BTreeMap<String, Value>,
}

impl LogEvent {
    /// Start an event at the current instant on the current thread, with
    /// empty extras.
    pub fn now(level: impl Into<String>, logger: impl Into<String>) -> Self {
        let thread = std::thread::current();
        LogEvent {
            timestamp: Utc::now(),
            level: level.into(),
            logger: logger.into(),
            message: None,
            module_path: None,
            file: None,
            line: None,
            thread_name: thread.name().map(str::to_string),
            thread_id: Some(format!("{:?}", thread.id())),
            error: None,
            extra: BTreeMap::new(),
        }
    }
}

/// A log event rendered to its flat dotted-key mapping, ready for encoding
/// and transport.
///
/// Keys are kept sorted so encodings are deterministic. Rendering never
/// fails: every value is representable JSON by construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StructuredRecord {
    fields: BTreeMap<String, Value>,
}

impl StructuredRecord {
    /// Render `event` together with process identity and the ambient
    /// context snapshot of the current unit of work.
    ///
    /// Context namespaces (`http.request.*`/`url.path`, `user.*`, `job.*`)
    /// are only present when the corresponding slot is set; an absent slot
    /// contributes no keys at all. Caller extras are merged last and win on
    /// key collisions.
    pub fn from_event(event: &LogEvent) -> Self {
        let mut fields = BTreeMap::new();
        let app_name = env::app_name();

        fields.insert("@timestamp".to_string(), Value::String(format_timestamp(&event.timestamp)));
        fields.insert("ecs.version".to_string(), Value::String(ECS_VERSION.to_string()));

        let mut tags = Vec::new();
        if !app_name.is_empty() {
            tags.push(Value::String(app_name.clone()));
        }
        fields.insert("tags".to_string(), Value::Array(tags));

        fields.insert("log.logger".to_string(), Value::String(event.logger.clone()));
        fields.insert("log.level".to_string(), Value::String(event.level.clone()));
        if let Some(file) = &event.file {
            fields.insert("log.origin.file.name".to_string(), Value::String(file.clone()));
        }
        if let Some(line) = event.line {
            fields.insert("log.origin.file.line".to_string(), Value::from(line));
        }
        if let Some(module_path) = &event.module_path {
            fields.insert("log.origin.function".to_string(), Value::String(module_path.clone()));
        }
        if let Some(message) = &event.message {
            fields.insert("message".to_string(), Value::String(message.clone()));
        }

        fields.insert("process.pid".to_string(), Value::from(std::process::id()));
        fields.insert("process.name".to_string(), Value::String(env::process_name().to_string()));
        fields.insert("process.uptime".to_string(), Value::from(env::uptime_secs()));
        if let Some(thread_id) = &event.thread_id {
            fields.insert("process.thread.id".to_string(), Value::String(thread_id.clone()));
        }
        if let Some(thread_name) = &event.thread_name {
            fields.insert("process.thread.name".to_string(), Value::String(thread_name.clone()));
        }

        fields.insert("labels.hostname".to_string(), Value::String(env::hostname().to_string()));
        fields.insert("labels.app_name".to_string(), Value::String(app_name));
        fields.insert("labels.app_version".to_string(), Value::String(env::app_version()));

        if let Some(error) = &event.error {
            if let Some(error_type) = &error.error_type {
                fields.insert("error.type".to_string(), Value::String(error_type.clone()));
            }
            fields.insert("error.message".to_string(), Value::String(error.message.clone()));
            if let Some(stack) = &error.stack_trace {
                fields.insert("error.stack_trace".to_string(), Value::String(stack.clone()));
            }
        }

        if let Some(request) = context::get_request_info() {
            fields.insert("http.request.id".to_string(), Value::String(request.id));
            fields.insert("http.request.method".to_string(), Value::String(request.method));
            fields.insert("url.path".to_string(), Value::String(request.path));
        }
        if let Some(user) = context::get_user_info() {
            fields.insert("user.id".to_string(), Value::String(user.id));
            fields.insert("user.name".to_string(), Value::String(user.username));
            fields.insert("user.is_authenticated".to_string(), Value::Bool(user.is_authenticated));
        }
        if let Some(job) = context::get_job_info() {
            fields.insert("job.id".to_string(), Value::String(job.id));
            fields.insert("job.name".to_string(), Value::String(job.name));
        }

        for (key, value) in &event.extra {
            fields.insert(key.clone(), coerce_extra(key, value));
        }

        StructuredRecord { fields }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ`, always UTC, always millisecond precision.
fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Coercion for caller-supplied extras: nulls and strings pass through;
/// booleans and numbers are stringified only under `labels.` keys (labels
/// are a flat string map on the collector side); arrays and objects are
/// carried as their compact JSON text.
fn coerce_extra(key: &str, value: &Value) -> Value {
    match value {
        Value::Null | Value::String(_) => value.clone(),
        Value::Bool(b) => {
            if key.starts_with("labels.") {
                Value::String(b.to_string())
            } else {
                value.clone()
            }
        }
        Value::Number(n) => {
            if key.starts_with("labels.") {
                Value::String(n.to_string())
            } else {
                value.clone()
            }
        }
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
    }
}
