//! JSON exchange format between the build step and the worker process.
//!
//! Version 2 wraps results in an object that repeats the protocol version.
//! Version 1 workers answer with a bare array of results; both are accepted.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ProjectKind;
use crate::error::PipelineError;

pub const PROTOCOL_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    pub protocol_version: u32,
    pub references: Vec<String>,
    pub project_kind: ProjectKind,
    pub edition: String,
    pub items: Vec<WorkerItem>,
}

/// One function call to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerItem {
    pub declaring_type_source_text: String,
    pub namespace: String,
    pub type_name: String,
    /// Path of the type inside its declaring source (`inner::Table`).
    #[serde(default)]
    pub type_path: String,
    pub method_name: String,
    pub parameter_type_names: Vec<String>,
    pub parameter_values: Vec<String>,
    pub timeout_ms: u64,
    pub return_type_full_name: String,
    #[serde(default)]
    pub is_async: bool,
    pub invocation_id: String,
}

impl WorkerItem {
    /// Path used to call the function from the declaring source's module root.
    pub fn call_path(&self) -> String {
        let type_path = if self.type_path.is_empty() {
            &self.type_name
        } else {
            &self.type_path
        };
        format!("{type_path}::{}", self.method_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorCode {
    Timeout,
    Panic,
    Compile,
    Aborted,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "TIMEOUT",
            Self::Panic => "PANIC",
            Self::Compile => "COMPILE",
            Self::Aborted => "ABORTED",
            Self::Unknown => "UNKNOWN",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResult {
    pub invocation_id: String,
    pub success: bool,
    /// `Debug` text of the returned value.
    #[serde(default)]
    pub serialized_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default)]
    pub memory_footprint_bytes: u64,
}

impl WorkerResult {
    pub fn success(
        invocation_id: impl Into<String>,
        serialized_value: impl Into<String>,
        execution_time_ms: u64,
        memory_footprint_bytes: u64,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            success: true,
            serialized_value: serialized_value.into(),
            error_message: None,
            error_code: None,
            execution_time_ms,
            memory_footprint_bytes,
        }
    }

    pub fn failure(
        invocation_id: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            success: false,
            serialized_value: String::new(),
            error_message: Some(message.into()),
            error_code: Some(code),
            execution_time_ms,
            memory_footprint_bytes: 0,
        }
    }

    pub fn is_timeout(&self) -> bool {
        !self.success && self.error_code == Some(ErrorCode::Timeout)
    }

    pub fn error_text(&self) -> &str {
        self.error_message.as_deref().unwrap_or("unknown error")
    }

    /// Same result attributed to another call site.
    pub fn for_invocation(&self, invocation_id: &str) -> Self {
        Self {
            invocation_id: invocation_id.to_string(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResponse {
    pub protocol_version: u32,
    pub results: Vec<WorkerResult>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ResponseEnvelope {
    Versioned(WorkerResponse),
    Legacy(Vec<WorkerResult>),
}

/// Parses either response shape, rejecting versions newer than ours.
pub fn parse_response(text: &str, path: &Path) -> Result<WorkerResponse, PipelineError> {
    let envelope: ResponseEnvelope =
        serde_json::from_str(text).map_err(|err| PipelineError::InvalidResponse {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    let response = match envelope {
        ResponseEnvelope::Versioned(response) => response,
        ResponseEnvelope::Legacy(results) => WorkerResponse {
            protocol_version: 1,
            results,
        },
    };
    if response.protocol_version > PROTOCOL_VERSION {
        return Err(PipelineError::UnsupportedProtocol {
            found: response.protocol_version,
            supported: PROTOCOL_VERSION,
        });
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_array_responses_are_accepted() {
        let response = parse_response(
            r#"[{"invocationId":"a1","success":true,"serializedValue":"55","executionTimeMs":3,"memoryFootprintBytes":0}]"#,
            Path::new("response.json"),
        )
        .expect("legacy response parses");
        assert_eq!(response.protocol_version, 1);
        assert_eq!(response.results[0].serialized_value, "55");
    }

    #[test]
    fn newer_protocol_versions_are_rejected() {
        let err = parse_response(
            r#"{"protocolVersion":3,"results":[]}"#,
            Path::new("response.json"),
        ).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedProtocol { found: 3, .. }));
    }

    #[test]
    fn unknown_error_codes_do_not_break_parsing() {
        let response = parse_response(
            r#"{"protocolVersion":2,"results":[{"invocationId":"b","success":false,"errorCode":"OOM","errorMessage":"out of memory"}]}"#,
            Path::new("response.json"),
        )
        .expect("response parses");
        assert_eq!(response.results[0].error_code, Some(ErrorCode::Unknown));
        assert_eq!(response.results[0].execution_time_ms, 0);
    }

    #[test]
    fn requests_use_camel_case_fields() {
        let request = WorkerRequest {
            protocol_version: PROTOCOL_VERSION,
            references: Vec::new(),
            project_kind: ProjectKind::Lib,
            edition: "2021".into(),
            items: Vec::new(),
        };
        let json = serde_json::to_value(&request).expect("serialises");
        assert_eq!(json["protocolVersion"], 2);
        assert_eq!(json["projectKind"], "lib");
    }
}
