use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort generation. Everything else is reported as a diagnostic.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to launch worker `{program}`")]
    WorkerSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("worker exited with {status}{}", stderr_tail(.stderr))]
    WorkerExit {
        status: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("worker did not write a response to {}", .0.display())]
    MissingResponse(PathBuf),
    #[error("worker response {} is invalid: {reason}", .path.display())]
    InvalidResponse { path: PathBuf, reason: String },
    #[error("worker speaks protocol version {found}, newest supported is {supported}")]
    UnsupportedProtocol { found: u32, supported: u32 },
    #[error("generation cancelled")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Whether the failure came from the worker process rather than this side.
    pub fn is_process_error(&self) -> bool {
        matches!(
            self,
            Self::WorkerSpawn { .. }
                | Self::WorkerExit { .. }
                | Self::MissingResponse(_)
                | Self::InvalidResponse { .. }
                | Self::UnsupportedProtocol { .. }
        )
    }
}

fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let lines = trimmed.lines().collect::<Vec<_>>();
    let tail = &lines[lines.len().saturating_sub(5)..];
    format!(": {}", tail.join(" | "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_errors_include_the_end_of_stderr() {
        let err = PipelineError::WorkerExit {
            status: "exit status: 1".into(),
            code: Some(1),
            stderr: "line one\nline two\n".into(),
        };
        assert_eq!(err.to_string(), "worker exited with exit status: 1: line one | line two");
        assert!(err.is_process_error());
        assert!(!PipelineError::Cancelled.is_process_error());
    }
}
