use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::error::PipelineError;
use crate::execute::protocol::{PROTOCOL_VERSION, WorkerRequest, WorkerResult, parse_response};
use crate::pipeline::CancellationToken;
use crate::resolve::ExecutionRequest;

/// Runs cache misses in one worker process and collects its results.
pub struct Orchestrator {
    config: Arc<GeneratorConfig>,
}

impl Orchestrator {
    pub fn new(config: Arc<GeneratorConfig>) -> Self {
        Self { config }
    }

    pub fn build_request(&self, misses: &[&ExecutionRequest]) -> WorkerRequest {
        WorkerRequest {
            protocol_version: PROTOCOL_VERSION,
            references: self
                .config
                .references
                .iter()
                .map(|path| path.to_string_lossy().into_owned())
                .collect(),
            project_kind: self.config.project_kind,
            edition: self.config.edition.clone(),
            items: misses.iter().map(|request| request.to_worker_item()).collect(),
        }
    }

    /// Executes `misses`, returning results keyed by primary invocation id.
    ///
    /// Nothing is launched when there is nothing to run.
    pub fn execute(
        &self,
        misses: &[&ExecutionRequest],
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, WorkerResult>> {
        if misses.is_empty() {
            debug!("no cache misses, worker not launched");
            return Ok(HashMap::new());
        }
        cancel.check()?;

        let request_path = self.config.request_path();
        let response_path = self.config.response_path();
        let work_dir = self.config.work_dir();
        fs::create_dir_all(&work_dir)
            .with_context(|| format!("failed to create {}", work_dir.display()))?;
        if response_path.exists() {
            fs::remove_file(&response_path).with_context(|| {
                format!("failed to remove stale response {}", response_path.display())
            })?;
        }

        let request = self.build_request(misses);
        let json = serde_json::to_string_pretty(&request).context("failed to serialise request")?;
        fs::write(&request_path, json)
            .with_context(|| format!("failed to write {}", request_path.display()))?;

        let worker = self.config.worker_command();
        let mut args = worker
            .args
            .iter()
            .map(OsString::from)
            .collect::<Vec<_>>();
        args.push("--request".into());
        args.push(request_path.clone().into_os_string());
        args.push("--response".into());
        args.push(response_path.clone().into_os_string());

        info!(items = request.items.len(), worker = %worker, "launching worker");
        let started = Instant::now();
        let output = duct::cmd(&worker.program, args)
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|source| PipelineError::WorkerSpawn {
                program: worker.program.display().to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stdout.lines() {
            debug!(target: "precomp::worker", "{line}");
        }
        for line in stderr.lines() {
            debug!(target: "precomp::worker", stream = "stderr", "{line}");
        }

        if !output.status.success() {
            return Err(PipelineError::WorkerExit {
                status: output.status.to_string(),
                code: output.status.code(),
                stderr: stderr.into_owned(),
            }
            .into());
        }
        cancel.check()?;

        if !response_path.is_file() {
            return Err(PipelineError::MissingResponse(response_path).into());
        }
        let text = fs::read_to_string(&response_path).map_err(|err| {
            PipelineError::InvalidResponse {
                path: response_path.clone(),
                reason: err.to_string(),
            }
        })?;
        let response = parse_response(&text, &response_path)?;

        info!(
            results = response.results.len(),
            protocol = response.protocol_version,
            elapsed_ms = started.elapsed().as_millis(),
            "worker finished"
        );

        Ok(response
            .results
            .into_iter()
            .map(|result| (result.invocation_id.clone(), result))
            .collect())
    }
}
