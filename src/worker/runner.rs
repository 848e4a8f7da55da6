use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use proc_macro2::TokenStream;
use tracing::{debug, warn};

use crate::execute::protocol::{
    ErrorCode, PROTOCOL_VERSION, WorkerItem, WorkerRequest, WorkerResponse, WorkerResult,
};
use crate::worker::harness::{self, Marker};

const COMPILER_OUTPUT_LINES: usize = 40;

/// Compiles and runs harnesses for every item of a request.
pub struct HarnessRunner {
    rustc: PathBuf,
    edition: String,
    references: Vec<PathBuf>,
}

impl HarnessRunner {
    pub fn new(request: &WorkerRequest) -> Self {
        let rustc = env::var_os("RUSTC").map_or_else(|| PathBuf::from("rustc"), PathBuf::from);
        Self {
            rustc,
            edition: request.edition.clone(),
            references: request.references.iter().map(PathBuf::from).collect(),
        }
    }

    /// Runs every item; results keep the order of `request.items`.
    pub fn process(&self, request: &WorkerRequest) -> WorkerResponse {
        let mut groups: Vec<(&str, Vec<&WorkerItem>)> = Vec::new();
        for item in &request.items {
            let source = item.declaring_type_source_text.as_str();
            match groups.iter_mut().find(|(text, _)| *text == source) {
                Some((_, items)) => items.push(item),
                None => groups.push((source, vec![item])),
            }
        }

        let mut results = HashMap::new();
        for (source, items) in groups {
            debug!(items = items.len(), "running harness group");
            for result in self.run_group(source, &items) {
                results.insert(result.invocation_id.clone(), result);
            }
        }

        let results = request
            .items
            .iter()
            .map(|item| {
                results.remove(&item.invocation_id).unwrap_or_else(|| {
                    WorkerResult::failure(
                        &item.invocation_id,
                        ErrorCode::Aborted,
                        "no result was produced",
                        0,
                    )
                })
            })
            .collect();
        WorkerResponse {
            protocol_version: PROTOCOL_VERSION,
            results,
        }
    }

    fn run_group(&self, source: &str, items: &[&WorkerItem]) -> Vec<WorkerResult> {
        let mut results = Vec::new();
        let mut runnable = Vec::new();
        let mut calls: Vec<TokenStream> = Vec::new();
        for item in items {
            match harness::driver_call(item) {
                Ok(call) => {
                    runnable.push(*item);
                    calls.push(call);
                }
                Err(err) => results.push(WorkerResult::failure(
                    &item.invocation_id,
                    ErrorCode::Compile,
                    format!("{err:#}"),
                    0,
                )),
            }
        }
        if runnable.is_empty() {
            return results;
        }

        match self.compile_and_run(source, &calls) {
            Ok(markers) => {
                let mut markers = markers
                    .into_iter()
                    .map(|marker| (marker.invocation_id.clone(), marker))
                    .collect::<HashMap<_, _>>();
                for item in runnable {
                    let result = match markers.remove(&item.invocation_id) {
                        Some(marker) => marker_result(marker),
                        None => WorkerResult::failure(
                            &item.invocation_id,
                            ErrorCode::Aborted,
                            "harness exited before reporting this call",
                            0,
                        ),
                    };
                    results.push(result);
                }
            }
            Err(GroupFailure { code, message }) => {
                warn!(%code, "harness group failed");
                results.extend(runnable.iter().map(|item| {
                    WorkerResult::failure(&item.invocation_id, code, message.clone(), 0)
                }));
            }
        }
        results
    }

    fn compile_and_run(
        &self,
        source: &str,
        calls: &[TokenStream],
    ) -> Result<Vec<Marker>, GroupFailure> {
        let text = harness::render(source, calls).map_err(GroupFailure::compile)?;
        let dir = tempfile::Builder::new()
            .prefix("precomp-harness")
            .tempdir()
            .map_err(|err| GroupFailure::aborted(format!("failed to create temp dir: {err}")))?;
        let main = dir.path().join("main.rs");
        let exe = dir
            .path()
            .join(format!("precomp_harness{}", env::consts::EXE_SUFFIX));
        fs::write(&main, text)
            .map_err(|err| GroupFailure::aborted(format!("failed to write harness: {err}")))?;

        let started = Instant::now();
        let output = duct::cmd(&self.rustc, self.rustc_args(&main, &exe))
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|err| {
                GroupFailure::compile(format!(
                    "failed to launch {}: {err}",
                    self.rustc.display()
                ))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GroupFailure::compile(head(&stderr, COMPILER_OUTPUT_LINES)));
        }
        debug!(elapsed_ms = started.elapsed().as_millis(), "harness compiled");

        let output = duct::cmd(&exe, Vec::<OsString>::new())
            .dir(dir.path())
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|err| GroupFailure::aborted(format!("failed to run harness: {err}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let markers = stdout
            .lines()
            .filter_map(|line| {
                let marker = harness::parse_marker(line);
                if marker.is_none() {
                    debug!(target: "precomp::harness", "{line}");
                }
                marker
            })
            .collect::<Vec<_>>();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, "harness exited abnormally: {}", head(&stderr, 5));
        }
        Ok(markers)
    }

    fn rustc_args(&self, main: &Path, exe: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--edition".into(),
            self.edition.clone().into(),
            "--crate-type".into(),
            "bin".into(),
            "--crate-name".into(),
            "precomp_harness".into(),
            "--cap-lints".into(),
            "allow".into(),
            "-C".into(),
            "opt-level=2".into(),
            "-o".into(),
            exe.as_os_str().to_owned(),
        ];
        for reference in &self.references {
            args.push("-L".into());
            args.push(reference.as_os_str().to_owned());
        }
        args.push(main.as_os_str().to_owned());
        args
    }
}

struct GroupFailure {
    code: ErrorCode,
    message: String,
}

impl GroupFailure {
    fn compile(message: impl ToString) -> Self {
        Self {
            code: ErrorCode::Compile,
            message: message.to_string(),
        }
    }

    fn aborted(message: String) -> Self {
        Self {
            code: ErrorCode::Aborted,
            message,
        }
    }
}

fn marker_result(marker: Marker) -> WorkerResult {
    match marker.status.as_str() {
        "ok" => WorkerResult::success(
            marker.invocation_id,
            marker.payload,
            marker.millis,
            marker.bytes,
        ),
        "timeout" => WorkerResult::failure(
            marker.invocation_id,
            ErrorCode::Timeout,
            marker.payload,
            marker.millis,
        ),
        "error" => WorkerResult::failure(
            marker.invocation_id,
            ErrorCode::Panic,
            marker.payload,
            marker.millis,
        ),
        _ => WorkerResult::failure(
            marker.invocation_id,
            ErrorCode::Unknown,
            marker.payload,
            marker.millis,
        ),
    }
}

fn head(text: &str, lines: usize) -> String {
    text.lines().take(lines).collect::<Vec<_>>().join("\n")
}

/// Reads a request file, runs it and writes the response file.
pub fn run_files(request_path: &Path, response_path: &Path) -> Result<()> {
    let text = fs::read_to_string(request_path)
        .with_context(|| format!("failed to read request {}", request_path.display()))?;
    let request: WorkerRequest =
        serde_json::from_str(&text).context("failed to deserialise request")?;
    if request.protocol_version > PROTOCOL_VERSION {
        warn!(
            requested = request.protocol_version,
            supported = PROTOCOL_VERSION,
            "request uses a newer protocol, answering with ours"
        );
    }

    let response = HarnessRunner::new(&request).process(&request);
    let json = serde_json::to_string_pretty(&response).context("failed to serialise response")?;
    if let Some(parent) = response_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(response_path, json)
        .with_context(|| format!("failed to write response {}", response_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_map_to_error_codes() {
        let marker = |status: &str| Marker {
            invocation_id: "id".into(),
            status: status.into(),
            millis: 7,
            bytes: 0,
            payload: "boom".into(),
        };
        assert!(marker_result(marker("ok")).success);
        assert!(marker_result(marker("timeout")).is_timeout());
        assert_eq!(
            marker_result(marker("error")).error_code,
            Some(ErrorCode::Panic)
        );
    }

    #[test]
    fn invalid_items_fail_without_compiling() {
        let request = WorkerRequest {
            protocol_version: PROTOCOL_VERSION,
            references: Vec::new(),
            project_kind: crate::config::ProjectKind::Lib,
            edition: "2021".into(),
            items: vec![WorkerItem {
                declaring_type_source_text: "pub struct T ;".into(),
                namespace: String::new(),
                type_name: "T".into(),
                type_path: "T".into(),
                method_name: "f".into(),
                parameter_type_names: vec!["u8".into()],
                parameter_values: Vec::new(),
                timeout_ms: 100,
                return_type_full_name: "u8".into(),
                is_async: false,
                invocation_id: "only".into(),
            }],
        };
        let response = HarnessRunner::new(&request).process(&request);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].error_code, Some(ErrorCode::Compile));
    }
}
