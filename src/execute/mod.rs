pub mod orchestrator;
pub mod protocol;

use std::collections::HashMap;

use crate::resolve::ExecutionRequest;
use protocol::WorkerResult;

pub use orchestrator::Orchestrator;

/// Responses for every call site of the build, keyed by invocation id.
pub type ResponseMap = HashMap<String, WorkerResult>;

/// Copies one request's result to every call site that shares it.
pub fn fan_out(responses: &mut ResponseMap, request: &ExecutionRequest, result: &WorkerResult) {
    for id in request.invocation_ids() {
        responses.insert(id.to_string(), result.for_invocation(id));
    }
}
