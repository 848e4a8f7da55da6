use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::execute::protocol::WorkerItem;
use crate::hash::sha1_hex;
use crate::model::{FunctionDescriptor, InvocationDescriptor, LiteralValue};

/// One distinct (function, arguments) pair and every call site that asked for it.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub dedup_key: String,
    pub cache_key: String,
    pub function: Arc<FunctionDescriptor>,
    pub arguments: Vec<LiteralValue>,
    /// Originating call sites in discovery order; the first one is primary.
    pub invocations: Vec<InvocationDescriptor>,
}

impl ExecutionRequest {
    pub fn primary_id(&self) -> &str {
        self.invocations
            .first()
            .map_or(self.cache_key.as_str(), |invocation| invocation.id.as_str())
    }

    pub fn content_hash(&self) -> &str {
        &self.function.content_hash
    }

    pub fn invocation_ids(&self) -> impl Iterator<Item = &str> {
        self.invocations.iter().map(|invocation| invocation.id.as_str())
    }

    /// Worker payload for this request, tagged with the primary invocation id.
    pub fn to_worker_item(&self) -> WorkerItem {
        let function = &self.function;
        WorkerItem {
            declaring_type_source_text: function.declaring_source.to_string(),
            namespace: function.namespace.clone(),
            type_name: function.type_name.clone(),
            type_path: function.type_path.clone(),
            method_name: function.name.clone(),
            parameter_type_names: function
                .parameters
                .iter()
                .map(|param| param.ty.type_name())
                .collect(),
            parameter_values: self.arguments.iter().map(|arg| arg.text.clone()).collect(),
            timeout_ms: function.config.timeout_ms,
            return_type_full_name: function.return_type(),
            is_async: function.is_async,
            invocation_id: self.primary_id().to_string(),
        }
    }
}

/// `namespace::Type::function(param types)|arg,arg`
pub fn dedup_key(function: &FunctionDescriptor, arguments: &[LiteralValue]) -> String {
    let args = arguments
        .iter()
        .map(|arg| arg.text.as_str())
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{}({})|{args}",
        function.qualified_name(),
        function.signature()
    )
}

/// Groups invocations into requests, preserving first-seen order.
pub fn deduplicate(invocations: &[InvocationDescriptor]) -> Vec<ExecutionRequest> {
    let mut requests: Vec<ExecutionRequest> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for invocation in invocations {
        let key = dedup_key(&invocation.function, &invocation.arguments);
        if let Some(&idx) = positions.get(&key) {
            requests[idx].invocations.push(invocation.clone());
            continue;
        }
        positions.insert(key.clone(), requests.len());
        requests.push(ExecutionRequest {
            cache_key: sha1_hex(&key),
            dedup_key: key,
            function: Arc::clone(&invocation.function),
            arguments: invocation.arguments.clone(),
            invocations: vec![invocation.clone()],
        });
    }

    debug!(
        invocations = invocations.len(),
        requests = requests.len(),
        "deduplicated invocations"
    );
    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::location::{SourceLocation, Span};
    use crate::analysis::shape::ValueShape;
    use crate::model::{CacheStrategy, FunctionConfig, LiteralKind, ParamType, Parameter};

    fn function() -> Arc<FunctionDescriptor> {
        Arc::new(FunctionDescriptor {
            namespace: "math".into(),
            type_name: "Series".into(),
            type_path: "Series".into(),
            name: "fib".into(),
            parameters: vec![Parameter {
                name: "n".into(),
                ty: ParamType::Int("u32".into()),
            }],
            return_shape: ValueShape::Int("u64".into()),
            is_async: false,
            config: FunctionConfig {
                cache: CacheStrategy::Persistent,
                timeout_ms: 5000,
                warn_threshold_ms: 1000,
                suppress_warnings: false,
            },
            content_hash: "abc".into(),
            declaring_source: Arc::from("pub struct Series ;"),
            location: SourceLocation::new("src/math.rs", 3, 5, Span::new(0, 3)),
        })
    }

    fn call(line: usize, arg: &str) -> InvocationDescriptor {
        InvocationDescriptor::new(
            function(),
            vec![LiteralValue::new(LiteralKind::Int, arg)],
            SourceLocation::new("src/main.rs", line, 9, Span::new(line * 10, line * 10 + 8)),
        )
    }

    #[test]
    fn identical_calls_share_one_request() {
        let requests = deduplicate(&[call(1, "10"), call(2, "10"), call(3, "11"), call(4, "10")]);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].invocations.len(), 3);
        assert_eq!(requests[0].dedup_key, "math::Series::fib(u32)|10");
        assert_eq!(requests[1].arguments[0].text, "11");
        assert_eq!(requests[0].primary_id(), requests[0].invocations[0].id);
    }

    #[test]
    fn worker_items_carry_the_primary_id_and_literals() {
        let requests = deduplicate(&[call(7, "10")]);
        let item = requests[0].to_worker_item();
        assert_eq!(item.invocation_id, requests[0].invocations[0].id);
        assert_eq!(item.parameter_values, vec!["10"]);
        assert_eq!(item.return_type_full_name, "u64");
        assert_eq!(item.call_path(), "Series::fib");
    }
}
