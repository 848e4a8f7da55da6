use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execute::protocol::{ErrorCode, WorkerResult};

pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Stored outcome of one execution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub cache_key: String,
    pub function: String,
    pub content_hash: String,
    pub return_type: String,
    pub success: bool,
    #[serde(default)]
    pub serialized_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub execution_time_ms: u64,
    pub memory_footprint_bytes: u64,
    pub persistent: bool,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        cache_key: impl Into<String>,
        function: impl Into<String>,
        content_hash: impl Into<String>,
        return_type: impl Into<String>,
        result: &WorkerResult,
        persistent: bool,
    ) -> Self {
        Self {
            cache_key: cache_key.into(),
            function: function.into(),
            content_hash: content_hash.into(),
            return_type: return_type.into(),
            success: result.success,
            serialized_value: result.serialized_value.clone(),
            error_message: result.error_message.clone(),
            error_code: result.error_code,
            execution_time_ms: result.execution_time_ms,
            memory_footprint_bytes: result.memory_footprint_bytes,
            persistent,
            created_at: Utc::now(),
        }
    }

    /// Response synthesised from the entry; cache hits cost nothing.
    pub fn to_result(&self, invocation_id: &str) -> WorkerResult {
        WorkerResult {
            invocation_id: invocation_id.to_string(),
            success: self.success,
            serialized_value: self.serialized_value.clone(),
            error_message: self.error_message.clone(),
            error_code: self.error_code,
            execution_time_ms: 0,
            memory_footprint_bytes: self.memory_footprint_bytes,
        }
    }
}

/// On-disk layout of `cache.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheFile {
    pub version: u32,
    pub project: String,
    #[serde(default)]
    pub entries: BTreeMap<String, CacheEntry>,
}

impl CacheFile {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            project: project.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn write_to_yaml(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("failed to serialise cache")?;
        let mut file = File::create(path)
            .with_context(|| format!("failed to open cache file {}", path.display()))?;
        file.write_all(yaml.as_bytes())
            .with_context(|| format!("failed to write cache file {}", path.display()))
    }

    pub fn read_from_yaml(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open cache file {}", path.display()))?;
        serde_yaml::from_reader(file).context("failed to deserialise cache")
    }
}
