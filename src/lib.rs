pub mod analysis;
pub mod cache;
pub mod cli;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod execute;
pub mod hash;
pub mod model;
pub mod perf;
pub mod pipeline;
pub mod resolve;
pub mod response;
pub mod utils;
pub mod version;
pub mod worker;

pub use config::{GeneratorConfig, TimeoutBehavior, WorkerCommand};
pub use error::PipelineError;
pub use pipeline::{CancellationToken, GenerationOutcome, Generator};
