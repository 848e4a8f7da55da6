use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "PRECOMP_LOG";

/// Installs the stderr subscriber. `PRECOMP_LOG` takes EnvFilter syntax and
/// wins over `debug`; repeated calls are ignored.
pub fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "warn" }));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init();
}
