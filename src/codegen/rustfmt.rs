use anyhow::{Context, Result, bail};
use proc_macro2::TokenStream;

pub fn format_code(code: &str, edition: &str) -> Result<String> {
    let output = duct::cmd!("rustfmt", "--edition", edition)
        .stdin_bytes(code.as_bytes().to_vec())
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .context("failed to launch rustfmt")?;
    if !output.status.success() {
        bail!(
            "error when formatting: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Formatted text when `enabled` and rustfmt succeeds, otherwise the raw token text.
pub fn maybe_rustfmt(tokens: &TokenStream, enabled: bool, edition: &str) -> String {
    let code = tokens.to_string();
    if enabled {
        match format_code(&code, edition) {
            Ok(formatted) => return formatted,
            Err(err) => tracing::debug!("rustfmt unavailable, keeping raw tokens: {err:#}"),
        }
    }
    code
}
