//! Cloudflare API token discovery
//!
//! Sources are tried in order, the first non-empty token wins:
//!
//! 1. `dns.cloudflare.api_token` in the config
//! 2. the variable named by `dns.cloudflare.token_env`
//! 3. `CLOUDFLARE_API_TOKEN`
//! 4. `dns.cloudflare.credentials_file`: a plain token or JSON with a
//!    `token` / `api_token` key

use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};
use vhost_core::config::CloudflareOptions;
use vhost_core::{Error, Result};

/// Variable consulted when no other source is configured
pub const DEFAULT_TOKEN_ENV: &str = "CLOUDFLARE_API_TOKEN";

/// Resolve the API token using the process environment
pub fn resolve_token(options: &CloudflareOptions) -> Result<Option<String>> {
    resolve_token_with(options, |name| std::env::var(name).ok())
}

/// Resolve the API token with an injectable environment lookup
///
/// # Returns
///
/// - `Ok(None)`: no source holds a token
/// - `Err(Error::Config)`: a configured credentials file is unreadable or
///   malformed
pub fn resolve_token_with<F>(options: &CloudflareOptions, env: F) -> Result<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(token) = non_empty(options.api_token.clone()) {
        debug!("Using Cloudflare token from config");
        return Ok(Some(token));
    }

    if let Some(name) = options.token_env.as_deref() {
        if let Some(token) = non_empty(env(name)) {
            debug!(var = %name, "Using Cloudflare token from environment");
            return Ok(Some(token));
        }
    }

    if let Some(token) = non_empty(env(DEFAULT_TOKEN_ENV)) {
        debug!(var = DEFAULT_TOKEN_ENV, "Using Cloudflare token from environment");
        return Ok(Some(token));
    }

    match options.credentials_file.as_deref() {
        Some(path) => load_file(path).map(Some),
        None => Ok(None),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn load_file(path: &Path) -> Result<String> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode() & 0o777;
            if mode & 0o077 != 0 {
                warn!(
                    path = %path.display(),
                    mode = format!("{:o}", mode),
                    "Credentials file is readable by others (should be 0600 or 0400)"
                );
            }
        }
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::config(format!(
            "Failed to read credentials file '{}': {}",
            path.display(),
            e
        ))
    })?;
    parse_credentials(&content, path)
}

fn parse_credentials(content: &str, path: &Path) -> Result<String> {
    let trimmed = content.trim();

    if trimmed.starts_with('{') {
        #[derive(Deserialize)]
        struct TokenFormat {
            token: Option<String>,
            api_token: Option<String>,
        }

        let parsed: TokenFormat = serde_json::from_str(trimmed).map_err(|e| {
            Error::config(format!(
                "Invalid JSON in credentials file '{}': {}",
                path.display(),
                e
            ))
        })?;
        return non_empty(parsed.token.or(parsed.api_token)).ok_or_else(|| {
            Error::config(format!(
                "Credentials file '{}' has no token or api_token",
                path.display()
            ))
        });
    }

    if trimmed.is_empty() {
        return Err(Error::config(format!(
            "Credentials file '{}' is empty",
            path.display()
        )));
    }

    Ok(trimmed.to_string())
}
