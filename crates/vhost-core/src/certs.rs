//! Certificate acquisition through an external ACME client
//!
//! The client (certbot by default) is invoked with a fixed argument vector.
//! A certificate counts as present when both the private key and the full
//! chain exist under `<cert_root>/<domain>/`.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::VhostOptions;
use crate::error::{Error, Result};
use crate::process::{CommandRunner, CommandSpec};
use crate::vhost::certificate_paths;

/// Something that can make the ACME HTTP challenge path reachable for a
/// domain (write a challenge-only vhost and reload the proxy)
#[async_trait]
pub trait ChallengeHost: Send + Sync {
    async fn serve_challenge(&self, domain: &str) -> Result<()>;
}

/// How the ACME client answers the HTTP challenge
#[derive(Clone, Copy)]
pub enum AcquisitionMode<'a> {
    /// The client binds port 80 itself
    Standalone,
    /// The running proxy serves the webroot
    Proxy(&'a dyn ChallengeHost),
}

/// Wraps the ACME client
pub struct CertificateManager {
    runner: Arc<dyn CommandRunner>,
    options: VhostOptions,
}

impl CertificateManager {
    pub fn new(runner: Arc<dyn CommandRunner>, options: &VhostOptions) -> Self {
        Self {
            runner,
            options: options.clone(),
        }
    }

    /// Configured attempt budget for [`obtain`](Self::obtain)
    pub fn max_attempts(&self) -> u32 {
        self.options.letsencrypt.max_attempts
    }

    fn cert_paths(&self, domain: &str) -> (PathBuf, PathBuf) {
        certificate_paths(&self.options, domain)
    }

    /// Whether the private key and the full chain both exist
    pub async fn have_valid_certificate(&self, domain: &str) -> bool {
        let (key, chain) = self.cert_paths(domain);
        let key_exists = tokio::fs::try_exists(&key).await.unwrap_or(false);
        let chain_exists = tokio::fs::try_exists(&chain).await.unwrap_or(false);
        key_exists && chain_exists
    }

    fn timeout(&self) -> Option<Duration> {
        match self.options.letsencrypt.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Argument vector requesting a certificate for `domain`
    pub fn obtain_command(&self, domain: &str, standalone: bool) -> Result<CommandSpec> {
        let email = self
            .options
            .letsencrypt
            .email
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                Error::config("letsencrypt.email is required to obtain a certificate")
            })?;

        let mut command = CommandSpec::new(self.options.letsencrypt.client.clone()).arg("certonly");
        command = if standalone {
            command.arg("--standalone")
        } else {
            command
                .arg("--webroot")
                .arg("-w")
                .arg(self.options.letsencrypt.webroot.display().to_string())
        };

        Ok(command
            .args([
                "--text",
                "--agree-tos",
                "--no-eff-email",
                "--non-interactive",
                "--email",
                email,
                "--domains",
                domain,
            ])
            .with_timeout(self.timeout()))
    }

    /// Obtain a certificate for `domain`
    ///
    /// Validates the contact email before anything else happens. In proxy
    /// mode the challenge host is prepared once, then the client is run up
    /// to `max_attempts` times with a fixed delay between attempts. A
    /// missing client is never retried.
    pub async fn obtain(
        &self,
        domain: &str,
        mode: AcquisitionMode<'_>,
        max_attempts: u32,
    ) -> Result<()> {
        let command = self.obtain_command(domain, matches!(mode, AcquisitionMode::Standalone))?;

        if let AcquisitionMode::Proxy(host) = mode {
            host.serve_challenge(domain).await?;
        }

        let max_attempts = max_attempts.max(1);
        let delay = Duration::from_secs(self.options.letsencrypt.retry_delay_secs);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            tracing::info!(domain = %domain, attempt, max_attempts, "Requesting certificate");

            match self.runner.run(&command).await {
                Ok(output) => {
                    tracing::debug!(domain = %domain, output = %output.stdout.trim(), "Certificate client finished");
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(domain = %domain, attempt, error = %e, "Certificate request failed");
                    last_error = Some(e);
                    if attempt < max_attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(Error::provisioning(format!(
            "Could not obtain a certificate for {} after {} attempts: {}",
            domain,
            max_attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Revoke and delete the certificate of `domain`
    pub async fn revoke(&self, domain: &str) -> Result<()> {
        let command = CommandSpec::new(self.options.letsencrypt.client.clone())
            .args([
                "revoke",
                "--cert-name",
                domain,
                "--delete-after-revoke",
                "--non-interactive",
            ])
            .with_timeout(self.timeout());

        self.runner.run(&command).await?;
        tracing::info!(domain = %domain, "Certificate revoked");
        Ok(())
    }
}
