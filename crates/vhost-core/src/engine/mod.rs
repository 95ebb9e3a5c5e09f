//! Provisioning engine
//!
//! The [`Provisioner`] drives one domain from "nothing" to "served over
//! HTTPS by the proxy", and back again on removal.
//!
//! ## State Machine
//!
//! ```text
//! Start ──► DnsVerified ──► CertificateReady ──► ConfigWritten ──► ProxyReloaded ──► Done
//!   │            │                 │                   │                 │
//!   └────────────┴─────────────────┴─────── any failure ─────────────────┘
//!                                          │
//!                                          ▼
//!                                    ErrorRollback
//! ```
//!
//! ## Add Flow
//!
//! 1. An existing vhost file means refresh, otherwise first-time provisioning
//! 2. DNS check (failures only warn on refresh, and `DnsVerified` is
//!    not entered)
//! 3. Refresh: rewrite the full config, reload if it changed
//! 4. First time: obtain a certificate if missing (challenge config + reload
//!    in proxy mode), write the full config, reload unless standalone
//! 5. A failed reload deletes the config, reloads again and re-raises
//!
//! Every step is awaited in order; there is no concurrency inside one run.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::certs::{AcquisitionMode, CertificateManager, ChallengeHost};
use crate::config::VhostOptions;
use crate::dns::{DnsCheck, DnsStatus};
use crate::error::Result;
use crate::process::CommandRunner;
use crate::proxy::ProxyController;
use crate::traits::{AddressResolver, DnsProvider, PublicIpSource};
use crate::vhost::{Backend, RenderMode, remove_if_present, render, vhost_path, write_if_different};

/// Provisioning progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    Start,
    DnsVerified,
    CertificateReady,
    ConfigWritten,
    ProxyReloaded,
    Done,
    ErrorRollback,
}

/// Parameters of one `add` invocation
#[derive(Debug, Clone)]
pub struct AddRequest {
    pub domain: String,
    pub backend: Backend,
    pub skip_dns_check: bool,
    /// Let the ACME client bind port 80 itself; the proxy is not reloaded
    pub standalone: bool,
}

impl AddRequest {
    pub fn new(domain: impl Into<String>, backend: Backend) -> Self {
        Self {
            domain: domain.into(),
            backend,
            skip_dns_check: false,
            standalone: false,
        }
    }
}

/// What a successful `add` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddReport {
    /// The vhost existed before this run
    pub refreshed: bool,
    /// `None` when the check was skipped or failed on refresh
    pub dns: Option<DnsStatus>,
    /// DNS failure tolerated because the vhost already existed
    pub dns_warning: Option<String>,
    pub certificate_obtained: bool,
    pub config_changed: bool,
    pub reloaded: bool,
    /// States visited, in order
    pub states: Vec<ProvisionState>,
}

/// What `remove` did; cleanup failures end up in `warnings`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub revoked: bool,
    pub config_removed: bool,
    pub reloaded: bool,
    pub warnings: Vec<String>,
}

/// Everything one run knows about the domain it works on
struct ProvisionContext {
    domain: String,
    backend: Backend,
    vhost_path: PathBuf,
    standalone: bool,
    states: Vec<ProvisionState>,
}

impl ProvisionContext {
    fn new(request: &AddRequest, options: &VhostOptions) -> Self {
        Self {
            domain: request.domain.clone(),
            backend: request.backend.clone(),
            vhost_path: vhost_path(options, &request.domain),
            standalone: request.standalone,
            states: vec![ProvisionState::Start],
        }
    }

    fn enter(&mut self, state: ProvisionState) {
        debug!(domain = %self.domain, state = ?state, "Provisioning state");
        self.states.push(state);
    }
}

/// Provisioning orchestrator
pub struct Provisioner {
    options: VhostOptions,
    public_ip: Arc<dyn PublicIpSource>,
    provider: Box<dyn DnsProvider>,
    confirm: Arc<dyn AddressResolver>,
    proxy: ProxyController,
    certs: CertificateManager,
}

impl Provisioner {
    /// Create a provisioner
    ///
    /// # Parameters
    ///
    /// - `options`: merged options of this run
    /// - `runner`: executes proxy and ACME client commands
    /// - `public_ip`: discovers this host's address
    /// - `provider`: DNS provider selected for the domain
    /// - `confirm`: resolver used to observe propagation after an update
    pub fn new(
        options: VhostOptions,
        runner: Arc<dyn CommandRunner>,
        public_ip: Arc<dyn PublicIpSource>,
        provider: Box<dyn DnsProvider>,
        confirm: Arc<dyn AddressResolver>,
    ) -> Result<Self> {
        options.validate()?;

        let proxy = ProxyController::from_options(Arc::clone(&runner), &options)?;
        let certs = CertificateManager::new(runner, &options);

        Ok(Self {
            options,
            public_ip,
            provider,
            confirm,
            proxy,
            certs,
        })
    }

    pub fn options(&self) -> &VhostOptions {
        &self.options
    }

    /// Compare the domain's record with the public address, updating it
    /// through the provider when `update` is set
    pub async fn check_dns(&self, domain: &str, update: bool) -> Result<DnsStatus> {
        DnsCheck::new(
            self.public_ip.as_ref(),
            self.provider.as_ref(),
            self.confirm.as_ref(),
            &self.options,
        )
        .run(domain, update)
        .await
    }

    /// Provision or refresh the vhost for `request.domain`
    pub async fn add(&self, request: &AddRequest) -> Result<AddReport> {
        let mut ctx = ProvisionContext::new(request, &self.options);
        let refreshed = tokio::fs::try_exists(&ctx.vhost_path).await.unwrap_or(false);

        info!(
            domain = %ctx.domain,
            path = %ctx.vhost_path.display(),
            refresh = refreshed,
            "Provisioning vhost"
        );

        let mut dns_warning = None;
        let dns = if request.skip_dns_check {
            debug!(domain = %ctx.domain, "DNS check skipped");
            ctx.enter(ProvisionState::DnsVerified);
            None
        } else {
            match self.check_dns(&ctx.domain, true).await {
                Ok(status) => {
                    ctx.enter(ProvisionState::DnsVerified);
                    Some(status)
                }
                Err(e) if refreshed => {
                    warn!(
                        domain = %ctx.domain,
                        error = %e,
                        "Virtual host config already exists but DNS check/update failed"
                    );
                    dns_warning = Some(e.to_string());
                    None
                }
                Err(e) => {
                    ctx.enter(ProvisionState::ErrorRollback);
                    return Err(e);
                }
            }
        };

        let mut report = AddReport {
            refreshed,
            dns,
            dns_warning,
            certificate_obtained: false,
            config_changed: false,
            reloaded: false,
            states: Vec::new(),
        };

        if refreshed {
            self.refresh(&mut ctx, &mut report).await?;
        } else {
            self.provision(&mut ctx, &mut report).await?;
        }

        ctx.enter(ProvisionState::Done);
        info!(domain = %ctx.domain, "Vhost ready");
        report.states = ctx.states;
        Ok(report)
    }

    async fn refresh(&self, ctx: &mut ProvisionContext, report: &mut AddReport) -> Result<()> {
        ctx.enter(ProvisionState::CertificateReady);

        report.config_changed = self.write_full(ctx).await?;
        ctx.enter(ProvisionState::ConfigWritten);

        if report.config_changed {
            self.reload_or_rollback(ctx).await?;
            report.reloaded = true;
            ctx.enter(ProvisionState::ProxyReloaded);
        } else {
            debug!(domain = %ctx.domain, "No changes were required");
        }
        Ok(())
    }

    async fn provision(&self, ctx: &mut ProvisionContext, report: &mut AddReport) -> Result<()> {
        if !self.certs.have_valid_certificate(&ctx.domain).await {
            if let Err(e) = self.obtain_certificate(ctx).await {
                ctx.enter(ProvisionState::ErrorRollback);
                self.rollback(ctx).await;
                return Err(e);
            }
            report.certificate_obtained = true;
        }
        ctx.enter(ProvisionState::CertificateReady);

        report.config_changed = match self.write_full(ctx).await {
            Ok(changed) => changed,
            Err(e) => {
                ctx.enter(ProvisionState::ErrorRollback);
                self.rollback(ctx).await;
                return Err(e);
            }
        };
        ctx.enter(ProvisionState::ConfigWritten);

        if ctx.standalone {
            debug!(domain = %ctx.domain, "Standalone mode, proxy not reloaded");
            return Ok(());
        }

        self.reload_or_rollback(ctx).await?;
        report.reloaded = true;
        ctx.enter(ProvisionState::ProxyReloaded);
        Ok(())
    }

    async fn obtain_certificate(&self, ctx: &ProvisionContext) -> Result<()> {
        let max_attempts = self.certs.max_attempts();
        if ctx.standalone {
            self.certs
                .obtain(&ctx.domain, AcquisitionMode::Standalone, max_attempts)
                .await
        } else {
            let site = ChallengeSite {
                provisioner: self,
                ctx,
            };
            self.certs
                .obtain(&ctx.domain, AcquisitionMode::Proxy(&site), max_attempts)
                .await
        }
    }

    async fn write_full(&self, ctx: &ProvisionContext) -> Result<bool> {
        let text = render(&ctx.domain, &self.options, &ctx.backend, RenderMode::Full);
        write_if_different(&ctx.vhost_path, &text).await
    }

    async fn reload_or_rollback(&self, ctx: &mut ProvisionContext) -> Result<()> {
        if let Err(e) = self.proxy.reload().await {
            ctx.enter(ProvisionState::ErrorRollback);
            self.rollback(ctx).await;
            return Err(e);
        }
        Ok(())
    }

    /// Delete this domain's config and reload
    ///
    /// Failures are logged only. Nothing is reloaded if there was no file.
    async fn rollback(&self, ctx: &ProvisionContext) {
        warn!(domain = %ctx.domain, path = %ctx.vhost_path.display(), "Rolling back vhost config");

        match remove_if_present(&ctx.vhost_path).await {
            Ok(true) => {
                if let Err(e) = self.proxy.reload().await {
                    warn!(domain = %ctx.domain, error = %e, "Reload during rollback failed");
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!(domain = %ctx.domain, error = %e, "Failed to delete config during rollback");
            }
        }
    }

    /// Tear down the vhost for `domain`
    ///
    /// Revokes the certificate unless `keep_certificates`, deletes the
    /// config and reloads. Never fails; problems are listed in the report.
    pub async fn remove(&self, domain: &str, keep_certificates: bool) -> RemovalReport {
        let mut report = RemovalReport::default();
        let path = vhost_path(&self.options, domain);

        info!(domain = %domain, path = %path.display(), "Removing vhost");

        if !keep_certificates && self.certs.have_valid_certificate(domain).await {
            match self.certs.revoke(domain).await {
                Ok(()) => report.revoked = true,
                Err(e) => {
                    warn!(domain = %domain, error = %e, "Certificate revocation failed");
                    report.warnings.push(format!("revoke: {}", e));
                }
            }
        }

        match remove_if_present(&path).await {
            Ok(removed) => report.config_removed = removed,
            Err(e) => {
                warn!(domain = %domain, error = %e, "Failed to delete vhost config");
                report.warnings.push(format!("delete config: {}", e));
            }
        }

        match self.proxy.reload().await {
            Ok(()) => report.reloaded = true,
            Err(e) => {
                warn!(domain = %domain, error = %e, "Proxy reload failed");
                report.warnings.push(format!("reload: {}", e));
            }
        }

        report
    }
}

/// Serves the ACME challenge through the running proxy
struct ChallengeSite<'a> {
    provisioner: &'a Provisioner,
    ctx: &'a ProvisionContext,
}

#[async_trait]
impl ChallengeHost for ChallengeSite<'_> {
    async fn serve_challenge(&self, domain: &str) -> Result<()> {
        let text = render(
            domain,
            &self.provisioner.options,
            &self.ctx.backend,
            RenderMode::Challenge,
        );
        info!(domain = %domain, "Writing challenge vhost config");
        write_if_different(&self.ctx.vhost_path, &text).await?;
        self.provisioner.proxy.reload().await
    }
}
