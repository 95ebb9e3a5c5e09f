//! Proxy control
//!
//! The proxy is driven only through two configured commands: one that
//! validates its configuration and one that reloads it.

use std::sync::Arc;

use crate::config::VhostOptions;
use crate::error::{Error, Result};
use crate::process::{CommandRunner, CommandSpec};

/// Validates and reloads the proxy
pub struct ProxyController {
    runner: Arc<dyn CommandRunner>,
    check: CommandSpec,
    reload: CommandSpec,
}

impl ProxyController {
    pub fn new(runner: Arc<dyn CommandRunner>, check: CommandSpec, reload: CommandSpec) -> Self {
        Self {
            runner,
            check,
            reload,
        }
    }

    /// Build from `proxy.check_cmd` / `proxy.reload_cmd`
    pub fn from_options(runner: Arc<dyn CommandRunner>, options: &VhostOptions) -> Result<Self> {
        let timeout = Some(options.command_timeout());
        let check = options
            .proxy
            .check_cmd
            .to_spec(timeout)
            .ok_or_else(|| Error::config("proxy.check_cmd cannot be empty"))?;
        let reload = options
            .proxy
            .reload_cmd
            .to_spec(timeout)
            .ok_or_else(|| Error::config("proxy.reload_cmd cannot be empty"))?;
        Ok(Self::new(runner, check, reload))
    }

    /// Validate the proxy configuration
    pub async fn check(&self) -> Result<()> {
        self.runner.run(&self.check).await?;
        Ok(())
    }

    /// Validate, then reload
    ///
    /// A failing check means the reload is never attempted.
    pub async fn reload(&self) -> Result<()> {
        self.check().await?;
        self.runner.run(&self.reload).await?;
        tracing::info!(command = %self.reload, "Proxy reloaded");
        Ok(())
    }
}
