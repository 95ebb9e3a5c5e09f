//! Manual DNS management
//!
//! The record is maintained by a human (or something outside this tool), so
//! updates are always declined.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::config::VhostOptions;
use crate::error::Result;
use crate::traits::{AddressResolver, DnsProvider, DnsProviderFactory};

/// Provider that can only observe records
pub struct ManualProvider {
    resolver: Arc<dyn AddressResolver>,
}

impl ManualProvider {
    pub fn new(resolver: Arc<dyn AddressResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl DnsProvider for ManualProvider {
    async fn resolve(&self, domain: &str) -> Option<Ipv4Addr> {
        self.resolver.resolve(domain).await
    }

    async fn update(&self, domain: &str, _address: Ipv4Addr) -> Result<bool> {
        tracing::debug!(domain = %domain, "Manual DNS provider declines updates");
        Ok(false)
    }

    fn provider_name(&self) -> &'static str {
        "manual"
    }
}

/// Factory for [`ManualProvider`]
pub struct ManualFactory;

impl DnsProviderFactory for ManualFactory {
    fn create(
        &self,
        _options: &VhostOptions,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Box<dyn DnsProvider>> {
        Ok(Box::new(ManualProvider::new(resolver)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver(Option<Ipv4Addr>);

    #[async_trait]
    impl AddressResolver for FixedResolver {
        async fn resolve(&self, _domain: &str) -> Option<Ipv4Addr> {
            self.0
        }
    }

    #[tokio::test]
    async fn test_manual_provider_declines_and_resolves() {
        let provider = ManualProvider::new(Arc::new(FixedResolver(Some(Ipv4Addr::new(5, 6, 7, 8)))));

        assert_eq!(provider.resolve("hub.example.com").await, Some(Ipv4Addr::new(5, 6, 7, 8)));
        let accepted = provider
            .update("hub.example.com", Ipv4Addr::new(1, 2, 3, 4))
            .await
            .unwrap();
        assert!(!accepted);
        assert_eq!(provider.provider_name(), "manual");
    }
}
