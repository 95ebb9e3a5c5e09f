//! Plugin-based DNS provider registry
//!
//! Provider crates register a factory under a type name; the binary then
//! selects one per domain without an if-else chain over backends.
//!
//! ## Registration
//!
//! ```rust,ignore
//! // In vhost-provider-duckdns
//! pub fn register(registry: &ProviderRegistry) {
//!     registry.register_provider("duckdns", Box::new(DuckDnsFactory));
//! }
//! ```
//!
//! ## Selection
//!
//! A factory that claims the domain wins regardless of configuration, so
//! every `*.duckdns.org` name goes to the token provider. Otherwise the
//! configured `dns.provider` type is used.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use crate::config::VhostOptions;
use crate::dns::ManualFactory;
use crate::error::{Error, Result};
use crate::traits::{AddressResolver, DnsProvider, DnsProviderFactory};

/// Registry of DNS provider factories
///
/// Interior mutability through `RwLock` lets registration happen through a
/// shared reference.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Box<dyn DnsProviderFactory>>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the providers that live in this crate (`manual`)
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register_provider("manual", Box::new(ManualFactory));
        registry
    }

    /// Register a DNS provider factory under `name`, replacing any previous
    /// factory of that name
    pub fn register_provider(&self, name: impl Into<String>, factory: Box<dyn DnsProviderFactory>) {
        let mut providers = self.providers.write().unwrap_or_else(|e| e.into_inner());
        providers.insert(name.into(), factory);
    }

    /// Create the provider responsible for `domain`
    ///
    /// # Returns
    ///
    /// - `Ok(provider)` from the claiming factory, or else the factory named
    ///   by `options.dns.provider`
    /// - `Err(Error::Config)` if that type is not registered
    pub fn select(
        &self,
        domain: &str,
        options: &VhostOptions,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Box<dyn DnsProvider>> {
        let providers = self.read();

        let mut claimants: Vec<(&String, &Box<dyn DnsProviderFactory>)> = providers
            .iter()
            .filter(|(_, factory)| factory.claims_domain(domain))
            .collect();
        claimants.sort_by(|a, b| a.0.cmp(b.0));

        if let Some((name, factory)) = claimants.first() {
            tracing::debug!(domain = %domain, provider = %name, "Provider claims domain");
            return factory.create(options, resolver);
        }

        let provider_type = options.dns.provider.as_str();
        let factory = providers
            .get(provider_type)
            .ok_or_else(|| Error::config(format!("Unknown DNS provider type: {}", provider_type)))?;

        factory.create(options, resolver)
    }

    /// Registered provider type names, sorted
    pub fn list_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider type is registered
    pub fn has_provider(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Box<dyn DnsProviderFactory>>> {
        self.providers.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::SystemResolver;
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;

    struct Named(&'static str);

    #[async_trait]
    impl DnsProvider for Named {
        async fn resolve(&self, _domain: &str) -> Option<Ipv4Addr> {
            None
        }

        async fn update(&self, _domain: &str, _address: Ipv4Addr) -> Result<bool> {
            Ok(false)
        }

        fn provider_name(&self) -> &'static str {
            self.0
        }
    }

    struct SuffixFactory;

    impl DnsProviderFactory for SuffixFactory {
        fn create(
            &self,
            _options: &VhostOptions,
            _resolver: Arc<dyn AddressResolver>,
        ) -> Result<Box<dyn DnsProvider>> {
            Ok(Box::new(Named("suffix")))
        }

        fn claims_domain(&self, domain: &str) -> bool {
            domain.ends_with(".dyn.example")
        }
    }

    struct ZoneFactory;

    impl DnsProviderFactory for ZoneFactory {
        fn create(
            &self,
            _options: &VhostOptions,
            _resolver: Arc<dyn AddressResolver>,
        ) -> Result<Box<dyn DnsProvider>> {
            Ok(Box::new(Named("zone")))
        }
    }

    fn registry() -> ProviderRegistry {
        let registry = ProviderRegistry::with_builtin();
        registry.register_provider("suffix", Box::new(SuffixFactory));
        registry.register_provider("zone", Box::new(ZoneFactory));
        registry
    }

    #[test]
    fn test_registry_registration() {
        let registry = ProviderRegistry::new();
        assert!(!registry.has_provider("zone"));

        registry.register_provider("zone", Box::new(ZoneFactory));

        assert!(registry.has_provider("zone"));
        assert_eq!(registry.list_providers(), vec!["zone".to_string()]);
    }

    #[test]
    fn test_suffix_claim_beats_configured_type() {
        let mut options = VhostOptions::defaults().unwrap();
        options.dns.provider = "zone".to_string();

        let provider = registry()
            .select("foo.dyn.example", &options, Arc::new(SystemResolver))
            .unwrap();
        assert_eq!(provider.provider_name(), "suffix");

        let provider = registry()
            .select("hub.example.com", &options, Arc::new(SystemResolver))
            .unwrap();
        assert_eq!(provider.provider_name(), "zone");
    }

    #[test]
    fn test_default_is_manual() {
        let options = VhostOptions::defaults().unwrap();
        let provider = registry()
            .select("hub.example.com", &options, Arc::new(SystemResolver))
            .unwrap();
        assert_eq!(provider.provider_name(), "manual");
    }

    #[test]
    fn test_unknown_type() {
        let mut options = VhostOptions::defaults().unwrap();
        options.dns.provider = "route66".to_string();

        let err = registry()
            .select("hub.example.com", &options, Arc::new(SystemResolver))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("route66"));
    }
}
