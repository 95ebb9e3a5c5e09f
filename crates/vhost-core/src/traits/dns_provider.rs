// # DNS Provider Trait
//
// Defines the capability contract every DNS backend offers to the
// provisioning engine.
//
// ## Implementations
//
// - Manual (no-op): `crate::dns::ManualProvider`
// - DuckDNS-style token provider: `vhost-provider-duckdns` crate
// - Cloudflare managed zones: `vhost-provider-cloudflare` crate
//
// ## Usage
//
// ```rust,ignore
// use vhost_core::DnsProvider;
//
// let provider = /* DnsProvider implementation */;
//
// if provider.resolve("hub.example.com").await != Some(public_ip) {
//     let accepted = provider.update("hub.example.com", public_ip).await?;
//     if !accepted {
//         // nobody can fix this record for us
//     }
// }
// ```

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::config::VhostOptions;
use crate::traits::AddressResolver;

/// Trait for DNS provider implementations
///
/// A provider observes a domain's A-record through [`resolve`](Self::resolve)
/// and may be able to change it through [`update`](Self::update).
///
/// # Update Contract
///
/// - `Ok(false)`: the provider declines the domain (wrong suffix, no
///   credentials configured). Nothing was sent anywhere.
/// - `Ok(true)`: the remote service accepted the change. It may still take
///   time to become visible; confirming propagation is the caller's job.
/// - `Err(Error::Dns)`: a credentialed attempt was made and rejected, or the
///   service could not be reached.
///
/// Providers make no retries and do not wait for propagation.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Current IPv4 address of `domain`, if it resolves
    async fn resolve(&self, domain: &str) -> Option<Ipv4Addr>;

    /// Point the A-record of `domain` at `address`
    async fn update(&self, domain: &str, address: Ipv4Addr) -> crate::Result<bool>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}

/// Constructs a provider from options
pub trait DnsProviderFactory: Send + Sync {
    /// Create a provider instance
    ///
    /// # Parameters
    ///
    /// - `options`: the merged options of this run
    /// - `resolver`: resolver the provider uses to answer `resolve`
    fn create(
        &self,
        options: &VhostOptions,
        resolver: Arc<dyn AddressResolver>,
    ) -> crate::Result<Box<dyn DnsProvider>>;

    /// Whether this provider owns `domain` regardless of the configured
    /// provider type (e.g. every name under a dynamic DNS suffix)
    fn claims_domain(&self, _domain: &str) -> bool {
        false
    }
}
