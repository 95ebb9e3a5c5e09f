//! Address resolvers
//!
//! [`SystemResolver`] answers the way clients on this host would see it.
//! [`AuthoritativeResolver`] queries explicit nameservers with caching
//! disabled, which is what confirming a just-made update needs.

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{Resolver, TokioResolver};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::traits::AddressResolver;

/// Resolver backed by the operating system (`getaddrinfo`)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl AddressResolver for SystemResolver {
    async fn resolve(&self, domain: &str) -> Option<Ipv4Addr> {
        match tokio::net::lookup_host((domain, 0)).await {
            Ok(addrs) => addrs.into_iter().find_map(|addr| match addr.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            }),
            Err(e) => {
                tracing::trace!(domain = %domain, error = %e, "System lookup failed");
                None
            }
        }
    }
}

/// Cache-free resolver querying specific nameservers
pub struct AuthoritativeResolver {
    resolver: TokioResolver,
}

impl std::fmt::Debug for AuthoritativeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthoritativeResolver").finish_non_exhaustive()
    }
}

impl AuthoritativeResolver {
    /// Query `nameservers` over UDP port 53; an empty list uses the
    /// resolver library's public defaults
    pub fn new(nameservers: &[IpAddr]) -> Self {
        let config = if nameservers.is_empty() {
            ResolverConfig::default()
        } else {
            let mut config = ResolverConfig::new();
            for ip in nameservers {
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(*ip, 53),
                    Protocol::Udp,
                ));
            }
            config
        };

        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(2);
        opts.attempts = 2;
        opts.cache_size = 0;

        let resolver = Resolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(opts)
            .build();

        Self { resolver }
    }
}

#[async_trait]
impl AddressResolver for AuthoritativeResolver {
    async fn resolve(&self, domain: &str) -> Option<Ipv4Addr> {
        match self.resolver.ipv4_lookup(domain).await {
            Ok(lookup) => lookup.iter().next().map(|a| a.0),
            Err(e) => {
                tracing::trace!(domain = %domain, error = %e, "Authoritative lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_system_resolver_localhost() {
        let ip = SystemResolver.resolve("localhost").await;
        assert_eq!(ip, Some(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_system_resolver_unknown_name() {
        let ip = SystemResolver.resolve("does-not-exist.invalid").await;
        assert_eq!(ip, None);
    }

    #[tokio::test]
    async fn test_authoritative_resolver_creation() {
        let resolver = AuthoritativeResolver::new(&[IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))]);
        assert!(format!("{:?}", resolver).contains("AuthoritativeResolver"));
    }
}
