// # DuckDNS Provider
//
// Token-authenticated dynamic DNS for names under `.duckdns.org`.
//
// ## Behavior
//
// - Only `<label>.duckdns.org` (and names below it) are handled; the label
//   is the third component from the right
// - Without a token `update` declines (`Ok(false)`)
// - The service answers `OK` or `KO` in plain text
//
// ## Security Requirements
//
// - The token never appears in logs, errors or `Debug` output
//
// ## API Reference
//
// - Update: GET `/update?domains=<label>&token=<token>&ip=<address>`

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use vhost_core::config::VhostOptions;
use vhost_core::traits::{AddressResolver, DnsProvider, DnsProviderFactory};
use vhost_core::{Error, ProviderRegistry, Result};

/// DuckDNS API base URL
pub const DUCKDNS_API_BASE: &str = "https://www.duckdns.org";

/// Names this provider is responsible for
pub const DUCKDNS_SUFFIX: &str = ".duckdns.org";

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// DuckDNS provider
pub struct DuckDnsProvider {
    /// ⚠️ NEVER log this value
    token: Option<String>,
    base_url: String,
    client: reqwest::Client,
    resolver: Arc<dyn AddressResolver>,
}

// Custom Debug implementation that hides the token
impl std::fmt::Debug for DuckDnsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDnsProvider")
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// The subdomain label DuckDNS knows `domain` by
///
/// `foo.duckdns.org` and `www.foo.duckdns.org` both map to `foo`.
pub fn duckdns_label(domain: &str) -> Option<&str> {
    if !domain.ends_with(DUCKDNS_SUFFIX) {
        return None;
    }
    domain.rsplit('.').nth(2).filter(|label| !label.is_empty())
}

impl DuckDnsProvider {
    pub fn new(
        token: Option<String>,
        base_url: impl Into<String>,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            token: token.filter(|t| !t.is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            resolver,
        })
    }
}

#[async_trait]
impl DnsProvider for DuckDnsProvider {
    async fn resolve(&self, domain: &str) -> Option<Ipv4Addr> {
        self.resolver.resolve(domain).await
    }

    async fn update(&self, domain: &str, address: Ipv4Addr) -> Result<bool> {
        let Some(label) = duckdns_label(domain) else {
            tracing::debug!(domain = %domain, "Not a DuckDNS name, declining update");
            return Ok(false);
        };
        let Some(token) = self.token.as_deref() else {
            tracing::debug!(domain = %domain, "No DuckDNS token, declining update");
            return Ok(false);
        };

        let url = format!("{}/update", self.base_url);
        let address = address.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[("domains", label), ("token", token), ("ip", address.as_str())])
            .send()
            .await
            .map_err(|e| Error::dns(format!("Failed to update Duck DNS: {}", e.without_url())))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match body.trim() {
            "OK" if status.is_success() => {
                tracing::info!(domain = %domain, address = %address, "Duck DNS record updated");
                Ok(true)
            }
            "KO" => Err(Error::dns(format!("Duck DNS refused to update {}", label))),
            _ => Err(Error::dns(format!(
                "Failed to contact Duck DNS (status {})",
                status
            ))),
        }
    }

    fn provider_name(&self) -> &'static str {
        "duckdns"
    }
}

/// Factory for creating DuckDNS providers
pub struct DuckDnsFactory;

impl DnsProviderFactory for DuckDnsFactory {
    fn create(
        &self,
        options: &VhostOptions,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Box<dyn DnsProvider>> {
        let token = options.duckdns_token().map(str::to_string);
        if token.is_none() {
            tracing::warn!("No DuckDNS token configured, DNS records will not be updated");
        }
        Ok(Box::new(DuckDnsProvider::new(token, DUCKDNS_API_BASE, resolver)?))
    }

    fn claims_domain(&self, domain: &str) -> bool {
        domain.ends_with(DUCKDNS_SUFFIX)
    }
}

/// Register the DuckDNS provider with a registry
///
/// # Example
///
/// ```rust
/// use vhost_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// vhost_provider_duckdns::register(&registry);
/// assert!(registry.has_provider("duckdns"));
/// ```
pub fn register(registry: &ProviderRegistry) {
    registry.register_provider("duckdns", Box::new(DuckDnsFactory));
}
