// # Cloudflare DNS Provider
//
// Managed-zone DNS provider over the Cloudflare API v4.
//
// ## Behavior
//
// - Without an API token `update` declines (`Ok(false)`) and sends nothing
// - The zone is the single account zone whose name is a suffix of the
//   domain; none or several matches is an error
// - An existing A-record is overwritten, a missing one is created with a
//   TTL of 300 seconds
// - No retries and no propagation wait: those belong to the caller
//
// ## Security Requirements
//
// - The API token never appears in logs or `Debug` output
//
// ## API Reference
//
// - List Zones: GET `/zones?per_page=50&page=N`, following
//   `result_info.total_pages`
// - List DNS Records: GET `/zones/:zone_id/dns_records?type=A&name=...`
// - Create DNS Record: POST `/zones/:zone_id/dns_records`
// - Update DNS Record: PUT `/zones/:zone_id/dns_records/:record_id`

pub mod credentials;

use async_trait::async_trait;
use serde_json::Value;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use vhost_core::config::VhostOptions;
use vhost_core::traits::{AddressResolver, DnsProvider, DnsProviderFactory};
use vhost_core::{Error, ProviderRegistry, Result};

/// Cloudflare API base URL
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// TTL of records this provider creates
pub const DEFAULT_TTL: u32 = 300;

/// Page size of the zone listing
const ZONES_PER_PAGE: u32 = 50;

/// Per-request HTTP timeout
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Cloudflare DNS provider
pub struct CloudflareProvider {
    /// ⚠️ NEVER log this value
    api_token: Option<String>,
    api_base: String,
    client: reqwest::Client,
    resolver: Arc<dyn AddressResolver>,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field(
                "api_token",
                &self.api_token.as_ref().map(|_| "<REDACTED>"),
            )
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a provider
    ///
    /// # Parameters
    ///
    /// - `api_token`: token with Zone:DNS:Edit permission, or `None` to
    ///   decline every update
    /// - `api_base`: API root, normally [`CLOUDFLARE_API_BASE`]
    /// - `resolver`: answers `resolve`
    pub fn new(
        api_token: Option<String>,
        api_base: impl Into<String>,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_token: api_token.filter(|t| !t.is_empty()),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client,
            resolver,
        })
    }

    /// Send a request and return the whole response envelope
    async fn call(&self, request: reqwest::RequestBuilder, token: &str, action: &str) -> Result<Value> {
        let response = request
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| Error::dns(format!("Cloudflare {} failed: {}", action, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            return Err(match status.as_u16() {
                401 | 403 => Error::dns(format!(
                    "Cloudflare {}: authentication failed, invalid API token or insufficient permissions ({})",
                    action, status
                )),
                429 => Error::dns(format!("Cloudflare {}: rate limit exceeded ({})", action, status)),
                500..=599 => Error::dns(format!(
                    "Cloudflare {}: server error {} - {}",
                    action, status, error_text
                )),
                _ => Error::dns(format!("Cloudflare {} failed: {} - {}", action, status, error_text)),
            });
        }

        response
            .json()
            .await
            .map_err(|e| Error::dns(format!("Cloudflare {}: failed to parse response: {}", action, e)))
    }

    /// Locate the one zone hosting `domain`
    async fn find_zone(&self, domain: &str, token: &str) -> Result<String> {
        let url = format!("{}/zones", self.api_base);
        let mut zones = Vec::new();
        let mut page: u64 = 1;

        loop {
            let mut body = self
                .call(
                    self.client.get(&url).query(&[
                        ("per_page", ZONES_PER_PAGE.to_string()),
                        ("page", page.to_string()),
                    ]),
                    token,
                    "zone lookup",
                )
                .await?;

            zones.extend(take_result_array(&mut body)?);

            let total_pages = body
                .pointer("/result_info/total_pages")
                .and_then(Value::as_u64)
                .unwrap_or(1);
            if page >= total_pages {
                break;
            }
            page += 1;
        }

        let matches: Vec<(&str, &str)> = zones
            .iter()
            .filter_map(|zone| Some((zone["id"].as_str()?, zone["name"].as_str()?)))
            .filter(|(_, name)| zone_contains(name, domain))
            .collect();

        match matches.as_slice() {
            [(id, name)] => {
                tracing::debug!(domain = %domain, zone = %name, "Found hosted zone");
                Ok(id.to_string())
            }
            [] => Err(Error::dns(format!("No hosted zone found for {}", domain))),
            many => Err(Error::dns(format!(
                "Found {} hosted zones for {}: {}",
                many.len(),
                domain,
                many.iter().map(|(_, n)| *n).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    /// ID of the A-record named `domain`, if there is one
    async fn find_record(&self, zone_id: &str, domain: &str, token: &str) -> Result<Option<String>> {
        let url = format!("{}/zones/{}/dns_records", self.api_base, zone_id);
        let mut body = self
            .call(
                self.client.get(&url).query(&[("type", "A"), ("name", domain)]),
                token,
                "record lookup",
            )
            .await?;

        let records = take_result_array(&mut body)?;

        Ok(records
            .first()
            .and_then(|r| r["id"].as_str())
            .map(str::to_string))
    }
}

/// Move the `result` array out of a response envelope
fn take_result_array(body: &mut Value) -> Result<Vec<Value>> {
    match body.get_mut("result").map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(Error::dns("Invalid response format: result is not an array")),
    }
}

/// Whether a zone named `zone` hosts `domain`
fn zone_contains(zone: &str, domain: &str) -> bool {
    let zone = zone.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    domain == zone || domain.ends_with(&format!(".{}", zone))
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    async fn resolve(&self, domain: &str) -> Option<Ipv4Addr> {
        self.resolver.resolve(domain).await
    }

    async fn update(&self, domain: &str, address: Ipv4Addr) -> Result<bool> {
        let Some(token) = self.api_token.as_deref() else {
            tracing::debug!(domain = %domain, "No Cloudflare credentials, declining update");
            return Ok(false);
        };

        let zone_id = self.find_zone(domain, token).await?;
        let payload = serde_json::json!({
            "type": "A",
            "name": domain,
            "content": address.to_string(),
            "ttl": DEFAULT_TTL,
        });

        match self.find_record(&zone_id, domain, token).await? {
            Some(record_id) => {
                let url = format!("{}/zones/{}/dns_records/{}", self.api_base, zone_id, record_id);
                self.call(self.client.put(&url).json(&payload), token, "record update")
                    .await?;
                tracing::info!(domain = %domain, address = %address, "Cloudflare record updated");
            }
            None => {
                let url = format!("{}/zones/{}/dns_records", self.api_base, zone_id);
                self.call(self.client.post(&url).json(&payload), token, "record creation")
                    .await?;
                tracing::info!(domain = %domain, address = %address, "Cloudflare record created");
            }
        }

        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "cloudflare"
    }
}

/// Factory for creating Cloudflare providers
pub struct CloudflareFactory;

impl DnsProviderFactory for CloudflareFactory {
    fn create(
        &self,
        options: &VhostOptions,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Box<dyn DnsProvider>> {
        let cloudflare = &options.dns.cloudflare;
        let token = credentials::resolve_token(cloudflare)?;
        if token.is_none() {
            tracing::warn!("No Cloudflare API token found, DNS records will not be updated");
        }

        let api_base = cloudflare
            .api_base
            .clone()
            .unwrap_or_else(|| CLOUDFLARE_API_BASE.to_string());

        Ok(Box::new(CloudflareProvider::new(token, api_base, resolver)?))
    }
}

/// Register the Cloudflare provider with a registry
///
/// # Example
///
/// ```rust
/// use vhost_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// vhost_provider_cloudflare::register(&registry);
/// assert!(registry.has_provider("cloudflare"));
/// ```
pub fn register(registry: &ProviderRegistry) {
    registry.register_provider("cloudflare", Box::new(CloudflareFactory));
}
