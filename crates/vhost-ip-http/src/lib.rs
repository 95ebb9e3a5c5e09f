// # HTTP Public IP Discovery
//
// Finds this host's public IPv4 address by asking, in order:
//
// 1. the AWS instance metadata service
// 2. the GCE metadata server (needs `Metadata-Flavor: Google`)
// 3. a public echo service (`api.ipify.org`)
//
// Each endpoint gets a short timeout; the first one answering with a
// parseable IPv4 address wins. Off-cloud the metadata names do not resolve
// and fail fast.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;
use vhost_core::traits::PublicIpSource;
use vhost_core::{Error, Result};

/// Per-endpoint request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// One place to ask for the public address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Cloud metadata endpoints first, then a public echo service
pub fn default_endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::new("http://instance-data/latest/meta-data/public-ipv4"),
        Endpoint::new(
            "http://metadata/computeMetadata/v1/instance/network-interfaces/0/access-configs/0/external-ip",
        )
        .with_header("Metadata-Flavor", "Google"),
        Endpoint::new("https://api.ipify.org"),
    ]
}

/// Public IP source over an ordered endpoint list
pub struct HttpPublicIp {
    endpoints: Vec<Endpoint>,
    client: reqwest::Client,
}

impl HttpPublicIp {
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self> {
        Self::with_timeout(endpoints, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoints: Vec<Endpoint>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { endpoints, client })
    }

    /// Source over [`default_endpoints`]
    pub fn with_defaults() -> Result<Self> {
        Self::new(default_endpoints())
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    async fn fetch_ip(&self, endpoint: &Endpoint) -> Result<Ipv4Addr> {
        let mut request = self.client.get(&endpoint.url);
        for (name, value) in &endpoint.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::http(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::http(format!("HTTP error: {}", response.status())));
        }

        let ip_text = response
            .text()
            .await
            .map_err(|e| Error::http(format!("Failed to read response: {}", e)))?;
        let ip_text = ip_text.trim();

        ip_text
            .parse()
            .map_err(|_| Error::http(format!("Invalid IPv4 address: {}", ip_text)))
    }
}

#[async_trait]
impl PublicIpSource for HttpPublicIp {
    async fn public_ip(&self) -> Option<Ipv4Addr> {
        for endpoint in &self.endpoints {
            match self.fetch_ip(endpoint).await {
                Ok(ip) => {
                    tracing::debug!(url = %endpoint.url, ip = %ip, "Discovered public IP");
                    return Some(ip);
                }
                Err(e) => {
                    tracing::debug!(url = %endpoint.url, error = %e, "Public IP endpoint failed");
                }
            }
        }
        tracing::warn!("No endpoint reported a public IP");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoint_order() {
        let endpoints = default_endpoints();

        assert_eq!(endpoints.len(), 3);
        assert!(endpoints[0].url.contains("instance-data"));
        assert_eq!(
            endpoints[1].headers,
            vec![("Metadata-Flavor".to_string(), "Google".to_string())]
        );
        assert_eq!(endpoints[2].url, "https://api.ipify.org");
    }

    #[test]
    fn test_construction() {
        let source = HttpPublicIp::with_defaults().unwrap();
        assert_eq!(source.endpoints().len(), 3);
    }
}
