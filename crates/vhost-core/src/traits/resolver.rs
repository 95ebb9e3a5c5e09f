//! Name resolution seam
//!
//! The engine resolves a domain twice in different ways: once through the
//! system resolver to see what clients see, and repeatedly through a
//! cache-free resolver while confirming a record it just changed.

use async_trait::async_trait;
use std::net::Ipv4Addr;

/// Resolves a domain to an IPv4 address
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// First IPv4 address of `domain`, or `None` if it does not resolve
    async fn resolve(&self, domain: &str) -> Option<Ipv4Addr>;
}
