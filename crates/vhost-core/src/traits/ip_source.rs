// # Public IP Source Trait
//
// Defines how the engine learns the public address of this host, which is
// the address the domain's A-record must point at.
//
// ## Implementations
//
// - HTTP discovery (cloud metadata, echo services): `vhost-ip-http` crate
// - Time-bounded cache around any source: `crate::public_ip::CachedPublicIp`

use async_trait::async_trait;
use std::net::Ipv4Addr;

/// Discovers the public IPv4 address of this host
///
/// Implementations must bound every network call with a short timeout so a
/// single unreachable endpoint cannot stall a provisioning run.
#[async_trait]
pub trait PublicIpSource: Send + Sync {
    /// Public address, or `None` if it cannot be discovered
    async fn public_ip(&self) -> Option<Ipv4Addr>;
}
