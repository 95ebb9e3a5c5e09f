//! Core traits for virtual host provisioning
//!
//! This module defines the capabilities the orchestrator consumes without
//! implementing them itself.
//!
//! - [`DnsProvider`]: resolve a domain and, where supported, update its A-record
//! - [`AddressResolver`]: turn a domain into an IPv4 address
//! - [`PublicIpSource`]: discover the public address of this host

pub mod dns_provider;
pub mod ip_source;
pub mod resolver;

pub use dns_provider::{DnsProvider, DnsProviderFactory};
pub use ip_source::PublicIpSource;
pub use resolver::AddressResolver;
