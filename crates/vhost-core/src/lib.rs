// # vhost-core
//
// Core library for provisioning HTTPS reverse-proxy virtual hosts in front
// of a locally running hub.
//
// ## Architecture Overview
//
// - **DnsProvider**: Trait for observing and updating a domain's A-record
// - **PublicIpSource**: Trait for discovering this host's public address
// - **CommandRunner**: Executes the proxy and ACME client commands
// - **CertificateManager**: Obtains, checks and revokes certificates
// - **Provisioner**: Orchestrates DNS, certificate, vhost file and reload
// - **ProviderRegistry**: Plugin-based registry for DNS providers
//
// ## Design Principles
//
// 1. **Idempotency**: Running `add` twice changes nothing the second time
// 2. **Plugin-Based**: DNS providers are registered, not hard-coded
// 3. **Rollback**: A proxy that refuses the new config is restored
// 4. **Library-First**: The binary only parses arguments and wires parts

pub mod certs;
pub mod config;
pub mod dns;
pub mod engine;
pub mod error;
pub mod process;
pub mod proxy;
pub mod public_ip;
pub mod registry;
pub mod traits;
pub mod vhost;

// Re-export core types for convenience
pub use certs::{AcquisitionMode, CertificateManager, ChallengeHost};
pub use config::{MissingFile, VhostOptions};
pub use dns::{AuthoritativeResolver, DnsCheck, DnsStatus, DnsWaiter, SystemResolver, WaitOutcome};
pub use engine::{AddReport, AddRequest, ProvisionState, Provisioner, RemovalReport};
pub use error::{Error, ErrorKind, Result};
pub use process::{CommandOutput, CommandRunner, CommandSpec, ProcessError, SystemRunner};
pub use proxy::ProxyController;
pub use public_ip::CachedPublicIp;
pub use registry::ProviderRegistry;
pub use traits::{AddressResolver, DnsProvider, DnsProviderFactory, PublicIpSource};
pub use vhost::{Backend, RenderMode};
