//! Compare a domain's A-record with this host's public address and repair it
//! through the provider when possible.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::VhostOptions;
use crate::dns::waiter::{DnsWaiter, WaitOutcome};
use crate::error::{Error, Result};
use crate::traits::{AddressResolver, DnsProvider, PublicIpSource};

/// Outcome of a DNS check that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsStatus {
    /// The record already pointed at the public address
    Matched { address: Ipv4Addr },
    /// The provider accepted an update and propagation was observed
    Updated {
        previous: Option<Ipv4Addr>,
        address: Ipv4Addr,
    },
    /// The record is wrong and updating was not requested
    Mismatch {
        current: Option<Ipv4Addr>,
        expected: Ipv4Addr,
    },
}

impl DnsStatus {
    /// Whether the record now points at this host
    pub fn is_ok(&self) -> bool {
        !matches!(self, DnsStatus::Mismatch { .. })
    }
}

/// DNS verification step shared by `add` and the `dns` command
pub struct DnsCheck<'a> {
    public_ip: &'a dyn PublicIpSource,
    provider: &'a dyn DnsProvider,
    confirm: &'a dyn AddressResolver,
    waiter: DnsWaiter,
    settle_delay: Duration,
}

impl<'a> DnsCheck<'a> {
    /// `confirm` is the resolver used to observe propagation after an
    /// accepted update
    pub fn new(
        public_ip: &'a dyn PublicIpSource,
        provider: &'a dyn DnsProvider,
        confirm: &'a dyn AddressResolver,
        options: &VhostOptions,
    ) -> Self {
        Self {
            public_ip,
            provider,
            confirm,
            waiter: DnsWaiter::from_options(options),
            settle_delay: options.settle_delay(),
        }
    }

    /// Run the check for `domain`
    ///
    /// With `update` false a wrong record is reported as
    /// [`DnsStatus::Mismatch`]. With `update` true it is handed to the
    /// provider; a declined or unconfirmed update is a DNS error.
    pub async fn run(&self, domain: &str, update: bool) -> Result<DnsStatus> {
        let public_ip = self
            .public_ip
            .public_ip()
            .await
            .ok_or_else(|| Error::dns("Can't find public IP of this host"))?;

        let current = self.provider.resolve(domain).await;
        tracing::debug!(
            domain = %domain,
            current = ?current,
            public_ip = %public_ip,
            "Checking DNS record"
        );

        if current == Some(public_ip) {
            return Ok(DnsStatus::Matched { address: public_ip });
        }

        if !update {
            return Ok(DnsStatus::Mismatch {
                current,
                expected: public_ip,
            });
        }

        let accepted = self.provider.update(domain, public_ip).await?;
        if !accepted {
            return Err(match current {
                None => Error::dns(format!("No DNS record for {}, and no way to update", domain)),
                Some(seen) => Error::dns(format!(
                    "DNS record doesn't match public IP: {} is {} should be {}",
                    domain, seen, public_ip
                )),
            });
        }

        tracing::info!(
            domain = %domain,
            address = %public_ip,
            provider = self.provider.provider_name(),
            "DNS update accepted, waiting for propagation"
        );
        tokio::time::sleep(self.settle_delay).await;

        let mut report = |seen: Option<Ipv4Addr>, elapsed: Duration| {
            tracing::debug!(domain = %domain, seen = ?seen, elapsed = ?elapsed, "Waiting for DNS");
        };
        match self
            .waiter
            .wait_until(self.confirm, domain, public_ip, Some(&mut report))
            .await
        {
            WaitOutcome::Matched { elapsed } => {
                tracing::info!(domain = %domain, elapsed = ?elapsed, "DNS update propagated");
                Ok(DnsStatus::Updated {
                    previous: current,
                    address: public_ip,
                })
            }
            WaitOutcome::TimedOut { last_seen, .. } => Err(Error::dns(format!(
                "DNS update for {} not visible after {:?} (last seen {})",
                domain,
                self.waiter.timeout(),
                last_seen.map_or_else(|| "nothing".to_string(), |ip| ip.to_string())
            ))),
        }
    }
}
