//! Propagation polling

use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::VhostOptions;
use crate::traits::AddressResolver;

/// Result of [`DnsWaiter::wait_until`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The record showed the expected address
    Matched { elapsed: Duration },
    /// The timeout elapsed first
    TimedOut {
        elapsed: Duration,
        last_seen: Option<Ipv4Addr>,
    },
}

impl WaitOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, WaitOutcome::Matched { .. })
    }
}

/// Polls a resolver until a domain resolves to an expected address
#[derive(Debug, Clone, Copy)]
pub struct DnsWaiter {
    timeout: Duration,
    poll_interval: Duration,
}

impl DnsWaiter {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    pub fn from_options(options: &VhostOptions) -> Self {
        Self::new(options.propagation_timeout(), options.poll_interval())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve `domain` repeatedly until it equals `expected`
    ///
    /// Gives up once the elapsed time exceeds the timeout. `progress` is
    /// called after every mismatching lookup with the address seen and the
    /// time elapsed so far.
    pub async fn wait_until(
        &self,
        resolver: &dyn AddressResolver,
        domain: &str,
        expected: Ipv4Addr,
        mut progress: Option<&mut (dyn FnMut(Option<Ipv4Addr>, Duration) + Send)>,
    ) -> WaitOutcome {
        let start = Instant::now();

        loop {
            let seen = resolver.resolve(domain).await;
            let elapsed = start.elapsed();

            if seen == Some(expected) {
                tracing::debug!(domain = %domain, elapsed = ?elapsed, "DNS record matches");
                return WaitOutcome::Matched { elapsed };
            }

            if let Some(callback) = progress.as_mut() {
                callback(seen, elapsed);
            }

            if elapsed > self.timeout {
                tracing::debug!(
                    domain = %domain,
                    last_seen = ?seen,
                    "Gave up waiting for DNS record"
                );
                return WaitOutcome::TimedOut {
                    elapsed,
                    last_seen: seen,
                };
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
