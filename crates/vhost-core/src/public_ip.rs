//! Explicit public IP cache
//!
//! Discovery hits remote endpoints, so callers that provision several domains
//! in one process can share a [`CachedPublicIp`]. The cache is a value the
//! caller owns and passes in; it expires after `ttl` and can be invalidated.
//! Failed lookups are never cached.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::traits::PublicIpSource;

/// Time-bounded cache in front of another [`PublicIpSource`]
pub struct CachedPublicIp<S> {
    source: S,
    ttl: Duration,
    cached: Mutex<Option<(Ipv4Addr, Instant)>>,
}

impl<S: PublicIpSource> CachedPublicIp<S> {
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Drop the cached address so the next lookup goes to the source
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

#[async_trait]
impl<S: PublicIpSource> PublicIpSource for CachedPublicIp<S> {
    async fn public_ip(&self) -> Option<Ipv4Addr> {
        let mut cached = self.cached.lock().await;

        if let Some((ip, fetched_at)) = *cached {
            if fetched_at.elapsed() < self.ttl {
                return Some(ip);
            }
        }

        let fresh = self.source.public_ip().await;
        *cached = fresh.map(|ip| (ip, Instant::now()));
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
        answer: Option<Ipv4Addr>,
    }

    #[async_trait]
    impl PublicIpSource for CountingSource {
        async fn public_ip(&self) -> Option<Ipv4Addr> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    fn source(answer: Option<Ipv4Addr>) -> (CountingSource, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            CountingSource {
                calls: Arc::clone(&calls),
                answer,
            },
            calls,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_until_expiry() {
        let (inner, calls) = source(Some(Ipv4Addr::new(1, 2, 3, 4)));
        let cache = CachedPublicIp::new(inner, Duration::from_secs(60));

        assert_eq!(cache.public_ip().await, Some(Ipv4Addr::new(1, 2, 3, 4)));
        assert_eq!(cache.public_ip().await, Some(Ipv4Addr::new(1, 2, 3, 4)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        cache.public_ip().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let (inner, calls) = source(Some(Ipv4Addr::new(1, 2, 3, 4)));
        let cache = CachedPublicIp::new(inner, Duration::from_secs(3600));

        cache.public_ip().await;
        cache.invalidate().await;
        cache.public_ip().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_not_cached() {
        let (inner, calls) = source(None);
        let cache = CachedPublicIp::new(inner, Duration::from_secs(3600));

        assert_eq!(cache.public_ip().await, None);
        assert_eq!(cache.public_ip().await, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
