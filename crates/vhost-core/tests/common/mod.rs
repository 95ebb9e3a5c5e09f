//! Test doubles and common utilities for provisioning contract tests
//!
//! The doubles stand in for the proxy, the ACME client, DNS and public-IP
//! discovery. Counters are shared through `Arc` so a test keeps a handle
//! after moving the double into the provisioner.

#![allow(dead_code)]

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use vhost_core::error::Result;
use vhost_core::process::{CommandOutput, CommandRunner, CommandSpec, ProcessError};
use vhost_core::traits::{AddressResolver, DnsProvider, PublicIpSource};
use vhost_core::{Provisioner, VhostOptions};

pub const PUBLIC_IP: Ipv4Addr = Ipv4Addr::new(1, 2, 3, 4);
pub const STALE_IP: Ipv4Addr = Ipv4Addr::new(9, 9, 9, 9);

/// What the recording runner saw, by command kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Check,
    Reload,
    Obtain,
    Revoke,
    Other,
}

/// A CommandRunner that records every command and plays the proxy and the
/// ACME client
///
/// A successful `certbot certonly` creates the key and chain files under
/// the certificate root, like the real client does.
#[derive(Clone)]
pub struct RecordingRunner {
    cert_root: PathBuf,
    calls: Arc<Mutex<Vec<(Call, String)>>>,
    obtain_failures: Arc<AtomicUsize>,
    reload_failures: Arc<AtomicUsize>,
    certbot_missing: bool,
}

impl RecordingRunner {
    pub fn new(cert_root: &Path) -> Self {
        Self {
            cert_root: cert_root.to_path_buf(),
            calls: Arc::new(Mutex::new(Vec::new())),
            obtain_failures: Arc::new(AtomicUsize::new(0)),
            reload_failures: Arc::new(AtomicUsize::new(0)),
            certbot_missing: false,
        }
    }

    /// Fail the next `n` certificate requests with a nonzero exit
    pub fn failing_obtain(self, n: usize) -> Self {
        self.obtain_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the next `n` reload commands with a nonzero exit
    pub fn failing_reload(self, n: usize) -> Self {
        self.reload_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Behave as if the ACME client is not installed
    pub fn without_certbot(mut self) -> Self {
        self.certbot_missing = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().iter().map(|(c, _)| *c).collect()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, l)| l.clone()).collect()
    }

    pub fn count(&self, call: Call) -> usize {
        self.calls().into_iter().filter(|c| *c == call).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn classify(command: &CommandSpec) -> Call {
        let first = command.args.first().map(String::as_str);
        match (command.program.as_str(), first) {
            ("nginx", Some("-t")) => Call::Check,
            ("systemctl", Some("reload")) => Call::Reload,
            ("certbot", Some("certonly")) => Call::Obtain,
            ("certbot", Some("revoke")) => Call::Revoke,
            _ => Call::Other,
        }
    }

    /// Decrement `counter` if positive; true if a failure should be injected
    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn fail(command: &CommandSpec, stderr: &str) -> std::result::Result<CommandOutput, ProcessError> {
        Err(ProcessError::NonZeroExit {
            program: command.program.clone(),
            code: Some(1),
            stderr: stderr.to_string(),
        })
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &CommandSpec) -> std::result::Result<CommandOutput, ProcessError> {
        let call = Self::classify(command);
        self.calls.lock().unwrap().push((call, command.to_string()));

        match call {
            Call::Reload if Self::take_failure(&self.reload_failures) => {
                Self::fail(command, "Job for nginx.service failed")
            }
            Call::Obtain | Call::Revoke if self.certbot_missing => Err(ProcessError::NotFound {
                program: command.program.clone(),
            }),
            Call::Obtain if Self::take_failure(&self.obtain_failures) => {
                Self::fail(command, "Challenge failed")
            }
            Call::Obtain => {
                let domain = command
                    .args
                    .iter()
                    .skip_while(|a| a.as_str() != "--domains")
                    .nth(1)
                    .cloned()
                    .unwrap_or_default();
                let live = self.cert_root.join(domain);
                std::fs::create_dir_all(&live).unwrap();
                std::fs::write(live.join("privkey.pem"), "key").unwrap();
                std::fs::write(live.join("fullchain.pem"), "chain").unwrap();
                Ok(CommandOutput::default())
            }
            _ => Ok(CommandOutput::default()),
        }
    }
}

/// An A-record shared between a provider and a resolver
#[derive(Clone, Default)]
pub struct SharedRecord(Arc<Mutex<Option<Ipv4Addr>>>);

impl SharedRecord {
    pub fn new(ip: Option<Ipv4Addr>) -> Self {
        Self(Arc::new(Mutex::new(ip)))
    }

    pub fn get(&self) -> Option<Ipv4Addr> {
        *self.0.lock().unwrap()
    }

    pub fn set(&self, ip: Option<Ipv4Addr>) {
        *self.0.lock().unwrap() = ip;
    }
}

#[async_trait]
impl AddressResolver for SharedRecord {
    async fn resolve(&self, _domain: &str) -> Option<Ipv4Addr> {
        self.get()
    }
}

/// A DnsProvider over a [`SharedRecord`]; accepted updates are visible at
/// once
pub struct FakeProvider {
    record: SharedRecord,
    accepts: bool,
    update_calls: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn new(record: SharedRecord, accepts: bool) -> Self {
        Self {
            record,
            accepts,
            update_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A provider that shares the update counter with `other`
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            record: other.record.clone(),
            accepts: other.accepts,
            update_calls: Arc::clone(&other.update_calls),
        }
    }

    pub fn update_call_count(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsProvider for FakeProvider {
    async fn resolve(&self, domain: &str) -> Option<Ipv4Addr> {
        self.record.resolve(domain).await
    }

    async fn update(&self, _domain: &str, address: Ipv4Addr) -> Result<bool> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.accepts {
            self.record.set(Some(address));
        }
        Ok(self.accepts)
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

/// A PublicIpSource with a fixed answer
pub struct FixedPublicIp(pub Option<Ipv4Addr>);

#[async_trait]
impl PublicIpSource for FixedPublicIp {
    async fn public_ip(&self) -> Option<Ipv4Addr> {
        self.0
    }
}

/// Options rooted in a scratch directory
pub fn test_options(root: &Path) -> VhostOptions {
    let mut options = VhostOptions::defaults().unwrap();
    options.proxy.sites = root.join("sites-enabled");
    options.proxy.cert_root = root.join("live");
    options.letsencrypt.webroot = root.join("www");
    options.letsencrypt.email = Some("admin@example.com".to_string());
    options
}

/// Everything a contract test needs, rooted in a temp dir
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub options: VhostOptions,
    pub runner: RecordingRunner,
    pub record: SharedRecord,
    pub provider: FakeProvider,
}

impl Harness {
    /// Record resolving to `current`; provider accepts updates if `accepts`
    pub fn new(current: Option<Ipv4Addr>, accepts: bool) -> Self {
        let dir = tempfile::TempDir::new().unwrap();
        let options = test_options(dir.path());
        let runner = RecordingRunner::new(&options.proxy.cert_root);
        let record = SharedRecord::new(current);
        let provider = FakeProvider::new(record.clone(), accepts);
        Self {
            dir,
            options,
            runner,
            record,
            provider,
        }
    }

    pub fn vhost_file(&self, domain: &str) -> PathBuf {
        self.options.proxy.sites.join(format!("{}.conf", domain))
    }

    pub fn install_certificate(&self, domain: &str) {
        let live = self.options.proxy.cert_root.join(domain);
        std::fs::create_dir_all(&live).unwrap();
        std::fs::write(live.join("privkey.pem"), "key").unwrap();
        std::fs::write(live.join("fullchain.pem"), "chain").unwrap();
    }

    pub fn provisioner(&self) -> Provisioner {
        self.provisioner_with_ip(Some(PUBLIC_IP))
    }

    pub fn provisioner_with_ip(&self, public_ip: Option<Ipv4Addr>) -> Provisioner {
        Provisioner::new(
            self.options.clone(),
            Arc::new(self.runner.clone()),
            Arc::new(FixedPublicIp(public_ip)),
            Box::new(FakeProvider::sharing_counters_with(&self.provider)),
            Arc::new(self.record.clone()),
        )
        .unwrap()
    }
}
