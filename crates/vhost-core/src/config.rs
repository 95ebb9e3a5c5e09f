//! Layered configuration
//!
//! Options are built once per invocation from three layers:
//!
//! 1. the built-in defaults ([`DEFAULT_CONFIG`]),
//! 2. an optional YAML file supplied by the user,
//! 3. environment substitutions: any string value of the form `env/NAME`
//!    is replaced by the value of `$NAME`, or removed if it is unset.
//!    User values are resolved before merging, so an unset variable leaves
//!    the default in place.
//!
//! Merging happens on untyped YAML trees so that a user file only needs to
//! mention the keys it changes. The merged tree is then deserialized into
//! [`VhostOptions`].

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::process::CommandSpec;

/// Prefix marking a value as an environment variable reference
pub const ENV_PREFIX: &str = "env/";

/// Built-in defaults
pub const DEFAULT_CONFIG: &str = r#"
proxy:
  check_cmd: nginx -t
  reload_cmd: systemctl reload nginx
  command_timeout_secs: 60
  sites: /etc/nginx/sites-enabled
  cert_root: /etc/letsencrypt/live
  ssl_options: |
    ssl_session_timeout 1d;
    ssl_session_tickets off;
    ssl_protocols TLSv1.2 TLSv1.3;
    ssl_ciphers EECDH+AESGCM:EECDH+AES;
    ssl_ecdh_curve secp384r1;
    ssl_prefer_server_ciphers on;
    ssl_stapling on;
    ssl_stapling_verify on;
    add_header Strict-Transport-Security "max-age=15768000; includeSubdomains; preload";
    add_header X-Frame-Options DENY;
    add_header X-Content-Type-Options nosniff;

letsencrypt:
  webroot: /var/www/letsencrypt
  client: certbot
  max_attempts: 3
  retry_delay_secs: 60
  timeout_secs: 600

dns:
  provider: manual
  settle_delay_secs: 5
  propagation_timeout_secs: 120
  poll_interval_ms: 500
  nameservers: []
  duckdns: {}
  cloudflare: {}

hub:
  ip: 127.0.0.1
  port: 8000

duckdns: {}
"#;

/// What to do when the requested config file does not exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingFile {
    /// Fall back to the defaults
    Tolerate,
    /// Report a configuration error
    Fatal,
}

/// Fully merged options for one provisioning run
#[derive(Debug, Clone, Deserialize)]
pub struct VhostOptions {
    pub proxy: ProxyOptions,
    pub letsencrypt: CertOptions,
    pub dns: DnsOptions,
    pub hub: HubOptions,

    /// Legacy location of the dynamic DNS token
    #[serde(default)]
    pub duckdns: DuckDnsOptions,
}

/// Reverse proxy settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyOptions {
    /// Validates the proxy configuration
    pub check_cmd: CommandLine,
    /// Makes the proxy pick up new configuration
    pub reload_cmd: CommandLine,
    pub command_timeout_secs: u64,
    /// Directory holding one vhost file per domain
    pub sites: PathBuf,
    /// Directory holding `<domain>/privkey.pem` and `<domain>/fullchain.pem`
    pub cert_root: PathBuf,
    /// Verbatim TLS directives placed in the HTTPS server block
    pub ssl_options: String,
}

/// Certificate client settings
#[derive(Debug, Clone, Deserialize)]
pub struct CertOptions {
    /// Directory served under `/.well-known/acme-challenge/`
    pub webroot: PathBuf,
    /// Contact address registered with the certificate authority
    #[serde(default)]
    pub email: Option<String>,
    /// Certificate client executable
    pub client: String,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub timeout_secs: u64,
}

/// DNS checking and update settings
#[derive(Debug, Clone, Deserialize)]
pub struct DnsOptions {
    /// Provider used for domains no suffix-bound provider claims
    pub provider: String,
    pub settle_delay_secs: u64,
    pub propagation_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Servers queried when confirming propagation (empty = system resolver)
    #[serde(default)]
    pub nameservers: Vec<IpAddr>,
    #[serde(default)]
    pub duckdns: DuckDnsOptions,
    #[serde(default)]
    pub cloudflare: CloudflareOptions,
}

/// Token for the dynamic DNS provider
#[derive(Clone, Default, Deserialize)]
pub struct DuckDnsOptions {
    #[serde(default)]
    pub token: Option<String>,
}

impl fmt::Debug for DuckDnsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuckDnsOptions")
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// Credentials for the managed DNS provider
#[derive(Clone, Default, Deserialize)]
pub struct CloudflareOptions {
    /// Explicit API token
    #[serde(default)]
    pub api_token: Option<String>,
    /// Environment variable consulted when no explicit token is set
    #[serde(default)]
    pub token_env: Option<String>,
    /// File holding a token, consulted last
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    /// API endpoint override
    #[serde(default)]
    pub api_base: Option<String>,
}

impl fmt::Debug for CloudflareOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudflareOptions")
            .field("api_token", &self.api_token.as_ref().map(|_| "<REDACTED>"))
            .field("token_env", &self.token_env)
            .field("credentials_file", &self.credentials_file)
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Where the hub listens
#[derive(Debug, Clone, Deserialize)]
pub struct HubOptions {
    pub ip: String,
    pub port: u16,
}

/// An argument vector, written in YAML either as a list or a single
/// whitespace-separated string
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "CommandLineRepr")]
pub struct CommandLine(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum CommandLineRepr {
    Line(String),
    Argv(Vec<String>),
}

impl From<CommandLineRepr> for CommandLine {
    fn from(repr: CommandLineRepr) -> Self {
        match repr {
            CommandLineRepr::Line(line) => {
                CommandLine(line.split_whitespace().map(str::to_string).collect())
            }
            CommandLineRepr::Argv(argv) => CommandLine(argv),
        }
    }
}

impl CommandLine {
    pub fn argv(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert into a runnable command
    pub fn to_spec(&self, timeout: Option<Duration>) -> Option<CommandSpec> {
        CommandSpec::from_argv(&self.0).map(|spec| spec.with_timeout(timeout))
    }
}

impl VhostOptions {
    /// Options with nothing but the built-in defaults
    pub fn defaults() -> Result<Self> {
        Self::from_value(default_value()?)
    }

    /// Load options from an optional YAML file, using the process environment
    /// for `env/` substitutions
    pub fn load(path: Option<&Path>, missing: MissingFile) -> Result<Self> {
        Self::load_with_env(path, missing, |name| std::env::var(name).ok())
    }

    /// Load options with a caller-supplied environment lookup
    pub fn load_with_env<F>(path: Option<&Path>, missing: MissingFile, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let user = match path {
            None => Value::Null,
            Some(path) => match std::fs::read_to_string(path) {
                Ok(text) => parse_yaml(&text, &path.display().to_string())?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => match missing {
                    MissingFile::Tolerate => {
                        tracing::debug!(path = %path.display(), "Config file missing, using defaults");
                        Value::Null
                    }
                    MissingFile::Fatal => {
                        return Err(Error::config(format!(
                            "Config file not found: {}",
                            path.display()
                        )));
                    }
                },
                Err(e) => {
                    return Err(Error::config(format!(
                        "Failed to read config file {}: {}",
                        path.display(),
                        e
                    )));
                }
            },
        };

        // unresolved references in the user tree must fall back to defaults
        let user = apply_env_overrides_with(normalize_aliases(user), &lookup);
        let merged = merge(user, default_value()?);
        Self::from_value(apply_env_overrides_with(merged, &lookup))
    }

    /// Parse options from YAML text layered over the defaults
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let user = apply_env_overrides(normalize_aliases(parse_yaml(text, "<string>")?));
        let merged = merge(user, default_value()?);
        Self::from_value(apply_env_overrides(merged))
    }

    fn from_value(value: Value) -> Result<Self> {
        let options: VhostOptions = serde_yaml::from_value(value)
            .map_err(|e| Error::config(format!("Invalid configuration: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Validate structural invariants
    pub fn validate(&self) -> Result<()> {
        if self.proxy.check_cmd.is_empty() {
            return Err(Error::config("proxy.check_cmd cannot be empty"));
        }
        if self.proxy.reload_cmd.is_empty() {
            return Err(Error::config("proxy.reload_cmd cannot be empty"));
        }
        if self.proxy.sites.as_os_str().is_empty() {
            return Err(Error::config("proxy.sites cannot be empty"));
        }
        if self.letsencrypt.client.is_empty() {
            return Err(Error::config("letsencrypt.client cannot be empty"));
        }
        if self.letsencrypt.max_attempts == 0 {
            return Err(Error::config("letsencrypt.max_attempts must be > 0"));
        }
        if self.dns.poll_interval_ms == 0 {
            return Err(Error::config("dns.poll_interval_ms must be > 0"));
        }
        if self.hub.port == 0 {
            return Err(Error::config("hub.port must be > 0"));
        }
        Ok(())
    }

    /// Token for the dynamic DNS provider, preferring `dns.duckdns.token`
    /// over the legacy top-level `duckdns.token`
    pub fn duckdns_token(&self) -> Option<&str> {
        self.dns
            .duckdns
            .token
            .as_deref()
            .or(self.duckdns.token.as_deref())
            .filter(|t| !t.is_empty())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy.command_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.dns.settle_delay_secs)
    }

    pub fn propagation_timeout(&self) -> Duration {
        Duration::from_secs(self.dns.propagation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.dns.poll_interval_ms)
    }
}

/// The defaults as an untyped tree
pub fn default_value() -> Result<Value> {
    parse_yaml(DEFAULT_CONFIG, "built-in defaults")
}

fn parse_yaml(text: &str, origin: &str) -> Result<Value> {
    serde_yaml::from_str(text)
        .map_err(|e| Error::config(format!("Malformed configuration in {}: {}", origin, e)))
}

/// `acme:` is accepted as an alias of `letsencrypt:`
fn normalize_aliases(user: Value) -> Value {
    let mut map = match user {
        Value::Mapping(map) => map,
        other => return other,
    };
    let letsencrypt = Value::from("letsencrypt");
    if !map.contains_key(&letsencrypt) {
        if let Some(acme) = map.remove("acme") {
            map.insert(letsencrypt, acme);
        }
    }
    Value::Mapping(map)
}

/// Deep-merge `user` over `defaults`
///
/// Mappings merge key by key. Any other user value replaces the default,
/// except `null`, which leaves the default in place.
pub fn merge(user: Value, defaults: Value) -> Value {
    match (user, defaults) {
        (Value::Null, defaults) => defaults,
        (Value::Mapping(user), Value::Mapping(mut defaults)) => {
            for (key, user_value) in user {
                let merged = match defaults.remove(&key) {
                    Some(default_value) => merge(user_value, default_value),
                    None => user_value,
                };
                defaults.insert(key, merged);
            }
            Value::Mapping(defaults)
        }
        (user, _) => user,
    }
}

/// Replace `env/NAME` strings using the process environment
pub fn apply_env_overrides(value: Value) -> Value {
    apply_env_overrides_with(value, &|name: &str| std::env::var(name).ok())
}

/// Replace `env/NAME` strings using `lookup`
///
/// An unresolved reference inside a mapping removes the key, so the field
/// reads as absent; inside a sequence it becomes `null`.
pub fn apply_env_overrides_with<F>(value: Value, lookup: &F) -> Value
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(s) => match s.strip_prefix(ENV_PREFIX) {
            Some(name) => lookup(name).map(Value::String).unwrap_or(Value::Null),
            None => Value::String(s),
        },
        Value::Mapping(map) => {
            let mut out = Mapping::with_capacity(map.len());
            for (key, v) in map {
                let resolved = apply_env_overrides_with(v, lookup);
                if !resolved.is_null() {
                    out.insert(key, resolved);
                }
            }
            Value::Mapping(out)
        }
        Value::Sequence(seq) => Value::Sequence(
            seq.into_iter()
                .map(|v| apply_env_overrides_with(v, lookup))
                .collect(),
        ),
        other => other,
    }
}
