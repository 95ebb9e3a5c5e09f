// # hub-vhost
//
// Command line front end for vhost provisioning. This is a thin integration
// layer: every DNS, certificate and proxy decision lives in vhost-core.
//
// The binary is responsible for:
// 1. Parsing arguments and loading layered configuration
// 2. Applying command line overrides
// 3. Initializing logging and the runtime
// 4. Registering DNS providers and wiring the public IP source
// 5. Running one operation and mapping its outcome to an exit code
//
// ## Commands
//
// - `add <domain>`: check DNS, obtain a certificate, write the vhost, reload
// - `remove <domain>`: revoke the certificate, delete the vhost, reload
// - `dns <domain>`: check (and by default update) the domain's A record
//
// ## Example
//
// ```bash
// hub-vhost --config /etc/hub-vhost.yaml add hub.example.com --email admin@example.com
// hub-vhost dns foo.duckdns.org --token "$DUCKDNS_TOKEN"
// hub-vhost remove hub.example.com --keep-certificates
// ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use vhost_core::dns::ManualProvider;
use vhost_core::{
    AddRequest, AuthoritativeResolver, Backend, CachedPublicIp, DnsProvider, DnsStatus,
    MissingFile, ProviderRegistry, Provisioner, SystemResolver, SystemRunner, VhostOptions,
};
use vhost_ip_http::HttpPublicIp;

/// How long one discovered public address stays valid within a run
const PUBLIC_IP_TTL: Duration = Duration::from_secs(300);

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HubExitCode {
    Success = 0,
    /// Any provisioning, configuration or DNS failure
    Failure = 1,
}

impl From<HubExitCode> for ExitCode {
    fn from(code: HubExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

#[derive(Debug, Parser)]
#[command(name = "hub-vhost", version, about = "Provision nginx virtual hosts for a hub")]
struct Cli {
    /// YAML file layered over the built-in defaults
    #[arg(short, long, global = true, env = "HUB_VHOST_CONFIG")]
    config: Option<PathBuf>,

    /// trace, debug, info, warn or error
    #[arg(long, global = true, env = "HUB_VHOST_LOG", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Provision or refresh the vhost for a domain
    Add(AddArgs),
    /// Tear down the vhost for a domain
    Remove(RemoveArgs),
    /// Check the domain's DNS record against this host's public address
    Dns(DnsArgs),
}

/// Flags that choose and authenticate the DNS provider
#[derive(Debug, Default, Args)]
struct ProviderArgs {
    /// Dynamic DNS token
    #[arg(long)]
    token: Option<String>,

    /// Provider for domains no suffix-bound provider claims
    #[arg(long)]
    dns_provider: Option<String>,
}

#[derive(Debug, Args)]
struct AddArgs {
    domain: String,

    /// Backend address the vhost proxies to
    #[arg(long)]
    hub_ip: Option<String>,

    #[arg(long)]
    hub_port: Option<u16>,

    #[arg(long)]
    skip_dns_check: bool,

    /// Contact address for the certificate authority
    #[arg(long)]
    email: Option<String>,

    /// Let the certificate client bind port 80 itself
    #[arg(long)]
    standalone: bool,

    #[command(flatten)]
    provider: ProviderArgs,
}

#[derive(Debug, Args)]
struct RemoveArgs {
    domain: String,

    #[arg(long)]
    keep_certificates: bool,
}

#[derive(Debug, Args)]
struct DnsArgs {
    domain: String,

    /// Push the public address to the provider on mismatch (default)
    #[arg(long, overrides_with = "no_update")]
    update: bool,

    /// Only report, never change the record
    #[arg(long, overrides_with = "update")]
    no_update: bool,

    #[command(flatten)]
    provider: ProviderArgs,
}

impl DnsArgs {
    fn should_update(&self) -> bool {
        !self.no_update
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&cli.log_level))
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return HubExitCode::Failure.into();
    }

    let options = match load_options(&cli) {
        Ok(options) => options,
        Err(e) => {
            error!("{:#}", e);
            return HubExitCode::Failure.into();
        }
    };

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return HubExitCode::Failure.into();
        }
    };

    rt.block_on(async {
        match run(cli.command, options).await {
            Ok(code) => code,
            Err(e) => {
                error!("{:#}", e);
                HubExitCode::Failure
            }
        }
    })
    .into()
}

/// Load the configuration layers and apply the command line on top
fn load_options(cli: &Cli) -> Result<VhostOptions> {
    let missing = if cli.config.is_some() {
        MissingFile::Fatal
    } else {
        MissingFile::Tolerate
    };
    let mut options = VhostOptions::load(cli.config.as_deref(), missing)
        .context("Failed to load configuration")?;

    apply_overrides(&mut options, &cli.command);
    options.validate()?;
    Ok(options)
}

fn apply_overrides(options: &mut VhostOptions, command: &Command) {
    let provider = match command {
        Command::Add(args) => {
            if let Some(email) = &args.email {
                options.letsencrypt.email = Some(email.clone());
            }
            if let Some(ip) = &args.hub_ip {
                options.hub.ip = ip.clone();
            }
            if let Some(port) = args.hub_port {
                options.hub.port = port;
            }
            &args.provider
        }
        Command::Dns(args) => &args.provider,
        Command::Remove(_) => return,
    };

    if let Some(token) = &provider.token {
        options.dns.duckdns.token = Some(token.clone());
    }
    if let Some(dns_provider) = &provider.dns_provider {
        options.dns.provider = dns_provider.clone();
    }
}

fn registry() -> ProviderRegistry {
    let registry = ProviderRegistry::with_builtin();

    #[cfg(feature = "duckdns")]
    vhost_provider_duckdns::register(&registry);

    #[cfg(feature = "cloudflare")]
    vhost_provider_cloudflare::register(&registry);

    registry
}

/// Which provider problems a command can live with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderNeed {
    /// DNS is checked or updated, a broken provider setup is fatal
    Required,
    /// DNS is never touched; fall back to the manual provider
    Unused,
}

fn select_provider(
    domain: &str,
    options: &VhostOptions,
    need: ProviderNeed,
) -> Result<Box<dyn DnsProvider>> {
    let registry = registry();
    info!(providers = ?registry.list_providers(), "DNS providers registered");

    match registry.select(domain, options, Arc::new(SystemResolver)) {
        Ok(provider) => {
            info!(domain = %domain, provider = provider.provider_name(), "Selected DNS provider");
            Ok(provider)
        }
        Err(e) if need == ProviderNeed::Unused => {
            warn!(domain = %domain, error = %e, "DNS provider unavailable, using manual provider");
            Ok(Box::new(ManualProvider::new(Arc::new(SystemResolver))))
        }
        Err(e) => Err(e.into()),
    }
}

async fn build_provisioner(
    domain: &str,
    options: VhostOptions,
    need: ProviderNeed,
) -> Result<Provisioner> {
    let provider = select_provider(domain, &options, need)?;

    let public_ip = CachedPublicIp::new(HttpPublicIp::with_defaults()?, PUBLIC_IP_TTL);
    let confirm = AuthoritativeResolver::new(&options.dns.nameservers);

    Ok(Provisioner::new(
        options,
        Arc::new(SystemRunner),
        Arc::new(public_ip),
        provider,
        Arc::new(confirm),
    )?)
}

async fn run(command: Command, options: VhostOptions) -> Result<HubExitCode> {
    match command {
        Command::Add(args) => {
            let backend = Backend::from_options(&options.hub);
            let provisioner =
                build_provisioner(&args.domain, options, ProviderNeed::Required).await?;

            let mut request = AddRequest::new(args.domain.as_str(), backend);
            request.skip_dns_check = args.skip_dns_check;
            request.standalone = args.standalone;

            let report = provisioner
                .add(&request)
                .await
                .with_context(|| format!("Failed to provision {}", args.domain))?;

            info!(
                domain = %args.domain,
                refreshed = report.refreshed,
                certificate_obtained = report.certificate_obtained,
                config_changed = report.config_changed,
                reloaded = report.reloaded,
                "Done"
            );
            Ok(HubExitCode::Success)
        }
        Command::Remove(args) => {
            let provisioner =
                build_provisioner(&args.domain, options, ProviderNeed::Unused).await?;
            let report = provisioner
                .remove(&args.domain, args.keep_certificates)
                .await;

            for warning in &report.warnings {
                warn!(domain = %args.domain, "{}", warning);
            }
            info!(
                domain = %args.domain,
                revoked = report.revoked,
                config_removed = report.config_removed,
                reloaded = report.reloaded,
                "Removed"
            );
            Ok(HubExitCode::Success)
        }
        Command::Dns(args) => {
            let provisioner =
                build_provisioner(&args.domain, options, ProviderNeed::Required).await?;
            let status = provisioner
                .check_dns(&args.domain, args.should_update())
                .await?;

            match status {
                DnsStatus::Matched { address } => {
                    info!(domain = %args.domain, address = %address, "DNS record matches");
                }
                DnsStatus::Updated { previous, address } => {
                    info!(
                        domain = %args.domain,
                        previous = ?previous,
                        address = %address,
                        "DNS record updated"
                    );
                }
                DnsStatus::Mismatch { current, expected } => {
                    warn!(
                        domain = %args.domain,
                        current = ?current,
                        expected = %expected,
                        "DNS record does not match public IP"
                    );
                }
            }

            Ok(if status.is_ok() {
                HubExitCode::Success
            } else {
                HubExitCode::Failure
            })
        }
    }
}
