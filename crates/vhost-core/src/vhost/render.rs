//! Proxy configuration rendering
//!
//! Pure functions of their inputs: the same domain, options, backend and
//! mode always yield byte-identical text.

use std::fmt::Write as _;
use std::path::PathBuf;

use crate::config::{HubOptions, VhostOptions};

/// Where proxied requests go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub ip: String,
    pub port: u16,
}

impl Backend {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    pub fn from_options(hub: &HubOptions) -> Self {
        Self::new(hub.ip.clone(), hub.port)
    }

    fn upstream(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

/// Which variant of the vhost to render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Plain HTTP serving only the ACME challenge path
    Challenge,
    /// Redirect to HTTPS, TLS termination and reverse proxy
    Full,
}

const WEBSOCKET_LOCATION: &str =
    r"~* /(api/kernels/[^/]+/(channels|iopub|shell|stdin)|terminals/websocket)/?";

/// Paths of a domain's certificate artifacts under `cert_root`
pub fn certificate_paths(options: &VhostOptions, domain: &str) -> (PathBuf, PathBuf) {
    let dir = options.proxy.cert_root.join(domain);
    (dir.join("privkey.pem"), dir.join("fullchain.pem"))
}

/// Render the vhost text for `domain`
pub fn render(domain: &str, options: &VhostOptions, backend: &Backend, mode: RenderMode) -> String {
    let mut out = String::new();
    // writing into a String cannot fail
    let _ = write_config(&mut out, domain, options, backend, mode);
    out
}

fn write_config(
    out: &mut String,
    domain: &str,
    options: &VhostOptions,
    backend: &Backend,
    mode: RenderMode,
) -> std::fmt::Result {
    writeln!(out, "server {{")?;
    writeln!(out, "    server_name {};", domain)?;
    writeln!(out, "    listen 80;")?;
    writeln!(out)?;
    if mode == RenderMode::Full {
        writeln!(out, "    # Redirect plain HTTP to HTTPS")?;
        writeln!(out, "    location / {{")?;
        writeln!(out, "        return 302 https://$server_name$request_uri;")?;
        writeln!(out, "    }}")?;
        writeln!(out)?;
    }
    writeln!(out, "    location ^~ /.well-known/acme-challenge/ {{")?;
    writeln!(out, "        default_type \"text/plain\";")?;
    writeln!(out, "        root {};", options.letsencrypt.webroot.display())?;
    writeln!(out, "    }}")?;
    writeln!(out, "}}")?;

    if mode == RenderMode::Challenge {
        return Ok(());
    }

    let (key, chain) = certificate_paths(options, domain);
    let upstream = backend.upstream();

    writeln!(out)?;
    writeln!(out, "server {{")?;
    writeln!(out, "    server_name {};", domain)?;
    writeln!(out, "    listen 443 ssl http2;")?;
    writeln!(out)?;
    writeln!(out, "    ssl_certificate {};", chain.display())?;
    writeln!(out, "    ssl_certificate_key {};", key.display())?;
    writeln!(out, "    ssl_trusted_certificate {};", chain.display())?;
    writeln!(out)?;
    for line in options.proxy.ssl_options.lines() {
        let line = line.trim();
        if !line.is_empty() {
            writeln!(out, "    {}", line)?;
        }
    }
    writeln!(out)?;
    writeln!(out, "    location / {{")?;
    write_proxy_headers(out, &upstream)?;
    writeln!(out, "    }}")?;
    writeln!(out)?;
    writeln!(out, "    # Kernel and terminal websockets")?;
    writeln!(out, "    location {} {{", WEBSOCKET_LOCATION)?;
    write_proxy_headers(out, &upstream)?;
    writeln!(out, "        proxy_http_version 1.1;")?;
    writeln!(out, "        proxy_set_header Upgrade $http_upgrade;")?;
    writeln!(out, "        proxy_set_header Connection \"upgrade\";")?;
    writeln!(out, "    }}")?;
    writeln!(out, "}}")
}

fn write_proxy_headers(out: &mut String, upstream: &str) -> std::fmt::Result {
    writeln!(out, "        proxy_pass {};", upstream)?;
    writeln!(out, "        proxy_set_header X-Real-IP $remote_addr;")?;
    writeln!(out, "        proxy_set_header Host $host;")?;
    writeln!(out, "        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> VhostOptions {
        VhostOptions::defaults().unwrap()
    }

    #[test]
    fn test_render_is_deterministic() {
        let options = options();
        let backend = Backend::new("127.0.0.1", 8000);

        for mode in [RenderMode::Challenge, RenderMode::Full] {
            let a = render("hub.example.com", &options, &backend, mode);
            let b = render("hub.example.com", &options, &backend, mode);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_challenge_mode_is_http_only() {
        let text = render(
            "hub.example.com",
            &options(),
            &Backend::new("127.0.0.1", 8000),
            RenderMode::Challenge,
        );

        assert!(text.contains("server_name hub.example.com;"));
        assert!(text.contains("listen 80;"));
        assert!(text.contains("location ^~ /.well-known/acme-challenge/ {"));
        assert!(text.contains("root /var/www/letsencrypt;"));
        assert!(!text.contains("listen 443"));
        assert!(!text.contains("return 302"));
        assert!(!text.contains("proxy_pass"));
    }

    #[test]
    fn test_full_mode() {
        let text = render(
            "hub.example.com",
            &options(),
            &Backend::new("10.0.0.5", 8081),
            RenderMode::Full,
        );

        assert!(text.contains("return 302 https://$server_name$request_uri;"));
        assert!(text.contains("location ^~ /.well-known/acme-challenge/ {"));
        assert!(text.contains("listen 443 ssl http2;"));
        assert!(text.contains(
            "ssl_certificate /etc/letsencrypt/live/hub.example.com/fullchain.pem;"
        ));
        assert!(text.contains(
            "ssl_certificate_key /etc/letsencrypt/live/hub.example.com/privkey.pem;"
        ));
        assert!(text.contains("    ssl_session_tickets off;\n"));
        assert!(text.contains("proxy_pass http://10.0.0.5:8081;"));
        assert_eq!(text.matches("proxy_pass").count(), 2);
        assert!(text.contains(&format!("location {} {{", WEBSOCKET_LOCATION)));
        assert!(text.contains("proxy_set_header Upgrade $http_upgrade;"));
        assert!(text.contains("proxy_set_header Connection \"upgrade\";"));
    }

    #[test]
    fn test_cert_root_is_configurable() {
        let mut options = options();
        options.proxy.cert_root = PathBuf::from("/srv/certs");

        let text = render(
            "a.example.org",
            &options,
            &Backend::new("127.0.0.1", 8000),
            RenderMode::Full,
        );
        assert!(text.contains("ssl_certificate /srv/certs/a.example.org/fullchain.pem;"));
        assert_eq!(
            certificate_paths(&options, "a.example.org"),
            (
                PathBuf::from("/srv/certs/a.example.org/privkey.pem"),
                PathBuf::from("/srv/certs/a.example.org/fullchain.pem")
            )
        );
    }
}
