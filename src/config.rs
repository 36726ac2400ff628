//! Proxy configuration.
//!
//! Defaults are embedded; `from_env` overrides them from the environment,
//! which is how the suite's launcher wires the core up. Scope and capture
//! rules arrive separately as already-validated lists and are not part of
//! this struct.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::http1::Http1Limits;
use crate::sink::DEFAULT_MAX_BODY_BYTES;
use crate::socks::{SocksAuth, SocksVersion};
use crate::tls::AuthorityConfig;

/// Upstream SOCKS proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocksConfig {
    pub host: String,
    pub port: u16,
    pub version: SocksVersion,
    pub auth: SocksAuth,
}

/// Timeouts for the phases of one connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Timeouts {
    pub connect_secs: u64,
    pub tls_handshake_secs: u64,
    pub idle_read_secs: u64,
}

impl Timeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn tls_handshake(&self) -> Duration {
        Duration::from_secs(self.tls_handshake_secs)
    }

    pub fn idle_read(&self) -> Duration {
        Duration::from_secs(self.idle_read_secs)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            tls_handshake_secs: 10,
            idle_read_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Listening endpoint.
    pub listen_host: String,
    pub listen_port: u16,
    /// Terminate and re-originate TLS on CONNECT tunnels. When false,
    /// CONNECT traffic is relayed opaquely.
    pub intercept_tls: bool,
    /// Upstream SOCKS proxy; direct dialing when absent.
    pub socks: Option<SocksConfig>,
    pub timeouts: Timeouts,
    /// Cap on stored body bytes per message.
    pub max_body_bytes: usize,
    /// Bound on the sink channel before emitters wait.
    pub sink_capacity: usize,
    #[serde(skip)]
    pub http1_limits: Http1Limits,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 8080,
            intercept_tls: true,
            socks: None,
            timeouts: Timeouts::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            sink_capacity: 256,
            http1_limits: Http1Limits::default(),
        }
    }
}

impl ProxyConfig {
    /// Defaults overridden from `PERISCOPE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = env::var("PERISCOPE_LISTEN_HOST") {
            config.listen_host = host;
        }
        if let Ok(port) = env::var("PERISCOPE_LISTEN_PORT") {
            config.listen_port = port
                .parse()
                .context("PERISCOPE_LISTEN_PORT must be a port number")?;
        }
        if let Ok(value) = env::var("PERISCOPE_INTERCEPT_TLS") {
            config.intercept_tls = value
                .parse()
                .context("PERISCOPE_INTERCEPT_TLS must be true or false")?;
        }
        if let Ok(max_body) = env::var("PERISCOPE_MAX_BODY_BYTES") {
            config.max_body_bytes = max_body
                .parse()
                .context("PERISCOPE_MAX_BODY_BYTES must be a byte count")?;
        }
        if let Ok(host) = env::var("PERISCOPE_SOCKS_HOST") {
            let port: u16 = env::var("PERISCOPE_SOCKS_PORT")
                .context("PERISCOPE_SOCKS_PORT required with PERISCOPE_SOCKS_HOST")?
                .parse()
                .context("PERISCOPE_SOCKS_PORT must be a port number")?;
            let auth = match (
                env::var("PERISCOPE_SOCKS_USER"),
                env::var("PERISCOPE_SOCKS_PASS"),
            ) {
                (Ok(username), Ok(password)) => SocksAuth::UserPass { username, password },
                _ => SocksAuth::NoAuth,
            };
            config.socks = Some(SocksConfig {
                host,
                port,
                version: SocksVersion::V5,
                auth,
            });
        }
        Ok(config)
    }

    /// CA paths from the environment, falling back to the defaults.
    pub fn authority_config() -> AuthorityConfig {
        let mut config = AuthorityConfig::default();
        if let Ok(path) = env::var("PERISCOPE_CA_CERT") {
            config.cert_path = path.into();
        }
        if let Ok(path) = env::var("PERISCOPE_CA_KEY") {
            config.key_path = path.into();
        }
        config
    }
}
