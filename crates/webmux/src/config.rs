//! Server configuration

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};

/// Router and server settings.
///
/// Durations are in milliseconds. A zero read or write timeout disables the
/// deadline. HTTPS is served only when both `cert_file` and `key_file` are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Interface to bind, empty for all interfaces
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// PEM certificate chain for HTTPS
    #[serde(default)]
    pub cert_file: String,
    /// PEM private key for HTTPS
    #[serde(default)]
    pub key_file: String,
    #[serde(default = "default_https_port")]
    pub https_port: u16,
    /// Time allowed for in-flight requests to finish on shutdown
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Longest wait for the next chunk of a request body
    #[serde(default)]
    pub read_timeout_ms: u64,
    /// Deadline for a request to complete, streaming included
    #[serde(default)]
    pub write_timeout_ms: u64,
    /// Make the most recently registered middleware the outermost layer
    #[serde(default)]
    pub reverse_middleware: bool,
    /// Released routing contexts kept for reuse
    #[serde(default = "default_context_pool_size")]
    pub context_pool_size: usize,
}

fn default_port() -> u16 {
    8080
}

fn default_https_port() -> u16 {
    8443
}

fn default_shutdown_timeout_ms() -> u64 {
    30_000
}

fn default_context_pool_size() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            cert_file: String::new(),
            key_file: String::new(),
            https_port: default_https_port(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            reverse_middleware: false,
            context_pool_size: default_context_pool_size(),
        }
    }
}

impl Config {
    /// Load a JSON config file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read '{}': {e}", path.display())))?;
        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid config '{}': {e}", path.display())))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// `HTTP_HOST`, `HTTP_PORT`, `HTTPS_PORT`, `HTTP_READ_TIMEOUT_MS` and
    /// `HTTP_WRITE_TIMEOUT_MS` take precedence over the file
    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("HTTP_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("HTTP_PORT") {
            match port.parse() {
                Ok(p) => self.port = p,
                Err(_) => warn!(value = %port, "Ignoring invalid HTTP_PORT"),
            }
        }
        if let Ok(port) = std::env::var("HTTPS_PORT") {
            match port.parse() {
                Ok(p) => self.https_port = p,
                Err(_) => warn!(value = %port, "Ignoring invalid HTTPS_PORT"),
            }
        }
        if let Ok(timeout) = std::env::var("HTTP_READ_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(ms) => self.read_timeout_ms = ms,
                Err(_) => warn!(value = %timeout, "Ignoring invalid HTTP_READ_TIMEOUT_MS"),
            }
        }
        if let Ok(timeout) = std::env::var("HTTP_WRITE_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(ms) => self.write_timeout_ms = ms,
                Err(_) => warn!(value = %timeout, "Ignoring invalid HTTP_WRITE_TIMEOUT_MS"),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        if self.shutdown_timeout_ms == 0 {
            return Err(Error::Config("shutdownTimeoutMs must be greater than zero".into()));
        }
        if self.cert_file.trim().is_empty() != self.key_file.trim().is_empty() {
            return Err(Error::Config("certFile and keyFile must be set together".into()));
        }
        Ok(())
    }

    /// Address to bind
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.ip()?, self.port))
    }

    /// Address to bind for HTTPS
    pub fn https_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.ip()?, self.https_port))
    }

    /// Certificate and key paths, when HTTPS is configured
    pub fn tls_files(&self) -> Option<(&Path, &Path)> {
        let cert = self.cert_file.trim();
        let key = self.key_file.trim();
        (!cert.is_empty() && !key.is_empty()).then(|| (Path::new(cert), Path::new(key)))
    }

    fn ip(&self) -> Result<IpAddr> {
        let ip = match self.host.trim() {
            "" => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            "localhost" => IpAddr::V4(Ipv4Addr::LOCALHOST),
            host => host
                .parse()
                .map_err(|_| Error::Config(format!("invalid host '{host}'")))?,
        };
        Ok(ip)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }
}
