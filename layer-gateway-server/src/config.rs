//! Command-line / environment configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use layer_gateway::{AppCredentials, LayerClientFactory};
use thiserror::Error;

#[derive(Clone, Parser)]
#[command(name = "layer-gateway-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "REST gateway for managing Telegram accounts", long_about = None)]
pub struct Config {
    /// Telegram application id (https://my.telegram.org)
    #[arg(long, env = "API_ID")]
    pub api_id: i32,

    /// Telegram application hash
    #[arg(long, env = "API_HASH", hide_env_values = true)]
    pub api_hash: String,

    #[arg(long, env = "HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Credential store location
    #[arg(long, env = "SESSIONS_FILE", default_value = "sessions/sessions.json")]
    pub sessions_file: PathBuf,

    /// Where live clients keep their session files (system temp dir if unset)
    #[arg(long, env = "SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value_t = 30)]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("API_ID must be a positive integer, got {0}")]
    ApiId(i32),
    #[error("API_HASH must not be empty")]
    ApiHash,
    #[error("CONNECT_TIMEOUT_SECS must be at least 1")]
    ConnectTimeout,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_id <= 0 {
            return Err(ConfigError::ApiId(self.api_id));
        }
        if self.api_hash.trim().is_empty() {
            return Err(ConfigError::ApiHash);
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::ConnectTimeout);
        }
        Ok(())
    }

    pub fn app(&self) -> AppCredentials {
        AppCredentials::new(self.api_id, self.api_hash.trim())
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn factory(&self) -> LayerClientFactory {
        let factory = LayerClientFactory::default()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs));
        match &self.scratch_dir {
            Some(dir) => factory.scratch_dir(dir),
            None      => factory,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["layer-gateway-server"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults() {
        let c = parse(&["--api-id", "12345", "--api-hash", "abc"]);
        assert_eq!(c.addr().to_string(), "0.0.0.0:8000");
        assert_eq!(c.sessions_file, PathBuf::from("sessions/sessions.json"));
        assert_eq!(c.connect_timeout_secs, 30);
        assert_eq!(c.validate(), Ok(()));
        assert_eq!(c.app().app_id, 12345);
    }

    #[test]
    fn rejects_bad_credentials() {
        let c = parse(&["--api-id", "0", "--api-hash", "abc"]);
        assert_eq!(c.validate(), Err(ConfigError::ApiId(0)));

        let c = parse(&["--api-id", "1", "--api-hash", "  "]);
        assert_eq!(c.validate(), Err(ConfigError::ApiHash));
    }

    #[test]
    fn overrides() {
        let c = parse(&[
            "--api-id", "1", "--api-hash", "h",
            "--host", "127.0.0.1", "--port", "9000",
            "--connect-timeout-secs", "5",
        ]);
        assert_eq!(c.addr().to_string(), "127.0.0.1:9000");
        assert_eq!(c.connect_timeout_secs, 5);
    }
}
