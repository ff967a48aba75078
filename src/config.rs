use crate::auth::UserPass;
use crate::relay::DEFAULT_IDLE_TIMEOUT;
use crate::session::{DEFAULT_CONNECT_TIMEOUT, SessionSettings};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Usernames and passwords travel behind a one byte length prefix
const MAX_CREDENTIAL_LEN: usize = 255;

/// Config is the listener and session configuration. Every field has a
/// default except the credential pair.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_sessions: usize,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1080,
            username: None,
            password: None,
            max_sessions: 10,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl Config {
    /// load_from_file reads a TOML configuration file. Missing keys keep
    /// their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        tracing::info!("loading configuration from {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// validate rejects configurations the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("host must not be empty");
        }
        if self.max_sessions == 0 {
            bail!("max_sessions must be at least 1");
        }
        if self.idle_timeout.is_zero() {
            bail!("idle_timeout must be greater than zero");
        }
        if self.connect_timeout.is_zero() {
            bail!("connect_timeout must be greater than zero");
        }

        match (&self.username, &self.password) {
            (Some(u), Some(p)) => {
                if u.is_empty() || u.len() > MAX_CREDENTIAL_LEN {
                    bail!("username must be 1 to {MAX_CREDENTIAL_LEN} bytes");
                }
                if p.is_empty() || p.len() > MAX_CREDENTIAL_LEN {
                    bail!("password must be 1 to {MAX_CREDENTIAL_LEN} bytes");
                }
            }
            (None, None) => bail!("a username and password are required"),
            _ => bail!("must provide both username and password"),
        }

        Ok(())
    }

    /// listen_addr is the host:port the listener binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// credential returns the configured username/password pair
    pub fn credential(&self) -> Result<UserPass> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Ok(UserPass {
                username: u.clone(),
                password: p.clone(),
            }),
            _ => bail!("username/password not configured"),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            idle_timeout: self.idle_timeout,
            connect_timeout: self.connect_timeout,
        }
    }
}
