use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ClientError;

/// Host advertised by the robot's mDNS responder.
pub const DEFAULT_HOST: &str = "RobotV2.local";
pub const DEFAULT_PORT: u16 = 80;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for resolve + connect, in milliseconds. `None` waits as
    /// long as the OS does.
    pub connect_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Bounds resolve + connect. Kept at millisecond resolution; anything
    /// finer is rounded up so a non-zero timeout never becomes zero.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        let mut millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        if timeout > Duration::from_millis(millis) {
            millis = millis.saturating_add(1);
        }
        self.connect_timeout_ms = Some(millis);
        self
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn from_toml(input: &str) -> Result<Self, ClientError> {
        toml::from_str(input).map_err(|err| ClientError::Config {
            message: err.to_string(),
        })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| ClientError::Config {
            message: format!("{}: {}", path.display(), err),
        })?;
        Self::from_toml(&contents)
    }

    /// `host:port` as handed to the resolver.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
