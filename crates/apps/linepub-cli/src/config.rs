use anyhow::{Context, Result};
use linepub_client::{frame, ClientConfig};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublishConfig {
    pub topic: String,
    pub payload: String,
}

/// Everything the `linepub` binary wires up: where to connect, which topics
/// to print, what to publish at startup and whether to answer checkups.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(flatten)]
    pub client: ClientConfig,
    pub subscribe: Vec<String>,
    pub publish: Vec<PublishConfig>,
    pub checkup: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            subscribe: Vec::new(),
            publish: Vec::new(),
            checkup: true,
        }
    }
}

impl AppConfig {
    pub fn from_toml(input: &str) -> Result<Self> {
        toml::from_str(input).context("invalid config")
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("failed to load {}", path.display()))
    }
}

/// Parses `--publish topic=payload`. The payload may itself contain `=`.
pub fn parse_publish(input: &str) -> Result<PublishConfig, String> {
    let (topic, payload) = input
        .split_once('=')
        .ok_or_else(|| format!("expected TOPIC=PAYLOAD, got {input:?}"))?;
    if topic.is_empty() {
        return Err(format!("missing topic in {input:?}"));
    }
    frame::validate_topic(topic).map_err(|err| err.to_string())?;
    Ok(PublishConfig {
        topic: topic.to_string(),
        payload: payload.to_string(),
    })
}
