mod config;
mod wiring;

use anyhow::{Context, Result};
use clap::Parser;
use linepub_client::Client;
use std::path::PathBuf;
use std::sync::Arc;

use config::{parse_publish, AppConfig, PublishConfig};

#[derive(Parser, Debug)]
#[command(name = "linepub", about = "Talk to the robot over the line pub/sub protocol")]
struct Args {
    /// TOML file with host, port, subscriptions and startup publishes.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Give up connecting after this many milliseconds.
    #[arg(long, value_name = "MS")]
    connect_timeout_ms: Option<u64>,
    /// Print frames received on TOPIC. Repeatable.
    #[arg(long = "subscribe", value_name = "TOPIC")]
    subscribe: Vec<String>,
    /// Publish once after connecting. Repeatable.
    #[arg(long = "publish", value_name = "TOPIC=PAYLOAD", value_parser = parse_publish)]
    publish: Vec<PublishConfig>,
    /// Do not answer arduino/out/checkup requests.
    #[arg(long)]
    no_checkup: bool,
}

impl Args {
    fn into_config(self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::from_path(path)?,
            None => AppConfig::default(),
        };
        if let Some(host) = self.host {
            config.client.host = host;
        }
        if let Some(port) = self.port {
            config.client.port = port;
        }
        if let Some(millis) = self.connect_timeout_ms {
            config.client.connect_timeout_ms = Some(millis);
        }
        config.subscribe.extend(self.subscribe);
        config.publish.extend(self.publish);
        if self.no_checkup {
            config.checkup = false;
        }
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config()?;
    let client = Arc::new(Client::new(config.client.clone()));
    wiring::install(&client, &config)?;

    client
        .connect()
        .await
        .with_context(|| format!("could not reach {}", config.client.endpoint()))?;

    for message in &config.publish {
        client
            .publish(&message.topic, &message.payload)
            .await
            .with_context(|| format!("failed to publish on {}", message.topic))?;
    }

    let shutdown = {
        let client = client.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("linepub: interrupted, shutting down");
                client.close();
            }
        })
    };

    let result = client.run().await;
    shutdown.abort();
    client.close();
    result.context("receive loop failed")
}
