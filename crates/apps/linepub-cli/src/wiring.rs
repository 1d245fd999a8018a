use anyhow::{Context, Result};
use linepub_client::{handler_fn, Client, Message};

use crate::config::AppConfig;

/// Sent by the Arduino when it wants to know the computer is alive.
pub const CHECKUP_REQUEST_TOPIC: &str = "arduino/out/checkup";
pub const CHECKUP_REPLY_TOPIC: &str = "computer/out/checkup";
pub const CHECKUP_REPLY_PAYLOAD: &str = "{}";

/// Registers every handler the configuration asks for.
pub fn install(client: &Client, config: &AppConfig) -> Result<()> {
    for topic in &config.subscribe {
        client
            .subscribe(
                topic.as_str(),
                handler_fn(|message: Message| async move {
                    println!("{} {}", message.topic, message.payload);
                    anyhow::Ok(())
                }),
            )
            .with_context(|| format!("cannot subscribe to {topic:?}"))?;
    }

    if config.checkup {
        let publisher = client.publisher();
        client.subscribe(
            CHECKUP_REQUEST_TOPIC,
            handler_fn(move |_message: Message| {
                let publisher = publisher.clone();
                async move {
                    publisher.publish(CHECKUP_REPLY_TOPIC, CHECKUP_REPLY_PAYLOAD).await?;
                    log::debug!("checkup: answered on <{}>", CHECKUP_REPLY_TOPIC);
                    anyhow::Ok(())
                }
            }),
        )?;
    }
    Ok(())
}
