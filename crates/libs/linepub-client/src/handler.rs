use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;

use crate::frame::Message;

/// Callback invoked for every received frame whose topic it was subscribed to.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> anyhow::Result<()>;
}

pub type SharedHandler = Arc<dyn MessageHandler>;

/// Adapter returned by [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wraps an async closure as a [`MessageHandler`]. The closure receives its
/// own copy of the message.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        (self.f)(message.clone()).await
    }
}

/// Forwards frames into a channel, for callers that prefer to consume them
/// from their own task.
#[async_trait]
impl MessageHandler for mpsc::Sender<Message> {
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        self.send(message.clone())
            .await
            .map_err(|_| anyhow::anyhow!("receiver for topic {} dropped", message.topic))
    }
}

#[async_trait]
impl MessageHandler for mpsc::UnboundedSender<Message> {
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        self.send(message.clone())
            .map_err(|_| anyhow::anyhow!("receiver for topic {} dropped", message.topic))
    }
}

/// Runs each handler in order, isolating failures so one bad handler cannot
/// take down the receive loop or starve the handlers after it.
pub(crate) async fn dispatch(handlers: &[SharedHandler], message: &Message) {
    for (index, handler) in handlers.iter().enumerate() {
        let outcome = AssertUnwindSafe(handler.handle(message)).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::warn!(
                    "dispatch: handler {} for <{}> failed: {:#}",
                    index,
                    message.topic,
                    err
                );
            }
            Err(panic) => {
                log::error!(
                    "dispatch: handler {} for <{}> panicked: {}",
                    index,
                    message.topic,
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(text) = panic.downcast_ref::<&'static str>() {
        text
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.as_str()
    } else {
        "non-string panic payload"
    }
}
