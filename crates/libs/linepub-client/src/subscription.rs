use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::ClientError;
use crate::frame;
use crate::handler::{MessageHandler, SharedHandler};

/// Topic → handlers, in registration order.
///
/// Writers hold the lock only to append; the receive loop holds it only to
/// clone one topic's handler list. The lock is never held across an await, so
/// handlers may subscribe further handlers while being dispatched.
#[derive(Default)]
pub struct SubscriptionTable {
    topics: RwLock<HashMap<String, Vec<SharedHandler>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the topic's list. Registering the same topic again
    /// adds to the list, it never replaces it.
    ///
    /// Topics that no received frame can carry (empty, or containing
    /// whitespace) are rejected with [`ClientError::InvalidFrame`].
    pub fn subscribe<H>(&self, topic: impl Into<String>, handler: H) -> Result<(), ClientError>
    where
        H: MessageHandler + 'static,
    {
        self.subscribe_shared(topic, Arc::new(handler))
    }

    pub fn subscribe_shared(
        &self,
        topic: impl Into<String>,
        handler: SharedHandler,
    ) -> Result<(), ClientError> {
        let topic = topic.into();
        frame::validate_topic(&topic)?;

        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let handlers = topics.entry(topic.clone()).or_default();
        handlers.push(handler);
        log::debug!("subscriptions: <{}> now has {} handler(s)", topic, handlers.len());
        Ok(())
    }

    /// Snapshot of the handlers for an exact topic match.
    pub fn handlers_for(&self, topic: &str) -> Vec<SharedHandler> {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics.get(topic).cloned().unwrap_or_default()
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics.get(topic).map_or(0, Vec::len)
    }

    pub fn topics(&self) -> Vec<String> {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = topics.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.topics.read().unwrap_or_else(PoisonError::into_inner).is_empty()
    }
}

impl std::fmt::Debug for SubscriptionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionTable")
            .field("topics", &self.topics())
            .finish()
    }
}
