//! Line-oriented publish/subscribe client.
//!
//! Connects to a single server over TCP (the host name goes through the
//! platform resolver, so mDNS `.local` names work where the host supports
//! them), publishes `pub <topic> <payload>` lines and dispatches incoming
//! lines of the same shape to handlers registered per topic.
//!
//! - [`Client`] — connection lifecycle, publish, subscribe, receive loop
//! - [`Publisher`] — cloneable write handle for replying from handlers
//! - [`MessageHandler`] — async callback invoked for matching frames
//! - [`ClientConfig`] — host, port and connect timeout
//! - [`ClientError`] — every failure the client surfaces
//!
//! Subscribing is purely a client-side filter: nothing is sent to the server.

pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod handler;
pub mod subscription;

pub use client::{Client, Publisher};
pub use config::ClientConfig;
pub use error::ClientError;
pub use frame::Message;
pub use handler::{handler_fn, MessageHandler, SharedHandler};
pub use subscription::SubscriptionTable;
