use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::frame::{self, LineBuffer};
use crate::handler::{self, MessageHandler, SharedHandler};
use crate::subscription::SubscriptionTable;

const READ_CHUNK_SIZE: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum ReaderSlot {
    Idle,
    Ready(OwnedReadHalf),
    InUse,
}

/// Bookkeeping for the current connection. `session` changes on every
/// connect, so a receive loop or publisher that finishes late cannot tear
/// down a newer connection.
struct LinkState {
    session: u64,
    peer: Option<SocketAddr>,
    reader: ReaderSlot,
    stop: Option<CancellationToken>,
}

/// Connection shared between the client and its publishers. The async mutex
/// keeps concurrent frames from interleaving; a present writer means a live
/// session.
struct Link {
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    state: Mutex<LinkState>,
    cancel: CancellationToken,
}

impl Link {
    /// Forgets connection `session` if it is still the current one: clears the
    /// peer, drops an unclaimed read half and stops a running receive loop.
    /// Callers hold the writer lock and drop the writer when this returns
    /// `true`.
    fn end_session(&self, session: u64) -> bool {
        let mut state = lock(&self.state);
        if state.session != session {
            return false;
        }
        state.peer = None;
        state.reader = ReaderSlot::Idle;
        if let Some(stop) = state.stop.take() {
            stop.cancel();
        }
        true
    }

    fn current_session(&self) -> u64 {
        lock(&self.state).session
    }
}

/// Cloneable handle that publishes on the client's connection.
///
/// Handlers should capture a `Publisher` rather than the client itself.
#[derive(Clone)]
pub struct Publisher {
    link: Arc<Link>,
}

impl Publisher {
    /// Writes `pub <topic> <payload>\n` in full. No acknowledgment is awaited.
    ///
    /// A failed write ends the connection; the client may then connect again.
    pub async fn publish(&self, topic: &str, payload: &str) -> Result<(), ClientError> {
        if self.link.cancel.is_cancelled() {
            return Err(ClientError::Closed);
        }
        let line = frame::encode_publish(topic, payload)?;

        let mut writer = self.link.writer.lock().await;
        let stream = writer.as_mut().ok_or(ClientError::NotConnected)?;

        log::debug!("publisher: sending {} bytes: {:?}", line.len(), line);
        if let Err(source) = write_frame(stream, line.as_bytes()).await {
            log::warn!("publisher: write failed, dropping connection: {}", source);
            let session = self.link.current_session();
            self.link.end_session(session);
            writer.take();
            return Err(ClientError::Write { source });
        }

        // close() could not take the writer while we held it.
        if self.link.cancel.is_cancelled() {
            writer.take();
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.link.state).peer.is_some()
    }
}

async fn write_frame(stream: &mut OwnedWriteHalf, bytes: &[u8]) -> std::io::Result<()> {
    stream.write_all(bytes).await?;
    stream.flush().await
}

/// Client for the line protocol.
///
/// All methods take `&self`: wrap the client in an `Arc` to run the receive
/// loop on one task while publishing or subscribing from others.
///
/// ```no_run
/// # async fn demo() -> Result<(), linepub_client::ClientError> {
/// use linepub_client::{handler_fn, Client, ClientConfig, Message};
///
/// let client = Client::new(ClientConfig::new("RobotV2.local", 80));
/// client.connect().await?;
/// client.subscribe(
///     "sensors/temp",
///     handler_fn(|message: Message| async move {
///         println!("{}", message.payload);
///         anyhow::Ok(())
///     }),
/// )?;
/// client.publish("computer/out/checkup", "{}").await?;
/// client.run().await
/// # }
/// ```
pub struct Client {
    config: ClientConfig,
    link: Arc<Link>,
    subscriptions: SubscriptionTable,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            link: Arc::new(Link {
                writer: tokio::sync::Mutex::new(None),
                state: Mutex::new(LinkState {
                    session: 0,
                    peer: None,
                    reader: ReaderSlot::Idle,
                    stop: None,
                }),
                cancel: CancellationToken::new(),
            }),
            subscriptions: SubscriptionTable::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolves the configured host and opens the TCP connection.
    ///
    /// Returns the address actually connected to. Resolution failures are
    /// logged and returned; the client then stays unconnected and may be
    /// asked to connect again.
    pub async fn connect(&self) -> Result<SocketAddr, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }

        let endpoint = self.config.endpoint();
        log::info!("client: connecting to <{}>", endpoint);
        let limit = self.config.connect_timeout();
        let (stream, peer) = with_deadline(limit, &endpoint, open_stream(&self.config)).await?;
        let (read_half, write_half) = stream.into_split();

        let mut writer = self.link.writer.lock().await;
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        if writer.is_some() {
            return Err(ClientError::AlreadyConnected);
        }
        {
            let mut state = lock(&self.link.state);
            state.session = state.session.wrapping_add(1);
            state.peer = Some(peer);
            state.reader = ReaderSlot::Ready(read_half);
            state.stop = Some(self.link.cancel.child_token());
        }
        *writer = Some(write_half);

        log::info!("client: connected to <{}> at {}", self.config.host, peer);
        Ok(peer)
    }

    pub async fn publish(&self, topic: &str, payload: &str) -> Result<(), ClientError> {
        self.publisher().publish(topic, payload).await
    }

    pub fn publisher(&self) -> Publisher {
        Publisher {
            link: self.link.clone(),
        }
    }

    /// Registers `handler` for frames whose topic equals `topic` exactly.
    /// Nothing is sent to the server. Fails only for topics no frame can
    /// carry.
    pub fn subscribe<H>(&self, topic: impl Into<String>, handler: H) -> Result<(), ClientError>
    where
        H: MessageHandler + 'static,
    {
        self.subscriptions.subscribe(topic, handler)
    }

    pub fn subscribe_shared(
        &self,
        topic: impl Into<String>,
        handler: SharedHandler,
    ) -> Result<(), ClientError> {
        self.subscriptions.subscribe_shared(topic, handler)
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    /// Receive loop. Reads until the peer closes the connection, `close()` is
    /// called, a publish breaks the connection or the read fails, dispatching
    /// every complete `pub` line to its topic's handlers one frame at a time.
    ///
    /// The connection is finished once this returns.
    pub async fn run(&self) -> Result<(), ClientError> {
        let (session, stop, mut reader) = self.take_reader()?;
        let result = self.receive(&mut reader, &stop).await;
        drop(reader);

        let mut writer = self.link.writer.lock().await;
        if self.link.end_session(session) {
            writer.take();
        }
        result
    }

    /// Stops the receive loop and drops the connection. Safe to call at any
    /// time, any number of times; does not wait for running handlers.
    pub fn close(&self) {
        if !self.link.cancel.is_cancelled() {
            log::info!("client: closing connection to <{}>", self.config.endpoint());
        }
        self.link.cancel.cancel();

        // A publisher holding the writer drops it itself after its write.
        if let Ok(mut writer) = self.link.writer.try_lock() {
            writer.take();
        }

        let mut state = lock(&self.link.state);
        state.peer = None;
        state.stop = None;
        if matches!(state.reader, ReaderSlot::Ready(_)) {
            state.reader = ReaderSlot::Idle;
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.link.state).peer.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.link.cancel.is_cancelled()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        lock(&self.link.state).peer
    }

    fn take_reader(&self) -> Result<(u64, CancellationToken, OwnedReadHalf), ClientError> {
        let mut state = lock(&self.link.state);
        match std::mem::replace(&mut state.reader, ReaderSlot::InUse) {
            ReaderSlot::Ready(reader) => {
                let stop = match &state.stop {
                    Some(stop) => stop.clone(),
                    None => self.link.cancel.child_token(),
                };
                Ok((state.session, stop, reader))
            }
            ReaderSlot::InUse => Err(ClientError::ReceiveLoopActive),
            ReaderSlot::Idle => {
                state.reader = ReaderSlot::Idle;
                if self.is_closed() {
                    Err(ClientError::Closed)
                } else {
                    Err(ClientError::NotConnected)
                }
            }
        }
    }

    async fn receive(
        &self,
        reader: &mut OwnedReadHalf,
        stop: &CancellationToken,
    ) -> Result<(), ClientError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut buffer = LineBuffer::new();

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    log::debug!("client: receive loop stopped");
                    return Ok(());
                }
                result = reader.read(&mut chunk[..]) => {
                    match result {
                        Ok(0) => {
                            log::info!("client: connection closed by <{}>", self.config.host);
                            return Ok(());
                        }
                        Ok(n) => {
                            buffer.extend(&chunk[..n]);
                            self.drain(&mut buffer, stop).await;
                        }
                        Err(source) => {
                            log::warn!(
                                "client: read from <{}> failed: {}",
                                self.config.host,
                                source
                            );
                            return Err(ClientError::Read { source });
                        }
                    }
                }
            }
        }
    }

    async fn drain(&self, buffer: &mut LineBuffer, stop: &CancellationToken) {
        while let Some(line) = buffer.next_line() {
            if stop.is_cancelled() {
                return;
            }
            let Ok(text) = std::str::from_utf8(&line) else {
                log::trace!("client: dropping non utf-8 line ({} bytes)", line.len());
                continue;
            };
            let Some(message) = frame::parse_line(text) else {
                log::trace!("client: ignoring line {:?}", text);
                continue;
            };

            log::debug!("client: received <{}> {}", message.topic, message.payload);
            let handlers = self.subscriptions.handlers_for(&message.topic);
            handler::dispatch(&handlers, &message).await;
        }

        if let Some(dropped) = buffer.discard_overflow() {
            log::warn!("client: dropped {} bytes without a line break", dropped);
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.link.cancel.cancel();
    }
}

/// Bounds `opening` by `limit` when one is configured.
async fn with_deadline<T, F>(
    limit: Option<Duration>,
    endpoint: &str,
    opening: F,
) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    let Some(limit) = limit else {
        return opening.await;
    };
    match tokio::time::timeout(limit, opening).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!("client: connecting to <{}> timed out after {:?}", endpoint, limit);
            Err(ClientError::Timeout {
                operation: format!("connect to {endpoint}"),
            })
        }
    }
}

async fn open_stream(config: &ClientConfig) -> Result<(TcpStream, SocketAddr), ClientError> {
    let addrs = tokio::net::lookup_host((config.host.as_str(), config.port))
        .await
        .map_err(|source| {
            log::warn!("client: failed to resolve <{}>: {}", config.host, source);
            ClientError::Resolve {
                host: config.host.clone(),
                source,
            }
        })?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok((stream, addr)),
            Err(source) => {
                log::debug!("client: couldn't connect to {}: {}", addr, source);
                last_error = Some(ClientError::Connect { addr, source });
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        log::warn!("client: <{}> resolved to no addresses", config.host);
        ClientError::Resolve {
            host: config.host.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses found"),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stalled_connect_times_out() {
        let limit = Some(Duration::from_millis(250));
        let stalled = std::future::pending::<Result<(), ClientError>>();
        let err = with_deadline(limit, "RobotV2.local:80", stalled).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
        assert_eq!(err.to_string(), "timeout: connect to RobotV2.local:80");
    }

    #[tokio::test]
    async fn deadline_passes_results_through() {
        let limit = Some(Duration::from_secs(5));
        assert_eq!(with_deadline(limit, "h:1", async { Ok(7) }).await.unwrap(), 7);

        let refused = async { Err::<(), _>(ClientError::NotConnected) };
        let err = with_deadline(None, "h:1", refused).await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn write_failure_ends_session_and_frees_reader() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = Client::new(ClientConfig::new("127.0.0.1", port));
        let (connected, accepted) = tokio::join!(client.connect(), listener.accept());
        connected.unwrap();
        drop(accepted.unwrap());

        let stop = lock(&client.link.state).stop.clone().unwrap();
        let session = client.link.current_session();
        assert!(client.link.end_session(session));

        assert!(stop.is_cancelled());
        assert!(!client.is_connected());
        assert!(matches!(client.run().await, Err(ClientError::NotConnected)));
        assert!(!client.link.end_session(session + 1));
    }
}
