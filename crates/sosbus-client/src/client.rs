use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use sosbus_frame::{Message, BROADCAST_ADDRESS};
use sosbus_transport::{Endpoint, DEFAULT_HOST, DEFAULT_PORT};
use tracing::{debug, info, trace, warn};

use crate::connection::{abandon_torn, on_receiver_thread, Connection};
use crate::error::{BoxError, ClientError, PreconditionViolation, Result};
use crate::pattern::Pattern;
use crate::registry::{TriggerId, TriggerRegistry};
use crate::route::{MessageDefaults, Route};
use crate::waiter::SyncWaiter;

/// Pause between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker host name or address.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// Extra connection attempts after the first one fails.
    pub retries: u32,
    /// Pause between connection attempts.
    pub retry_delay: Duration,
    /// Read timeout on the receiving socket. `None` blocks until data
    /// arrives; when set, the receiver treats an expired read as idle.
    pub read_timeout: Option<Duration>,
    /// Write timeout for posts.
    pub write_timeout: Option<Duration>,
    /// Disable Nagle's algorithm so small messages go out immediately.
    pub nodelay: bool,
    /// Initial routing defaults for outgoing messages.
    pub defaults: MessageDefaults,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            read_timeout: None,
            write_timeout: None,
            nodelay: true,
            defaults: MessageDefaults::default(),
        }
    }
}

impl ClientConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// Use `endpoint` as the broker address.
    pub fn with_endpoint(mut self, endpoint: &Endpoint) -> Self {
        self.host = endpoint.host.clone();
        self.port = endpoint.port;
        self
    }
}

/// Lifecycle state of a client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Active,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Active => "active",
        })
    }
}

/// A connection to the SOS broker with triggers and blocking receives.
///
/// All operations take `&self`; share a client between threads with `Arc`.
/// Triggers and defaults live on the client, so they survive
/// [`Client::reconnect`].
///
/// Trigger callbacks run on the receiver thread. They may post and may
/// register or deregister triggers, but must not call [`Client::listen`] or
/// [`Client::post_rpc`]: no message could arrive while the receiver is
/// blocked, so those calls fail with [`PreconditionViolation::ReceiverThread`].
///
/// ```no_run
/// use std::time::Duration;
///
/// use sosbus_client::{Client, Pattern, Route};
///
/// # fn main() -> sosbus_client::Result<()> {
/// let client = Client::default();
/// client.connect_to("localhost", 7915, 3)?;
///
/// client.register_trigger(Pattern::any().msg_type(34), |message| {
///     println!("node {} reported {:?}", message.src_addr(), message.payload());
///     Ok(())
/// });
///
/// let replies = client.post_rpc(
///     &Route::new().dest_addr(5).msg_type(33),
///     vec![0x01],
///     &Pattern::any().src_addr(5).msg_type(33),
///     Some(Duration::from_secs(2)),
///     1,
/// )?;
/// println!("{} replies", replies.len());
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Mutex<ClientConfig>,
    defaults: Mutex<MessageDefaults>,
    registry: Arc<TriggerRegistry>,
    waiter: Arc<SyncWaiter>,
    connection: Mutex<Option<Connection>>,
    connecting: AtomicBool,
}

impl Client {
    /// Create a disconnected client.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            defaults: Mutex::new(config.defaults),
            config: Mutex::new(config),
            registry: Arc::new(TriggerRegistry::new()),
            waiter: Arc::new(SyncWaiter::new()),
            connection: Mutex::new(None),
            connecting: AtomicBool::new(false),
        }
    }

    /// Connect to `host:port`, retrying up to `retries` more times.
    ///
    /// The endpoint and retry count are remembered for [`Client::reconnect`].
    pub fn connect_to(&self, host: impl Into<String>, port: u16, retries: u32) -> Result<()> {
        {
            let mut config = self.lock_config();
            config.host = host.into();
            config.port = port;
            config.retries = retries;
        }
        self.connect()
    }

    /// Connect to the configured endpoint and start the receiver thread.
    ///
    /// Returns once the receiver is reading. Fails with
    /// [`ClientError::AlreadyConnected`] while a connection is active or
    /// being established.
    pub fn connect(&self) -> Result<()> {
        let stale = {
            let mut connection = self.lock_connection();
            if connection.as_ref().is_some_and(Connection::is_alive) {
                return Err(ClientError::AlreadyConnected);
            }
            if self.connecting.swap(true, Ordering::AcqRel) {
                return Err(ClientError::AlreadyConnected);
            }
            connection.take()
        };
        if let Some(stale) = stale {
            debug!(addr = %stale.endpoint(), "reaping dead connection");
            stale.close();
        }

        let config = self.lock_config().clone();
        debug!(addr = %config.endpoint(), retries = config.retries, "connecting");
        let result = self.open(&config);
        self.connecting.store(false, Ordering::Release);
        result
    }

    /// Dial, publish the connection, then start receiving. The connection is
    /// stored before the receiver runs so callbacks can post from the first
    /// message on.
    fn open(&self, config: &ClientConfig) -> Result<()> {
        let (connection, reader) = Connection::dial(config)?;
        let link = connection.link();

        let ready = {
            let mut slot = self.lock_connection();
            let connection = slot.insert(connection);
            connection.start(reader, Arc::clone(&self.registry), Arc::clone(&self.waiter))
        };

        match ready.and_then(|ready| Connection::await_ready(ready, &link)) {
            Ok(()) => {
                info!(addr = %config.endpoint(), "connection established");
                Ok(())
            }
            Err(err) => {
                if let Some(connection) = self.lock_connection().take() {
                    connection.close();
                }
                Err(err)
            }
        }
    }

    /// Shut the connection down and join the receiver thread.
    ///
    /// Wakes an outstanding [`Client::listen`] or [`Client::post_rpc`].
    /// Disconnecting a disconnected client does nothing.
    pub fn disconnect(&self) {
        let connection = self.lock_connection().take();
        if let Some(connection) = connection {
            debug!(addr = %connection.endpoint(), "disconnecting");
            connection.close();
        }
    }

    /// Drop the current connection and connect again, optionally to a new
    /// host and/or port. Triggers and defaults are kept.
    pub fn reconnect(&self, host: Option<&str>, port: Option<u16>) -> Result<()> {
        self.disconnect();
        {
            let mut config = self.lock_config();
            if let Some(host) = host {
                config.host = host.to_owned();
            }
            if let Some(port) = port {
                config.port = port;
            }
        }
        self.connect()
    }

    pub fn state(&self) -> ConnectionState {
        if self.connecting.load(Ordering::Acquire) {
            return ConnectionState::Connecting;
        }
        match self.lock_connection().as_ref() {
            Some(connection) if connection.is_alive() => ConnectionState::Active,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// True while a `listen` or `post_rpc` is outstanding.
    pub fn is_waiting(&self) -> bool {
        self.waiter.is_busy()
    }

    /// The configured broker endpoint.
    pub fn endpoint(&self) -> Endpoint {
        self.lock_config().endpoint()
    }

    /// Current routing defaults for outgoing messages.
    pub fn defaults(&self) -> MessageDefaults {
        *self.lock_defaults()
    }

    /// Update the routing defaults; fields absent from `route` keep their value.
    pub fn set_defaults(&self, route: &Route) {
        self.lock_defaults().update(route);
    }

    /// Build a message with the current defaults, without sending it.
    pub fn message(&self, route: &Route, payload: impl Into<Bytes>) -> Result<Message> {
        let defaults = self.defaults();
        Ok(route.build(&defaults, payload)?)
    }

    /// Send one message; omitted routing fields take the session defaults.
    ///
    /// A payload longer than 255 bytes fails before anything is written.
    pub fn post(&self, route: &Route, payload: impl Into<Bytes>) -> Result<()> {
        let message = self.message(route, payload)?;
        self.post_message(&message)
    }

    /// Send a prebuilt message verbatim.
    pub fn post_message(&self, message: &Message) -> Result<()> {
        let (writer, link) = {
            let connection = self.lock_connection();
            let connection = connection
                .as_ref()
                .ok_or_else(|| ClientError::disconnected("not connected"))?;
            if let Some(reason) = connection.failure() {
                return Err(ClientError::disconnected(reason));
            }
            (connection.writer(), connection.link())
        };

        let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
        let was_torn = writer.is_torn();
        match writer.send(message) {
            Ok(()) => {
                trace!(
                    did = message.dest_module(),
                    daddr = message.dest_addr(),
                    msg_type = message.msg_type(),
                    len = message.payload().len(),
                    "posted message"
                );
                Ok(())
            }
            Err(err) => {
                if writer.is_torn() && !was_torn {
                    warn!(error = %err, "post cut a frame short; dropping the connection");
                    abandon_torn(&writer);
                }
                match link.failure() {
                    Some(reason) => Err(ClientError::disconnected(reason)),
                    None => Err(err.into()),
                }
            }
        }
    }

    /// Send in the shape of the on-node network post: the source address is
    /// the session default and a missing destination means broadcast.
    pub fn post_net(
        &self,
        dest_module: u8,
        src_module: u8,
        msg_type: u8,
        payload: impl Into<Bytes>,
        dest_addr: Option<u16>,
    ) -> Result<()> {
        let route = Route::new()
            .dest_module(dest_module)
            .src_module(src_module)
            .dest_addr(dest_addr.unwrap_or(BROADCAST_ADDRESS))
            .msg_type(msg_type);
        self.post(&route, payload)
    }

    /// Send a request and collect up to `nreplies` messages matching `reply`.
    ///
    /// The reply slot is installed before the request is written, so a
    /// reply that arrives immediately is not lost. See [`Client::listen`]
    /// for the wait semantics.
    pub fn post_rpc(
        &self,
        route: &Route,
        payload: impl Into<Bytes>,
        reply: &Pattern,
        timeout: Option<Duration>,
        nreplies: usize,
    ) -> Result<Vec<Message>> {
        let request = self.message(route, payload)?;
        self.post_rpc_message(&request, reply, timeout, nreplies)
    }

    /// [`Client::post_rpc`] with a prebuilt request.
    pub fn post_rpc_message(
        &self,
        request: &Message,
        reply: &Pattern,
        timeout: Option<Duration>,
        nreplies: usize,
    ) -> Result<Vec<Message>> {
        check_wait(timeout, nreplies)?;
        let slot = self.waiter.begin(*reply, nreplies)?;
        self.post_message(request)?;
        slot.wait(timeout)
    }

    /// Block until `nreplies` messages matching `pattern` arrive.
    ///
    /// Returns early once all replies are in. When `timeout` elapses the
    /// replies collected so far are returned, possibly none. More than one
    /// reply requires a timeout. Only one `listen`/`post_rpc` may be
    /// outstanding per client; a second fails with
    /// [`PreconditionViolation::WaiterBusy`].
    pub fn listen(
        &self,
        pattern: &Pattern,
        timeout: Option<Duration>,
        nreplies: usize,
    ) -> Result<Vec<Message>> {
        check_wait(timeout, nreplies)?;
        self.waiter.begin(*pattern, nreplies)?.wait(timeout)
    }

    /// Register a callback for every received message matching `pattern`.
    pub fn register_trigger<F>(&self, pattern: Pattern, callback: F) -> TriggerId
    where
        F: Fn(&Message) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.registry.register(pattern, callback)
    }

    /// Remove every trigger selected by `pattern`. Returns how many were removed.
    pub fn deregister_trigger(&self, pattern: &Pattern) -> usize {
        self.registry.deregister(pattern)
    }

    pub fn deregister_trigger_id(&self, id: TriggerId) -> bool {
        self.registry.deregister_id(id)
    }

    pub fn trigger_count(&self) -> usize {
        self.registry.len()
    }

    fn lock_config(&self) -> MutexGuard<'_, ClientConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_defaults(&self) -> MutexGuard<'_, MessageDefaults> {
        self.defaults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_connection(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_wait(timeout: Option<Duration>, nreplies: usize) -> Result<()> {
    if nreplies > 1 && timeout.is_none() {
        return Err(PreconditionViolation::TimeoutRequired { nreplies }.into());
    }
    if on_receiver_thread() {
        return Err(PreconditionViolation::ReceiverThread.into());
    }
    Ok(())
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint().to_string())
            .field("state", &self.state())
            .field("triggers", &self.registry.len())
            .field("waiter", &self.waiter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use sosbus_frame::FrameError;

    use super::*;

    #[test]
    fn config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint().to_string(), "localhost:7915");
        assert_eq!(config.retries, 0);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert!(config.read_timeout.is_none());
        assert!(config.nodelay);
        assert_eq!(config.defaults, MessageDefaults::default());

        let moved = config.with_endpoint(&"10.0.0.2:9000".parse().unwrap());
        assert_eq!(moved.host, "10.0.0.2");
        assert_eq!(moved.port, 9000);
    }

    #[test]
    fn new_client_is_disconnected() {
        let client = Client::default();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        client.disconnect();
        client.disconnect();
    }

    #[test]
    fn post_without_connection_is_disconnected() {
        let client = Client::default();
        let err = client.post(&Route::new(), vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, ClientError::Disconnected { .. }));
    }

    #[test]
    fn oversize_payload_fails_before_connection_check() {
        let client = Client::default();
        let err = client.post(&Route::new(), vec![0u8; 256]).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Frame(FrameError::PayloadTooLarge { size: 256, max: 255 })
        ));
    }

    #[test]
    fn listen_preconditions_come_first() {
        let client = Client::default();
        let err = client.listen(&Pattern::any(), None, 2).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Precondition(PreconditionViolation::TimeoutRequired { nreplies: 2 })
        ));

        let err = client
            .listen(&Pattern::any(), Some(Duration::from_millis(10)), 1)
            .unwrap_err();
        assert!(matches!(err, ClientError::Disconnected { .. }));
    }

    #[test]
    fn defaults_fill_messages() {
        let client = Client::default();
        client.set_defaults(&Route::new().src_addr(0x0042).dest_module(0x97));

        let message = client.message(&Route::new().msg_type(40), vec![9]).unwrap();
        assert_eq!(message.dest_module(), 0x97);
        assert_eq!(message.src_module(), 128);
        assert_eq!(message.dest_addr(), BROADCAST_ADDRESS);
        assert_eq!(message.src_addr(), 0x0042);
        assert_eq!(message.msg_type(), 40);
        assert_eq!(client.defaults().src_addr, 0x0042);
    }

    #[test]
    fn triggers_can_be_managed_while_disconnected() {
        let client = Client::default();
        let first = client.register_trigger(Pattern::any().msg_type(33), |_| Ok(()));
        client.register_trigger(Pattern::any().msg_type(34), |_| Ok(()));
        assert_eq!(client.trigger_count(), 2);

        assert!(client.deregister_trigger_id(first));
        assert_eq!(client.deregister_trigger(&Pattern::any()), 1);
        assert_eq!(client.trigger_count(), 0);
    }

    #[test]
    fn client_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Client>();
    }
}
