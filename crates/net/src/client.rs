//! Hub client: connection lifecycle and reconnection

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use taibai_core::{
    ApprovalChange, CardCallback, ClientConfig, Envelope, EventCategory, SeqGenerator, UserMessage,
};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatcher::{Dispatcher, EventStream};
use crate::error::{Error, Result};
use crate::frame;
use crate::hooks::Hooks;
use crate::loops::{heartbeat_loop, read_loop, write_loop, ReadOutcome};
use crate::outbound::OutboundQueue;
use crate::subscriptions::SubscriptionRegistry;

/// How long `disconnect()` waits for the close frame to be flushed
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted; only an explicit `connect()` leaves this
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DialMode {
    Fresh,
    Reconnect,
}

/// One live socket and the tasks bound to it
struct Session {
    generation: u64,
    token: CancellationToken,
    writer: JoinHandle<()>,
}

struct Link {
    state: ConnectionState,
    session: Option<Session>,
}

struct ClientInner {
    id: Uuid,
    config: ClientConfig,
    link: RwLock<Link>,
    /// Serializes handshakes so two dials never race to install a session
    dial_lock: Mutex<()>,
    /// Cancelled once every `HubClient` handle is gone
    root: CancellationToken,
    /// Child of `root`, replaced when `connect()` follows a `disconnect()`
    lifecycle: parking_lot::Mutex<CancellationToken>,
    shutdown_once: AtomicBool,
    reconnecting: AtomicBool,
    generation: AtomicU64,
    queue: OutboundQueue,
    subscriptions: SubscriptionRegistry,
    dispatcher: Dispatcher,
    hooks: Hooks,
    seqs: SeqGenerator,
}

/// Handle to a persistent hub connection.
///
/// Cheap to clone; all clones drive the same connection. Background tasks
/// stop once the last handle is dropped.
#[derive(Clone)]
pub struct HubClient {
    inner: Arc<ClientInner>,
    _owner: Arc<DropGuard>,
}

impl HubClient {
    /// Create a disconnected client. Nothing is dialed until `connect()`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let root = CancellationToken::new();
        let inner = Arc::new(ClientInner {
            id: Uuid::new_v4(),
            link: RwLock::new(Link {
                state: ConnectionState::Disconnected,
                session: None,
            }),
            dial_lock: Mutex::new(()),
            lifecycle: parking_lot::Mutex::new(root.child_token()),
            root: root.clone(),
            shutdown_once: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            queue: OutboundQueue::new(config.outbound_capacity),
            subscriptions: SubscriptionRegistry::new(),
            dispatcher: Dispatcher::new(),
            hooks: Hooks::default(),
            seqs: SeqGenerator::new(),
            config,
        });

        Ok(Self {
            inner,
            _owner: Arc::new(root.drop_guard()),
        })
    }

    /// Random per-instance id, used in log fields
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Settings this client was created with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Dial the hub. Returns immediately if already connected.
    ///
    /// On failure the error is returned and also reported through the error
    /// hooks; no automatic reconnect is started.
    pub async fn connect(&self) -> Result<()> {
        self.inner.revive();
        self.inner.dial(DialMode::Fresh).await
    }

    /// Close the connection and stop any reconnect in progress.
    ///
    /// Safe to call repeatedly and from several tasks at once.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await
    }

    /// Run the reconnect sequence.
    ///
    /// Returns `Ok(())` at once if another sequence is already running.
    pub async fn reconnect(&self) -> Result<()> {
        self.inner.reconnect().await
    }

    /// True only while a session is installed
    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Current lifecycle state
    pub async fn state(&self) -> ConnectionState {
        self.inner.link.read().await.state
    }

    /// Ask the hub to forward `topic`. Kept across reconnects.
    ///
    /// Returns `Ok(false)` if the topic was already subscribed. While offline
    /// the topic is only recorded; the next connection sends it once.
    pub fn subscribe(&self, topic: &str) -> Result<bool> {
        self.inner.subscriptions.subscribe(topic, &self.inner.queue)
    }

    /// Stop forwarding `topic`. Returns `Ok(false)` if it was not subscribed.
    pub fn unsubscribe(&self, topic: &str) -> Result<bool> {
        self.inner.subscriptions.unsubscribe(topic, &self.inner.queue)
    }

    /// Tracked topics, in no particular order
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.topics()
    }

    /// Queue an application frame without waiting.
    ///
    /// A zero `seq` is replaced with the client's next sequence token. Frames
    /// still queued when a connection is established are discarded, not sent.
    pub fn send(&self, mut envelope: Envelope) -> Result<()> {
        if envelope.seq == 0 {
            envelope.seq = self.inner.seqs.next();
        }
        self.inner.queue.try_enqueue_envelope(&envelope)
    }

    /// Called after every successful (re)connect
    pub fn on_connect(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.hooks.on_connect(hook);
    }

    /// Called with the cause whenever an established connection is lost
    pub fn on_disconnect(&self, hook: impl Fn(&Error) + Send + Sync + 'static) {
        self.inner.hooks.on_disconnect(hook);
    }

    /// Called with every non-keepalive envelope before typed dispatch
    pub fn on_message(&self, hook: impl Fn(&Envelope) + Send + Sync + 'static) {
        self.inner.hooks.on_message(hook);
    }

    /// Called for dial failures, bad frames and a reconnect that gave up
    pub fn on_error(&self, hook: impl Fn(&Error) + Send + Sync + 'static) {
        self.inner.hooks.on_error(hook);
    }

    /// Handlers run on the reader task and must not block
    pub fn on_user_message(&self, handler: impl Fn(&UserMessage) + Send + Sync + 'static) {
        self.inner.dispatcher.on_user_message(handler);
    }

    pub fn on_card_callback(&self, handler: impl Fn(&CardCallback) + Send + Sync + 'static) {
        self.inner.dispatcher.on_card_callback(handler);
    }

    pub fn on_approval_change(&self, handler: impl Fn(&ApprovalChange) + Send + Sync + 'static) {
        self.inner.dispatcher.on_approval_change(handler);
    }

    /// Receives events with no typed decoder, by name
    pub fn on_system(&self, handler: impl Fn(&str, &Value) + Send + Sync + 'static) {
        self.inner.dispatcher.on_system(handler);
    }

    /// Pull-based alternative to the typed handlers; survives reconnects
    pub fn events(&self, category: EventCategory) -> EventStream {
        self.inner.dispatcher.stream(category)
    }
}

impl ClientInner {
    fn lifecycle(&self) -> CancellationToken {
        self.lifecycle.lock().clone()
    }

    /// Give a client that was disconnected a fresh lifecycle
    fn revive(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.is_cancelled() {
            *lifecycle = self.root.child_token();
            self.shutdown_once.store(false, Ordering::Release);
        }
    }

    async fn dial(self: &Arc<Self>, mode: DialMode) -> Result<()> {
        let lifecycle = self.lifecycle();
        let _dialing = self.dial_lock.lock().await;
        if lifecycle.is_cancelled() {
            return Err(Error::Cancelled);
        }

        {
            let mut link = self.link.write().await;
            if link.state == ConnectionState::Connected {
                return Ok(());
            }
            if mode == DialMode::Fresh && link.state != ConnectionState::Reconnecting {
                link.state = ConnectionState::Connecting;
            }
        }

        info!(client_id = %self.id, url = %self.config.url, "Connecting to hub");
        let (writer, reader) = match frame::connect(&self.config).await {
            Ok(halves) => halves,
            Err(e) => {
                warn!(client_id = %self.id, error = %e, "Failed to connect");
                if mode == DialMode::Fresh {
                    let mut link = self.link.write().await;
                    if link.state == ConnectionState::Connecting {
                        link.state = ConnectionState::Disconnected;
                    }
                }
                self.hooks.emit_error(&e);
                return Err(e);
            }
        };

        // The new writer waits on this until the session is fully set up
        let mut pending = self.queue.receiver().lock().await;
        if lifecycle.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let token = lifecycle.child_token();
        {
            let mut link = self.link.write().await;

            let inner = self.clone();
            let writer_token = token.clone();
            let writer = tokio::spawn(async move {
                write_loop(
                    writer,
                    &inner.queue,
                    &inner.hooks,
                    inner.config.keepalive_interval,
                    writer_token,
                )
                .await
            });

            let inner = self.clone();
            let reader_token = token.clone();
            tokio::spawn(async move {
                let outcome = read_loop(
                    reader,
                    &inner.hooks,
                    &inner.dispatcher,
                    inner.config.read_deadline,
                    reader_token,
                )
                .await;
                inner.reader_exited(generation, outcome).await;
            });

            let inner = self.clone();
            let heartbeat_token = token.clone();
            tokio::spawn(async move {
                heartbeat_loop(
                    &inner.queue,
                    &inner.seqs,
                    inner.config.heartbeat_interval,
                    heartbeat_token,
                )
                .await
            });

            link.state = ConnectionState::Connected;
            link.session = Some(Session {
                generation,
                token,
                writer,
            });
        }

        info!(client_id = %self.id, generation = generation, "Connected to hub");
        let restart = self.subscriptions.restart(&self.queue, &mut pending);
        if restart.discarded > 0 {
            debug!(
                client_id = %self.id,
                frames = restart.discarded,
                "Discarded frames queued while offline"
            );
        }
        if restart.replayed > 0 {
            debug!(client_id = %self.id, topics = restart.replayed, "Replayed subscriptions");
        }

        // Runs before the writer sees any frame; whatever it queues follows the replay
        self.hooks.emit_connect();
        drop(pending);
        Ok(())
    }

    async fn reader_exited(self: Arc<Self>, generation: u64, outcome: ReadOutcome) {
        let session = {
            let mut link = self.link.write().await;
            // disconnect() or a newer session already took over
            if link.session.as_ref().map(|s| s.generation) != Some(generation) {
                return;
            }
            link.state = ConnectionState::Disconnected;
            link.session.take()
        };
        if let Some(session) = session {
            session.token.cancel();
        }

        match outcome {
            ReadOutcome::Cancelled => {
                debug!(client_id = %self.id, "Reader stopped");
            }
            ReadOutcome::Graceful => {
                info!(client_id = %self.id, "Hub closed the connection");
            }
            ReadOutcome::Lost(cause) => {
                warn!(client_id = %self.id, cause = %cause, "Connection lost");
                self.hooks.emit_disconnect(&cause);
                if !self.lifecycle().is_cancelled() {
                    self.spawn_reconnect();
                }
            }
        }
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        let inner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.reconnect().await {
                debug!(client_id = %inner.id, error = %e, "Automatic reconnect ended");
            }
        });
    }

    async fn reconnect(self: &Arc<Self>) -> Result<()> {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(client_id = %self.id, "Reconnect already in progress");
            return Ok(());
        }
        let _flight = FlightGuard(&self.reconnecting);

        let lifecycle = self.lifecycle();
        if lifecycle.is_cancelled() {
            return Err(Error::Cancelled);
        }
        {
            let mut link = self.link.write().await;
            if link.state == ConnectionState::Connected {
                return Ok(());
            }
            link.state = ConnectionState::Reconnecting;
        }

        let max = self.config.max_reconnect_attempts;
        let mut attempts: u32 = 0;
        loop {
            let delay = self.backoff_delay(attempts);
            tokio::select! {
                _ = lifecycle.cancelled() => {
                    self.settle_cancelled().await;
                    return Err(Error::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }

            attempts += 1;
            info!(client_id = %self.id, attempt = attempts, max = max, "Reconnecting");
            match self.dial(DialMode::Reconnect).await {
                Ok(()) => return Ok(()),
                Err(Error::Cancelled) => {
                    self.settle_cancelled().await;
                    return Err(Error::Cancelled);
                }
                Err(_) if max > 0 && attempts >= max => {
                    self.link.write().await.state = ConnectionState::Failed;
                    let exhausted = Error::ReconnectExhausted { attempts };
                    error!(client_id = %self.id, attempts = attempts, "Giving up on reconnect");
                    self.hooks.emit_error(&exhausted);
                    return Err(exhausted);
                }
                Err(_) => {}
            }
        }
    }

    async fn settle_cancelled(&self) {
        let mut link = self.link.write().await;
        if link.state == ConnectionState::Reconnecting {
            link.state = ConnectionState::Disconnected;
        }
    }

    /// Delay before attempt `attempts + 1`.
    ///
    /// Fixed unless `max_reconnect_delay` is set, in which case it doubles per
    /// failed attempt up to the cap and half of it is randomized. Never
    /// shorter than `reconnect_delay`.
    fn backoff_delay(&self, attempts: u32) -> Duration {
        let base = self.config.reconnect_delay;
        let Some(cap) = self.config.max_reconnect_delay else {
            return base;
        };
        let grown = base
            .checked_mul(1u32 << attempts.min(16))
            .unwrap_or(cap)
            .min(cap);
        let half = grown / 2;
        let jitter = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
        (half + Duration::from_millis(jitter)).clamp(base, cap)
    }

    async fn disconnect(&self) {
        if self.shutdown_once.swap(true, Ordering::AcqRel) {
            return;
        }

        let session = {
            let mut link = self.link.write().await;
            link.state = ConnectionState::Disconnected;
            link.session.take()
        };
        self.lifecycle().cancel();

        if let Some(session) = session {
            session.token.cancel();
            if tokio::time::timeout(CLOSE_GRACE, session.writer).await.is_err() {
                debug!(client_id = %self.id, "Writer did not finish closing");
            }
            info!(client_id = %self.id, "Disconnected from hub");
        }
    }
}

/// Clears the single-flight flag when a reconnect sequence ends
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
