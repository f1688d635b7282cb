//! Gateway session lifecycle.
//!
//! [`GatewaySession`] is the sole owner of the live transport handle. It
//! drives the `Disconnected → Connecting → Connected → Disconnecting`
//! state machine, pumps inbound events to the registered observers, and
//! keeps observer failures away from the transport.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::BotError;
use crate::events::GatewayEvent;
use crate::gateway::{Credentials, Transport, TransportHandle};
use crate::types::{Interaction, Presence, ReadyEvent};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Opcode for gateway presence updates.
const OP_PRESENCE_UPDATE: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
        })
    }
}

/// Error type observers may return. Logged, never propagated.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

pub type ReadyObserver = Arc<dyn Fn(&ReadyEvent) -> Result<(), ObserverError> + Send + Sync>;
pub type EventObserver = Arc<dyn Fn(&Interaction) -> Result<(), ObserverError> + Send + Sync>;

#[derive(Default)]
struct Observers {
    ready: RwLock<Vec<ReadyObserver>>,
    event: RwLock<Vec<EventObserver>>,
}

impl Observers {
    fn notify_ready(&self, ready: &ReadyEvent) {
        let observers = self.ready.read().unwrap_or_else(|e| e.into_inner()).clone();
        for (i, observer) in observers.iter().enumerate() {
            contain("ready", i, || observer(ready));
        }
    }

    fn notify_event(&self, interaction: &Interaction) {
        let observers = self.event.read().unwrap_or_else(|e| e.into_inner()).clone();
        for (i, observer) in observers.iter().enumerate() {
            contain("event", i, || observer(interaction));
        }
    }
}

/// Run one observer, logging an error or a panic instead of propagating it.
fn contain(kind: &str, index: usize, f: impl FnOnce() -> Result<(), ObserverError>) {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(observer = kind, index, error = %e, "observer failed"),
        Err(panic) => error!(
            observer = kind,
            index,
            panic = %panic_message(panic.as_ref()),
            "observer panicked"
        ),
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound on the whole connect handshake.
    pub connect_timeout: Duration,
    /// Presence sent once the session is ready.
    pub presence: Option<Presence>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            presence: None,
        }
    }
}

struct Connection {
    handle: TransportHandle,
    pump: JoinHandle<()>,
}

impl Connection {
    /// Stop the transport (stream first), then wait for the pump to drain.
    async fn close(self) {
        self.handle.close().await;
        if let Err(e) = self.pump.await {
            warn!(error = %e, "event pump ended abnormally");
        }
    }
}

pub struct GatewaySession<T: Transport> {
    transport: T,
    options: SessionOptions,
    state: Arc<watch::Sender<SessionState>>,
    observers: Arc<Observers>,
    /// Live connection; the mutex also serialises connect/disconnect.
    connection: Mutex<Option<Connection>>,
}

impl<T: Transport> GatewaySession<T> {
    pub fn new(transport: T, options: SessionOptions) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            transport,
            options,
            state: Arc::new(state),
            observers: Arc::default(),
            connection: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Resolves once the session is back in `Disconnected`.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this only errors on drop.
        let _ = rx.wait_for(|s| *s == SessionState::Disconnected).await;
    }

    /// Register an observer invoked once per successful connection.
    pub fn on_ready<F>(&self, observer: F)
    where
        F: Fn(&ReadyEvent) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.observers
            .ready
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(observer));
    }

    /// Register an observer invoked once per inbound interaction.
    pub fn on_event<F>(&self, observer: F)
    where
        F: Fn(&Interaction) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.observers
            .event
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(observer));
    }

    /// Open the gateway connection. Only valid from `Disconnected`; a
    /// concurrent call fails with [`BotError::TransitionInProgress`].
    pub async fn connect(&self, credentials: &Credentials) -> Result<(), BotError> {
        let mut connection = self
            .connection
            .try_lock()
            .map_err(|_| BotError::TransitionInProgress)?;

        let current = self.state();
        if current != SessionState::Disconnected {
            return Err(BotError::InvalidState {
                expected: SessionState::Disconnected,
                actual: current,
            });
        }

        // A stream that ended on its own leaves its handle behind.
        if let Some(stale) = connection.take() {
            stale.close().await;
        }

        self.state.send_replace(SessionState::Connecting);
        info!("connecting to Discord gateway");

        let opened =
            match tokio::time::timeout(self.options.connect_timeout, self.transport.open(credentials))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(BotError::Network(format!(
                    "gateway handshake timed out after {:?}",
                    self.options.connect_timeout
                ))),
            };

        let handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "failed to connect to Discord gateway");
                self.state.send_replace(SessionState::Disconnected);
                return Err(e);
            }
        };

        self.state.send_replace(SessionState::Connected);
        info!(
            user = %handle.ready.user.tag(),
            guilds = handle.ready.guilds.len(),
            "Discord gateway connected"
        );

        // Ready observers finish before the first event is pumped.
        self.observers.notify_ready(&handle.ready);

        let pump = tokio::spawn(pump(
            handle.events.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.observers),
        ));

        if let Some(presence) = &self.options.presence {
            send_presence(&handle, presence);
        }

        *connection = Some(Connection { handle, pump });
        Ok(())
    }

    /// Tear the connection down. A no-op when already `Disconnected`.
    pub async fn disconnect(&self) -> Result<(), BotError> {
        let mut connection = self.connection.lock().await;

        if self.state() == SessionState::Disconnected {
            if let Some(stale) = connection.take() {
                stale.close().await;
            }
            return Ok(());
        }

        self.state.send_replace(SessionState::Disconnecting);
        info!("disconnecting from Discord gateway");

        if let Some(live) = connection.take() {
            live.close().await;
        }

        self.state.send_replace(SessionState::Disconnected);
        info!("Discord gateway disconnected");
        Ok(())
    }
}

/// Best-effort presence update; failures never touch session state.
fn send_presence(handle: &TransportHandle, presence: &Presence) {
    let payload = match serde_json::to_value(presence) {
        Ok(d) => serde_json::json!({ "op": OP_PRESENCE_UPDATE, "d": d }),
        Err(e) => {
            warn!(error = %e, "failed to serialise presence");
            return;
        }
    };
    match handle.commands.try_send(payload) {
        Ok(()) => info!(
            activity = presence.activities.first().map(|a| a.name.as_str()).unwrap_or(""),
            "presence update queued"
        ),
        Err(e) => warn!(error = %e, "failed to queue presence update"),
    }
}

/// Deliver inbound events to observers while the session is `Connected`.
async fn pump(
    events: async_channel::Receiver<GatewayEvent>,
    state: Arc<watch::Sender<SessionState>>,
    observers: Arc<Observers>,
) {
    while let Ok(event) = events.recv().await {
        if *state.borrow() != SessionState::Connected {
            debug!("session no longer connected, dropping event");
            break;
        }
        match event {
            GatewayEvent::InteractionCreate(interaction) => observers.notify_event(&interaction),
            GatewayEvent::Ready(ready) => {
                debug!(session_id = %ready.session_id, "gateway re-identified")
            }
            GatewayEvent::Resumed => debug!("gateway session resumed"),
            GatewayEvent::Unknown {
                event_name: Some(ref name),
                ..
            } => trace!(event = %name, "unhandled gateway event"),
            _ => {}
        }
    }

    let ended = state.send_if_modified(|s| {
        if *s == SessionState::Connected {
            *s = SessionState::Disconnected;
            true
        } else {
            false
        }
    });
    if ended {
        warn!("gateway event stream ended, session disconnected");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport for session, publisher and bot tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;

    pub fn ready_event() -> ReadyEvent {
        serde_json::from_value(serde_json::json!({
            "v": 10,
            "user": { "id": "1", "username": "habit-bot", "discriminator": "0",
                      "avatar": null, "bot": true, "global_name": null },
            "session_id": "sess",
            "resume_gateway_url": "wss://resume.example",
            "guilds": [],
            "application": { "id": "42", "flags": 0 }
        }))
        .unwrap()
    }

    pub fn interaction(name: &str) -> Interaction {
        serde_json::from_value(serde_json::json!({
            "id": "175928847299117063",
            "application_id": "42",
            "type": 2,
            "data": { "id": "9", "name": name, "type": 1, "options": [] },
            "guild_id": "1",
            "channel_id": "2",
            "user": { "id": "7", "username": "alice", "discriminator": "0",
                      "avatar": null, "global_name": null },
            "token": "tok",
        }))
        .unwrap()
    }

    pub enum Behaviour {
        Accept,
        RejectToken,
        Hang,
    }

    /// Transport whose event stream is fed by the test.
    pub struct FakeTransport {
        pub behaviour: Behaviour,
        pub opens: AtomicUsize,
        pub feeds: StdMutex<Vec<async_channel::Sender<GatewayEvent>>>,
        pub outbound: StdMutex<Vec<mpsc::Receiver<serde_json::Value>>>,
        /// Already queued on the stream when the next connection opens.
        pub backlog: StdMutex<Vec<GatewayEvent>>,
    }

    impl FakeTransport {
        pub fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                opens: AtomicUsize::new(0),
                feeds: StdMutex::new(Vec::new()),
                outbound: StdMutex::new(Vec::new()),
                backlog: StdMutex::new(Vec::new()),
            }
        }

        pub fn with_backlog(self, events: Vec<GatewayEvent>) -> Self {
            *self.backlog.lock().unwrap() = events;
            self
        }

        /// Sender for the most recently opened connection.
        pub fn feed(&self) -> async_channel::Sender<GatewayEvent> {
            self.feeds.lock().unwrap().last().cloned().unwrap()
        }

        pub fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn open(&self, credentials: &Credentials) -> Result<TransportHandle, BotError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::RejectToken => {
                    return Err(BotError::Authentication("close code 4004".to_string()))
                }
                Behaviour::Hang => std::future::pending::<()>().await,
                Behaviour::Accept => {}
            }
            assert_eq!(credentials.token(), "tok");

            let (feed, events) = async_channel::unbounded();
            for event in self.backlog.lock().unwrap().drain(..) {
                feed.try_send(event).unwrap();
            }
            let (commands, outbound) = mpsc::channel(8);
            self.feeds.lock().unwrap().push(feed);
            self.outbound.lock().unwrap().push(outbound);

            Ok(TransportHandle {
                ready: ready_event(),
                events,
                commands,
                shutdown: CancellationToken::new(),
                driver: None,
            })
        }
    }
}
