//! Channel manager: owns one hub connection at a time and moves frames between it and subscribers.
//!
//! Each `connect` spawns a driver task that exclusively owns the transport. Every state change the
//! driver reports carries its connection generation; changes from an older connection are ignored,
//! so a late open or message from a torn-down transport has no effect.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::channel::frame::{Frame, FrameError};
use crate::channel::state::{ChannelEvent, ConnectionState};
use crate::channel::subscribers::SubscriberRegistry;
use crate::channel::transport::{Connector, Transport, TransportEvent};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// `connect` while a connection is in progress or live. Close it first.
    #[error("hub channel already active ({0})")]
    AlreadyActive(ConnectionState),
    #[error("hub channel not open ({0})")]
    NotOpen(ConnectionState),
    /// `retry` on a channel that has not failed.
    #[error("hub channel not failed ({0})")]
    NotFailed(ConnectionState),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Inner {
    state: ConnectionState,
    generation: u64,
}

/// State shared between the manager and its driver.
struct Shared {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Shared {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                generation: 0,
            }),
            state_tx,
        }
    }

    fn state(&self) -> ConnectionState {
        lock(&self.inner).state
    }

    /// Start a new connection cycle. Returns its generation, or the current state if not allowed.
    /// With `only_from`, the cycle starts only when the manager is in exactly that state.
    fn begin(&self, only_from: Option<ConnectionState>) -> Result<u64, ConnectionState> {
        let mut g = lock(&self.inner);
        if only_from.is_some_and(|s| s != g.state) {
            return Err(g.state);
        }
        let next = g.state.on(ChannelEvent::Connect).ok_or(g.state)?;
        g.generation += 1;
        g.state = next;
        self.state_tx.send_replace(next);
        Ok(g.generation)
    }

    /// Apply `event` if legal. With `Some(generation)`, only when that connection is still current.
    fn apply(&self, generation: Option<u64>, event: ChannelEvent) -> Option<ConnectionState> {
        let mut g = lock(&self.inner);
        if generation.is_some_and(|gen| gen != g.generation) {
            log::debug!("hub channel: ignoring {:?} from stale connection", event);
            return None;
        }
        let next = g.state.on(event)?;
        log::debug!("hub channel: {} -> {}", g.state, next);
        g.state = next;
        self.state_tx.send_replace(next);
        Some(next)
    }

    fn is_live(&self, generation: u64) -> bool {
        let g = lock(&self.inner);
        g.generation == generation && g.state == ConnectionState::Open
    }
}

struct Link {
    outbound: mpsc::UnboundedSender<String>,
    close_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Owner of one hub connection. Dropping it aborts the driver and releases the transport.
pub struct ChannelManager {
    connector: Arc<dyn Connector>,
    registry: Arc<SubscriberRegistry>,
    handshake: Frame,
    shared: Arc<Shared>,
    link: Mutex<Option<Link>>,
}

impl ChannelManager {
    pub fn new(connector: Arc<dyn Connector>, registry: Arc<SubscriberRegistry>) -> Self {
        Self {
            connector,
            registry,
            handshake: Frame::handshake(),
            shared: Arc::new(Shared::new()),
            link: Mutex::new(None),
        }
    }

    /// Replace the frame sent right after the connection opens.
    pub fn with_handshake(mut self, frame: Frame) -> Self {
        self.handshake = frame;
        self
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Receiver that observes every state the manager settles in.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Start connecting to `endpoint`. Allowed from Idle, Closed and Failed; rejected otherwise.
    /// Open failures are logged and leave the manager in Failed; they are not returned here.
    pub fn connect(&self, endpoint: &str) -> Result<(), ChannelError> {
        let generation = self.shared.begin(None).map_err(ChannelError::AlreadyActive)?;
        self.start(generation, endpoint);
        Ok(())
    }

    /// Connect again only if the manager is Failed. An explicit close (Closing/Closed) or a
    /// connection someone else already started is left alone.
    pub fn retry(&self, endpoint: &str) -> Result<(), ChannelError> {
        let generation = self
            .shared
            .begin(Some(ConnectionState::Failed))
            .map_err(ChannelError::NotFailed)?;
        self.start(generation, endpoint);
        Ok(())
    }

    fn start(&self, generation: u64, endpoint: &str) {
        log::info!("hub channel: connecting to {}", endpoint);

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let driver = Driver {
            generation,
            endpoint: endpoint.to_string(),
            connector: self.connector.clone(),
            shared: self.shared.clone(),
            registry: self.registry.clone(),
            handshake: self.handshake.clone(),
        };
        let task = tokio::spawn(driver.run(outbound_rx, close_rx));

        let previous = lock(&self.link).replace(Link {
            outbound,
            close_tx: Some(close_tx),
            task,
        });
        // previous driver already finished (Failed/Closed); make sure it is gone
        if let Some(previous) = previous {
            previous.task.abort();
        }
    }

    /// Send a frame. Only while Open; otherwise rejected with no side effect (nothing is queued).
    pub fn send(&self, frame: &Frame) -> Result<(), ChannelError> {
        let state = self.state();
        if state != ConnectionState::Open {
            log::debug!("hub channel: dropping outbound {} frame while {}", frame.typ, state);
            return Err(ChannelError::NotOpen(state));
        }
        let text = frame.encode()?;
        let link = lock(&self.link);
        let Some(link) = link.as_ref() else {
            return Err(ChannelError::NotOpen(state));
        };
        link.outbound
            .send(text)
            .map_err(|_| ChannelError::NotOpen(self.shared.state()))
    }

    /// Close the connection and wait until the transport is released. No-op when already Closed.
    /// Concurrent callers all return only after the transport is released.
    pub async fn close(&self) {
        let mut state_rx = self.watch_state();
        if self.shared.apply(None, ChannelEvent::CloseRequested).is_none() {
            // already Closed, or another close owns the driver
            let _ = state_rx
                .wait_for(|s| *s != ConnectionState::Closing)
                .await;
            return;
        }
        let link = lock(&self.link).take();
        if let Some(Link { close_tx, task, .. }) = link {
            if let Some(tx) = close_tx {
                let _ = tx.send(());
            }
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    log::error!("hub channel: driver ended abnormally: {}", e);
                }
            }
        }
        // driver is gone; settle a close it could not confirm
        self.shared.apply(None, ChannelEvent::TransportClosed);
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        let link = match self.link.get_mut() {
            Ok(link) => link.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(link) = link {
            link.task.abort();
        }
    }
}

enum Step {
    Close,
    Outbound(String),
    Inbound(TransportEvent),
}

/// Per-connection task. Sole owner of the transport.
struct Driver {
    generation: u64,
    endpoint: String,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    registry: Arc<SubscriberRegistry>,
    handshake: Frame,
}

impl Driver {
    async fn run(
        self,
        mut outbound: mpsc::UnboundedReceiver<String>,
        mut close_rx: oneshot::Receiver<()>,
    ) {
        let gen = Some(self.generation);

        let opened = tokio::select! {
            biased;
            _ = &mut close_rx => None,
            res = self.connector.open(&self.endpoint) => Some(res),
        };
        let mut transport = match opened {
            None => {
                log::info!("hub channel: closed before {} opened", self.endpoint);
                self.shared.apply(gen, ChannelEvent::TransportClosed);
                return;
            }
            Some(Err(e)) => {
                log::error!("hub channel: {}", e);
                self.shared.apply(gen, ChannelEvent::TransportError);
                return;
            }
            Some(Ok(t)) => t,
        };

        if self.shared.apply(gen, ChannelEvent::Opened).is_none() {
            // close was requested while the transport was opening
            transport.close().await;
            drop(transport);
            self.shared.apply(gen, ChannelEvent::TransportClosed);
            return;
        }
        log::info!("hub channel: connected to {}", self.endpoint);

        match self.handshake.encode() {
            Ok(text) => {
                if !self.write(transport.as_mut(), text).await {
                    return;
                }
            }
            Err(e) => log::error!("hub channel: handshake not sent: {}", e),
        }

        loop {
            let step = tokio::select! {
                biased;
                _ = &mut close_rx => Step::Close,
                Some(text) = outbound.recv() => Step::Outbound(text),
                event = transport.next_event() => Step::Inbound(event),
            };
            match step {
                Step::Close => {
                    // frames accepted while Open still go out before the close frame
                    while let Ok(text) = outbound.try_recv() {
                        if !self.write(transport.as_mut(), text).await {
                            return;
                        }
                    }
                    transport.close().await;
                    drop(transport);
                    self.shared.apply(gen, ChannelEvent::TransportClosed);
                    log::info!("hub channel: disconnected from {}", self.endpoint);
                    return;
                }
                Step::Outbound(text) => {
                    if !self.write(transport.as_mut(), text).await {
                        return;
                    }
                }
                Step::Inbound(TransportEvent::Message(text)) => self.deliver(&text),
                Step::Inbound(TransportEvent::Closed) => {
                    log::warn!("hub channel: {} closed the connection", self.endpoint);
                    self.shared.apply(gen, ChannelEvent::UnexpectedClose);
                    return;
                }
                Step::Inbound(TransportEvent::Error(e)) => {
                    log::error!("hub channel: connection error: {}", e);
                    self.shared.apply(gen, ChannelEvent::TransportError);
                    return;
                }
            }
        }
    }

    /// Write one text frame. On failure the connection is marked Failed and false is returned.
    async fn write(&self, transport: &mut dyn Transport, text: String) -> bool {
        match transport.send_text(text).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("hub channel: {}", e);
                self.shared
                    .apply(Some(self.generation), ChannelEvent::TransportError);
                false
            }
        }
    }

    fn deliver(&self, text: &str) {
        if !self.shared.is_live(self.generation) {
            return;
        }
        log::debug!("hub channel: received {}", text);
        match Frame::decode(text) {
            Ok(frame) => {
                if self.registry.dispatch(&frame) == 0 {
                    log::debug!("hub channel: no subscriber for {}", frame.typ);
                }
            }
            Err(e) => log::warn!("hub channel: dropping inbound frame: {}", e),
        }
    }
}
