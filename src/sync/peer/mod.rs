//! Peer-to-peer transport with manual signaling
//!
//! One side hosts and produces an offer blob, the other joins by pasting it
//! and produces an answer blob, which the host pastes back. The blobs travel
//! out of band (chat, QR code, ...). Once the data channel opens, sync
//! messages flow both ways. A closed channel drops the role back to idle;
//! there is no session resumption, a new exchange is needed.

mod blob;
pub mod rtc;

use anyhow::{bail, Context, Result};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{decode_message, Command, Inbound, SyncMessage, Transport};
use crate::session::{SessionState, SessionStore};

pub use blob::{decode_blob, encode_blob, SignalBlobError};
pub use rtc::WebRtcFactory;

pub const PEER_TRANSPORT: &str = "peer";

/// Connection role of this surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Idle,
    Hosting,
    Joining,
    Connected,
}

/// Progress of the local half of the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Collecting address candidates; the local blob is not final yet
    Gathering,
    /// The local blob is complete and can be handed over
    Ready,
}

/// Lifecycle events from an underlying connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Open,
    Message(String),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherOutcome {
    Complete,
    TimedOut,
}

/// Wait for candidate gathering to finish, but no longer than `limit`.
///
/// A timeout is not an error: the description is used with whatever
/// candidates were collected so far.
pub async fn await_gathering<F>(done: F, limit: Duration) -> GatherOutcome
where
    F: Future<Output = ()>,
{
    match tokio::time::timeout(limit, done).await {
        Ok(()) => GatherOutcome::Complete,
        Err(_) => {
            warn!(
                "Candidate gathering did not finish within {:?}, continuing with partial candidates",
                limit
            );
            GatherOutcome::TimedOut
        }
    }
}

/// A single peer connection, driven through one offer/answer exchange.
///
/// Descriptions passed in and out are plain JSON; blob encoding happens in
/// [`LiveSync`]. Implementations report open/close/message through the
/// event sender they were created with.
#[async_trait::async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create the data channel and a complete local offer
    async fn create_offer(&self) -> Result<String>;

    /// Apply the remote answer (host side)
    async fn accept_answer(&self, answer: &str) -> Result<()>;

    /// Apply the remote offer and create a complete local answer (join side)
    async fn receive_offer(&self, offer: &str) -> Result<String>;

    /// Send a text frame on the data channel
    async fn send(&self, text: String) -> Result<()>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// Creates fresh connectors; each handshake gets a new one
#[async_trait::async_trait]
pub trait PeerConnectorFactory: Send + Sync {
    async fn connect(&self, events: mpsc::UnboundedSender<LinkEvent>) -> Result<Arc<dyn PeerConnector>>;
}

/// Peer-to-peer sync endpoint for one surface
pub struct LiveSync {
    factory: Arc<dyn PeerConnectorFactory>,
    inbound: mpsc::Sender<Inbound>,
    connector: Mutex<Option<Arc<dyn PeerConnector>>>,
    role: watch::Sender<PeerRole>,
    phase: watch::Sender<Option<HandshakePhase>>,
    /// Bumped on every new handshake and on disconnect; stale work checks it
    epoch: watch::Sender<u64>,
}

impl LiveSync {
    pub fn new(factory: Arc<dyn PeerConnectorFactory>, inbound: mpsc::Sender<Inbound>) -> Arc<Self> {
        Arc::new(Self {
            factory,
            inbound,
            connector: Mutex::new(None),
            role: watch::channel(PeerRole::Idle).0,
            phase: watch::channel(None).0,
            epoch: watch::channel(0).0,
        })
    }

    pub fn role(&self) -> PeerRole {
        *self.role.borrow()
    }

    pub fn phase(&self) -> Option<HandshakePhase> {
        *self.phase.borrow()
    }

    pub fn watch_role(&self) -> watch::Receiver<PeerRole> {
        self.role.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.role() == PeerRole::Connected
    }

    fn current(&self) -> Option<Arc<dyn PeerConnector>> {
        self.connector.lock().ok().and_then(|c| c.clone())
    }

    /// Start hosting; returns the offer blob to hand to the joiner
    pub async fn host(self: &Arc<Self>) -> Result<String> {
        let (epoch, connector) = self.begin(PeerRole::Hosting).await?;
        let offer = self.gather(epoch, connector.create_offer()).await?;
        info!("Host offer ready");
        Ok(encode_blob(&offer))
    }

    /// Apply the answer blob pasted back from the joiner
    pub async fn accept_answer(&self, answer_blob: &str) -> Result<()> {
        if self.role() != PeerRole::Hosting {
            bail!("Not hosting; start hosting before pasting an answer");
        }
        if self.phase() != Some(HandshakePhase::Ready) {
            bail!("Offer is not ready yet");
        }
        let answer = decode_blob(answer_blob).context("Invalid answer")?;
        let connector = self.current().context("No connection in progress")?;
        connector.accept_answer(&answer).await?;
        info!("Answer applied, waiting for the channel to open");
        Ok(())
    }

    /// Join using the host's offer blob; returns the answer blob to send back
    pub async fn join(self: &Arc<Self>, offer_blob: &str) -> Result<String> {
        let offer = decode_blob(offer_blob).context("Invalid offer")?;
        let (epoch, connector) = self.begin(PeerRole::Joining).await?;
        let answer = self.gather(epoch, connector.receive_offer(&offer)).await?;
        info!("Join answer ready");
        Ok(encode_blob(&answer))
    }

    /// Close the channel and abandon any handshake in progress
    pub async fn disconnect(&self) {
        self.epoch.send_modify(|e| *e += 1);
        self.teardown().await;
        info!("Peer sync disconnected");
    }

    /// Send `store`'s current snapshot every time the channel comes up.
    ///
    /// Both sides do this; the older of the two snapshots is discarded by
    /// the receiver's version check. The task ends once this endpoint is
    /// dropped.
    pub fn sync_on_connect(self: &Arc<Self>, store: Arc<SessionStore>) -> JoinHandle<()> {
        let this: Weak<Self> = Arc::downgrade(self);
        let mut roles = self.watch_role();
        tokio::spawn(async move {
            while roles.changed().await.is_ok() {
                if *roles.borrow_and_update() != PeerRole::Connected {
                    continue;
                }
                let Some(sync) = this.upgrade() else {
                    break;
                };
                info!("Peer connected, sending current snapshot");
                store.publish_to(sync.as_ref()).await;
            }
            debug!("Peer connect sync stopped");
        })
    }

    /// Ask the connected peer to run a control command on its own store
    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.send(&SyncMessage::Command(command)).await
    }

    async fn send(&self, message: &SyncMessage) -> Result<()> {
        let connector = match self.current() {
            Some(c) if self.is_connected() && c.is_open() => c,
            _ => {
                warn!("Peer send skipped; channel not open");
                return Ok(());
            }
        };
        let text = serde_json::to_string(message)?;
        if let Err(e) = connector.send(text).await {
            warn!("Peer send failed: {:#}", e);
        }
        Ok(())
    }

    async fn teardown(&self) {
        let previous = self.connector.lock().ok().and_then(|mut c| c.take());
        if let Some(connector) = previous {
            if let Err(e) = connector.close().await {
                debug!("Error while closing peer connection: {:#}", e);
            }
        }
        self.phase.send_replace(None);
        self.role.send_replace(PeerRole::Idle);
    }

    /// Reset any previous connection and set up a new one in `role`
    async fn begin(self: &Arc<Self>, role: PeerRole) -> Result<(u64, Arc<dyn PeerConnector>)> {
        self.epoch.send_modify(|e| *e += 1);
        self.teardown().await;
        let epoch = *self.epoch.borrow();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connector = self.factory.connect(events_tx).await?;

        if *self.epoch.borrow() != epoch {
            let _ = connector.close().await;
            bail!("Handshake cancelled");
        }

        if let Ok(mut slot) = self.connector.lock() {
            *slot = Some(Arc::clone(&connector));
        }
        self.role.send_replace(role);
        self.spawn_events(epoch, events_rx);

        info!("Peer sync entering {:?}", role);
        Ok((epoch, connector))
    }

    /// Run a gathering step unless the handshake is cancelled first
    async fn gather<F>(&self, epoch: u64, step: F) -> Result<String>
    where
        F: Future<Output = Result<String>>,
    {
        let mut epoch_rx = self.epoch.subscribe();
        if *epoch_rx.borrow_and_update() != epoch {
            bail!("Handshake cancelled");
        }

        self.phase.send_replace(Some(HandshakePhase::Gathering));
        let result = tokio::select! {
            res = step => res,
            _ = epoch_rx.changed() => bail!("Handshake cancelled"),
        };

        match result {
            Ok(description) => {
                self.phase.send_replace(Some(HandshakePhase::Ready));
                Ok(description)
            }
            Err(e) => {
                self.teardown().await;
                Err(e)
            }
        }
    }

    fn spawn_events(self: &Arc<Self>, epoch: u64, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if *this.epoch.borrow() != epoch {
                    break;
                }
                match event {
                    LinkEvent::Open => {
                        info!("Peer channel open");
                        this.role.send_replace(PeerRole::Connected);
                    }
                    LinkEvent::Message(text) => {
                        let Some(message) = decode_message(PEER_TRANSPORT, &text) else {
                            continue;
                        };
                        let item = Inbound {
                            origin: PEER_TRANSPORT.to_string(),
                            message,
                        };
                        if this.inbound.send(item).await.is_err() {
                            break;
                        }
                    }
                    LinkEvent::Closed => {
                        info!("Peer channel closed");
                        this.teardown().await;
                        break;
                    }
                }
            }
            debug!("Peer event loop for handshake {} stopped", epoch);
        });
    }
}

#[async_trait::async_trait]
impl Transport for LiveSync {
    fn name(&self) -> &str {
        PEER_TRANSPORT
    }

    async fn publish(&self, snapshot: &SessionState) -> Result<()> {
        self.send(&SyncMessage::State(snapshot.clone())).await
    }
}
