use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::decoder::{DecodeOutcome, TagStreamDecoder};
use super::discovery::DiscoveryController;
use crate::error::{ConnectError, InteractionError};
use crate::hw::{Device, Radio, RadioLink, RawRead, ReadStream};

/// Connect attempts longer than this fail unless configured otherwise.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Observable state of the single reader connection.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Display)]
pub enum ConnectionState {
    #[display("idle")]
    Idle,
    #[display("connecting to {address}")]
    Connecting { address: String },
    #[display("connected to {}", _0.id())]
    Connected(Device),
    #[display("disconnecting from {}", _0.id())]
    Disconnecting(Device),
    #[display("failed to connect to {address}: {reason}")]
    Failed { address: String, reason: String },
}

impl ConnectionState {
    /// Returns whether a new connect attempt would be accepted.
    #[must_use]
    pub fn accepts_connect(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed { .. })
    }

    #[must_use]
    pub fn connected_device(&self) -> Option<&Device> {
        match self {
            Self::Connected(device) => Some(device),
            _ => None,
        }
    }
}

/// Event delivered to link subscribers.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LinkEvent {
    /// A newly decoded tag identifier.
    Tag(String),
    /// The link went down without a disconnect request.
    Dropped,
}

/// Receiving end of a link subscription.
///
/// The channel closes without [`LinkEvent::Dropped`] when the operator disconnects.
pub type LinkEvents = mpsc::UnboundedReceiver<LinkEvent>;

/// A subscription bound to one connection.
#[derive(Debug)]
pub struct LinkSubscription {
    device: Device,
    generation: u64,
    events: LinkEvents,
}

impl LinkSubscription {
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Identifies the connection this subscription belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn into_events(self) -> LinkEvents {
        self.events
    }

    pub(crate) fn into_parts(self) -> (Device, u64, LinkEvents) {
        (self.device, self.generation, self.events)
    }
}

#[derive(Debug)]
struct ActiveLink {
    link: Arc<dyn RadioLink>,
    stop: CancellationToken,
    pump: Option<JoinHandle<()>>,
    decoder: TagStreamDecoder,
    subscribers: Vec<mpsc::UnboundedSender<LinkEvent>>,
}

impl ActiveLink {
    fn broadcast(&mut self, event: &LinkEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

#[derive(Debug, Default)]
enum Phase {
    #[default]
    Idle,
    Connecting {
        abort: CancellationToken,
    },
    Connected(ActiveLink),
    Disconnecting,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    phase: Phase,
}

#[derive(Debug)]
struct Shared {
    slot: Mutex<Slot>,
    state: watch::Sender<ConnectionState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Feeds one read of connection `generation` through the decoder.
    fn deliver(&self, generation: u64, read: RawRead) {
        let mut slot = self.lock();
        if slot.generation != generation {
            return;
        }
        let Phase::Connected(active) = &mut slot.phase else {
            return;
        };

        if let DecodeOutcome::Accepted(identifier) = active.decoder.decode(read) {
            debug!(%identifier, "decoded tag");
            active.broadcast(&LinkEvent::Tag(identifier));
        }
    }

    /// Tears down connection `generation` after its read stream ended on its own.
    fn take_dropped(&self, generation: u64) -> bool {
        let mut slot = self.lock();
        if slot.generation != generation || !matches!(slot.phase, Phase::Connected(_)) {
            return false;
        }
        let Phase::Connected(mut active) = std::mem::take(&mut slot.phase) else {
            return false;
        };

        active.broadcast(&LinkEvent::Dropped);
        self.publish(ConnectionState::Idle);
        true
    }

    /// Returns a connecting slot to idle if the attempt was abandoned.
    fn abandon(&self, generation: u64) {
        let mut slot = self.lock();
        if slot.generation == generation && matches!(slot.phase, Phase::Connecting { .. }) {
            slot.phase = Phase::Idle;
            self.publish(ConnectionState::Idle);
        }
    }
}

/// Resets the slot if a connect future is dropped mid-attempt.
struct ConnectingGuard {
    shared: Arc<Shared>,
    generation: u64,
    armed: bool,
}

impl Drop for ConnectingGuard {
    fn drop(&mut self) {
        if self.armed {
            self.shared.abandon(self.generation);
        }
    }
}

/// Owns the single active reader connection.
#[derive(Debug)]
pub struct ConnectionManager {
    radio: Arc<dyn Radio>,
    discovery: Arc<DiscoveryController>,
    connect_timeout: Duration,
    shared: Arc<Shared>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(
        radio: Arc<dyn Radio>,
        discovery: Arc<DiscoveryController>,
        connect_timeout: Duration,
    ) -> Self {
        let (state, _receiver) = watch::channel(ConnectionState::Idle);
        Self {
            radio,
            discovery,
            connect_timeout,
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::default()),
                state,
            }),
        }
    }

    /// Subscribes to connection state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Returns the connected reader, if any.
    #[must_use]
    pub fn connected_device(&self) -> Option<Device> {
        self.shared.state.borrow().connected_device().cloned()
    }

    /// Returns identifiers decoded on the current connection, in order.
    #[must_use]
    pub fn decoded_identifiers(&self) -> Vec<String> {
        match &self.shared.lock().phase {
            Phase::Connected(active) => active.decoder.accepted().to_vec(),
            _ => Vec::new(),
        }
    }

    /// Connects to the reader at `address` and starts decoding its reads.
    ///
    /// Fails fast with [`ConnectError::Busy`] unless idle; stops discovery first.
    #[instrument(skip(self), level = "debug")]
    pub async fn connect(&self, address: &str) -> Result<Device, ConnectError> {
        let (generation, abort) = {
            let mut slot = self.shared.lock();
            if !matches!(slot.phase, Phase::Idle) {
                return Err(ConnectError::Busy {
                    state: self.shared.state.borrow().clone(),
                });
            }
            slot.generation += 1;
            let abort = CancellationToken::new();
            slot.phase = Phase::Connecting {
                abort: abort.clone(),
            };
            self.shared.publish(ConnectionState::Connecting {
                address: address.to_string(),
            });
            (slot.generation, abort)
        };
        let mut guard = ConnectingGuard {
            shared: Arc::clone(&self.shared),
            generation,
            armed: true,
        };

        self.discovery.cancel_discovery().await;

        let attempt = async {
            let link = self.radio.connect(address).await?;
            match link.subscribe().await {
                Ok(reads) => Ok::<_, InteractionError>((link, reads)),
                Err(error) => {
                    if let Err(disconnect_error) = link.disconnect().await {
                        debug!(error = %disconnect_error, "failed to close half-open link");
                    }
                    Err(error)
                }
            }
        };
        let outcome = tokio::select! {
            () = abort.cancelled() => Err(ConnectError::Aborted { address: address.to_string() }),
            result = timeout(self.connect_timeout, attempt) => match result {
                Err(_elapsed) => Err(ConnectError::TimedOut {
                    address: address.to_string(),
                    after: self.connect_timeout,
                }),
                Ok(Err(InteractionError::MissingEndpoint { endpoint })) => {
                    Err(ConnectError::MissingEndpoint {
                        address: address.to_string(),
                        endpoint,
                    })
                }
                Ok(Err(source)) => Err(ConnectError::Radio {
                    address: address.to_string(),
                    source,
                }),
                Ok(Ok(opened)) => Ok(opened),
            },
        };

        guard.armed = false;
        match outcome {
            Ok((link, reads)) => self.install(generation, address, Arc::from(link), reads).await,
            Err(error) => {
                warn!(error = %error, "connect failed");
                self.fail(generation, address, &error);
                Err(error)
            }
        }
    }

    async fn install(
        &self,
        generation: u64,
        address: &str,
        link: Arc<dyn RadioLink>,
        reads: ReadStream,
    ) -> Result<Device, ConnectError> {
        let device = link.device().clone();
        let installed = {
            let mut slot = self.shared.lock();
            let still_connecting = slot.generation == generation
                && matches!(&slot.phase, Phase::Connecting { abort } if !abort.is_cancelled());
            if still_connecting {
                let stop = CancellationToken::new();
                let pump = tokio::spawn(pump_reads(
                    Arc::clone(&self.shared),
                    generation,
                    Arc::clone(&link),
                    reads,
                    stop.clone(),
                ));
                slot.phase = Phase::Connected(ActiveLink {
                    link: Arc::clone(&link),
                    stop,
                    pump: Some(pump),
                    decoder: TagStreamDecoder::new(),
                    subscribers: Vec::new(),
                });
                self.shared
                    .publish(ConnectionState::Connected(device.clone()));
            }
            still_connecting
        };

        if installed {
            info!(id = device.id(), address = device.address(), "reader connected");
            return Ok(device);
        }

        if let Err(error) = link.disconnect().await {
            debug!(error = %error, "failed to close link of aborted attempt");
        }
        self.shared.abandon(generation);
        Err(ConnectError::Aborted {
            address: address.to_string(),
        })
    }

    fn fail(&self, generation: u64, address: &str, error: &ConnectError) {
        let mut slot = self.shared.lock();
        if slot.generation != generation || !matches!(slot.phase, Phase::Connecting { .. }) {
            return;
        }
        slot.phase = Phase::Idle;
        let state = match error {
            ConnectError::Aborted { .. } => ConnectionState::Idle,
            _ => ConnectionState::Failed {
                address: address.to_string(),
                reason: error.to_string(),
            },
        };
        self.shared.publish(state);
    }

    /// Closes the current connection or aborts a pending attempt.
    ///
    /// Idempotent. Decoded identifiers are discarded even if the radio
    /// disconnect fails.
    #[instrument(skip(self), level = "debug")]
    pub async fn disconnect(&self) {
        self.teardown(None).await;
    }

    /// Closes connection `generation`; does nothing once a newer attempt has begun.
    #[instrument(skip(self), level = "debug")]
    pub async fn disconnect_generation(&self, generation: u64) {
        self.teardown(Some(generation)).await;
    }

    async fn teardown(&self, only: Option<u64>) {
        let active = {
            let mut slot = self.shared.lock();
            if only.is_some_and(|generation| generation != slot.generation) {
                debug!(current = slot.generation, "connection already replaced");
                return;
            }
            match std::mem::take(&mut slot.phase) {
                Phase::Connected(active) => {
                    let device = active.link.device().clone();
                    slot.phase = Phase::Disconnecting;
                    self.shared.publish(ConnectionState::Disconnecting(device));
                    Some(active)
                }
                Phase::Connecting { abort } if only.is_none() => {
                    abort.cancel();
                    slot.phase = Phase::Connecting { abort };
                    None
                }
                other => {
                    slot.phase = other;
                    return;
                }
            }
        };

        let Some(mut active) = active else {
            let mut state = self.state();
            let _ = state
                .wait_for(|state| !matches!(state, ConnectionState::Connecting { .. }))
                .await;
            return;
        };

        active.stop.cancel();
        active.subscribers.clear();
        active.decoder.reset();
        if let Some(pump) = active.pump.take()
            && let Err(error) = pump.await
        {
            warn!(error = %error, "read pump failed");
        }
        if let Err(error) = active.link.disconnect().await {
            warn!(error = %error, "radio disconnect failed; connection state reset anyway");
        }

        let mut slot = self.shared.lock();
        if matches!(slot.phase, Phase::Disconnecting) {
            slot.phase = Phase::Idle;
            self.shared.publish(ConnectionState::Idle);
        }
        info!("reader disconnected");
    }

    /// Subscribes to decoded identifiers of the current connection.
    ///
    /// Identifiers decoded before the call are replayed first. Returns
    /// `None` unless connected.
    #[must_use]
    pub fn subscribe(&self) -> Option<LinkSubscription> {
        let mut slot = self.shared.lock();
        let generation = slot.generation;
        let Phase::Connected(active) = &mut slot.phase else {
            return None;
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        for identifier in active.decoder.accepted() {
            let _ = sender.send(LinkEvent::Tag(identifier.clone()));
        }
        active.subscribers.push(sender);
        Some(LinkSubscription {
            device: active.link.device().clone(),
            generation,
            events: receiver,
        })
    }
}

async fn pump_reads(
    shared: Arc<Shared>,
    generation: u64,
    link: Arc<dyn RadioLink>,
    mut reads: ReadStream,
    stop: CancellationToken,
) {
    loop {
        let read = tokio::select! {
            biased;
            () = stop.cancelled() => return,
            read = reads.next() => read,
        };
        let Some(read) = read else {
            break;
        };
        shared.deliver(generation, read);
    }

    if shared.take_dropped(generation) {
        warn!(id = link.device().id(), "reader connection dropped");
        if let Err(error) = link.disconnect().await {
            debug!(error = %error, "failed to close dropped link");
        }
    }
}
