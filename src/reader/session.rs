use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bon::bon;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{
    ConnectionManager, ConnectionState, DEFAULT_CONNECT_TIMEOUT, LinkEvent, LinkEvents,
};
use super::discovery::{DEFAULT_DISCOVERY_TIMEOUT, DiscoveryController, DiscoveryStatus};
use super::registry::DeviceRegistry;
use super::tracker::{Progress, ScanSessionTracker, SessionResult, SessionState};
use crate::error::{ConnectError, SessionError};
use crate::hw::{Device, Radio};
use crate::inventory::ExpectedItem;

#[derive(Debug)]
struct ActiveSession {
    interrupt: CancellationToken,
    driver: JoinHandle<()>,
}

/// Caller-owned handle to every reader connectivity component.
#[derive(Debug)]
pub struct ConnectivitySession {
    discovery: Arc<DiscoveryController>,
    connection: Arc<ConnectionManager>,
    active: Mutex<Option<ActiveSession>>,
}

#[bon]
impl ConnectivitySession {
    #[builder]
    pub fn new(
        radio: Arc<dyn Radio>,
        #[builder(default = DEFAULT_DISCOVERY_TIMEOUT)] discovery_timeout: Duration,
        #[builder(default = DEFAULT_CONNECT_TIMEOUT)] connect_timeout: Duration,
        name_filter: Option<String>,
    ) -> Self {
        let discovery = Arc::new(DiscoveryController::new(
            Arc::clone(&radio),
            DeviceRegistry::new(),
            discovery_timeout,
            name_filter,
        ));
        let connection = Arc::new(ConnectionManager::new(
            radio,
            Arc::clone(&discovery),
            connect_timeout,
        ));

        Self {
            discovery,
            connection,
            active: Mutex::new(None),
        }
    }
}

impl ConnectivitySession {
    pub async fn start_discovery(&self) {
        self.discovery.start_discovery().await;
    }

    pub async fn cancel_discovery(&self) {
        self.discovery.cancel_discovery().await;
    }

    pub async fn connect(&self, address: &str) -> Result<Device, ConnectError> {
        self.connection.connect(address).await
    }

    /// Disconnects the reader. A running session ends as interrupted.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    /// Live, discovery-ordered registry snapshot.
    #[must_use]
    pub fn devices(&self) -> watch::Receiver<Vec<Device>> {
        self.discovery.registry().subscribe()
    }

    #[must_use]
    pub fn registry(&self) -> &DeviceRegistry {
        self.discovery.registry()
    }

    #[must_use]
    pub fn discovery_status(&self) -> watch::Receiver<DiscoveryStatus> {
        self.discovery.status()
    }

    #[must_use]
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state()
    }

    /// Starts reconciling decoded tags against `expected` on the connected reader.
    #[instrument(skip_all, fields(items = expected.len()), level = "debug")]
    pub fn start_session(&self, expected: Vec<ExpectedItem>) -> Result<SessionHandle, SessionError> {
        let mut active = self.lock_active();
        if active
            .as_ref()
            .is_some_and(|session| !session.driver.is_finished())
        {
            return Err(SessionError::AlreadyRunning);
        }

        let tracker = ScanSessionTracker::start(expected)?;
        let (device, generation, events) = self
            .connection
            .subscribe()
            .ok_or(SessionError::NotConnected)?
            .into_parts();

        info!(id = device.id(), items = tracker.items().len(), "scan session started");
        let progress = tracker.subscribe_progress();
        let interrupt = CancellationToken::new();
        let (result_tx, result_rx) = oneshot::channel();
        let driver = tokio::spawn(drive_session(
            tracker,
            device,
            generation,
            events,
            interrupt.clone(),
            Arc::clone(&self.connection),
            result_tx,
        ));
        *active = Some(ActiveSession {
            interrupt: interrupt.clone(),
            driver,
        });

        Ok(SessionHandle {
            progress,
            interrupt,
            result: result_rx,
        })
    }

    /// Interrupts the running session, if any.
    pub fn interrupt(&self) {
        if let Some(session) = self.lock_active().as_ref() {
            session.interrupt.cancel();
        }
    }

    /// Waits for the last session to finish tearing down its connection.
    ///
    /// Call once its result has arrived; an interrupted session hands over
    /// the result before the reader is disconnected.
    pub async fn settle(&self) {
        let Some(session) = self.lock_active().take() else {
            return;
        };
        if let Err(error) = session.driver.await {
            warn!(error = %error, "session driver failed");
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Caller's view of one running scan session.
#[derive(Debug)]
pub struct SessionHandle {
    progress: watch::Receiver<Progress>,
    interrupt: CancellationToken,
    result: oneshot::Receiver<SessionResult>,
}

impl SessionHandle {
    /// Subscribes to found/total progress.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    pub fn interrupt(&self) {
        self.interrupt.cancel();
    }

    /// Token that interrupts the session when cancelled.
    #[must_use]
    pub fn interrupter(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    /// Waits for the terminal result.
    pub async fn finished(self) -> Result<SessionResult, SessionError> {
        self.result.await.map_err(|_| SessionError::Abandoned)
    }
}

#[instrument(skip_all, fields(id = device.id()), level = "debug")]
async fn drive_session(
    mut tracker: ScanSessionTracker,
    device: Device,
    generation: u64,
    mut events: LinkEvents,
    interrupt: CancellationToken,
    connection: Arc<ConnectionManager>,
    result: oneshot::Sender<SessionResult>,
) {
    let mut link_closed = false;
    while !tracker.state().is_terminal() {
        tokio::select! {
            biased;
            () = interrupt.cancelled() => {
                tracker.interrupt();
            }
            event = events.recv() => match event {
                Some(LinkEvent::Tag(identifier)) => {
                    let observation = tracker.observe(&identifier);
                    debug!(%identifier, ?observation, "observed tag");
                }
                Some(LinkEvent::Dropped) => {
                    warn!("connection dropped during scan session");
                    tracker.connection_lost();
                }
                None => {
                    debug!("link closed by disconnect");
                    link_closed = true;
                    tracker.interrupt();
                }
            },
        }
    }
    drop(events);

    let state = tracker.state();
    let finished = tracker.finish(Some(device));
    info!(%state, progress = %finished.progress(), "scan session finished");
    match state {
        SessionState::Completed => {
            connection.disconnect_generation(generation).await;
            deliver(result, finished);
        }
        SessionState::Interrupted => {
            deliver(result, finished);
            if !link_closed {
                connection.disconnect_generation(generation).await;
            }
        }
        // The read pump has already closed a dropped link.
        SessionState::ConnectionFailed | SessionState::Running => deliver(result, finished),
    }
}

fn deliver(result: oneshot::Sender<SessionResult>, finished: SessionResult) {
    if result.send(finished).is_err() {
        debug!("session result receiver dropped");
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hw::{FakeBackendConfig, FakeRadio, FakeRadioStats};

    const FIXTURE: &str = "dev-1|RFD40|AA:BB:CC:DD:EE:01";

    fn session(reads: &str, read_interval: Duration) -> (ConnectivitySession, Arc<FakeRadioStats>) {
        let radio = FakeRadio::new(
            FakeBackendConfig::builder()
                .scan_fixture(FIXTURE.parse().expect("fixture"))
                .reads(reads.parse().expect("script"))
                .read_interval(read_interval)
                .build(),
        );
        let stats = radio.stats();
        (ConnectivitySession::builder().radio(Arc::new(radio)).build(), stats)
    }

    fn laptop_and_monitor() -> Vec<ExpectedItem> {
        vec![ExpectedItem::new("Laptop", "A1"), ExpectedItem::new("Monitor", "B2")]
    }

    #[tokio::test(start_paused = true)]
    async fn completes_and_disconnects_once() {
        let (session, stats) = session("A1;A1;000000X;B2", Duration::from_millis(100));
        session.connect("dev-1").await.expect("connect");

        let handle = session.start_session(laptop_and_monitor()).expect("session");
        let result = handle.finished().await.expect("result");

        assert_eq!(SessionState::Completed, result.state());
        assert!(result.items().iter().all(|item| item.found()));
        assert_eq!(1, stats.disconnect_calls());
        assert_eq!(ConnectionState::Idle, *session.connection_state().borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_session_completes_and_disconnects() {
        let (session, stats) = session("", Duration::ZERO);
        session.connect("dev-1").await.expect("connect");

        let result = session
            .start_session(Vec::new())
            .expect("session")
            .finished()
            .await
            .expect("result");

        assert_eq!(SessionState::Completed, result.state());
        assert_eq!(Progress::new(0, 0), result.progress());
        assert_eq!(1, stats.disconnect_calls());
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_returns_partial_result() {
        let (session, stats) = session("A1", Duration::from_millis(100));
        session.connect("dev-1").await.expect("connect");
        let handle = session.start_session(laptop_and_monitor()).expect("session");
        let mut progress = handle.progress();
        progress
            .wait_for(|progress| progress.found() == 1)
            .await
            .expect("progress");

        session.interrupt();
        let result = handle.finished().await.expect("result");
        session.settle().await;

        assert_eq!(SessionState::Interrupted, result.state());
        assert_eq!(Progress::new(1, 2), result.progress());
        assert_eq!(ConnectionState::Idle, *session.connection_state().borrow());
        assert_eq!(1, stats.disconnect_calls());
    }

    #[tokio::test(start_paused = true)]
    async fn session_started_late_sees_earlier_reads() {
        let (session, _stats) = session("A1;B2", Duration::ZERO);
        session.connect("dev-1").await.expect("connect");
        tokio::time::sleep(Duration::from_secs(1)).await;

        let result = session
            .start_session(laptop_and_monitor())
            .expect("session")
            .finished()
            .await
            .expect("result");

        assert_eq!(SessionState::Completed, result.state());
    }

    #[tokio::test(start_paused = true)]
    async fn operator_disconnect_interrupts_session() {
        let (session, _stats) = session("A1", Duration::ZERO);
        session.connect("dev-1").await.expect("connect");
        let handle = session.start_session(laptop_and_monitor()).expect("session");

        session.disconnect().await;
        let result = handle.finished().await.expect("result");

        assert_eq!(SessionState::Interrupted, result.state());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reconnect_after_operator_disconnect_survives_session_teardown() {
        let radio = FakeRadio::new(
            FakeBackendConfig::builder()
                .scan_fixture(FIXTURE.parse().expect("fixture"))
                .reads("A1".parse().expect("script"))
                .connect_delay(Duration::from_millis(20))
                .build(),
        );
        let stats = radio.stats();
        let session = ConnectivitySession::builder().radio(Arc::new(radio)).build();

        for round in 0..20 {
            session.connect("dev-1").await.expect("connect");
            let handle = session.start_session(laptop_and_monitor()).expect("session");

            session.disconnect().await;
            let reconnected = session.connect("dev-1").await;
            let result = handle.finished().await.expect("result");
            session.settle().await;

            assert!(reconnected.is_ok(), "round {round}: {reconnected:?}");
            assert_eq!(SessionState::Interrupted, result.state());
            assert_matches!(
                *session.connection_state().borrow(),
                ConnectionState::Connected(_)
            );
            session.disconnect().await;
        }
        assert_eq!(40, stats.disconnect_calls());
    }

    #[tokio::test(start_paused = true)]
    async fn start_session_requires_connection() {
        let (session, _stats) = session("", Duration::ZERO);

        assert_matches!(
            session.start_session(laptop_and_monitor()),
            Err(SessionError::NotConnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_session_is_rejected_while_running() {
        let (session, _stats) = session("", Duration::ZERO);
        session.connect("dev-1").await.expect("connect");
        let _handle = session.start_session(laptop_and_monitor()).expect("session");

        assert_matches!(
            session.start_session(laptop_and_monitor()),
            Err(SessionError::AlreadyRunning)
        );
        session.interrupt();
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_link_fails_session_without_reconnect() {
        let radio = FakeRadio::new(
            FakeBackendConfig::builder()
                .scan_fixture(FIXTURE.parse().expect("fixture"))
                .reads("A1".parse().expect("script"))
                .read_interval(Duration::from_millis(100))
                .drop_after_reads(true)
                .build(),
        );
        let stats = radio.stats();
        let session = ConnectivitySession::builder().radio(Arc::new(radio)).build();
        session.connect("dev-1").await.expect("connect");

        let result = session
            .start_session(laptop_and_monitor())
            .expect("session")
            .finished()
            .await
            .expect("result");

        session.settle().await;

        assert_eq!(SessionState::ConnectionFailed, result.state());
        assert_eq!(Progress::new(1, 2), result.progress());
        assert_eq!(1, stats.connect_calls());
        assert_eq!(1, stats.disconnect_calls());
    }
}
