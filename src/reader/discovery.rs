use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, instrument, trace, warn};

use super::registry::{DeviceRegistry, RegistryOffer};
use crate::error::DiscoveryError;
use crate::hw::{Device, DiscoveredDevice, Radio, ScanEvent, ScanEvents};

/// Hard upper bound on one discovery run unless configured otherwise.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(120);

/// Why the last discovery run ended.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Display)]
pub enum StopReason {
    #[display("cancelled")]
    Cancelled,
    #[display("timed out")]
    TimedOut,
    #[display("{_0}")]
    RadioError(DiscoveryError),
    #[display("scan ended")]
    ScanEnded,
}

/// Observable discovery lifecycle.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DiscoveryStatus {
    Idle { last_stop: Option<StopReason> },
    Discovering,
}

impl DiscoveryStatus {
    #[must_use]
    pub fn is_discovering(&self) -> bool {
        matches!(self, Self::Discovering)
    }
}

/// Cancellable one-shot timer bounding a discovery run.
///
/// Dropping the handle disarms the timer.
#[derive(Debug)]
pub struct Watchdog {
    deadline: Instant,
    expired: CancellationToken,
    timer: JoinHandle<()>,
}

impl Watchdog {
    /// Arms a timer that expires after `after`.
    #[must_use]
    pub fn arm(after: Duration) -> Self {
        let deadline = Instant::now() + after;
        let expired = CancellationToken::new();
        let timer = tokio::spawn({
            let expired = expired.clone();
            async move {
                sleep_until(deadline).await;
                expired.cancel();
            }
        });

        Self {
            deadline,
            expired,
            timer,
        }
    }

    /// Resolves once the timer has expired.
    pub fn expired(&self) -> WaitForCancellationFuture<'_> {
        self.expired.cancelled()
    }

    #[must_use]
    pub fn has_expired(&self) -> bool {
        self.expired.is_cancelled()
    }

    /// Time left before expiry.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Stops the timer without expiring it.
    pub fn disarm(self) {
        drop(self);
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

#[derive(Debug)]
struct DiscoveryRun {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// State shared between the controller and its run task.
#[derive(Debug)]
struct DiscoveryContext {
    radio: Arc<dyn Radio>,
    registry: DeviceRegistry,
    status: watch::Sender<DiscoveryStatus>,
    name_filter: Option<String>,
}

/// Owns the scan-for-nearby-readers lifecycle.
#[derive(Debug)]
pub struct DiscoveryController {
    context: Arc<DiscoveryContext>,
    timeout: Duration,
    run: Mutex<Option<DiscoveryRun>>,
}

impl DiscoveryController {
    /// Creates a controller that populates `registry` from `radio`.
    #[must_use]
    pub fn new(
        radio: Arc<dyn Radio>,
        registry: DeviceRegistry,
        timeout: Duration,
        name_filter: Option<String>,
    ) -> Self {
        let (status, _receiver) = watch::channel(DiscoveryStatus::Idle { last_stop: None });
        Self {
            context: Arc::new(DiscoveryContext {
                radio,
                registry,
                status,
                name_filter,
            }),
            timeout,
            run: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &DeviceRegistry {
        &self.context.registry
    }

    /// Subscribes to discovery status changes.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<DiscoveryStatus> {
        self.context.status.subscribe()
    }

    #[must_use]
    pub fn is_discovering(&self) -> bool {
        self.context.status.borrow().is_discovering()
    }

    /// Starts a discovery run. Does nothing if one is already running.
    ///
    /// Radio failures end the run and are reported through [`Self::status`].
    #[instrument(skip(self), level = "debug")]
    pub async fn start_discovery(&self) {
        let mut run = self.run.lock().await;
        if run.as_ref().is_some_and(|active| !active.task.is_finished()) {
            debug!("discovery already running");
            return;
        }
        if let Some(finished) = run.take()
            && let Err(error) = finished.task.await
        {
            warn!(error = %error, "previous discovery task failed");
        }

        let generation = self.context.registry.open();
        let events = match self.context.radio.start_scan().await {
            Ok(events) => events,
            Err(error) => {
                warn!(error = %error, "failed to start discovery");
                self.context.registry.close(generation);
                self.context.status.send_replace(DiscoveryStatus::Idle {
                    last_stop: Some(StopReason::RadioError(DiscoveryError::StartFailed {
                        reason: error.to_string(),
                    })),
                });
                return;
            }
        };

        info!(timeout = ?self.timeout, "discovery started");
        self.context.status.send_replace(DiscoveryStatus::Discovering);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(drive_discovery(
            Arc::clone(&self.context),
            generation,
            events,
            Watchdog::arm(self.timeout),
            cancel.clone(),
        ));
        *run = Some(DiscoveryRun {
            generation,
            cancel,
            task,
        });
    }

    /// Stops the current run, if any, and waits until the radio scan is stopped.
    #[instrument(skip(self), level = "debug")]
    pub async fn cancel_discovery(&self) {
        let mut run = self.run.lock().await;
        let Some(active) = run.take() else {
            return;
        };

        self.context.registry.close(active.generation);
        active.cancel.cancel();
        if let Err(error) = active.task.await {
            warn!(error = %error, "discovery task failed");
        }
    }
}

#[instrument(skip(context, events, watchdog, cancel), level = "debug")]
async fn drive_discovery(
    context: Arc<DiscoveryContext>,
    generation: u64,
    mut events: ScanEvents,
    watchdog: Watchdog,
    cancel: CancellationToken,
) {
    let reason = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break StopReason::Cancelled,
            () = watchdog.expired() => break StopReason::TimedOut,
            event = events.recv() => match event {
                Some(ScanEvent::DeviceFound(found)) => context.accept(generation, found),
                Some(ScanEvent::Failed(reason)) => {
                    warn!(%reason, "radio failed during discovery");
                    break StopReason::RadioError(DiscoveryError::Radio { reason });
                }
                None => break StopReason::ScanEnded,
            },
        }
    };

    watchdog.disarm();
    context.registry.close(generation);
    drop(events);
    if let Err(error) = context.radio.stop_scan().await {
        warn!(error = %error, "failed to stop radio scan");
    }

    info!(%reason, devices = context.registry.len(), "discovery stopped");
    context.status.send_replace(DiscoveryStatus::Idle {
        last_stop: Some(reason),
    });
}

impl DiscoveryContext {
    fn accept(&self, generation: u64, found: DiscoveredDevice) {
        let device = Device::from(found);
        let Some(name) = device.name().as_named() else {
            trace!(id = device.id(), name = %device.name(), "ignoring device without a resolved name");
            return;
        };
        if let Some(prefix) = &self.name_filter
            && !name.starts_with(prefix.as_str())
        {
            trace!(id = device.id(), name, "ignoring device outside the name filter");
            return;
        }

        let id = device.id().to_string();
        match self.registry.offer(generation, device) {
            RegistryOffer::Added => debug!(%id, "registered reader"),
            RegistryOffer::Duplicate => trace!(%id, "reader already registered"),
            RegistryOffer::Closed => trace!(%id, "discovery closed; dropping late device"),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hw::{FakeBackendConfig, FakeRadio, FakeRadioStats};

    fn controller(
        fixture: &str,
        discovery_delay: Duration,
        scan_failure: Option<&str>,
    ) -> (DiscoveryController, Arc<FakeRadioStats>) {
        let radio = FakeRadio::new(
            FakeBackendConfig::builder()
                .scan_fixture(fixture.parse().expect("fixture should parse"))
                .discovery_delay(discovery_delay)
                .maybe_scan_failure(scan_failure.map(str::to_string))
                .build(),
        );
        let stats = radio.stats();
        let controller = DiscoveryController::new(
            Arc::new(radio),
            DeviceRegistry::new(),
            DEFAULT_DISCOVERY_TIMEOUT,
            None,
        );
        (controller, stats)
    }

    async fn wait_idle(controller: &DiscoveryController) -> Option<StopReason> {
        let mut status = controller.status();
        let idle = status
            .wait_for(|status| !status.is_discovering())
            .await
            .expect("status sender should be alive")
            .clone();
        match idle {
            DiscoveryStatus::Idle { last_stop } => last_stop,
            DiscoveryStatus::Discovering => unreachable!(),
        }
    }

    fn ids(controller: &DiscoveryController) -> Vec<String> {
        controller
            .registry()
            .snapshot()
            .iter()
            .map(|device| device.id().to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_stops_discovery_and_keeps_devices() {
        let fixture = (1..=8)
            .map(|index| format!("dev-{index}|Reader {index}|AA:BB:CC:DD:EE:0{index}"))
            .collect::<Vec<_>>()
            .join(";");
        let (controller, stats) = controller(&fixture, Duration::from_secs(25), None);
        let started = Instant::now();

        controller.start_discovery().await;
        let reason = wait_idle(&controller).await;

        assert_eq!(Some(StopReason::TimedOut), reason);
        let elapsed = started.elapsed();
        assert!(elapsed >= DEFAULT_DISCOVERY_TIMEOUT && elapsed < Duration::from_secs(121));
        assert_eq!(vec!["dev-1", "dev-2", "dev-3", "dev-4"], ids(&controller));
        assert_eq!(1, stats.stop_scan_calls());
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_remaining_counts_down() {
        let watchdog = Watchdog::arm(Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(4)).await;

        assert_eq!(Duration::from_secs(6), watchdog.remaining());
        assert!(!watchdog.has_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_watchdog_never_expires() {
        let watchdog = Watchdog::arm(Duration::from_secs(1));
        let expired = watchdog.expired.clone();

        watchdog.disarm();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(!expired.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn unnamed_and_placeholder_devices_are_dropped() {
        let (controller, _stats) = controller(
            "dev-1|-|AA:01;dev-2|AA:BB:CC:DD:EE:02|AA:02;dev-3|RFD40|AA:03;dev-3|RFD40|AA:03",
            Duration::from_secs(1),
            None,
        );

        controller.start_discovery().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        controller.cancel_discovery().await;

        assert_eq!(vec!["dev-3"], ids(&controller));
    }

    #[tokio::test(start_paused = true)]
    async fn name_filter_limits_registered_devices() {
        let radio = FakeRadio::new(
            FakeBackendConfig::builder()
                .scan_fixture("dev-1|RFD40 A|AA:01;dev-2|Headset|AA:02".parse().expect("fixture"))
                .build(),
        );
        let controller = DiscoveryController::new(
            Arc::new(radio),
            DeviceRegistry::new(),
            DEFAULT_DISCOVERY_TIMEOUT,
            Some("RFD".to_string()),
        );

        controller.start_discovery().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.cancel_discovery().await;

        assert_eq!(vec!["dev-1"], ids(&controller));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_scan_and_is_idempotent() {
        let (controller, stats) = controller("dev-1|RFD40|AA:01", Duration::ZERO, None);

        controller.start_discovery().await;
        controller.cancel_discovery().await;
        controller.cancel_discovery().await;

        assert_eq!(
            DiscoveryStatus::Idle {
                last_stop: Some(StopReason::Cancelled)
            },
            *controller.status().borrow()
        );
        assert_eq!(1, stats.stop_scan_calls());
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_discovering_is_a_no_op() {
        let (controller, stats) = controller("dev-1|RFD40|AA:01", Duration::ZERO, None);

        controller.start_discovery().await;
        controller.start_discovery().await;

        assert!(controller.is_discovering());
        assert_eq!(1, stats.start_scan_calls());
        controller.cancel_discovery().await;
    }

    #[tokio::test(start_paused = true)]
    async fn restart_clears_registry() {
        let (controller, stats) = controller("dev-1|RFD40|AA:01", Duration::from_secs(5), None);
        controller.start_discovery().await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        controller.cancel_discovery().await;
        assert_eq!(vec!["dev-1"], ids(&controller));

        controller.start_discovery().await;

        assert!(controller.registry().is_empty());
        assert_eq!(2, stats.start_scan_calls());
        controller.cancel_discovery().await;
    }

    #[tokio::test(start_paused = true)]
    async fn radio_failure_ends_discovery_and_keeps_devices() {
        let (controller, _stats) =
            controller("dev-1|RFD40|AA:01", Duration::from_secs(1), Some("adapter reset"));

        controller.start_discovery().await;
        let reason = wait_idle(&controller).await;

        assert_matches!(
            reason,
            Some(StopReason::RadioError(DiscoveryError::Radio { reason })) if reason == "adapter reset"
        );
        assert_eq!(vec!["dev-1"], ids(&controller));
    }
}
