use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::{Mutex, mpsc};
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::model::{Device, DiscoveredDevice};
use super::radio::{RawRead, ReadStream, Radio, RadioLink, ScanEvent, ScanEvents};
use crate::error::{FixtureError, InteractionError};

/// Parsed fake scan fixture records.
#[derive(Debug, Clone, derive_more::Into)]
pub struct ScanFixture {
    devices: Vec<DiscoveredDevice>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let devices = parse_scan_fixture(value)?;
        Ok(Self { devices })
    }
}

/// Parsed fake read script: `;`-separated lines, `!`-prefixed records are error events.
#[derive(Debug, Clone, Default, derive_more::Into)]
pub struct ReadScript {
    reads: Vec<RawRead>,
}

impl FromStr for ReadScript {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            reads: parse_read_script(value),
        })
    }
}

/// Settings for constructing a fake radio.
#[derive(Debug, Builder)]
pub struct FakeBackendConfig {
    scan_fixture: ScanFixture,
    reads: Option<ReadScript>,
    scan_failure: Option<String>,
    #[builder(default)]
    discovery_delay: Duration,
    #[builder(default)]
    read_interval: Duration,
    #[builder(default)]
    connect_delay: Duration,
    #[builder(default)]
    connect_failure: bool,
    #[builder(default)]
    drop_after_reads: bool,
}

/// Call counters recorded by a fake radio.
#[derive(Debug, Default)]
pub struct FakeRadioStats {
    start_scan_calls: AtomicUsize,
    stop_scan_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl FakeRadioStats {
    /// Returns how many times scanning was started.
    #[must_use]
    pub fn start_scan_calls(&self) -> usize {
        self.start_scan_calls.load(Ordering::SeqCst)
    }

    /// Returns how many times scanning was stopped.
    #[must_use]
    pub fn stop_scan_calls(&self) -> usize {
        self.stop_scan_calls.load(Ordering::SeqCst)
    }

    /// Returns how many connect attempts reached the radio.
    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Returns how many link disconnects reached the radio.
    #[must_use]
    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

/// Fixture-driven radio used in tests and non-hardware environments.
#[derive(Debug)]
pub struct FakeRadio {
    devices: Vec<DiscoveredDevice>,
    reads: Vec<RawRead>,
    scan_failure: Option<String>,
    discovery_delay: Duration,
    read_interval: Duration,
    connect_delay: Duration,
    connect_failure: bool,
    drop_after_reads: bool,
    scan_stop: Mutex<Option<CancellationToken>>,
    stats: Arc<FakeRadioStats>,
}

impl FakeRadio {
    /// Creates a fake radio from explicit settings.
    pub fn new(config: FakeBackendConfig) -> Self {
        Self {
            devices: config.scan_fixture.into(),
            reads: config.reads.map(Into::into).unwrap_or_default(),
            scan_failure: config.scan_failure,
            discovery_delay: config.discovery_delay,
            read_interval: config.read_interval,
            connect_delay: config.connect_delay,
            connect_failure: config.connect_failure,
            drop_after_reads: config.drop_after_reads,
            scan_stop: Mutex::new(None),
            stats: Arc::new(FakeRadioStats::default()),
        }
    }

    /// Returns the shared call counters.
    #[must_use]
    pub fn stats(&self) -> Arc<FakeRadioStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl Radio for FakeRadio {
    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self) -> Result<ScanEvents, InteractionError> {
        self.stats.start_scan_calls.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::channel(self.devices.len().max(1));
        let stop = CancellationToken::new();
        if let Some(previous) = self.scan_stop.lock().await.replace(stop.clone()) {
            previous.cancel();
        }

        tokio::spawn(play_scan(
            self.devices.clone(),
            self.scan_failure.clone(),
            self.discovery_delay,
            sender,
            stop,
        ));
        Ok(receiver)
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_scan(&self) -> Result<(), InteractionError> {
        self.stats.stop_scan_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(stop) = self.scan_stop.lock().await.take() {
            stop.cancel();
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn connect(&self, target: &str) -> Result<Box<dyn RadioLink>, InteractionError> {
        self.stats.connect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            sleep(self.connect_delay).await;
        }
        if self.connect_failure {
            return Err(InteractionError::FakeConnectRefused {
                address: target.to_string(),
            });
        }

        let device = self
            .devices
            .iter()
            .cloned()
            .map(Device::from)
            .find(|device| device.matches_target(target))
            .ok_or_else(|| InteractionError::UnknownDevice {
                address: target.to_string(),
            })?;

        Ok(Box::new(FakeLink {
            device,
            reads: self.reads.clone(),
            read_interval: self.read_interval,
            drop_after_reads: self.drop_after_reads,
            stop: CancellationToken::new(),
            stats: Arc::clone(&self.stats),
        }))
    }
}

async fn play_scan(
    devices: Vec<DiscoveredDevice>,
    scan_failure: Option<String>,
    discovery_delay: Duration,
    sender: mpsc::Sender<ScanEvent>,
    stop: CancellationToken,
) {
    for device in devices {
        if !discovery_delay.is_zero() {
            tokio::select! {
                () = stop.cancelled() => return,
                () = sleep(discovery_delay) => {}
            }
        }
        if stop.is_cancelled() || sender.send(ScanEvent::DeviceFound(device)).await.is_err() {
            return;
        }
    }

    if let Some(reason) = scan_failure {
        let _ = sender.send(ScanEvent::Failed(reason)).await;
        return;
    }

    // A real radio keeps scanning until told to stop.
    stop.cancelled().await;
}

/// A link to a fixture device that replays the read script.
#[derive(Debug)]
struct FakeLink {
    device: Device,
    reads: Vec<RawRead>,
    read_interval: Duration,
    drop_after_reads: bool,
    stop: CancellationToken,
    stats: Arc<FakeRadioStats>,
}

#[async_trait]
impl RadioLink for FakeLink {
    fn device(&self) -> &Device {
        &self.device
    }

    async fn subscribe(&self) -> Result<ReadStream, InteractionError> {
        let (sender, receiver) = mpsc::channel(self.reads.len().max(1));
        tokio::spawn(play_reads(
            self.reads.clone(),
            self.read_interval,
            self.drop_after_reads,
            sender,
            self.stop.clone(),
        ));
        Ok(Box::pin(ReceiverStream::new(receiver)))
    }

    async fn disconnect(&self) -> Result<(), InteractionError> {
        self.stats.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.stop.cancel();
        Ok(())
    }
}

async fn play_reads(
    reads: Vec<RawRead>,
    read_interval: Duration,
    drop_after_reads: bool,
    sender: mpsc::Sender<RawRead>,
    stop: CancellationToken,
) {
    for read in reads {
        if !read_interval.is_zero() {
            tokio::select! {
                () = stop.cancelled() => return,
                () = sleep(read_interval) => {}
            }
        }
        if stop.is_cancelled() || sender.send(read).await.is_err() {
            return;
        }
    }

    if drop_after_reads {
        debug!("fake link dropping after read script");
        return;
    }
    stop.cancelled().await;
}

fn parse_scan_fixture(raw_fixture: &str) -> Result<Vec<DiscoveredDevice>, FixtureError> {
    if raw_fixture.trim().is_empty() {
        return Err(FixtureError::EmptyFixture);
    }

    raw_fixture
        .split(';')
        .map(parse_scan_record)
        .collect::<Result<Vec<_>, _>>()
}

fn parse_scan_record(raw_record: &str) -> Result<DiscoveredDevice, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    let [id, name, address] = fields.as_slice() else {
        return Err(FixtureError::InvalidRecordFieldCount);
    };
    if id.is_empty() || name.is_empty() || address.is_empty() {
        return Err(FixtureError::EmptyRecordField);
    }

    let local_name = if *name == "-" {
        None
    } else {
        Some((*name).to_string())
    };

    Ok(DiscoveredDevice::new(*id, local_name, *address))
}

fn parse_read_script(raw_script: &str) -> Vec<RawRead> {
    if raw_script.is_empty() {
        return Vec::new();
    }

    raw_script
        .split(';')
        .map(|record| match record.strip_prefix('!') {
            Some(reason) => RawRead::Error(reason.to_string()),
            None => RawRead::Line(record.to_string()),
        })
        .collect()
}
