use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter, ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::line_assembler::LineAssembler;
use super::model::{Device, DiscoveredDevice};
use super::radio::{RawRead, ReadStream, Radio, RadioLink, ScanEvent, ScanEvents};
use crate::error::InteractionError;
use crate::protocol::{self, EndpointId};

const SCAN_EVENT_BUFFER: usize = 64;
const READ_BUFFER: usize = 256;
/// How often an open link is asked whether it is still connected.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(2);
const IS_CONNECTED_DEADLINE: Duration = Duration::from_secs(2);

type CentralEvents = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;
type Notifications = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// Radio backed by `btleplug`.
#[derive(Debug)]
pub(crate) struct BtleplugRadio {
    manager: Manager,
    scan: Mutex<Option<ActiveScan>>,
}

#[derive(Debug)]
struct ActiveScan {
    adapters: Vec<AdapterHandle>,
    stop: CancellationToken,
}

#[derive(Debug, Clone)]
struct AdapterHandle {
    adapter: Adapter,
    name: String,
}

impl BtleplugRadio {
    /// Creates the real BLE radio.
    pub(crate) async fn new() -> Result<Self, InteractionError> {
        let manager = Manager::new().await?;
        Ok(Self {
            manager,
            scan: Mutex::new(None),
        })
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapters(&self) -> Result<Vec<AdapterHandle>, InteractionError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(InteractionError::NoAdapters);
        }

        let mut handles = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let name = adapter.adapter_info().await?;
            handles.push(AdapterHandle { adapter, name });
        }
        Ok(handles)
    }

    async fn find_peripheral(
        &self,
        target: &str,
    ) -> Result<(Peripheral, PeripheralProperties), InteractionError> {
        for handle in self.adapters().await? {
            for peripheral in handle.adapter.peripherals().await? {
                let Some(properties) = peripheral.properties().await? else {
                    continue;
                };
                let id = peripheral.id().to_string();
                let address = properties.address.to_string();
                if id.eq_ignore_ascii_case(target) || address.eq_ignore_ascii_case(target) {
                    debug!(adapter = %handle.name, %id, %address, "resolved connect target");
                    return Ok((peripheral, properties));
                }
            }
        }

        Err(InteractionError::UnknownDevice {
            address: target.to_string(),
        })
    }
}

#[async_trait]
impl Radio for BtleplugRadio {
    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self) -> Result<ScanEvents, InteractionError> {
        let adapters = self.adapters().await?;
        let (sender, receiver) = mpsc::channel(SCAN_EVENT_BUFFER);
        let stop = CancellationToken::new();

        info!(adapter_count = adapters.len(), "starting BLE scan");
        for handle in &adapters {
            let events = handle.adapter.events().await?;
            handle.adapter.start_scan(ScanFilter::default()).await?;
            tokio::spawn(forward_scan_events(
                handle.clone(),
                events,
                sender.clone(),
                stop.clone(),
            ));
        }

        let previous = self
            .scan
            .lock()
            .await
            .replace(ActiveScan { adapters, stop });
        if let Some(previous) = previous {
            previous.stop.cancel();
        }

        Ok(receiver)
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_scan(&self) -> Result<(), InteractionError> {
        let Some(active) = self.scan.lock().await.take() else {
            return Ok(());
        };

        active.stop.cancel();
        for handle in &active.adapters {
            if let Err(error) = handle.adapter.stop_scan().await {
                debug!(adapter = %handle.name, ?error, "failed to stop adapter scan cleanly");
            }
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn connect(&self, target: &str) -> Result<Box<dyn RadioLink>, InteractionError> {
        let (peripheral, properties) = self.find_peripheral(target).await?;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        let Some(tx) = serial_tx_characteristic(&peripheral) else {
            if let Err(error) = peripheral.disconnect().await {
                debug!(?error, "failed to disconnect after endpoint lookup failed");
            }
            return Err(InteractionError::MissingEndpoint {
                endpoint: EndpointId::SerialTxCharacteristic,
            });
        };

        let device = Device::from(DiscoveredDevice::new(
            peripheral.id().to_string(),
            properties.local_name,
            properties.address.to_string(),
        ));
        info!(device_id = device.id(), tx = %tx.uuid, "connected to reader");

        Ok(Box::new(BtleplugLink {
            device,
            peripheral,
            tx,
            stop: CancellationToken::new(),
        }))
    }
}

async fn forward_scan_events(
    handle: AdapterHandle,
    mut events: CentralEvents,
    sender: mpsc::Sender<ScanEvent>,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = stop.cancelled() => break,
            event = events.next() => event,
        };
        let Some(event) = event else {
            debug!(adapter = %handle.name, "adapter event stream closed");
            break;
        };

        let id = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
            _ => continue,
        };

        match discovered_device(&handle.adapter, &id).await {
            Ok(Some(device)) => {
                if sender.send(ScanEvent::DeviceFound(device)).await.is_err() {
                    break;
                }
            }
            Ok(None) => trace!(%id, "peripheral has no properties yet"),
            Err(error) => {
                warn!(adapter = %handle.name, ?error, "adapter failed while scanning");
                let _ = sender.send(ScanEvent::Failed(error.to_string())).await;
                break;
            }
        }
    }
}

async fn discovered_device(
    adapter: &Adapter,
    id: &PeripheralId,
) -> Result<Option<DiscoveredDevice>, InteractionError> {
    let peripheral = adapter.peripheral(id).await?;
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };

    Ok(Some(DiscoveredDevice::new(
        peripheral.id().to_string(),
        properties.local_name,
        properties.address.to_string(),
    )))
}

/// Minimal view of a characteristic used to pick the serial TX endpoint.
#[derive(Debug, Clone, Eq, PartialEq)]
struct CharacteristicSummary {
    uuid: String,
    service_uuid: String,
    notifies: bool,
}

impl From<&Characteristic> for CharacteristicSummary {
    fn from(characteristic: &Characteristic) -> Self {
        Self {
            uuid: characteristic.uuid.to_string(),
            service_uuid: characteristic.service_uuid.to_string(),
            notifies: characteristic
                .properties
                .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE),
        }
    }
}

fn serial_tx_characteristic(peripheral: &Peripheral) -> Option<Characteristic> {
    let characteristics: Vec<Characteristic> = peripheral.characteristics().into_iter().collect();
    let summaries: Vec<CharacteristicSummary> =
        characteristics.iter().map(CharacteristicSummary::from).collect();
    select_tx_index(&summaries).map(|index| characteristics[index].clone())
}

/// Prefers the well-known TX UUID, then any notifying characteristic of the serial service.
fn select_tx_index(candidates: &[CharacteristicSummary]) -> Option<usize> {
    let tx = protocol::endpoint_metadata(EndpointId::SerialTxCharacteristic);
    let service = protocol::endpoint_metadata(EndpointId::SerialService);
    trace!(tx_kind = %tx.kind(), service_kind = %service.kind(), "selecting tx endpoint");

    candidates
        .iter()
        .position(|candidate| {
            candidate.notifies
                && protocol::endpoint_for_uuid(&candidate.uuid)
                    == Some(EndpointId::SerialTxCharacteristic)
        })
        .or_else(|| {
            candidates.iter().position(|candidate| {
                candidate.notifies && candidate.service_uuid.eq_ignore_ascii_case(service.uuid())
            })
        })
}

/// Active link bound to a real peripheral.
#[derive(Debug)]
struct BtleplugLink {
    device: Device,
    peripheral: Peripheral,
    tx: Characteristic,
    stop: CancellationToken,
}

#[async_trait]
impl RadioLink for BtleplugLink {
    fn device(&self) -> &Device {
        &self.device
    }

    #[instrument(skip(self), level = "debug", fields(device_id = self.device.id()))]
    async fn subscribe(&self) -> Result<ReadStream, InteractionError> {
        self.peripheral.subscribe(&self.tx).await?;
        let notifications = self.peripheral.notifications().await?;
        let (sender, receiver) = mpsc::channel(READ_BUFFER);

        tokio::spawn(pump_notifications(
            self.peripheral.clone(),
            notifications,
            self.tx.uuid.to_string(),
            sender,
            self.stop.clone(),
        ));

        Ok(Box::pin(ReceiverStream::new(receiver)))
    }

    #[instrument(skip(self), level = "debug", fields(device_id = self.device.id()))]
    async fn disconnect(&self) -> Result<(), InteractionError> {
        self.stop.cancel();
        if let Err(error) = self.peripheral.unsubscribe(&self.tx).await {
            debug!(?error, "failed to unsubscribe cleanly");
        }
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

/// Forwards reassembled lines until stopped or the link goes away.
///
/// The notification stream is not guaranteed to end on link loss, so the
/// peripheral is also polled; ending the read stream reports the drop.
async fn pump_notifications(
    peripheral: Peripheral,
    mut notifications: Notifications,
    tx_uuid: String,
    sender: mpsc::Sender<RawRead>,
    stop: CancellationToken,
) {
    let mut assembler = LineAssembler::default();
    let mut liveness = interval(LIVENESS_INTERVAL);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
    liveness.reset();

    loop {
        let notification = tokio::select! {
            () = stop.cancelled() => break,
            _tick = liveness.tick() => {
                if link_alive(peripheral.is_connected(), IS_CONNECTED_DEADLINE).await {
                    continue;
                }
                break;
            }
            notification = notifications.next() => notification,
        };
        let Some(notification) = notification else {
            debug!("notification stream closed");
            break;
        };
        if !notification.uuid.to_string().eq_ignore_ascii_case(&tx_uuid) {
            continue;
        }

        for read in assembler.push(&notification.value) {
            if sender.send(read).await.is_err() {
                return;
            }
        }
    }
}

/// Returns whether the peripheral confirms its connection within `deadline`.
async fn link_alive<F>(is_connected: F, deadline: Duration) -> bool
where
    F: Future<Output = Result<bool, btleplug::Error>>,
{
    match timeout(deadline, is_connected).await {
        Ok(Ok(true)) => true,
        Ok(Ok(false)) => {
            warn!("reader connection lost");
            false
        }
        Ok(Err(error)) => {
            warn!(?error, "failed to check reader connection");
            false
        }
        Err(_elapsed) => {
            warn!(after = ?deadline, "reader connection check took too long");
            false
        }
    }
}
