use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::info;

use super::btleplug_backend::BtleplugRadio;
use super::fake_backend::{FakeBackendConfig, FakeRadio};
use super::model::{Device, DiscoveredDevice};
use crate::error::InteractionError;

/// Events delivered while a radio scan is running.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ScanEvent {
    /// A device advertisement was seen.
    DeviceFound(DiscoveredDevice),
    /// The radio reported a failure; the scan cannot continue.
    Failed(String),
}

/// One raw read delivered by a connected reader.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RawRead {
    /// A complete text line as sent by the reader.
    Line(String),
    /// An error-type event raised by the link instead of data.
    Error(String),
}

/// Receiving end of a running scan. Dropping it unsubscribes.
pub type ScanEvents = mpsc::Receiver<ScanEvent>;

/// Ordered stream of raw reads. The stream ends when the link goes down.
pub type ReadStream = Pin<Box<dyn Stream<Item = RawRead> + Send>>;

/// A radio capable of scanning for readers and opening links to them.
#[async_trait]
pub trait Radio: Send + Sync + Debug {
    /// Starts scanning and returns the device-found event channel.
    async fn start_scan(&self) -> Result<ScanEvents, InteractionError>;

    /// Stops an active scan. Stopping an idle radio is not an error.
    async fn stop_scan(&self) -> Result<(), InteractionError>;

    /// Opens a link to the reader with the given id or address.
    async fn connect(&self, target: &str) -> Result<Box<dyn RadioLink>, InteractionError>;
}

/// An established link to exactly one reader.
#[async_trait]
pub trait RadioLink: Send + Sync + Debug {
    /// Returns the reader this link is bound to.
    fn device(&self) -> &Device;

    /// Subscribes to the reader's read stream.
    async fn subscribe(&self) -> Result<ReadStream, InteractionError>;

    /// Closes the link.
    async fn disconnect(&self) -> Result<(), InteractionError>;
}

/// Runtime radio backend selection.
#[derive(Debug)]
pub(crate) enum RadioBackend {
    Real,
    Fake(FakeBackendConfig),
}

/// Builds the radio for the selected runtime backend.
pub(crate) async fn radio_from_backend(
    backend: RadioBackend,
) -> Result<Arc<dyn Radio>, InteractionError> {
    let radio: Arc<dyn Radio> = match backend {
        RadioBackend::Real => Arc::new(BtleplugRadio::new().await?),
        RadioBackend::Fake(config) => {
            info!("using fake radio backend");
            Arc::new(FakeRadio::new(config))
        }
    };

    Ok(radio)
}
