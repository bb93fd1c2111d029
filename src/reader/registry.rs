use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::hw::Device;

/// Result of offering a device to the registry.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum RegistryOffer {
    Added,
    Duplicate,
    /// The offer belonged to a discovery run that is no longer accepting devices.
    Closed,
}

#[derive(Debug, Default)]
struct RegistryState {
    devices: Vec<Device>,
    generation: u64,
    accepting: bool,
}

#[derive(Debug)]
struct RegistryInner {
    state: Mutex<RegistryState>,
    snapshot: watch::Sender<Vec<Device>>,
}

/// Ordered, id-unique set of discovered readers.
///
/// Only the discovery run that opened the current generation may add
/// devices; offers from a closed or superseded run are rejected.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (snapshot, _receiver) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState::default()),
                snapshot,
            }),
        }
    }

    /// Subscribes to the live, discovery-ordered snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<Device>> {
        self.inner.snapshot.subscribe()
    }

    /// Returns the current devices in discovery order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Device> {
        self.lock().devices.clone()
    }

    /// Returns the registered device answering to an id or address.
    #[must_use]
    pub fn find(&self, target: &str) -> Option<Device> {
        self.lock()
            .devices
            .iter()
            .find(|device| device.matches_target(target))
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears the registry and opens a new generation for a discovery run.
    pub(crate) fn open(&self) -> u64 {
        let mut state = self.lock();
        state.generation += 1;
        state.accepting = true;
        state.devices.clear();
        self.inner.snapshot.send_replace(Vec::new());
        state.generation
    }

    /// Stops accepting offers for `generation`. Later generations are unaffected.
    pub(crate) fn close(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.accepting = false;
        }
    }

    /// Appends a device if `generation` is open and its id is new.
    pub(crate) fn offer(&self, generation: u64, device: Device) -> RegistryOffer {
        let mut state = self.lock();
        if !state.accepting || state.generation != generation {
            return RegistryOffer::Closed;
        }
        if state.devices.iter().any(|known| known.id() == device.id()) {
            return RegistryOffer::Duplicate;
        }

        state.devices.push(device);
        self.inner.snapshot.send_replace(state.devices.clone());
        RegistryOffer::Added
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
