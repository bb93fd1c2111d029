use std::collections::HashMap;
use std::sync::LazyLock;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// Known serial-over-BLE endpoints exposed by handheld readers.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum EndpointId {
    /// Serial (Nordic UART) service.
    #[strum(to_string = "serial_service")]
    SerialService,
    /// Characteristic the reader notifies tag lines on.
    #[strum(to_string = "serial_tx_characteristic")]
    SerialTxCharacteristic,
}

/// Endpoint category in GATT.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub(crate) enum EndpointKind {
    #[strum(to_string = "service")]
    Service,
    #[strum(to_string = "characteristic")]
    Characteristic,
}

/// Descriptive metadata for one protocol endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct EndpointMetadata {
    name: &'static str,
    uuid: &'static str,
    kind: EndpointKind,
}

impl EndpointMetadata {
    /// Human-readable endpoint name.
    pub(crate) fn name(self) -> &'static str {
        self.name
    }

    /// Endpoint UUID.
    pub(crate) fn uuid(self) -> &'static str {
        self.uuid
    }

    pub(crate) fn kind(self) -> EndpointKind {
        self.kind
    }
}

static ENDPOINTS_BY_ID: LazyLock<HashMap<EndpointId, EndpointMetadata>> = LazyLock::new(|| {
    EndpointId::iter()
        .map(|endpoint| (endpoint, metadata_for(endpoint)))
        .collect()
});

/// Returns metadata for one endpoint.
pub(crate) fn endpoint_metadata(endpoint: EndpointId) -> EndpointMetadata {
    *ENDPOINTS_BY_ID
        .get(&endpoint)
        .unwrap_or(&metadata_for(endpoint))
}

/// Returns the endpoint whose UUID matches, ignoring case.
pub(crate) fn endpoint_for_uuid(uuid: &str) -> Option<EndpointId> {
    EndpointId::iter().find(|endpoint| endpoint_metadata(*endpoint).uuid().eq_ignore_ascii_case(uuid))
}

fn metadata_for(endpoint: EndpointId) -> EndpointMetadata {
    match endpoint {
        EndpointId::SerialService => EndpointMetadata {
            name: "serial service",
            uuid: "6e400001-b5a3-f393-e0a9-e50e24dcca9e",
            kind: EndpointKind::Service,
        },
        EndpointId::SerialTxCharacteristic => EndpointMetadata {
            name: "serial tx notify",
            uuid: "6e400003-b5a3-f393-e0a9-e50e24dcca9e",
            kind: EndpointKind::Characteristic,
        },
    }
}
