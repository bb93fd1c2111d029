use thiserror::Error;

use crate::protocol::{EndpointId, endpoint_metadata};
use crate::reader::ConnectionState;

/// Errors returned by radio backend operations.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("no device with id or address `{address}` is known to the radio")]
    UnknownDevice { address: String },
    #[error(
        "required endpoint `{name}` ({uuid}) was not found on the connected device",
        name = endpoint_metadata(*endpoint).name(),
        uuid = endpoint_metadata(*endpoint).uuid()
    )]
    MissingEndpoint { endpoint: EndpointId },
    #[error("the fake radio refused the connection to `{address}`")]
    FakeConnectRefused { address: String },
    #[error("failed while waiting for Ctrl+C")]
    CtrlC { source: std::io::Error },
    #[error(transparent)]
    Fixture(#[from] FixtureError),
}

/// Radio failure that ended a discovery run.
///
/// Never returned from the discovery API; it is recorded in the discovery
/// status so callers can tell why the run stopped.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum DiscoveryError {
    #[error("failed to start scanning: {reason}")]
    StartFailed { reason: String },
    #[error("radio reported a scan failure: {reason}")]
    Radio { reason: String },
}

/// Errors returned from a connect attempt.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("a connection is already {state}; disconnect first")]
    Busy { state: ConnectionState },
    #[error("failed to connect to `{address}`")]
    Radio {
        address: String,
        #[source]
        source: InteractionError,
    },
    #[error(
        "connecting to `{address}` timed out after {elapsed}",
        elapsed = humantime::format_duration(*after)
    )]
    TimedOut {
        address: String,
        after: std::time::Duration,
    },
    #[error("connection attempt to `{address}` was aborted by a disconnect request")]
    Aborted { address: String },
    #[error(
        "reader `{address}` does not expose `{name}` ({uuid})",
        name = endpoint_metadata(*endpoint).name(),
        uuid = endpoint_metadata(*endpoint).uuid()
    )]
    MissingEndpoint {
        address: String,
        endpoint: EndpointId,
    },
}

/// Errors returned when starting or awaiting a scan session.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum SessionError {
    #[error("no reader is connected")]
    NotConnected,
    #[error("a scan session is already running")]
    AlreadyRunning,
    #[error("expected identifier `{identifier}` appears more than once")]
    DuplicateIdentifier { identifier: String },
    #[error("the session driver stopped without reporting a result")]
    Abandoned,
}

/// Errors returned when parsing fake radio fixtures.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain three pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
}

/// Errors returned when reading the expected inventory.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to read inventory file `{path}`")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("inventory file is not a JSON list of {{name, identifier}} objects")]
    Json(#[from] serde_json::Error),
    #[error("inventory item `{value}` must look like `NAME=IDENTIFIER`")]
    InvalidItem { value: String },
}

/// Errors returned when loading scan configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file `{path}`")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
    #[error("the scan command needs at least one --item or an --items file")]
    MissingInventory,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
