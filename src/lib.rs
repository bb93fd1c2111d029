mod app;
mod cli;
mod config;
mod error;
mod hw;
mod inventory;
mod protocol;
mod reader;
mod telemetry;
mod terminal;
mod utils;

pub use app::{fake_radio, radio_for, real_radio, run, run_with_clients_and_log_level};
pub use cli::{Args, Command, DiscoverArgs, FakeArgs, LogLevel, OutputFormat, ScanArgs};
pub use config::{ScanConfig, default_config_path};
pub use error::{
    ConfigError, ConnectError, DiscoveryError, FixtureError, InteractionError, InventoryError,
    SessionError,
};
pub use hw::{
    Device, DeviceName, DiscoveredDevice, FakeBackendConfig, FakeRadio, FakeRadioStats, Radio,
    RadioLink, RawRead, ReadScript, ReadStream, ScanEvent, ScanEvents, ScanFixture,
};
pub use inventory::{ExpectedItem, load_inventory, parse_inventory};
pub use protocol::EndpointId;
pub use reader::{
    ConnectionManager, ConnectionState, ConnectivitySession, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_DISCOVERY_TIMEOUT, DecodeOutcome, DeviceRegistry, DiscoveryController,
    DiscoveryStatus, LinkEvent, LinkEvents, LinkSubscription, Observation, Progress,
    SENTINEL_PATTERN, ScanSessionTracker, SessionHandle, SessionResult, SessionState, StopReason,
    TagStreamDecoder, TrackedItem, Watchdog, candidate_identifier,
};
pub use terminal::{SystemTerminalClient, TerminalClient};
