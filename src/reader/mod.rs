mod connection;
mod decoder;
mod discovery;
mod registry;
mod session;
mod tracker;

pub use self::connection::{
    ConnectionManager, ConnectionState, DEFAULT_CONNECT_TIMEOUT, LinkEvent, LinkEvents,
    LinkSubscription,
};
pub use self::decoder::{DecodeOutcome, SENTINEL_PATTERN, TagStreamDecoder, candidate_identifier};
pub use self::discovery::{
    DEFAULT_DISCOVERY_TIMEOUT, DiscoveryController, DiscoveryStatus, StopReason, Watchdog,
};
pub use self::registry::DeviceRegistry;
pub use self::session::{ConnectivitySession, SessionHandle};
pub use self::tracker::{
    Observation, Progress, ScanSessionTracker, SessionResult, SessionState, TrackedItem,
};
