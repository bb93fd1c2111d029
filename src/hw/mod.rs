mod btleplug_backend;
mod fake_backend;
mod line_assembler;
mod model;
mod radio;

pub use self::fake_backend::{
    FakeBackendConfig, FakeRadio, FakeRadioStats, ReadScript, ScanFixture,
};
pub use self::model::{Device, DeviceName, DiscoveredDevice};
pub use self::radio::{RawRead, ReadStream, Radio, RadioLink, ScanEvent, ScanEvents};
pub(crate) use self::radio::{RadioBackend, radio_from_backend};
