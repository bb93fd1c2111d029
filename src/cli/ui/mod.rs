mod device_view;
mod painter;
mod session_view;
mod spinner;
mod table;

pub(crate) use self::device_view::{DeviceTableView, DiscoverySummaryView};
pub(crate) use self::painter::Painter;
pub(crate) use self::session_view::{ConnectedView, ProgressView, SessionResultView};
pub(crate) use self::spinner::Spinner;
