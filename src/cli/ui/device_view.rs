use std::fmt::{self, Display, Formatter};

use crate::hw::{Device, DeviceName};
use crate::reader::StopReason;

use super::painter::{Painter, Tone};
use super::table::Table;

/// Renders registered readers in discovery order.
pub(crate) struct DeviceTableView<'a> {
    devices: &'a [Device],
    painter: &'a Painter,
}

impl<'a> DeviceTableView<'a> {
    pub(crate) fn new(devices: &'a [Device], painter: &'a Painter) -> Self {
        Self { devices, painter }
    }
}

impl Display for DeviceTableView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let rows = self
            .devices
            .iter()
            .enumerate()
            .map(|(index, device)| {
                vec![
                    self.painter.muted((index + 1).to_string()),
                    self.painter.value(device_name(device.name())),
                    device.id().to_string(),
                    device.address().to_string(),
                ]
            })
            .collect();
        let table = Table::grid(["#", "name", "id", "address"], rows);
        write!(f, "{table}")
    }
}

fn device_name(name: &DeviceName) -> String {
    match name {
        DeviceName::Named(name) => name.clone(),
        DeviceName::Unnamed | DeviceName::AddressPlaceholder(_) => "<unnamed>".to_string(),
    }
}

/// Renders the one-line outcome of a discovery run.
pub(crate) struct DiscoverySummaryView<'a> {
    found: usize,
    stop_reason: Option<&'a StopReason>,
    painter: &'a Painter,
}

impl<'a> DiscoverySummaryView<'a> {
    pub(crate) fn new(
        found: usize,
        stop_reason: Option<&'a StopReason>,
        painter: &'a Painter,
    ) -> Self {
        Self {
            found,
            stop_reason,
            painter,
        }
    }
}

impl Display for DiscoverySummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let reason = match self.stop_reason {
            Some(reason) => self.painter.paint(Tone::for_stop(reason), reason.to_string()),
            None => self.painter.muted("stopped"),
        };
        let found = self.painter.paint(
            Tone::for_count(self.found),
            format!("{} reader(s) found", self.found),
        );
        write!(
            f,
            "{} {found} {}",
            self.painter.heading("Discovery:"),
            self.painter.muted(format!("({reason})"))
        )
    }
}
