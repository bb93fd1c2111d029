use std::fmt::{self, Display, Formatter};

use crate::hw::Device;
use crate::reader::{Progress, SessionResult};
use crate::utils::format_elapsed;

use super::painter::Painter;
use super::table::Table;

/// Renders the connected reader before a session starts.
pub(crate) struct ConnectedView<'a> {
    device: &'a Device,
    expected_items: usize,
    painter: &'a Painter,
}

impl<'a> ConnectedView<'a> {
    pub(crate) fn new(device: &'a Device, expected_items: usize, painter: &'a Painter) -> Self {
        Self {
            device,
            expected_items,
            painter,
        }
    }
}

impl Display for ConnectedView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.painter.heading("Connected:"),
            self.painter.value(self.device.name().to_string()),
            self.painter.muted(format!("({})", self.device.address())),
            self.painter
                .muted(format!("- expecting {} item(s)", self.expected_items)),
        )
    }
}

/// Renders one live progress line.
pub(crate) struct ProgressView<'a> {
    progress: Progress,
    painter: &'a Painter,
}

impl<'a> ProgressView<'a> {
    pub(crate) fn new(progress: Progress, painter: &'a Painter) -> Self {
        Self { progress, painter }
    }
}

impl Display for ProgressView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.painter.muted("found"),
            self.painter.value(self.progress.to_string())
        )
    }
}

/// Renders the terminal result of a scan session.
pub(crate) struct SessionResultView<'a> {
    result: &'a SessionResult,
    painter: &'a Painter,
}

impl<'a> SessionResultView<'a> {
    pub(crate) fn new(result: &'a SessionResult, painter: &'a Painter) -> Self {
        Self { result, painter }
    }

}

impl Display for SessionResultView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let reader = self
            .result
            .device()
            .map_or_else(|| "<none>".to_string(), |device| device.id().to_string());
        let elapsed: std::time::Duration = (self.result.finished_at() - self.result.started_at())
            .try_into()
            .unwrap_or_default();
        let summary = Table::key_value(
            self.painter,
            vec![
                ("reader", self.painter.value(reader)),
                ("state", self.painter.session_state(self.result.state())),
                ("found", self.painter.value(self.result.progress().to_string())),
                ("elapsed", self.painter.value(format_elapsed(elapsed))),
            ],
        );

        let rows = self
            .result
            .items()
            .iter()
            .map(|item| {
                vec![
                    item.name().to_string(),
                    item.expected_identifier().to_string(),
                    self.painter.item_status(item.found()),
                ]
            })
            .collect();
        let items = Table::grid(["item", "identifier", "status"], rows);

        write!(f, "{}", self.painter.heading("Scan session:"))?;
        write!(f, "\n{summary}")?;
        if !self.result.items().is_empty() {
            write!(f, "\n{items}")?;
        }
        Ok(())
    }
}
