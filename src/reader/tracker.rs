use std::collections::HashMap;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::debug;

use crate::error::SessionError;
use crate::hw::Device;
use crate::inventory::ExpectedItem;

/// An expected item and whether its tag has been read.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedItem {
    name: String,
    expected_identifier: String,
    found: bool,
}

impl TrackedItem {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn expected_identifier(&self) -> &str {
        &self.expected_identifier
    }

    #[must_use]
    pub fn found(&self) -> bool {
        self.found
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[display("running")]
    Running,
    #[display("completed")]
    Completed,
    #[display("interrupted")]
    Interrupted,
    #[display("connection failed")]
    ConnectionFailed,
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Found versus expected item counts.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, derive_more::Display)]
#[display("{found}/{total}")]
pub struct Progress {
    found: usize,
    total: usize,
}

impl Progress {
    #[must_use]
    pub fn new(found: usize, total: usize) -> Self {
        Self { found, total }
    }

    #[must_use]
    pub fn found(&self) -> usize {
        self.found
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.found == self.total
    }
}

/// What an observed identifier did to the session.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Observation {
    /// The identifier marked this item found.
    Matched { name: String },
    AlreadyFound,
    Unmatched,
    /// The session already ended.
    Ignored,
}

/// Final hand-off of a scan session.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    device: Option<Device>,
    state: SessionState,
    progress: Progress,
    items: Vec<TrackedItem>,
    #[serde(with = "time::serde::rfc3339")]
    started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    finished_at: OffsetDateTime,
}

impl SessionResult {
    #[must_use]
    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn progress(&self) -> Progress {
        self.progress
    }

    #[must_use]
    pub fn items(&self) -> &[TrackedItem] {
        &self.items
    }

    #[must_use]
    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    #[must_use]
    pub fn finished_at(&self) -> OffsetDateTime {
        self.finished_at
    }
}

/// Folds decoded identifiers into one session's expected items.
#[derive(Debug)]
pub struct ScanSessionTracker {
    items: Vec<TrackedItem>,
    index: HashMap<String, usize>,
    state: SessionState,
    started_at: OffsetDateTime,
    progress: watch::Sender<Progress>,
}

impl ScanSessionTracker {
    /// Starts tracking `expected`. An empty list completes immediately.
    pub fn start(expected: Vec<ExpectedItem>) -> Result<Self, SessionError> {
        let mut index = HashMap::with_capacity(expected.len());
        let mut items = Vec::with_capacity(expected.len());
        for item in expected {
            if index
                .insert(item.identifier().to_string(), items.len())
                .is_some()
            {
                return Err(SessionError::DuplicateIdentifier {
                    identifier: item.identifier().to_string(),
                });
            }
            items.push(TrackedItem {
                name: item.name().to_string(),
                expected_identifier: item.identifier().to_string(),
                found: false,
            });
        }

        let state = if items.is_empty() {
            SessionState::Completed
        } else {
            SessionState::Running
        };
        let (progress, _receiver) = watch::channel(Progress::new(0, items.len()));

        Ok(Self {
            items,
            index,
            state,
            started_at: OffsetDateTime::now_utc(),
            progress,
        })
    }

    /// Marks the item expecting `identifier` as found.
    pub fn observe(&mut self, identifier: &str) -> Observation {
        if self.state.is_terminal() {
            return Observation::Ignored;
        }
        let Some(&position) = self.index.get(identifier) else {
            return Observation::Unmatched;
        };
        let item = &mut self.items[position];
        if item.found {
            return Observation::AlreadyFound;
        }

        item.found = true;
        let name = item.name.clone();
        let progress = self.progress();
        self.progress.send_replace(progress);
        debug!(%identifier, %name, %progress, "matched expected item");
        if progress.is_complete() {
            self.state = SessionState::Completed;
        }
        Observation::Matched { name }
    }

    /// Ends a running session as interrupted. Returns whether it was running.
    pub fn interrupt(&mut self) -> bool {
        self.end(SessionState::Interrupted)
    }

    /// Ends a running session after the link dropped. Returns whether it was running.
    pub fn connection_lost(&mut self) -> bool {
        self.end(SessionState::ConnectionFailed)
    }

    fn end(&mut self, state: SessionState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = state;
        true
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn progress(&self) -> Progress {
        let found = self.items.iter().filter(|item| item.found).count();
        Progress::new(found, self.items.len())
    }

    /// Subscribes to progress updates.
    #[must_use]
    pub fn subscribe_progress(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    #[must_use]
    pub fn items(&self) -> &[TrackedItem] {
        &self.items
    }

    /// Consumes the tracker into its final result.
    #[must_use]
    pub fn finish(self, device: Option<Device>) -> SessionResult {
        let progress = self.progress();
        SessionResult {
            device,
            state: self.state,
            progress,
            items: self.items,
            started_at: self.started_at,
            finished_at: OffsetDateTime::now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    fn expected() -> Vec<ExpectedItem> {
        vec![ExpectedItem::new("Laptop", "A1"), ExpectedItem::new("Monitor", "B2")]
    }

    fn found_names(tracker: &ScanSessionTracker) -> Vec<&str> {
        tracker
            .items()
            .iter()
            .filter(|item| item.found())
            .map(TrackedItem::name)
            .collect()
    }

    #[test]
    fn start_rejects_duplicate_identifiers() {
        let result = ScanSessionTracker::start(vec![
            ExpectedItem::new("Laptop", "A1"),
            ExpectedItem::new("Spare laptop", "A1"),
        ]);

        assert_matches!(
            result,
            Err(SessionError::DuplicateIdentifier { identifier }) if identifier == "A1"
        );
    }

    #[test]
    fn empty_session_completes_immediately() {
        let tracker = ScanSessionTracker::start(Vec::new()).expect("tracker");

        assert_eq!(SessionState::Completed, tracker.state());
        assert_eq!(Progress::new(0, 0), tracker.progress());
    }

    #[test]
    fn observe_completes_when_every_item_is_found() {
        let mut tracker = ScanSessionTracker::start(expected()).expect("tracker");
        let progress = tracker.subscribe_progress();

        assert_eq!(Observation::Matched { name: "Laptop".into() }, tracker.observe("A1"));
        assert_eq!(Observation::AlreadyFound, tracker.observe("A1"));
        assert_eq!(Observation::Unmatched, tracker.observe("ZZ"));
        assert_eq!(SessionState::Running, tracker.state());
        assert_eq!(Progress::new(1, 2), *progress.borrow());

        assert_eq!(Observation::Matched { name: "Monitor".into() }, tracker.observe("B2"));
        assert_eq!(SessionState::Completed, tracker.state());
        assert_eq!(Progress::new(2, 2), *progress.borrow());
        assert_eq!(Observation::Ignored, tracker.observe("B2"));
    }

    #[test]
    fn interrupt_keeps_partial_results() {
        let mut tracker = ScanSessionTracker::start(expected()).expect("tracker");
        tracker.observe("B2");

        assert!(tracker.interrupt());
        assert!(!tracker.interrupt());
        assert!(!tracker.connection_lost());

        assert_eq!(SessionState::Interrupted, tracker.state());
        assert_eq!(vec!["Monitor"], found_names(&tracker));
    }

    #[test]
    fn connection_lost_after_completion_is_ignored() {
        let mut tracker = ScanSessionTracker::start(vec![ExpectedItem::new("Laptop", "A1")])
            .expect("tracker");
        tracker.observe("A1");

        assert!(!tracker.connection_lost());
        assert_eq!(SessionState::Completed, tracker.state());
    }

    #[test]
    fn finish_reports_items_in_supplied_order() {
        let mut tracker = ScanSessionTracker::start(expected()).expect("tracker");
        tracker.observe("B2");
        tracker.connection_lost();

        let result = tracker.finish(None);

        assert_eq!(SessionState::ConnectionFailed, result.state());
        assert_eq!(Progress::new(1, 2), result.progress());
        let names: Vec<(&str, bool)> = result
            .items()
            .iter()
            .map(|item| (item.name(), item.found()))
            .collect();
        assert_eq!(vec![("Laptop", false), ("Monitor", true)], names);
        assert!(result.finished_at() >= result.started_at());
    }

    #[test]
    fn session_result_serialises_camel_case() {
        let tracker = ScanSessionTracker::start(vec![ExpectedItem::new("Laptop", "A1")])
            .expect("tracker");
        let value = serde_json::to_value(tracker.finish(None)).expect("json");

        assert_eq!("running", value["state"]);
        assert_eq!("A1", value["items"][0]["expectedIdentifier"]);
        assert_eq!(1, value["progress"]["total"]);
        assert!(value["startedAt"].is_string());
    }
}
