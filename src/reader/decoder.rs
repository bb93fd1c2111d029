use std::collections::HashSet;

use tracing::{trace, warn};

use crate::hw::RawRead;

/// Substring marking a reader's placeholder/error tag.
pub const SENTINEL_PATTERN: &str = "000000";

/// What the decoder did with one raw read.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DecodeOutcome {
    /// A new identifier was accepted.
    Accepted(String),
    /// The link reported an error event; nothing was decoded.
    LinkError(String),
    /// The candidate identifier was empty after trimming.
    Empty,
    /// The identifier was already accepted on this connection.
    Duplicate(String),
    /// The identifier contains the sentinel pattern.
    Sentinel(String),
}

/// Turns raw reader lines into distinct, valid tag identifiers.
///
/// The set of accepted identifiers lives as long as one connection.
#[derive(Debug, Default)]
pub struct TagStreamDecoder {
    accepted: Vec<String>,
    seen: HashSet<String>,
}

impl TagStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one raw read, recording the identifier when it is accepted.
    pub fn decode(&mut self, read: RawRead) -> DecodeOutcome {
        let line = match read {
            RawRead::Line(line) => line,
            RawRead::Error(reason) => {
                warn!(%reason, "reader reported an error event");
                return DecodeOutcome::LinkError(reason);
            }
        };

        let candidate = candidate_identifier(&line);
        let outcome = if candidate.is_empty() {
            DecodeOutcome::Empty
        } else if self.seen.contains(candidate) {
            DecodeOutcome::Duplicate(candidate.to_string())
        } else if candidate.contains(SENTINEL_PATTERN) {
            DecodeOutcome::Sentinel(candidate.to_string())
        } else {
            self.seen.insert(candidate.to_string());
            self.accepted.push(candidate.to_string());
            DecodeOutcome::Accepted(candidate.to_string())
        };

        if !matches!(outcome, DecodeOutcome::Accepted(_)) {
            trace!(?outcome, %line, "dropped reader line");
        }
        outcome
    }

    /// Returns accepted identifiers in acceptance order.
    #[must_use]
    pub fn accepted(&self) -> &[String] {
        &self.accepted
    }

    /// Forgets every accepted identifier.
    pub fn reset(&mut self) {
        self.accepted.clear();
        self.seen.clear();
    }
}

/// Returns the trimmed text before the first comma of a reader line.
#[must_use]
pub fn candidate_identifier(line: &str) -> &str {
    line.split_once(',').map_or(line, |(first, _)| first).trim()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn line(value: &str) -> RawRead {
        RawRead::Line(value.to_string())
    }

    #[rstest]
    #[case::plain("E2801160", "E2801160")]
    #[case::with_rssi("E2801160,-51", "E2801160")]
    #[case::padded("  E2801160 , -51,ant1", "E2801160")]
    #[case::leading_comma(",E2801160", "")]
    #[case::blank("   ", "")]
    fn candidate_identifier_takes_first_field(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(expected, candidate_identifier(raw));
    }

    #[test]
    fn decode_accepts_each_identifier_once() {
        let mut decoder = TagStreamDecoder::new();

        assert_eq!(DecodeOutcome::Accepted("A1".into()), decoder.decode(line("A1,-40")));
        assert_eq!(DecodeOutcome::Duplicate("A1".into()), decoder.decode(line(" A1 ,-38")));
        assert_eq!(DecodeOutcome::Accepted("B2".into()), decoder.decode(line("B2")));

        assert_eq!(["A1", "B2"], decoder.accepted());
    }

    #[test]
    fn decode_is_case_sensitive() {
        let mut decoder = TagStreamDecoder::new();
        decoder.decode(line("abc1"));

        assert_eq!(DecodeOutcome::Accepted("ABC1".into()), decoder.decode(line("ABC1")));
    }

    #[rstest]
    #[case::sentinel("E2000000FF", DecodeOutcome::Sentinel("E2000000FF".into()))]
    #[case::only_sentinel("000000", DecodeOutcome::Sentinel("000000".into()))]
    #[case::empty("", DecodeOutcome::Empty)]
    #[case::comma_only(",-40", DecodeOutcome::Empty)]
    fn decode_drops_invalid_candidates(#[case] raw: &str, #[case] expected: DecodeOutcome) {
        let mut decoder = TagStreamDecoder::new();

        assert_eq!(expected, decoder.decode(line(raw)));
        assert!(decoder.accepted().is_empty());
    }

    #[test]
    fn decode_does_not_remember_dropped_sentinels() {
        let mut decoder = TagStreamDecoder::new();
        decoder.decode(line("X000000"));

        assert_eq!(DecodeOutcome::Sentinel("X000000".into()), decoder.decode(line("X000000")));
    }

    #[test]
    fn decode_ignores_error_events() {
        let mut decoder = TagStreamDecoder::new();

        assert_eq!(
            DecodeOutcome::LinkError("antenna fault".into()),
            decoder.decode(RawRead::Error("antenna fault".into()))
        );
        assert!(decoder.accepted().is_empty());
    }

    #[test]
    fn reset_forgets_accepted_identifiers() {
        let mut decoder = TagStreamDecoder::new();
        decoder.decode(line("A1"));

        decoder.reset();

        assert_eq!(DecodeOutcome::Accepted("A1".into()), decoder.decode(line("A1")));
    }

    #[test]
    fn decode_scenario_keeps_order_and_filters() {
        let mut decoder = TagStreamDecoder::new();
        let outcomes: Vec<DecodeOutcome> = ["A1", "A1", "000000X", "B2"]
            .into_iter()
            .map(|raw| decoder.decode(line(raw)))
            .collect();

        assert_eq!(
            vec![
                DecodeOutcome::Accepted("A1".into()),
                DecodeOutcome::Duplicate("A1".into()),
                DecodeOutcome::Sentinel("000000X".into()),
                DecodeOutcome::Accepted("B2".into()),
            ],
            outcomes
        );
    }
}
