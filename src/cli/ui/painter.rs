use owo_colors::{OwoColorize, Style as OwoStyle};

use crate::reader::{SessionState, StopReason};

/// Emphasis applied to a piece of terminal output.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Tone {
    Heading,
    Good,
    Attention,
    Bad,
    Muted,
    Value,
}

impl Tone {
    pub(crate) fn for_session(state: SessionState) -> Self {
        match state {
            SessionState::Completed => Self::Good,
            SessionState::Interrupted | SessionState::Running => Self::Attention,
            SessionState::ConnectionFailed => Self::Bad,
        }
    }

    pub(crate) fn for_stop(reason: &StopReason) -> Self {
        match reason {
            StopReason::RadioError(_) => Self::Bad,
            StopReason::Cancelled | StopReason::TimedOut | StopReason::ScanEnded => Self::Muted,
        }
    }

    /// Zero matches are worth a second look; anything else is good news.
    pub(crate) fn for_count(count: usize) -> Self {
        if count == 0 { Self::Attention } else { Self::Good }
    }

    fn style(self) -> OwoStyle {
        match self {
            Self::Heading => OwoStyle::new().bold().cyan(),
            Self::Good => OwoStyle::new().bold().green(),
            Self::Attention => OwoStyle::new().bold().yellow(),
            Self::Bad => OwoStyle::new().bold().red(),
            Self::Muted => OwoStyle::new().dimmed(),
            Self::Value => OwoStyle::new().bold(),
        }
    }
}

/// Colours terminal text by [`Tone`], or passes it through when colour is off.
#[derive(Debug)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn paint<T: AsRef<str>>(&self, tone: Tone, text: T) -> String {
        if self.use_colour {
            format!("{}", text.as_ref().style(tone.style()))
        } else {
            text.as_ref().to_string()
        }
    }

    pub(crate) fn heading<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(Tone::Heading, text)
    }

    pub(crate) fn muted<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(Tone::Muted, text)
    }

    pub(crate) fn value<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(Tone::Value, text)
    }

    pub(crate) fn session_state(&self, state: SessionState) -> String {
        self.paint(Tone::for_session(state), state.to_string())
    }

    pub(crate) fn item_status(&self, found: bool) -> String {
        if found {
            self.paint(Tone::Good, "found")
        } else {
            self.paint(Tone::Attention, "missing")
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::error::DiscoveryError;

    #[rstest]
    #[case::completed(SessionState::Completed, Tone::Good)]
    #[case::interrupted(SessionState::Interrupted, Tone::Attention)]
    #[case::failed(SessionState::ConnectionFailed, Tone::Bad)]
    fn session_states_map_to_tones(#[case] state: SessionState, #[case] expected: Tone) {
        assert_eq!(expected, Tone::for_session(state));
    }

    #[rstest]
    #[case::timed_out(StopReason::TimedOut, Tone::Muted)]
    #[case::radio(
        StopReason::RadioError(DiscoveryError::Radio { reason: "reset".into() }),
        Tone::Bad
    )]
    fn stop_reasons_map_to_tones(#[case] reason: StopReason, #[case] expected: Tone) {
        assert_eq!(expected, Tone::for_stop(&reason));
    }

    #[test]
    fn plain_painter_leaves_text_untouched() {
        let painter = Painter::new(false);

        assert_eq!("completed", painter.session_state(SessionState::Completed));
        assert_eq!("missing", painter.item_status(false));
        assert_eq!("dev-1", painter.paint(Tone::Bad, "dev-1"));
    }

    #[rstest]
    #[case::heading(Tone::Heading)]
    #[case::good(Tone::Good)]
    #[case::bad(Tone::Bad)]
    #[case::muted(Tone::Muted)]
    fn colour_painter_wraps_text_in_escapes(#[case] tone: Tone) {
        let styled = Painter::new(true).paint(tone, "A1");

        assert_ne!("A1", styled);
        assert!(styled.contains("A1"));
    }
}
