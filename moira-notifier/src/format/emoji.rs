//! State emoji shown at the start of message titles.

use crate::domain::State;

/// Which emoji notation a channel understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmojiStyle {
    /// Plain Unicode characters.
    Unicode,
    /// `:name:` shortcodes, as Slack renders them.
    Shortcode,
}

impl EmojiStyle {
    pub fn for_state(self, state: State) -> &'static str {
        match self {
            Self::Unicode => unicode(state),
            Self::Shortcode => shortcode(state),
        }
    }
}

fn unicode(state: State) -> &'static str {
    match state {
        State::Ok => "\u{2705}",
        State::Warn => "\u{26A0}\u{FE0F}",
        State::Error => "\u{1F534}",
        State::Nodata => "\u{1F4A3}",
        State::Exception => "\u{1F4A5}",
        State::Test => "\u{1F4A1}",
    }
}

fn shortcode(state: State) -> &'static str {
    match state {
        State::Ok => ":white_check_mark:",
        State::Warn => ":warning:",
        State::Error => ":red_circle:",
        State::Nodata => ":bomb:",
        State::Exception => ":boom:",
        State::Test => ":bulb:",
    }
}
