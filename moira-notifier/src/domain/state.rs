//! Trigger and metric states.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// State of a metric or trigger at a given moment.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum State {
    Ok,
    Warn,
    Error,
    Nodata,
    Exception,
    Test,
}

impl State {
    /// Severity rank used to pick the subject state of a batch of events.
    ///
    /// A higher rank wins. `TEST` outranks everything so a test notification
    /// is never mistaken for a real alert.
    pub fn priority(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Warn => 1,
            Self::Error => 2,
            Self::Nodata => 3,
            Self::Exception => 4,
            Self::Test => 5,
        }
    }

    pub fn is_test(self) -> bool {
        self == Self::Test
    }
}

/// Health flag of the notifier as recorded in the store.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum NotifierState {
    #[default]
    Ok,
    Error,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_state_round_trips_through_text() {
        assert_eq!(State::Nodata.to_string(), "NODATA");
        assert_eq!(State::from_str("warn").unwrap(), State::Warn);
        assert_eq!(
            serde_json::to_string(&State::Exception).unwrap(),
            "\"EXCEPTION\""
        );
    }

    #[test]
    fn test_notifier_state_text() {
        assert_eq!(NotifierState::default(), NotifierState::Ok);
        assert_eq!(NotifierState::Error.to_string(), "ERROR");
        assert_eq!(NotifierState::from_str("ok").unwrap(), NotifierState::Ok);
    }

    #[test]
    fn test_priority_order() {
        assert!(State::Error.priority() > State::Warn.priority());
        assert!(State::Exception.priority() > State::Nodata.priority());
        assert!(State::Test.priority() > State::Exception.priority());
    }
}
