//! Delivery-check probes and their verdicts.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::contact::ContactData;
use crate::Result;

/// A pending confirmation that a sent notification reached the downstream system.
///
/// Stored as JSON in a sorted set scored by the next check instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryCheckData {
    /// Fully rendered URL to poll.
    pub url: String,
    pub contact: ContactData,
    pub trigger_id: String,
    /// Checks performed so far.
    pub attempts_count: u64,
}

/// Identity of a probe for deduplication purposes.
pub type DeliveryCheckKey = (String, String, String, String);

impl DeliveryCheckData {
    /// Serialize to the persisted payload.
    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a persisted payload.
    pub fn from_payload(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// `(url, contact id, contact value, trigger id)`.
    pub fn dedup_key(&self) -> DeliveryCheckKey {
        (
            self.url.clone(),
            self.contact.id.clone(),
            self.contact.value.clone(),
            self.trigger_id.clone(),
        )
    }
}

/// Verdict of one delivery check.
///
/// Parses the literals a check template renders, case-insensitively, with
/// `USER_EXCEPTION` also accepted as `userException`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum DeliveryCheckState {
    /// Not known yet; check again later.
    Pending,
    /// Delivered.
    Ok,
    /// The downstream reports a permanent delivery failure.
    Failed,
    /// The check template itself is broken for this probe.
    #[strum(to_string = "USER_EXCEPTION", serialize = "USEREXCEPTION")]
    UserException,
    /// Transient infrastructure failure while checking.
    Exception,
    /// Attempts exhausted or verdict unusable.
    Stopped,
}
