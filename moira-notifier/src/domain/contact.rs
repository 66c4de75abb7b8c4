//! Notification destinations.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A destination address bound to one sender type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactData {
    pub id: String,
    /// Sender type or script sender name this contact is delivered through.
    #[serde(rename = "type")]
    pub contact_type: String,
    /// Address in the sender's own terms: chat id, email, URL, ...
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(rename = "team_id", default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
}

impl ContactData {
    /// Reject contacts owned by both a user and a team.
    ///
    /// System contacts (no owner at all) are accepted.
    pub fn validate(&self) -> Result<()> {
        let has_user = self.user.as_deref().is_some_and(|u| !u.is_empty());
        let has_team = self.team.as_deref().is_some_and(|t| !t.is_empty());
        if has_user && has_team {
            return Err(Error::validation(format!(
                "contact {} has both user and team owners",
                self.id
            )));
        }
        Ok(())
    }
}
