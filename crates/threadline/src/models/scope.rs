//! Tenant/mailbox scope

use serde::{Deserialize, Serialize};

/// The tenant and mailbox a message belongs to.
///
/// Every store lookup is qualified by scope; correlation never crosses a
/// scope boundary regardless of how well the headers match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    /// Mailbox owner (the connected Outlook/Gmail account)
    pub user_id: String,
    /// Support workspace the mailbox is attached to
    pub store_id: String,
}

impl Scope {
    pub fn new(user_id: impl Into<String>, store_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            store_id: store_id.into(),
        }
    }
}
