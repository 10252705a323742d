//! Login session slot.
//!
//! The session lives outside the replicated document, in a local key/value
//! slot of its own. It is never broadcast to other contexts.

use crate::backends::LocalKvStore;
use crate::document::User;
use crate::error::Result;
use crate::types::{EntityId, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// The logged-in user, without credentials.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: EntityId,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for Session {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// One key of a [`LocalKvStore`] holding the current session as JSON.
pub struct SessionSlot {
    kv: Arc<LocalKvStore>,
    key: String,
}

impl SessionSlot {
    pub fn new(kv: Arc<LocalKvStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }

    /// Current session. Unreadable or malformed slots read as logged out.
    pub fn get(&self) -> Option<Session> {
        let raw = match self.kv.get(&self.key) {
            Ok(raw) => raw?,
            Err(error) => {
                warn!(%error, "session slot unreadable");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(error) => {
                warn!(%error, "discarding malformed session");
                None
            }
        }
    }

    pub fn set(&self, session: &Session) -> Result<()> {
        let encoded = serde_json::to_string(session)?;
        self.kv.set(&self.key, &encoded)
    }

    pub fn clear(&self) -> Result<()> {
        self.kv.remove(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_slot_cycle() {
        let slot = SessionSlot::new(Arc::new(LocalKvStore::in_memory()), "loggedUser");
        assert!(slot.get().is_none());

        let session = Session::from(&User::default_admin());
        slot.set(&session).unwrap();
        assert_eq!(slot.get(), Some(session.clone()));
        assert!(slot.get().unwrap().is_admin());

        slot.clear().unwrap();
        assert!(slot.get().is_none());
    }

    #[test]
    fn test_session_omits_password() {
        let session = Session::from(&User::default_admin());
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["role"], "ADMIN");
    }

    #[test]
    fn test_malformed_slot_reads_as_logged_out() {
        let kv = Arc::new(LocalKvStore::in_memory());
        kv.set("loggedUser", "{{{").unwrap();
        let slot = SessionSlot::new(kv, "loggedUser");
        assert!(slot.get().is_none());
    }
}
