use std::sync::Arc;

use parking_lot::RwLock;

use crate::api::{Language, Session};
use crate::storage;

pub const SESSION_SLOT: &str = "springram_session_v1";
pub const LANGUAGE_SLOT: &str = "springram_language_v1";

/// Exclusive owner of the authentication credential and the language
/// preference. Everything else reads through `get()` and reports
/// replacements through `set()`; the persisted slot and the in-memory copy
/// move together.
pub struct Store {
    storage: Arc<storage::Store>,
    current: RwLock<Option<Session>>,
}

impl Store {
    /// Loads the persisted session, if any. A malformed slot is treated as
    /// "no session" and erased rather than surfaced as an error.
    pub fn open(storage: Arc<storage::Store>) -> Self {
        let current = match storage.get_slot(SESSION_SLOT) {
            Ok(Some(raw)) => match serde_json::from_str::<Session>(&raw) {
                Ok(session) => Some(session),
                Err(err) => {
                    log::warn!("discarding malformed persisted session: {err}");
                    let _ = storage.delete_slot(SESSION_SLOT);
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                log::warn!("failed to read persisted session: {err}");
                None
            }
        };

        Store {
            storage,
            current: RwLock::new(current),
        }
    }

    pub fn get(&self) -> Option<Session> {
        self.current.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current
            .read()
            .as_ref()
            .map(|session| !session.access_token.is_empty())
            .unwrap_or(false)
    }

    /// Replaces the session wholesale. `None` erases the persisted slot.
    /// Persistence failures are logged and do not block the in-memory
    /// replacement; the next successful set will repair the slot.
    pub fn set(&self, session: Option<Session>) {
        match &session {
            Some(session) => match serde_json::to_string(session) {
                Ok(raw) => {
                    if let Err(err) = self.storage.put_slot(SESSION_SLOT, &raw) {
                        log::warn!("failed to persist session: {err}");
                    }
                }
                Err(err) => log::warn!("failed to serialize session: {err}"),
            },
            None => {
                if let Err(err) = self.storage.delete_slot(SESSION_SLOT) {
                    log::warn!("failed to erase persisted session: {err}");
                }
            }
        }
        *self.current.write() = session;
    }

    pub fn preferred_language(&self) -> Language {
        match self.storage.get_slot(LANGUAGE_SLOT) {
            Ok(Some(raw)) => Language::normalize(&raw),
            _ => Language::default(),
        }
    }

    pub fn set_preferred_language(&self, language: Language) {
        if let Err(err) = self.storage.put_slot(LANGUAGE_SLOT, language.as_str()) {
            log::warn!("failed to persist language preference: {err}");
        }
    }
}
