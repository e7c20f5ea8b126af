use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::models::session::Session;

/// The size of a session identifier in bytes (192 bits).
const SESSION_ID_SIZE: usize = 24;

/// The claims folded into a new session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub id_token: String,
    pub access_token: String,
}

/// An in-memory session store with per-entry expiry.
///
/// Expiry is checked lazily on read; there is no background sweep, so a
/// dead entry lingers until its next lookup or a process restart. The
/// map is shared across tokio worker threads, hence the mutex: create,
/// read-evict, and destroy must each be atomic.
pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    /// Creates a new store whose sessions live for `ttl_ms` milliseconds.
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            ttl: Duration::milliseconds(ttl_ms),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a session and returns its identifier.
    ///
    /// The identifier is 192 bits from the OS random source, hex-encoded.
    /// A collision is negligible; if one ever happened the new entry
    /// overwrites the old (last-writer-wins).
    pub fn create(&self, claims: NewSession) -> String {
        let mut id_bytes = [0u8; SESSION_ID_SIZE];
        OsRng.fill_bytes(&mut id_bytes);
        let session_id = hex::encode(id_bytes);

        let now = Utc::now();
        let session = Session {
            subject: claims.subject,
            email: claims.email,
            display_name: claims.display_name,
            id_token: claims.id_token,
            access_token: claims.access_token,
            created_at: now,
            expires_at: now + self.ttl,
        };

        self.sessions
            .lock()
            .expect("session store mutex poisoned")
            .insert(session_id.clone(), session);

        session_id
    }

    /// Looks up a live session.
    ///
    /// Returns `None` for unknown ids, and lazily evicts entries at or
    /// past their expiry.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.get_at(session_id, Utc::now())
    }

    /// Destroys a session. Unknown ids are a no-op, not an error.
    pub fn destroy(&self, session_id: &str) {
        self.sessions
            .lock()
            .expect("session store mutex poisoned")
            .remove(session_id);
    }

    /// `get` against an explicit clock. A session is live strictly
    /// before `expires_at`; at or after it, the entry is removed.
    fn get_at(&self, session_id: &str, now: DateTime<Utc>) -> Option<Session> {
        let mut sessions = self.sessions.lock().expect("session store mutex poisoned");
        match sessions.get(session_id) {
            Some(session) if session.expires_at <= now => {
                sessions.remove(session_id);
                None
            }
            Some(session) => Some(session.clone()),
            None => None,
        }
    }
}
