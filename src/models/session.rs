use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents an authenticated browser session.
///
/// Sessions are volatile: they live in the in-memory store only and do
/// not survive a process restart. The session id is the store key and
/// never appears inside this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The authenticated subject (`sub` claim).
    pub subject: String,
    /// The subject's email, when the provider released it.
    pub email: Option<String>,
    /// A display name assembled from the profile claims.
    pub display_name: Option<String>,
    /// The raw ID token, kept for `id_token_hint` at logout.
    pub id_token: String,
    /// The access token issued alongside the ID token.
    pub access_token: String,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the session expires.
    pub expires_at: DateTime<Utc>,
}
