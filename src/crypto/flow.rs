use crate::error::{AppError, Result};
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use subtle::ConstantTimeEq;

/// The size of a flow token in bytes (128 bits of entropy).
const FLOW_TOKEN_SIZE: usize = 16;

/// Transient CSRF-protection state for a login attempt.
///
/// Lives only inside a signed, httpOnly cookie with a five-minute
/// lifetime, and is consumed exactly once at callback time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowState {
    /// The CSRF state bound to the authorization request.
    pub state: String,
    /// The nonce bound to the ID token.
    pub nonce: String,
    /// Creation time, milliseconds since the unix epoch.
    pub created_at: i64,
}

/// Transient state for an RP-initiated logout round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutFlowState {
    /// The state bound to the logout redirect.
    pub state: String,
    /// Creation time, milliseconds since the unix epoch.
    pub created_at: i64,
}

impl FlowState {
    /// Mints a fresh flow with random `state` and `nonce`.
    pub fn mint() -> Self {
        Self {
            state: random_token(),
            nonce: random_token(),
            created_at: Utc::now().timestamp_millis(),
        }
    }
}

impl LogoutFlowState {
    /// Mints a fresh logout flow with a random `state`.
    pub fn mint() -> Self {
        Self {
            state: random_token(),
            created_at: Utc::now().timestamp_millis(),
        }
    }
}

/// Generates a random hex-encoded token with 128 bits of entropy.
pub fn random_token() -> String {
    let mut bytes = [0u8; FLOW_TOKEN_SIZE];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Encodes flow state into a cookie-safe value: JSON, then base64url.
pub fn encode<T: Serialize>(flow: &T) -> Result<String> {
    let json = sonic_rs::to_string(flow)
        .map_err(|e| AppError::Internal(format!("Flow serialization failed: {}", e)))?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(json))
}

/// Decodes a cookie value back into flow state.
///
/// Any parse failure is a hard rejection; there is no partial trust in
/// a half-readable flow cookie.
pub fn decode<T: DeserializeOwned>(value: &str) -> Result<T> {
    let json = general_purpose::URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| AppError::Validation("Invalid flow cookie".to_string()))?;
    let json = String::from_utf8(json)
        .map_err(|_| AppError::Validation("Invalid flow cookie".to_string()))?;
    sonic_rs::from_str(&json).map_err(|_| AppError::Validation("Invalid flow cookie".to_string()))
}

/// Compares the stored state against the state echoed by the provider.
///
/// Exact byte-for-byte match only, in constant time.
pub fn state_matches(expected: &str, received: &str) -> bool {
    expected.len() == received.len()
        && expected.as_bytes().ct_eq(received.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_produces_distinct_tokens() {
        let flow = FlowState::mint();
        assert_eq!(flow.state.len(), FLOW_TOKEN_SIZE * 2);
        assert_eq!(flow.nonce.len(), FLOW_TOKEN_SIZE * 2);
        assert_ne!(flow.state, flow.nonce);

        let other = FlowState::mint();
        assert_ne!(flow.state, other.state);
    }

    #[test]
    fn encode_decode_round_trip() {
        let flow = FlowState::mint();
        let encoded = encode(&flow).unwrap();
        let decoded: FlowState = decode(&encoded).unwrap();
        assert_eq!(decoded.state, flow.state);
        assert_eq!(decoded.nonce, flow.nonce);
        assert_eq!(decoded.created_at, flow.created_at);
    }

    #[test]
    fn decode_rejects_tampered_value() {
        let flow = FlowState::mint();
        let mut encoded = encode(&flow).unwrap();
        encoded.insert(0, '!');
        assert!(decode::<FlowState>(&encoded).is_err());
        assert!(decode::<FlowState>("not base64 json").is_err());
    }

    #[test]
    fn state_match_is_exact() {
        assert!(state_matches("abc123", "abc123"));
        assert!(!state_matches("abc123", "abc124"));
        assert!(!state_matches("abc123", "abc1234"));
        assert!(!state_matches("abc123", ""));
    }
}
