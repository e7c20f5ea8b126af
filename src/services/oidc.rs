use std::collections::HashMap;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use crate::config::Config;
use crate::error::{AppError, Result};

/// Timeout for identity provider round trips.
const IDP_TIMEOUT_SECS: u64 = 10;

/// The scopes requested on every login.
const SCOPES: &str = "openid profile email";

/// The token set returned by the provider's token endpoint.
///
/// Ephemeral: folded into a session on a successful callback, never
/// persisted on its own.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub id_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Identity claims extracted from a verified ID token.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
}

impl Claims {
    /// A display name for the subject: the `name` claim, or the given
    /// and family names joined, or nothing.
    pub fn display_name(&self) -> Option<String> {
        if let Some(name) = &self.name {
            return Some(name.clone());
        }
        let joined = [self.given_name.as_deref(), self.family_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() { None } else { Some(joined) }
    }
}

/// One key set entry from the provider's JWKS endpoint.
#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

/// The provider's published key set.
#[derive(Debug, Clone, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

/// Client for the external OpenID-Connect identity provider.
///
/// Builds the authorization redirect, exchanges authorization codes for
/// tokens over the back channel, and verifies ID-token signatures
/// against the provider's published key set.
pub struct OidcClient {
    http: reqwest::Client,
    authorize_url: String,
    token_url: String,
    jwks_url: String,
    logout_url: String,
    issuer: String,
    client_id: String,
    client_secret: Zeroizing<String>,
    redirect_uri: String,
    post_logout_redirect_uri: String,
    clock_tolerance_seconds: u64,
    /// Verification keys cached by `kid`; refreshed when a token names
    /// a key the cache does not hold (key rotation).
    keys: RwLock<HashMap<String, DecodingKey>>,
}

impl OidcClient {
    /// Creates a new client from the application configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(IDP_TIMEOUT_SECS))
            .danger_accept_invalid_certs(config.allow_insecure_tls)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            authorize_url: config.provider.authorize_url.clone(),
            token_url: config.provider.token_url.clone(),
            jwks_url: config.provider.jwks_url.clone(),
            logout_url: config.provider.logout_url.clone(),
            issuer: config.provider.issuer.clone(),
            client_id: config.provider.client_id.clone(),
            client_secret: config.provider.client_secret.clone(),
            redirect_uri: config.redirect_uri(),
            post_logout_redirect_uri: config.post_logout_redirect_uri(),
            clock_tolerance_seconds: config.clock_tolerance_seconds,
            keys: RwLock::new(HashMap::new()),
        })
    }

    /// Builds the provider's authorization URL for a login attempt.
    ///
    /// `prompt=consent` is always present: every login forces
    /// re-consent instead of silently re-authenticating.
    pub fn build_authorize_url(&self, state: &str, nonce: &str) -> Result<String> {
        let mut url = reqwest::Url::parse(&self.authorize_url)
            .map_err(|e| AppError::Internal(format!("Invalid authorize URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", SCOPES)
            .append_pair("state", state)
            .append_pair("nonce", nonce)
            .append_pair("prompt", "consent");
        Ok(url.to_string())
    }

    /// Builds the provider's RP-initiated logout URL.
    pub fn build_logout_url(&self, id_token_hint: &str, state: &str) -> Result<String> {
        let mut url = reqwest::Url::parse(&self.logout_url)
            .map_err(|e| AppError::Internal(format!("Invalid logout URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("id_token_hint", id_token_hint)
            .append_pair("post_logout_redirect_uri", &self.post_logout_redirect_uri)
            .append_pair("state", state);
        Ok(url.to_string())
    }

    /// Exchanges an authorization code for a token set.
    ///
    /// Authorization codes are single-use: a rejection here is terminal
    /// for the callback, never retried. The redirect URI must byte-match
    /// the one sent with the authorization request.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(self.client_secret.as_str()))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::TokenExchange(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        Ok(response.json::<TokenSet>().await?)
    }

    /// Verifies an ID token and returns its claims.
    ///
    /// Checks, in order: structural shape, signature against the cached
    /// provider key set (with one refresh on an unknown `kid`), issuer,
    /// audience, and expiry/issued-at within the clock-skew tolerance.
    /// Any failure is a hard rejection.
    pub async fn verify_id_token(&self, id_token: &str) -> Result<Claims> {
        let segments: Vec<&str> = id_token.split('.').collect();
        if segments.len() != 3 || segments[1].is_empty() {
            return Err(AppError::TokenVerification("malformed ID token".to_string()));
        }

        let header = jsonwebtoken::decode_header(id_token)
            .map_err(|e| AppError::TokenVerification(format!("invalid token header: {}", e)))?;
        let kid = header
            .kid
            .clone()
            .ok_or_else(|| AppError::TokenVerification("missing kid in token header".to_string()))?;

        let key = self.decoding_key_for(&kid).await?;

        // The token's own (unverified) issuer hint takes precedence over
        // the configured issuer: some providers assert a per-tenant
        // issuer that differs from their discovery document. The
        // signature check below is the trust anchor either way.
        let expected_issuer =
            unverified_issuer_hint(segments[1]).unwrap_or_else(|| self.issuer.clone());

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_issuer(&[expected_issuer.as_str()]);
        validation.leeway = self.clock_tolerance_seconds;

        let data = jsonwebtoken::decode::<Claims>(id_token, &key, &validation)
            .map_err(|e| AppError::TokenVerification(e.to_string()))?;

        let claims = data.claims;
        if let Some(iat) = claims.iat {
            if iat > Utc::now().timestamp() + self.clock_tolerance_seconds as i64 {
                return Err(AppError::TokenVerification(
                    "token issued in the future".to_string(),
                ));
            }
        }

        tracing::debug!("✅ ID token verified for subject: {}", claims.sub);
        Ok(claims)
    }

    /// Returns the verification key for `kid`, refreshing the key set
    /// once when the cache does not hold it.
    async fn decoding_key_for(&self, kid: &str) -> Result<DecodingKey> {
        if let Some(key) = self.keys.read().await.get(kid).cloned() {
            return Ok(key);
        }

        tracing::info!("🔑 Unknown signing key {}, refreshing JWKS", kid);
        self.refresh_keys().await?;

        self.keys
            .read()
            .await
            .get(kid)
            .cloned()
            .ok_or_else(|| AppError::TokenVerification(format!("unknown signing key: {}", kid)))
    }

    /// Fetches the provider's key set and replaces the cache contents.
    async fn refresh_keys(&self) -> Result<()> {
        let response = self.http.get(&self.jwks_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::TokenVerification(format!(
                "JWKS endpoint returned {}",
                status
            )));
        }

        let jwks: JwkSet = response.json().await?;

        let mut keys = self.keys.write().await;
        for jwk in &jwks.keys {
            let (Some(kid), Some(n), Some(e)) = (&jwk.kid, &jwk.n, &jwk.e) else {
                continue;
            };
            if jwk.kty != "RSA" {
                continue;
            }
            match DecodingKey::from_rsa_components(n, e) {
                Ok(key) => {
                    keys.insert(kid.clone(), key);
                }
                Err(err) => {
                    tracing::warn!("Skipping unusable JWKS key {}: {}", kid, err);
                }
            }
        }

        tracing::debug!("JWKS cache refreshed: {} key(s)", keys.len());
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn insert_test_key(&self, kid: &str, key: DecodingKey) {
        self.keys.write().await.insert(kid.to_string(), key);
    }
}

/// Extracts the `iss` claim from a token payload without verifying it.
///
/// Returns `None` when the segment cannot be decoded; verification then
/// falls back to the statically configured issuer.
fn unverified_issuer_hint(payload_segment: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct IssuerHint {
        #[serde(default)]
        iss: Option<String>,
    }

    let bytes = general_purpose::URL_SAFE_NO_PAD.decode(payload_segment).ok()?;
    let hint: IssuerHint = sonic_rs::from_slice(&bytes).ok()?;
    hint.iss
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{Algorithm, EncodingKey, Header};

    const TEST_SECRET: &[u8] = b"unit-test-signing-secret";
    const TEST_KID: &str = "unit-test-key";

    fn client() -> OidcClient {
        OidcClient::new(&Config::for_tests()).unwrap()
    }

    fn sign(claims: &serde_json::Value) -> String {
        let header = Header {
            kid: Some(TEST_KID.to_string()),
            ..Header::new(Algorithm::HS256)
        };
        jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(TEST_SECRET)).unwrap()
    }

    async fn seeded_client() -> OidcClient {
        let client = client();
        client
            .insert_test_key(TEST_KID, DecodingKey::from_secret(TEST_SECRET))
            .await;
        client
    }

    fn base_claims() -> serde_json::Value {
        let now = Utc::now().timestamp();
        serde_json::json!({
            "sub": "user-1",
            "iss": "https://idp.example.com/oauth2/token",
            "aud": "my-client",
            "exp": now + 600,
            "iat": now,
            "email": "user@example.com",
            "given_name": "Ada",
            "family_name": "Lovelace",
        })
    }

    #[test]
    fn authorize_url_carries_the_full_parameter_set() {
        let url = client().build_authorize_url("state-1", "nonce-1").unwrap();
        assert!(url.starts_with("https://idp.example.com/oauth2/authorize?"));
        assert!(url.contains("client_id=my-client"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.example.com%2Fcallback"));
        assert!(url.contains("scope=openid+profile+email"));
        assert!(url.contains("state=state-1"));
        assert!(url.contains("nonce=nonce-1"));
        assert!(url.contains("prompt=consent"));
    }

    #[test]
    fn logout_url_carries_hint_and_state() {
        let url = client().build_logout_url("the-id-token", "state-2").unwrap();
        assert!(url.starts_with("https://idp.example.com/oidc/logout?"));
        assert!(url.contains("id_token_hint=the-id-token"));
        assert!(
            url.contains(
                "post_logout_redirect_uri=https%3A%2F%2Fapp.example.com%2Flogout%2Fcallback"
            )
        );
        assert!(url.contains("state=state-2"));
    }

    #[tokio::test]
    async fn verifies_a_well_formed_token() {
        let client = seeded_client().await;
        let claims = client.verify_id_token(&sign(&base_claims())).await.unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email.as_deref(), Some("user@example.com"));
        assert_eq!(claims.display_name().as_deref(), Some("Ada Lovelace"));
    }

    #[tokio::test]
    async fn rejects_malformed_tokens() {
        let client = seeded_client().await;
        assert!(client.verify_id_token("only.two").await.is_err());
        assert!(client.verify_id_token("garbage").await.is_err());
    }

    #[tokio::test]
    async fn rejects_a_wrong_audience_even_with_a_valid_signature() {
        let client = seeded_client().await;
        let mut claims = base_claims();
        claims["aud"] = serde_json::json!("someone-else");
        assert!(client.verify_id_token(&sign(&claims)).await.is_err());
    }

    #[tokio::test]
    async fn accepts_the_token_asserted_issuer() {
        // A tenant-specific issuer that differs from the configured one
        // still verifies: the signature check is the trust anchor.
        let client = seeded_client().await;
        let mut claims = base_claims();
        claims["iss"] = serde_json::json!("https://idp.example.com/t/tenant/oauth2/token");
        let verified = client.verify_id_token(&sign(&claims)).await.unwrap();
        assert_eq!(verified.iss, "https://idp.example.com/t/tenant/oauth2/token");
    }

    #[tokio::test]
    async fn expiry_honors_the_clock_skew_tolerance() {
        let client = seeded_client().await;
        let now = Utc::now().timestamp();

        // Expired just inside the 60 s tolerance: accepted.
        let mut claims = base_claims();
        claims["exp"] = serde_json::json!(now - 30);
        assert!(client.verify_id_token(&sign(&claims)).await.is_ok());

        // Expired well past the tolerance: rejected.
        claims["exp"] = serde_json::json!(now - 600);
        assert!(client.verify_id_token(&sign(&claims)).await.is_err());
    }

    #[tokio::test]
    async fn rejects_a_token_without_a_kid() {
        let client = seeded_client().await;
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &base_claims(),
            &EncodingKey::from_secret(TEST_SECRET),
        )
        .unwrap();
        assert!(client.verify_id_token(&token).await.is_err());
    }
}
