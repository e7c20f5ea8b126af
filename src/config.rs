use std::env;
use anyhow::{Context, Result};
use zeroize::Zeroizing;

/// Default session lifetime: one hour.
const DEFAULT_SESSION_TTL_MS: i64 = 60 * 60 * 1000;
/// Default clock-skew tolerance for ID-token validation.
const DEFAULT_CLOCK_TOLERANCE_SECONDS: u64 = 300;

/// Identity provider endpoints, derived from the provider base URL.
#[derive(Clone)]
pub struct ProviderConfig {
    /// The provider base URL (no trailing slash).
    pub base_url: String,
    /// The authorization endpoint.
    pub authorize_url: String,
    /// The token endpoint.
    pub token_url: String,
    /// The JWKS endpoint.
    pub jwks_url: String,
    /// The RP-initiated logout endpoint.
    pub logout_url: String,
    /// The statically configured issuer.
    pub issuer: String,
    /// The OAuth2 client identifier.
    pub client_id: String,
    /// The OAuth2 client secret.
    pub client_secret: Zeroizing<String>,
}

/// Device-management service access, present only when configured.
#[derive(Clone)]
pub struct DeviceServiceConfig {
    /// The device-management server base URL (no trailing slash).
    pub server_url: String,
    /// The management API bearer token.
    pub api_token: Zeroizing<String>,
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The port to listen on.
    pub port: u16,
    /// The public base URL of this application (no trailing slash).
    pub app_base_url: String,
    /// The secret used to sign cookies.
    pub session_secret: Zeroizing<String>,
    /// The session lifetime in milliseconds.
    pub session_ttl_ms: i64,
    /// Clock-skew tolerance for token validation, in seconds.
    pub clock_tolerance_seconds: u64,
    /// Whether to accept self-signed upstream TLS certificates.
    pub allow_insecure_tls: bool,
    /// Identity provider settings.
    pub provider: ProviderConfig,
    /// Device-management service settings, if configured.
    pub device_service: Option<DeviceServiceConfig>,
}

/// Reads a required environment variable.
fn required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{} must be set", key))
}

/// Reads an optional numeric environment variable with a fallback.
fn number_from_env<T: std::str::FromStr>(key: &str, fallback: T) -> Result<T> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .ok()
            .with_context(|| format!("{} must be numeric", key)),
        Err(_) => Ok(fallback),
    }
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`. Missing required values are
    /// fatal; there is no degraded mode.
    pub fn from_env() -> Result<Self> {
        let app_base_url = required("APP_BASE_URL")?
            .trim_end_matches('/')
            .to_string();

        let session_secret = required("SESSION_SECRET")?;
        if session_secret.len() < 32 {
            anyhow::bail!("SESSION_SECRET must be at least 32 bytes of key material");
        }

        let provider_base = required("OIDC_BASE_URL")?
            .trim_end_matches('/')
            .to_string();

        let provider = ProviderConfig {
            authorize_url: format!("{}/oauth2/authorize", provider_base),
            token_url: format!("{}/oauth2/token", provider_base),
            jwks_url: format!("{}/oauth2/jwks", provider_base),
            logout_url: format!("{}/oidc/logout", provider_base),
            issuer: format!("{}/oauth2/token", provider_base),
            client_id: required("OIDC_CLIENT_ID")?,
            client_secret: Zeroizing::new(required("OIDC_CLIENT_SECRET")?),
            base_url: provider_base,
        };

        // The device gate is optional: both values present enables it,
        // neither disables it, anything in between is a config mistake.
        let device_service = match (env::var("DEVICE_SERVER_URL"), env::var("DEVICE_API_TOKEN")) {
            (Ok(server_url), Ok(api_token)) => Some(DeviceServiceConfig {
                server_url: server_url.trim_end_matches('/').to_string(),
                api_token: Zeroizing::new(api_token),
            }),
            (Err(_), Err(_)) => None,
            _ => anyhow::bail!(
                "DEVICE_SERVER_URL and DEVICE_API_TOKEN must be set together or not at all"
            ),
        };

        Ok(Self {
            port: number_from_env("PORT", 3000)?,
            app_base_url,
            session_secret: Zeroizing::new(session_secret),
            session_ttl_ms: number_from_env("SESSION_TTL_MS", DEFAULT_SESSION_TTL_MS)?,
            clock_tolerance_seconds: number_from_env(
                "CLOCK_TOLERANCE_SECONDS",
                DEFAULT_CLOCK_TOLERANCE_SECONDS,
            )?,
            allow_insecure_tls: env::var("ALLOW_INSECURE_TLS")
                .map(|v| v == "true")
                .unwrap_or(false),
            provider,
            device_service,
        })
    }

    /// Returns whether the deployment base URL is HTTPS.
    ///
    /// Cookies are marked `Secure` exactly in this case.
    pub fn is_https(&self) -> bool {
        self.app_base_url.starts_with("https://")
    }

    /// The redirect URI registered with the identity provider.
    pub fn redirect_uri(&self) -> String {
        format!("{}/callback", self.app_base_url)
    }

    /// The post-logout redirect URI registered with the identity provider.
    pub fn post_logout_redirect_uri(&self) -> String {
        format!("{}/logout/callback", self.app_base_url)
    }

    /// A fixed configuration for tests; no environment involved.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        let provider_base = "https://idp.example.com".to_string();
        Self {
            port: 3000,
            app_base_url: "https://app.example.com".to_string(),
            session_secret: Zeroizing::new(
                "0123456789abcdef0123456789abcdef-test".to_string(),
            ),
            session_ttl_ms: 3_600_000,
            clock_tolerance_seconds: 60,
            allow_insecure_tls: false,
            provider: ProviderConfig {
                authorize_url: format!("{}/oauth2/authorize", provider_base),
                token_url: format!("{}/oauth2/token", provider_base),
                jwks_url: format!("{}/oauth2/jwks", provider_base),
                logout_url: format!("{}/oidc/logout", provider_base),
                issuer: format!("{}/oauth2/token", provider_base),
                client_id: "my-client".to_string(),
                client_secret: Zeroizing::new("test-client-secret".to_string()),
                base_url: provider_base,
            },
            device_service: None,
        }
    }
}
