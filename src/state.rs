use std::sync::Arc;

use tower_cookies::Key;

use crate::config::Config;
use crate::error::Result;
use crate::repositories::session::SessionStore;
use crate::services::devices::DeviceClient;
use crate::services::oidc::OidcClient;

/// The application's state.
///
/// Explicitly constructed and passed into every handler: no process-wide
/// singletons, so each test builds its own isolated store and clients.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// The in-memory session store.
    pub sessions: Arc<SessionStore>,
    /// The identity provider client.
    pub oidc: Arc<OidcClient>,
    /// The device-management client, when the gate is configured.
    pub devices: Option<Arc<DeviceClient>>,
    /// The key that signs cookies.
    pub cookie_key: Key,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub fn new(config: &Config) -> Result<Self> {
        let sessions = Arc::new(SessionStore::new(config.session_ttl_ms));
        tracing::info!("✅ Session store initialized (ttl {} ms)", config.session_ttl_ms);

        let oidc = Arc::new(OidcClient::new(config)?);
        tracing::info!("✅ OIDC client initialized for {}", config.provider.base_url);

        let devices = match &config.device_service {
            Some(service) => {
                let client = DeviceClient::new(service, config.allow_insecure_tls)?;
                tracing::info!("✅ Device client initialized for {}", service.server_url);
                Some(Arc::new(client))
            }
            None => {
                tracing::info!("Device service not configured, gate disabled");
                None
            }
        };

        // Key::derive_from wants at least 32 bytes; Config enforces it.
        let cookie_key = Key::derive_from(config.session_secret.as_bytes());

        Ok(AppState {
            config: config.clone(),
            sessions,
            oidc,
            devices,
            cookie_key,
        })
    }

    /// The device client as a borrowed option, the shape the gate takes.
    pub fn device_client(&self) -> Option<&DeviceClient> {
        self.devices.as_deref()
    }
}
