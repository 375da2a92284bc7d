mod request_id;

use tokio_util::sync::CancellationToken;

use crate::auth::{authenticate, AllowedClientKey};
use crate::config::AppConfig;
use crate::error::BridgeError;
use crate::routing::ModelRouter;
use crate::transport::HttpTransport;

use request_id::MessageIdGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    pub model_router: ModelRouter,
    allowed_client_key: AllowedClientKey,
    message_ids: MessageIdGenerator,
    shutdown: CancellationToken,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, transport: HttpTransport, shutdown: CancellationToken) -> Self {
        let model_router = ModelRouter::new(&config.models);
        let allowed_client_key = AllowedClientKey::from_config(&config.client_authentication);
        Self {
            config,
            transport,
            model_router,
            allowed_client_key,
            message_ids: MessageIdGenerator::new(),
            shutdown,
        }
    }

    /// Authenticate an inbound request against the configured client key.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Auth` when the API key is missing or invalid.
    pub fn authenticate(&self, headers: &http::HeaderMap) -> Result<(), BridgeError> {
        authenticate(headers, &self.allowed_client_key)
    }

    #[must_use]
    pub fn client_key_enforced(&self) -> bool {
        self.allowed_client_key.is_enforced()
    }

    #[must_use]
    pub fn next_message_id(&self) -> String {
        self.message_ids.next_message_id()
    }

    /// A token cancelled when the caller goes away or the server shuts down.
    #[must_use]
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}
