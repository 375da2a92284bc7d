use http::header::{HeaderName, AUTHORIZATION};

use crate::config::ClientAuthConfig;
use crate::error::BridgeError;

const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

/// Client key index built once at startup.
#[derive(Debug, Clone)]
pub enum AllowedClientKey {
    /// No key configured; every request passes.
    Open,
    Single { raw: Box<str>, bearer: Box<str> },
}

impl AllowedClientKey {
    #[must_use]
    pub fn from_config(config: &ClientAuthConfig) -> Self {
        match config.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => AllowedClientKey::Single {
                bearer: format!("Bearer {key}").into_boxed_str(),
                raw: key.into(),
            },
            _ => AllowedClientKey::Open,
        }
    }

    #[must_use]
    pub fn is_enforced(&self) -> bool {
        matches!(self, AllowedClientKey::Single { .. })
    }
}

/// Extract the caller's key: `x-api-key` first, then `Authorization: Bearer`.
///
/// # Errors
///
/// Returns `BridgeError::Auth` when neither header carries a key.
pub fn extract_api_key(headers: &http::HeaderMap) -> Result<&str, BridgeError> {
    headers
        .get(X_API_KEY)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
        })
        .ok_or_else(|| BridgeError::Auth("Missing API key".to_string()))
}

/// Check an incoming request against the configured client key.
///
/// # Errors
///
/// Returns `BridgeError::Auth` when the API key is missing or invalid.
pub fn authenticate(
    headers: &http::HeaderMap,
    allowed: &AllowedClientKey,
) -> Result<(), BridgeError> {
    let AllowedClientKey::Single { raw, bearer } = allowed else {
        return Ok(());
    };
    if let Some(value) = headers.get(X_API_KEY) {
        return if value.as_bytes() == raw.as_bytes() {
            Ok(())
        } else {
            Err(BridgeError::Auth("Invalid API key".to_string()))
        };
    }
    match headers.get(AUTHORIZATION) {
        Some(value) if value.as_bytes() == bearer.as_bytes() => Ok(()),
        Some(_) => Err(BridgeError::Auth("Invalid API key".to_string())),
        None => Err(BridgeError::Auth("Missing API key".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(key: &str) -> AllowedClientKey {
        AllowedClientKey::from_config(&ClientAuthConfig {
            api_key: Some(key.to_string()),
        })
    }

    #[test]
    fn test_extract_x_api_key_wins() {
        let mut headers = http::HeaderMap::new();
        headers.insert("x-api-key", "sk-ant".parse().unwrap());
        headers.insert("authorization", "Bearer sk-other".parse().unwrap());
        assert_eq!(extract_api_key(&headers).unwrap(), "sk-ant");
    }

    #[test]
    fn test_extract_bearer_fallback() {
        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", "Bearer sk-test123".parse().unwrap());
        assert_eq!(extract_api_key(&headers).unwrap(), "sk-test123");
    }

    #[test]
    fn test_extract_missing() {
        let headers = http::HeaderMap::new();
        assert!(matches!(
            extract_api_key(&headers),
            Err(BridgeError::Auth(msg)) if msg == "Missing API key"
        ));
    }

    #[test]
    fn test_open_gate_passes_everything() {
        let allowed = AllowedClientKey::from_config(&ClientAuthConfig { api_key: None });
        assert!(!allowed.is_enforced());
        assert!(authenticate(&http::HeaderMap::new(), &allowed).is_ok());

        let blank = AllowedClientKey::from_config(&ClientAuthConfig {
            api_key: Some("  ".into()),
        });
        assert!(!blank.is_enforced());
    }

    #[test]
    fn test_single_key_via_either_header() {
        let allowed = single("secret");

        let mut headers = http::HeaderMap::new();
        headers.insert("x-api-key", "secret".parse().unwrap());
        assert!(authenticate(&headers, &allowed).is_ok());

        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        assert!(authenticate(&headers, &allowed).is_ok());
    }

    #[test]
    fn test_single_key_rejects_wrong_and_missing() {
        let allowed = single("secret");

        let mut headers = http::HeaderMap::new();
        headers.insert("x-api-key", "nope".parse().unwrap());
        assert!(matches!(
            authenticate(&headers, &allowed),
            Err(BridgeError::Auth(msg)) if msg == "Invalid API key"
        ));

        assert!(matches!(
            authenticate(&http::HeaderMap::new(), &allowed),
            Err(BridgeError::Auth(msg)) if msg == "Missing API key"
        ));
    }
}
