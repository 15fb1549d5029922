//! Client-credentials token exchange and cache.

use std::sync::Arc;
use std::time::Duration;

use mdm_platform::{Clock, HttpClient, HttpRequest};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::CredentialError;

/// A credential this close to expiry is treated as already expired.
pub const EXPIRY_MARGIN_MS: u64 = 30_000;

/// Scope requested when none is configured.
pub const DEFAULT_SCOPE: &str = "openid profile email";

/// Token endpoint parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSettings {
    /// Token endpoint URL
    pub token_url: String,
    /// Client identifier
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
    /// Requested scope
    pub scope: String,
    /// Request timeout
    pub timeout: Duration,
}

impl CredentialSettings {
    /// Settings with the default scope and a 10 s timeout.
    pub fn new(token_url: impl Into<String>, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: DEFAULT_SCOPE.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    fn form_body(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("scope", &self.scope)
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", &self.client_secret)
            .finish()
    }
}

/// Cached bearer credential. Replaced wholesale on refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at_ms: u64,
}

impl Credential {
    /// Opaque token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Absolute expiry on the manager's clock.
    pub fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }

    /// `Authorization` header value.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Whether the credential can still be used at `now_ms`.
    pub fn is_fresh_at(&self, now_ms: u64) -> bool {
        !self.token.is_empty() && now_ms.saturating_add(EXPIRY_MARGIN_MS) < self.expires_at_ms
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}

/// Lazily refreshed bearer credential.
pub struct CredentialManager {
    settings: CredentialSettings,
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    current: Option<Credential>,
}

impl CredentialManager {
    /// Manager with an empty cache.
    pub fn new(settings: CredentialSettings, http: Arc<dyn HttpClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            http,
            clock,
            current: None,
        }
    }

    /// Cached credential, fresh or not.
    pub fn current(&self) -> Option<&Credential> {
        self.current.as_ref()
    }

    /// Return a credential valid for at least [`EXPIRY_MARGIN_MS`], exchanging
    /// client credentials when the cache cannot provide one.
    ///
    /// # Errors
    ///
    /// Transport failures and non-success statuses are propagated for the
    /// caller to retry. A body without a non-empty `access_token` string or a
    /// numeric `expires_in` yields [`CredentialError::InvalidResponse`]. On any
    /// error the previous credential stays cached.
    pub fn ensure_token(&mut self) -> Result<&Credential, CredentialError> {
        let now = self.clock.now_ms();
        let fresh = self.current.as_ref().is_some_and(|c| c.is_fresh_at(now));
        if !fresh {
            let credential = self.exchange()?;
            self.current = Some(credential);
        }
        self.current
            .as_ref()
            .ok_or_else(|| CredentialError::InvalidResponse("no credential cached".into()))
    }

    /// `Authorization` header value for an authenticated call.
    ///
    /// # Errors
    ///
    /// See [`ensure_token`](Self::ensure_token).
    pub fn authorization(&mut self) -> Result<String, CredentialError> {
        self.ensure_token().map(Credential::authorization)
    }

    fn exchange(&self) -> Result<Credential, CredentialError> {
        info!(url = %self.settings.token_url, "requesting access token");
        let request = HttpRequest::post(&self.settings.token_url, self.settings.form_body())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .timeout(self.settings.timeout);
        let response = self.http.execute(&request).inspect_err(|e| {
            warn!(url = %self.settings.token_url, error = %e, "token request failed");
        })?;
        if !response.is_success() {
            return Err(CredentialError::Status(response.status));
        }

        let body: Value = response
            .json()
            .map_err(|e| CredentialError::InvalidResponse(format!("not JSON: {e}")))?;
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CredentialError::InvalidResponse("cannot get access_token property".into()))?;
        let expires_in = body
            .get("expires_in")
            .and_then(expires_in_ms)
            .ok_or_else(|| CredentialError::InvalidResponse("cannot get expires_in property".into()))?;

        let now = self.clock.now_ms();
        info!(expires_in_ms = expires_in, "access token acquired");
        Ok(Credential {
            token: token.to_string(),
            expires_at_ms: now.saturating_add(expires_in),
        })
    }
}

fn expires_in_ms(value: &Value) -> Option<u64> {
    if let Some(secs) = value.as_u64() {
        return Some(secs.saturating_mul(1000));
    }
    let secs = value.as_f64()?;
    let duration = Duration::try_from_secs_f64(secs).ok()?;
    u64::try_from(duration.as_millis()).ok()
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("token_url", &self.settings.token_url)
            .field("client_id", &self.settings.client_id)
            .field("current", &self.current)
            .finish()
    }
}
