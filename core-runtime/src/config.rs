//! # Session Configuration Module
//!
//! Provides configuration management for the session core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `SessionConfig`
//! holding the host capabilities and every tunable of the session manager. It
//! validates fail-fast so a misconfigured host learns about it at startup
//! rather than on the first 401.
//!
//! ## Required Dependencies
//!
//! - `SecureStore` - credential persistence
//! - `HttpClient` - every outgoing call
//!
//! When the `desktop-shims` feature is enabled, `KeyringSecureStore` and
//! `ReqwestHttpClient` are injected automatically if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::SessionConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = SessionConfig::builder()
//!     .api_base_url("https://api.mooddisk.com")
//!     .secure_store(Arc::new(MySecureStore))
//!     .http_client(Arc::new(MyHttpClient))
//!     .proactive_refresh_lead(Duration::from_secs(300))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, HttpClient, SecureStore, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Environment variable consulted when no base URL is set on the builder.
pub const API_URL_ENV: &str = "MOODDISK_API_URL";
pub const DEFAULT_API_BASE_URL: &str = "https://api.mooddisk.com";
pub const DEFAULT_REFRESH_PATH: &str = "/api/auth/refresh/mobile";
pub const DEFAULT_PROBE_PATH: &str = "/api/user/me";
pub const DEFAULT_LOGOUT_PATH: &str = "/api/auth/logout";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_ROTATION_HEADER: &str = "bearer_token";
/// A rotated token must be longer than 10 characters after trimming.
pub const DEFAULT_ROTATION_MIN_LEN: usize = 11;
pub const DEFAULT_MAINTENANCE_COOLDOWN: Duration = Duration::from_secs(5);
pub const DEFAULT_NETWORK_COOLDOWN: Duration = Duration::from_secs(3);
pub const DEFAULT_SESSION_EXPIRED_COOLDOWN: Duration = Duration::from_secs(1);

/// Notice cool-down windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoticeCooldowns {
    pub maintenance: Duration,
    pub network_error: Duration,
    pub session_expired: Duration,
}

impl Default for NoticeCooldowns {
    fn default() -> Self {
        Self {
            maintenance: DEFAULT_MAINTENANCE_COOLDOWN,
            network_error: DEFAULT_NETWORK_COOLDOWN,
            session_expired: DEFAULT_SESSION_EXPIRED_COOLDOWN,
        }
    }
}

/// Configuration for the session core.
///
/// Use [`SessionConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct SessionConfig {
    /// Scheme and host of the diary API, without a trailing slash.
    pub api_base_url: String,
    pub refresh_path: String,
    pub probe_path: String,
    pub logout_path: String,

    /// Deadline applied to every outgoing request.
    pub request_timeout: Duration,

    /// Response header the server uses to push a fresh access token.
    pub rotation_header: String,
    pub rotation_min_len: usize,

    /// Clock-skew tolerance when checking `exp`. Zero means strict.
    pub expiry_leeway: Duration,

    pub notice_cooldowns: NoticeCooldowns,

    /// Refresh this long before expiry. `None` disables the scheduler.
    pub proactive_refresh_lead: Option<Duration>,

    /// Call the "who am I" endpoint during restore.
    pub probe_on_restore: bool,

    pub secure_store: Arc<dyn SecureStore>,
    pub http_client: Arc<dyn HttpClient>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("api_base_url", &self.api_base_url)
            .field("refresh_path", &self.refresh_path)
            .field("probe_path", &self.probe_path)
            .field("logout_path", &self.logout_path)
            .field("request_timeout", &self.request_timeout)
            .field("rotation_header", &self.rotation_header)
            .field("rotation_min_len", &self.rotation_min_len)
            .field("expiry_leeway", &self.expiry_leeway)
            .field("notice_cooldowns", &self.notice_cooldowns)
            .field("proactive_refresh_lead", &self.proactive_refresh_lead)
            .field("probe_on_restore", &self.probe_on_restore)
            .field("secure_store", &"SecureStore { ... }")
            .field("http_client", &"HttpClient { ... }")
            .field("clock", &"Clock { ... }")
            .finish()
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Absolute URL for an API path such as [`DEFAULT_PROBE_PATH`].
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    pub fn refresh_url(&self) -> String {
        self.endpoint(&self.refresh_path)
    }

    pub fn probe_url(&self) -> String {
        self.endpoint(&self.probe_path)
    }

    pub fn logout_url(&self) -> String {
        self.endpoint(&self.logout_path)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The base URL is an absolute http(s) URL
    /// - Endpoint paths start with `/`
    /// - Timeout and cool-downs are non-zero
    /// - The rotation header name is usable
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.api_base_url)
            .map_err(|e| Error::Config(format!("Invalid API base URL '{}': {}", self.api_base_url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::Config(format!(
                "API base URL must use http or https, got '{}'",
                url.scheme()
            )));
        }

        for (name, path) in [
            ("refresh_path", &self.refresh_path),
            ("probe_path", &self.probe_path),
            ("logout_path", &self.logout_path),
        ] {
            if !path.starts_with('/') {
                return Err(Error::Config(format!(
                    "{} must start with '/', got '{}'",
                    name, path
                )));
            }
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "Request timeout must be greater than zero".to_string(),
            ));
        }

        let cooldowns = &self.notice_cooldowns;
        if cooldowns.maintenance.is_zero()
            || cooldowns.network_error.is_zero()
            || cooldowns.session_expired.is_zero()
        {
            return Err(Error::Config(
                "Notice cool-downs must be greater than zero".to_string(),
            ));
        }

        if self.rotation_header.trim().is_empty() {
            return Err(Error::Config(
                "Rotation header name cannot be empty".to_string(),
            ));
        }

        if matches!(self.proactive_refresh_lead, Some(lead) if lead.is_zero()) {
            return Err(Error::Config(
                "Proactive refresh lead must be greater than zero; use None to disable"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn secure_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SecureStore".to_string(),
        message: "SecureStore implementation is required for credential persistence. \
                 Desktop: enable the 'desktop-shims' feature to use KeyringSecureStore. \
                 Mobile: inject platform-native secure storage (Keychain/Keystore)."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for API calls. \
                 Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                 Mobile: inject the platform-native HTTP adapter."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    use bridge_desktop::KeyringSecureStore;

    let store: Arc<dyn SecureStore> = Arc::new(KeyringSecureStore::new());
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(secure_store_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::with_timeout(timeout).map_err(|e| Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: e.to_string(),
    })?;
    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

/// Builder for constructing [`SessionConfig`] instances.
#[derive(Default)]
pub struct SessionConfigBuilder {
    api_base_url: Option<String>,
    refresh_path: Option<String>,
    probe_path: Option<String>,
    logout_path: Option<String>,
    request_timeout: Option<Duration>,
    rotation_header: Option<String>,
    rotation_min_len: Option<usize>,
    expiry_leeway: Option<Duration>,
    notice_cooldowns: Option<NoticeCooldowns>,
    proactive_refresh_lead: Option<Duration>,
    probe_on_restore: Option<bool>,
    secure_store: Option<Arc<dyn SecureStore>>,
    http_client: Option<Arc<dyn HttpClient>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SessionConfigBuilder {
    /// Sets the API base URL. A trailing slash is stripped.
    ///
    /// Falls back to `$MOODDISK_API_URL`, then to [`DEFAULT_API_BASE_URL`].
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = Some(path.into());
        self
    }

    pub fn probe_path(mut self, path: impl Into<String>) -> Self {
        self.probe_path = Some(path.into());
        self
    }

    pub fn logout_path(mut self, path: impl Into<String>) -> Self {
        self.logout_path = Some(path.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn rotation_header(mut self, name: impl Into<String>) -> Self {
        self.rotation_header = Some(name.into());
        self
    }

    pub fn rotation_min_len(mut self, len: usize) -> Self {
        self.rotation_min_len = Some(len);
        self
    }

    pub fn expiry_leeway(mut self, leeway: Duration) -> Self {
        self.expiry_leeway = Some(leeway);
        self
    }

    pub fn notice_cooldowns(mut self, cooldowns: NoticeCooldowns) -> Self {
        self.notice_cooldowns = Some(cooldowns);
        self
    }

    /// Enables the proactive refresh scheduler.
    pub fn proactive_refresh_lead(mut self, lead: Duration) -> Self {
        self.proactive_refresh_lead = Some(lead);
        self
    }

    pub fn probe_on_restore(mut self, enabled: bool) -> Self {
        self.probe_on_restore = Some(enabled);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds and validates the final `SessionConfig`.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when a required bridge is absent and no
    ///   desktop default is compiled in
    /// - [`Error::Config`] when a value fails [`SessionConfig::validate`]
    pub fn build(self) -> Result<SessionConfig> {
        let api_base_url = self
            .api_base_url
            .or_else(|| std::env::var(API_URL_ENV).ok().filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let api_base_url = api_base_url.trim().trim_end_matches('/').to_string();

        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(request_timeout)?,
        };

        let config = SessionConfig {
            api_base_url,
            refresh_path: self
                .refresh_path
                .unwrap_or_else(|| DEFAULT_REFRESH_PATH.to_string()),
            probe_path: self
                .probe_path
                .unwrap_or_else(|| DEFAULT_PROBE_PATH.to_string()),
            logout_path: self
                .logout_path
                .unwrap_or_else(|| DEFAULT_LOGOUT_PATH.to_string()),
            request_timeout,
            rotation_header: self
                .rotation_header
                .unwrap_or_else(|| DEFAULT_ROTATION_HEADER.to_string()),
            rotation_min_len: self.rotation_min_len.unwrap_or(DEFAULT_ROTATION_MIN_LEN),
            expiry_leeway: self.expiry_leeway.unwrap_or(Duration::ZERO),
            notice_cooldowns: self.notice_cooldowns.unwrap_or_default(),
            proactive_refresh_lead: self.proactive_refresh_lead,
            probe_on_restore: self.probe_on_restore.unwrap_or(true),
            secure_store,
            http_client,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}
