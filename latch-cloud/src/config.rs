//! Cloud client configuration

/// Default vendor backend base URL
pub const DEFAULT_BASE_URL: &str = "http://10.0.0.176:2018";

/// Default server region code
pub const DEFAULT_SERVER_REGION: &str = "cn";

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Configuration for one vendor cloud session
///
/// A session is bound to one account on one regional backend. The
/// region only selects which persisted auth/device records are used;
/// the observed backend exposes a single endpoint host.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// Account username (the vendor calls this the phone field)
    pub username: String,

    /// Account password, held in memory only, never persisted
    pub password: String,

    /// Server region code (e.g. "cn", "de", "sg")
    pub server_region: String,

    /// Backend base URL
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout: u64,
}

impl CloudConfig {
    /// Create a configuration for the default region and backend
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            server_region: DEFAULT_SERVER_REGION.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Set the server region code
    pub fn with_server_region(mut self, region: impl Into<String>) -> Self {
        self.server_region = region.into();
        self
    }

    /// Set the backend base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}
