// Shared transport configuration for the API client.
//
// Carries the credential and the per-request defaults every call uses.
// The embedding application builds one of these and hands it in; no
// configuration files are read here.

use std::time::Duration;

use secrecy::SecretString;

/// Endpoint every request goes to unless overridden.
pub const DEFAULT_BASE_URL: &str = "https://rpdb.rpjosh.de/api/v1";

/// Version reported to the server with every request.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration of the API client.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// API key used to authenticate against the server.
    pub api_key: SecretString,

    /// Two-letter ISO-639 language code for server messages. Empty
    /// means "detect from the OS environment, fall back to English".
    pub language: String,

    /// Endpoint all requests are sent to. Empty means
    /// [`DEFAULT_BASE_URL`]; a trailing slash is trimmed.
    pub base_url: String,

    /// Set when multiple instances run with the same API key, so this
    /// client is also notified about changes it made itself.
    pub multi_instance: bool,

    /// Tell the server not to expand shared resources (attributes)
    /// inside entries because the client caches them locally.
    pub treat_as_java_client: bool,

    /// Timeout applied to every request.
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        ApiConfig {
            api_key: SecretString::from(api_key.into()),
            language: String::new(),
            base_url: String::new(),
            multi_instance: false,
            treat_as_java_client: false,
            timeout: Duration::from_secs(10),
        }
    }

    /// The effective base URL with defaults applied.
    pub(crate) fn effective_base_url(&self) -> String {
        let raw = if self.base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            &self.base_url
        };
        raw.trim_end_matches('/').to_string()
    }

    /// The effective language with OS detection applied.
    pub(crate) fn effective_language(&self) -> String {
        if self.language.is_empty() {
            os_language("en")
        } else {
            self.language.clone()
        }
    }
}

/// The language of the operating system as a two-letter ISO-639 code,
/// or `default` when it cannot be detected.
pub fn os_language(default: &str) -> String {
    for var in ["LC_ALL", "LC_MESSAGES", "LANG"] {
        if let Ok(value) = std::env::var(var) {
            // Values look like "de_DE.UTF-8"; the leading tag is enough.
            let tag: String = value
                .chars()
                .take_while(|c| c.is_ascii_alphabetic())
                .take(2)
                .collect();
            if tag.len() == 2 {
                return tag.to_lowercase();
            }
        }
    }
    default.to_string()
}

// ── Tests ────────────────────────────────────────────────────────────
