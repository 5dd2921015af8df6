//! Hardened HTTP client for the remote config server.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::ConfigError;
use crate::security::{validate_resolved_addresses, validate_url};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum accepted response body (1 MiB). Config documents are small.
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

/// Total attempts per request, shared between transport failures and
/// HTTP 429 responses.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Initial retry delay; doubles per attempt.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

enum AttemptError {
    Retryable(String),
    Fatal(ConfigError),
}

/// Client for the archetype config server.
///
/// Redirects are disabled; every URL is validated before a request is
/// issued, and the DNS-resolved addresses are re-checked against the
/// private-address block list unless the process runs with `XFI_ENV=test`.
pub struct RemoteConfigClient {
    client: reqwest::Client,
    base_url: String,
    allowed_domains: Vec<String>,
    allow_local: bool,
    log_prefix: Option<String>,
    max_response_bytes: u64,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl RemoteConfigClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ConfigError::fetch(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            allowed_domains: Vec::new(),
            allow_local: false,
            log_prefix: None,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
        })
    }

    /// Restricts domain hosts to the given list (exact or subdomain match).
    pub fn with_allowed_domains(mut self, domains: Vec<String>) -> Self {
        self.allowed_domains = domains;
        self
    }

    /// Bypasses the SSRF checks entirely. Test servers bind loopback.
    pub fn allow_local(mut self, allow: bool) -> Self {
        self.allow_local = allow;
        self
    }

    /// Sets the `X-Log-Prefix` header sent with every request.
    pub fn with_log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = Some(prefix.into());
        self
    }

    /// Overrides the retry schedule. Tests use millisecond backoffs.
    pub fn with_retry(mut self, max_attempts: u32, initial_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.initial_backoff = initial_backoff;
        self
    }

    /// Fetches a JSON document relative to the server base URL.
    pub async fn get_json(&self, path: &str) -> Result<Value, ConfigError> {
        match self.get(path).await? {
            Some(value) => Ok(value),
            None => Err(ConfigError::fetch(format!("{path}: not found"))),
        }
    }

    /// Like `get_json`, but a 404 resolves to `None` instead of an error.
    pub async fn get_json_optional(&self, path: &str) -> Result<Option<Value>, ConfigError> {
        self.get(path).await
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, ConfigError> {
        let url_str = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let url = Url::parse(&url_str)
            .map_err(|e| ConfigError::fetch(format!("Invalid URL '{url_str}': {e}")))?;

        validate_url(&url, &self.allowed_domains, self.allow_local)?;
        self.check_resolved_addresses(&url).await?;

        let mut delay = self.initial_backoff;
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.attempt(&url).await {
                Ok(outcome) => return Ok(outcome),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retryable(message)) => {
                    warn!(
                        "Request to {} failed (attempt {}/{}): {}",
                        url, attempt, self.max_attempts, message
                    );
                    last_error = message;
                    if attempt < self.max_attempts {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(ConfigError::fetch(format!(
            "{url} failed after {} attempts: {last_error}",
            self.max_attempts
        )))
    }

    async fn attempt(&self, url: &Url) -> Result<Option<Value>, AttemptError> {
        let mut request = self.client.get(url.clone()).header("Accept", "application/json");
        if let Some(prefix) = &self.log_prefix {
            request = request.header("X-Log-Prefix", prefix.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(AttemptError::Retryable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(AttemptError::Fatal(ConfigError::fetch(format!(
                "{url}: HTTP {status}"
            ))));
        }

        if let Some(length) = response.content_length()
            && length > self.max_response_bytes
        {
            return Err(AttemptError::Fatal(ConfigError::fetch(format!(
                "{url}: response too large ({length} bytes, max {})",
                self.max_response_bytes
            ))));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AttemptError::Retryable(e.to_string()))?;
        if bytes.len() as u64 > self.max_response_bytes {
            return Err(AttemptError::Fatal(ConfigError::fetch(format!(
                "{url}: response too large ({} bytes, max {})",
                bytes.len(),
                self.max_response_bytes
            ))));
        }

        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| AttemptError::Fatal(ConfigError::fetch(format!("{url}: {e}"))))?;
        debug!("Fetched {} ({} bytes)", url, bytes.len());
        Ok(Some(value))
    }

    /// Re-checks DNS-resolved addresses so a hostile record cannot smuggle
    /// the request to a private address past the literal-IP checks.
    async fn check_resolved_addresses(&self, url: &Url) -> Result<(), ConfigError> {
        if self.allow_local || std::env::var("XFI_ENV").is_ok_and(|v| v == "test") {
            return Ok(());
        }
        let Some(url::Host::Domain(domain)) = url.host() else {
            // Literal IPs were already validated.
            return Ok(());
        };
        let port = url.port_or_known_default().unwrap_or(443);

        let addresses = tokio::net::lookup_host((domain, port))
            .await
            .map_err(|e| ConfigError::fetch(format!("DNS resolution failed for {domain}: {e}")))?;
        validate_resolved_addresses(addresses.map(|address| address.ip()))
            .map_err(ConfigError::Security)?;
        Ok(())
    }
}
