//! Configuration structures for Proxmox VE clients.
//!
//! This module provides the connection configuration (endpoint, node,
//! credentials, TLS and timeouts), credential resolution and the normalisation
//! of user-supplied endpoints into the API base URL.

use crate::client::{ClientConfig, API_PATH, DEFAULT_API_PORT, DEFAULT_REQUEST_TIMEOUT};
use crate::Error;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Credentials used to bootstrap an authenticated session.
///
/// Exactly one form is used per session; see [`PveClientConfig::credentials`].
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Pre-formed API token in the form `user@realm!token-name=secret`.
    Token(SecretString),

    /// Username and password exchanged for a ticket, then for a fresh token.
    Password {
        /// User id including realm, e.g. `root@pam`
        username: String,
        /// Account password
        password: SecretString,
    },
}

/// Configuration for a Proxmox VE client instance.
///
/// This is the main configuration structure that controls how a client connects
/// to the API and authenticates.
#[derive(Debug, Clone, Validate)]
pub struct PveClientConfig {
    /// API endpoint: hostname, `host:port` or a full URL
    #[validate(length(min = 1))]
    pub endpoint: String,

    /// Node that all VM operations address
    #[validate(length(min = 1))]
    pub node: String,

    /// User id including realm (used with `password`)
    pub username: Option<String>,

    /// Account password (used with `username`)
    pub password: Option<SecretString>,

    /// Pre-formed API token; takes precedence over username/password
    pub token: Option<SecretString>,

    /// Whether to verify TLS certificates
    pub tls_verify: bool,

    /// Request timeout in seconds
    #[validate(range(min = 1, max = 300))]
    pub request_timeout_secs: u64,
}

impl PveClientConfig {
    /// Create a new client configuration with required parameters.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The API host (e.g., "pve.example.com" or "https://pve:8006")
    /// * `node` - The node name VM operations are sent to
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn new(endpoint: impl Into<String>, node: impl Into<String>) -> Result<Self, Error> {
        let config = Self {
            endpoint: endpoint.into(),
            node: node.into(),
            username: None,
            password: None,
            token: None,
            tls_verify: true,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT,
        };

        config
            .validate()
            .map_err(|e| Error::ConfigError(format!("Invalid configuration: {e}")))?;

        Ok(config)
    }

    /// Set a pre-formed API token (`user@realm!token-name=secret`).
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(SecretString::from(token.into()));
        self
    }

    /// Set username and password for ticket-based bootstrap.
    #[must_use]
    pub fn with_password(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Set whether to verify TLS certificates.
    #[must_use]
    pub const fn with_tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Set request timeout in seconds.
    #[must_use]
    pub const fn with_timeout(mut self, seconds: u64) -> Self {
        self.request_timeout_secs = seconds;
        self
    }

    /// Get the request timeout as a Duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// HTTP client settings derived from this configuration.
    #[must_use]
    pub const fn http_config(&self) -> ClientConfig {
        ClientConfig::new()
            .with_timeout(self.timeout())
            .with_tls_verify(self.tls_verify)
    }

    /// Resolve the credentials used to bootstrap a session.
    ///
    /// A non-empty token wins; otherwise both username and password must be set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if neither form is complete.
    pub fn credentials(&self) -> Result<Credentials, Error> {
        if let Some(token) = self
            .token
            .as_ref()
            .filter(|token| !token.expose_secret().is_empty())
        {
            return Ok(Credentials::Token(token.clone()));
        }

        match (self.username.as_deref(), self.password.as_ref()) {
            (Some(username), Some(password))
                if !username.is_empty() && !password.expose_secret().is_empty() =>
            {
                Ok(Credentials::Password {
                    username: username.to_string(),
                    password: password.clone(),
                })
            }
            _ => Err(Error::ConfigError(
                "either token OR (username AND password) must be set".to_string(),
            )),
        }
    }

    /// Build the API base URL (`<scheme>://<host>:<port>/api2/json`).
    ///
    /// The endpoint is lower-cased and any path is dropped. Without an explicit
    /// scheme `https` is used; without a port, 8006.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint has an unsupported scheme, no host, or
    /// cannot be parsed.
    pub fn api_base_url(&self) -> Result<Url, Error> {
        let endpoint = self.endpoint.trim().to_lowercase();

        let (scheme, rest) = match endpoint.split_once("://") {
            Some((scheme @ ("http" | "https"), rest)) => (scheme, rest),
            Some((scheme, _)) => {
                return Err(Error::ConfigError(format!(
                    "Unsupported endpoint scheme `{scheme}`"
                )))
            }
            None => ("https", endpoint.as_str()),
        };

        let host = rest.split_once('/').map_or(rest, |(host, _)| host);
        if host.is_empty() {
            return Err(Error::ConfigError(format!(
                "Endpoint `{}` has no host",
                self.endpoint
            )));
        }

        let authority = if has_port(host) {
            host.to_string()
        } else {
            format!("{host}:{DEFAULT_API_PORT}")
        };

        Url::parse(&format!("{scheme}://{authority}{API_PATH}"))
            .map_err(|e| Error::ConfigError(format!("Invalid endpoint: {e}")))
    }
}

fn has_port(host: &str) -> bool {
    match host.strip_prefix('[') {
        Some(bracketed) => bracketed.contains("]:"),
        None => host.contains(':'),
    }
}
