//! Data models for the `/access` API.

use std::fmt;

use pve_core::codec::int_or_string;
use pve_core::ApiToken;
use secrecy::SecretString;
use serde::Deserialize;

use crate::Result;

/// Authentication ticket returned by `POST /access/ticket`.
///
/// Only used to mint an API token; never stored.
#[derive(Clone, Deserialize)]
pub struct Ticket {
    /// Ticket value, sent back as the `PVEAuthCookie` cookie
    pub ticket: String,
    /// CSRF token, sent back as the `CSRFPreventionToken` header
    #[serde(rename = "CSRFPreventionToken")]
    pub csrf_prevention_token: String,
    /// Authenticated user id
    #[serde(default)]
    pub username: Option<String>,
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("ticket", &"[REDACTED]")
            .field("csrf_prevention_token", &"[REDACTED]")
            .field("username", &self.username)
            .finish()
    }
}

/// Token metadata, returned on issuance and renewal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenInfo {
    /// Absolute expiry in Unix seconds; `0` or missing means no expiry
    #[serde(default, deserialize_with = "int_or_string::option")]
    pub expire: Option<i64>,
    /// Free-form comment
    #[serde(default)]
    pub comment: Option<String>,
}

/// Response of `POST /access/users/{user}/token/{name}`.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    /// `user@realm!token-name`
    #[serde(rename = "full-tokenid")]
    pub full_token_id: String,
    /// Token metadata
    #[serde(default)]
    pub info: TokenInfo,
    /// Token secret; only returned once
    pub value: String,
}

impl TokenResponse {
    /// Convert into an [`ApiToken`].
    ///
    /// # Errors
    ///
    /// Returns an error if the token id or secret is malformed.
    pub fn into_token(self) -> Result<ApiToken> {
        ApiToken::new(
            self.full_token_id,
            SecretString::from(self.value),
            self.info.expire,
        )
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("full_token_id", &self.full_token_id)
            .field("info", &self.info)
            .field("value", &"[REDACTED]")
            .finish()
    }
}
