//! API tokens and the shared slot holding the current one.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{Error, Result};

/// Proxmox VE API token.
///
/// `full_token_id` has the form `user@realm!token-name`. `expire` is the
/// absolute expiry in Unix seconds; `None` or `0` means the token never expires.
#[derive(Clone)]
pub struct ApiToken {
    full_token_id: String,
    secret: SecretString,
    expire: Option<i64>,
}

impl ApiToken {
    /// Create a token from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the id is not `user!token-name` or the
    /// secret is empty.
    pub fn new(
        full_token_id: impl Into<String>,
        secret: SecretString,
        expire: Option<i64>,
    ) -> Result<Self> {
        let full_token_id = full_token_id.into();
        match full_token_id.split_once('!') {
            Some((user, name)) if !user.is_empty() && !name.is_empty() => {}
            _ => {
                return Err(Error::ConfigError(format!(
                    "Token id `{full_token_id}` must look like user@realm!token-name"
                )))
            }
        }
        if secret.expose_secret().is_empty() {
            return Err(Error::ConfigError(format!(
                "Token `{full_token_id}` has an empty secret"
            )));
        }

        Ok(Self {
            full_token_id,
            secret,
            expire,
        })
    }

    /// Full token id, `user@realm!token-name`.
    #[must_use]
    pub fn full_token_id(&self) -> &str {
        &self.full_token_id
    }

    /// Owning user, `user@realm`.
    #[must_use]
    pub fn user(&self) -> &str {
        self.full_token_id
            .split_once('!')
            .map_or(self.full_token_id.as_str(), |(user, _)| user)
    }

    /// Token name without the user part.
    #[must_use]
    pub fn token_name(&self) -> &str {
        self.full_token_id
            .split_once('!')
            .map_or("", |(_, name)| name)
    }

    /// Token secret.
    #[must_use]
    pub const fn secret(&self) -> &SecretString {
        &self.secret
    }

    /// Raw expiry in Unix seconds, as reported by the server.
    #[must_use]
    pub const fn expire(&self) -> Option<i64> {
        self.expire
    }

    /// Expiry if it is a real point in time; `None` for non-expiring tokens.
    #[must_use]
    pub fn renewable_expire(&self) -> Option<i64> {
        self.expire.filter(|expire| *expire > 0)
    }

    /// Expiry as a UTC timestamp.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.renewable_expire()
            .and_then(|expire| DateTime::from_timestamp(expire, 0))
    }

    /// Same token with a new expiry.
    #[must_use]
    pub fn with_expire(&self, expire: Option<i64>) -> Self {
        Self {
            full_token_id: self.full_token_id.clone(),
            secret: self.secret.clone(),
            expire,
        }
    }

    /// Value of the `Authorization` header: `PVEAPIToken=<id>=<secret>`.
    #[must_use]
    pub fn authorization_value(&self) -> String {
        format!(
            "PVEAPIToken={}={}",
            self.full_token_id,
            self.secret.expose_secret()
        )
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiToken")
            .field("full_token_id", &self.full_token_id)
            .field("secret", &"[REDACTED]")
            .field("expire", &self.expire)
            .finish()
    }
}

impl FromStr for ApiToken {
    type Err = Error;

    /// Parse `user@realm!token-name=secret`.
    fn from_str(value: &str) -> Result<Self> {
        let (id, secret) = value.trim().split_once('=').ok_or_else(|| {
            Error::ConfigError(
                "API token must look like user@realm!token-name=secret".to_string(),
            )
        })?;
        Self::new(id, SecretString::from(secret.to_string()), None)
    }
}

/// Shared, swappable slot holding the current [`ApiToken`].
///
/// Readers take a cheap snapshot with [`TokenStore::get`]; the renewal task
/// replaces the whole token with [`TokenStore::set`]. A reader never sees a
/// partially updated token.
#[derive(Debug, Clone)]
pub struct TokenStore {
    current: Arc<RwLock<Arc<ApiToken>>>,
}

impl TokenStore {
    /// Create a store holding `token`.
    #[must_use]
    pub fn new(token: ApiToken) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(token))),
        }
    }

    /// Snapshot of the current token.
    #[must_use]
    pub fn get(&self) -> Arc<ApiToken> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Replace the current token.
    pub fn set(&self, token: ApiToken) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn token(expire: Option<i64>) -> ApiToken {
        ApiToken::new(
            "root@pam!auto-1",
            SecretString::from("s3cret".to_string()),
            expire,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_token() {
        let token: ApiToken = "root@pam!ci=0a1b2c".parse().unwrap();
        assert_eq!(token.full_token_id(), "root@pam!ci");
        assert_eq!(token.user(), "root@pam");
        assert_eq!(token.token_name(), "ci");
        assert_eq!(token.secret().expose_secret(), "0a1b2c");
        assert_eq!(token.expire(), None);
    }

    #[test]
    fn test_parse_token_rejects_malformed() {
        assert!(matches!(
            "root@pam".parse::<ApiToken>(),
            Err(Error::ConfigError(_))
        ));
        assert!(matches!(
            "root@pam=secret".parse::<ApiToken>(),
            Err(Error::ConfigError(_))
        ));
        assert!(matches!(
            "root@pam!ci=".parse::<ApiToken>(),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_authorization_value() {
        assert_eq!(
            token(None).authorization_value(),
            "PVEAPIToken=root@pam!auto-1=s3cret"
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", token(Some(5)));
        assert!(debug.contains("root@pam!auto-1"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_renewable_expire() {
        assert_eq!(token(None).renewable_expire(), None);
        assert_eq!(token(Some(0)).renewable_expire(), None);
        assert_eq!(token(Some(-1)).renewable_expire(), None);
        assert_eq!(token(Some(1_735_689_600)).renewable_expire(), Some(1_735_689_600));
        assert_eq!(
            token(Some(1_735_689_600)).expires_at().unwrap().to_rfc3339(),
            "2025-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn test_with_expire_keeps_identity() {
        let renewed = token(Some(100)).with_expire(Some(200));
        assert_eq!(renewed.full_token_id(), "root@pam!auto-1");
        assert_eq!(renewed.secret().expose_secret(), "s3cret");
        assert_eq!(renewed.expire(), Some(200));
    }

    #[test]
    fn test_store_set_replaces_token() {
        let store = TokenStore::new(token(Some(100)));
        let before = store.get();
        store.set(before.with_expire(Some(200)));
        assert_eq!(before.expire(), Some(100));
        assert_eq!(store.get().expire(), Some(200));
    }

    #[test]
    fn test_store_concurrent_readers_see_monotonic_expiry() {
        let store = TokenStore::new(token(Some(0)));

        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for expire in 1..=1_000 {
                    let current = store.get();
                    store.set(current.with_expire(Some(expire)));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..1_000 {
                        let seen = store.get();
                        let expire = seen.expire().unwrap();
                        assert!(expire >= last);
                        assert_eq!(seen.full_token_id(), "root@pam!auto-1");
                        last = expire;
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.get().expire(), Some(1_000));
    }
}
