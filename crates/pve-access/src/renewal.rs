//! Proactive API token renewal.
//!
//! A [`RenewalScheduler`] owns one background task per session. The task sleeps
//! until `expire - lead`, renews the current token through a [`TokenRenewer`],
//! installs the replacement in the [`TokenStore`] and re-arms for the new
//! expiry. A failed renewal is logged and ends the schedule; the token already
//! installed stays in place. Cancellation publishes [`SessionState::Closed`].

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use pve_core::{ApiClient, ApiToken, ExpectStatus, TokenStore};
use reqwest::Method;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::TokenInfo;
use crate::session::SessionState;
use crate::Result;

/// Time to wait before renewing a token that expires at `expire` (Unix
/// seconds), firing `lead` ahead of expiry.
///
/// Returns `None` for non-expiring tokens (`expire <= 0`). A wake-up already in
/// the past yields a zero delay.
#[must_use]
pub fn renewal_delay(expire: i64, now: SystemTime, lead: Duration) -> Option<Duration> {
    let expire = u64::try_from(expire).ok().filter(|expire| *expire > 0)?;
    let fire_at = (UNIX_EPOCH + Duration::from_secs(expire))
        .checked_sub(lead)
        .unwrap_or(UNIX_EPOCH);
    Some(fire_at.duration_since(now).unwrap_or(Duration::ZERO))
}

/// Renews a token and reports its new metadata.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenRenewer: Send + Sync {
    /// Extend the lifetime of `token`.
    async fn renew(&self, token: &ApiToken) -> Result<TokenInfo>;
}

/// Renews through `PUT /access/users/{user}/token/{token-name}`.
#[derive(Debug, Clone)]
pub struct HttpTokenRenewer {
    api: ApiClient,
}

impl HttpTokenRenewer {
    /// Create a renewer sending through an authenticated API client.
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl TokenRenewer for HttpTokenRenewer {
    async fn renew(&self, token: &ApiToken) -> Result<TokenInfo> {
        self.api
            .call(
                Method::PUT,
                &["access", "users", token.user(), "token", token.token_name()],
                None,
                ExpectStatus::OkOnly,
            )
            .await
    }
}

/// Handle to the background renewal task.
#[derive(Debug)]
pub struct RenewalScheduler {
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl RenewalScheduler {
    /// Start renewing the token held in `tokens`.
    ///
    /// Returns `None` without spawning anything if the current token has no
    /// positive expiry.
    #[must_use]
    pub fn start(
        renewer: Arc<dyn TokenRenewer>,
        tokens: TokenStore,
        lead: Duration,
        shutdown: CancellationToken,
        state: Arc<watch::Sender<SessionState>>,
    ) -> Option<Self> {
        tokens.get().renewable_expire()?;

        let handle = tokio::spawn(run(renewer, tokens, lead, shutdown.clone(), state));
        Some(Self { handle, shutdown })
    }

    /// Stop scheduling further renewals. An in-flight renewal still completes.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Returns true once the background task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the background task to exit.
    pub async fn join(self) {
        if let Err(err) = self.handle.await {
            warn!(error = %err, "Token renewal task aborted");
        }
    }
}

async fn run(
    renewer: Arc<dyn TokenRenewer>,
    tokens: TokenStore,
    lead: Duration,
    shutdown: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
) {
    loop {
        let current = tokens.get();
        let Some(expire) = current.renewable_expire() else {
            debug!(token = current.full_token_id(), "Token does not expire; renewal stopped");
            return;
        };
        let Some(delay) = renewal_delay(expire, SystemTime::now(), lead) else {
            return;
        };

        debug!(
            token = current.full_token_id(),
            expire,
            delay_secs = delay.as_secs(),
            "Token renewal scheduled"
        );

        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                debug!(token = current.full_token_id(), "Token renewal cancelled");
                state.send_replace(SessionState::Closed);
                return;
            }
            () = tokio::time::sleep(delay) => {}
        }

        state.send_if_modified(|value| set_if(value, SessionState::TokenActive, SessionState::Renewing));
        let result = renewer.renew(&current).await;
        state.send_if_modified(|value| set_if(value, SessionState::Renewing, SessionState::TokenActive));

        let info = match result {
            Ok(info) => info,
            Err(err) => {
                warn!(
                    token = current.full_token_id(),
                    error = %err,
                    "Token renewal failed; keeping the current token"
                );
                return;
            }
        };

        tokens.set(current.with_expire(info.expire));
        info!(token = current.full_token_id(), expire = ?info.expire, "Token renewed");

        if let Some(renewed) = info.expire.filter(|renewed| *renewed > 0 && *renewed <= expire) {
            warn!(
                token = current.full_token_id(),
                previous = expire,
                renewed,
                "Renewal did not extend token expiry; renewal stopped"
            );
            return;
        }

        if shutdown.is_cancelled() {
            state.send_replace(SessionState::Closed);
            return;
        }
    }
}

fn set_if(value: &mut SessionState, from: SessionState, to: SessionState) -> bool {
    if *value == from {
        *value = to;
        true
    } else {
        false
    }
}
