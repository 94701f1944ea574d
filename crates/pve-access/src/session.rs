//! Authenticated session bootstrap.
//!
//! An [`AuthSession`] turns [`Credentials`] into an installed API token:
//!
//! - a pre-formed token is parsed and installed as-is;
//! - a username and password are exchanged for a [`Ticket`], which then mints a
//!   fresh token under a generated name.
//!
//! Bootstrap requests go through the plain transport. Everything afterwards
//! goes through an [`AuthenticatingTransport`] reading the session's
//! [`TokenStore`], and a [`RenewalScheduler`] keeps expiring tokens alive until
//! the session is shut down or dropped.

use std::sync::Arc;
use std::time::Duration;

use pve_core::client::TOKEN_RENEWAL_LEAD_SECS;
use pve_core::codec::FormParams;
use pve_core::{
    ApiClient, ApiToken, AuthenticatingTransport, Credentials, Error, ExpectStatus,
    HttpTransport, PveClientConfig, TokenStore, Transport,
};
use reqwest::header::{HeaderName, HeaderValue, COOKIE};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::models::{Ticket, TokenResponse};
use crate::renewal::{HttpTokenRenewer, RenewalScheduler};
use crate::Result;

const CSRF_HEADER: &str = "csrfpreventiontoken";

/// Lifecycle of an authenticated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No credential exchanged yet
    Unauthenticated,
    /// Password exchanged for a ticket; token not minted yet
    TicketObtained,
    /// Token installed and in use
    TokenActive,
    /// Token renewal request in flight
    Renewing,
    /// Session shut down; no further renewals
    Closed,
}

/// Authenticated Proxmox VE session.
pub struct AuthSession {
    tokens: TokenStore,
    api: ApiClient,
    scheduler: Option<RenewalScheduler>,
    shutdown: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("api", &self.api)
            .field("token", &self.tokens.get())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AuthSession {
    /// Bootstrap a session from client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] before any network call if the
    /// credentials are incomplete, or an authentication error if the server
    /// rejects them.
    pub async fn bootstrap(config: &PveClientConfig) -> Result<Self> {
        Self::bootstrap_with_shutdown(config, &CancellationToken::new()).await
    }

    /// Bootstrap a session that also stops when `parent` is cancelled.
    ///
    /// Cancelling `parent` ends renewal and moves the session to
    /// [`SessionState::Closed`], the same as [`AuthSession::shutdown`].
    ///
    /// # Errors
    ///
    /// See [`AuthSession::bootstrap`].
    pub async fn bootstrap_with_shutdown(
        config: &PveClientConfig,
        parent: &CancellationToken,
    ) -> Result<Self> {
        let credentials = config.credentials()?;
        let base_url = config.api_base_url()?;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config)?);

        Self::bootstrap_with(transport, base_url, credentials, parent.child_token()).await
    }

    /// Bootstrap over an explicit transport.
    ///
    /// # Errors
    ///
    /// See [`AuthSession::bootstrap`].
    pub async fn bootstrap_with(
        transport: Arc<dyn Transport>,
        base_url: Url,
        credentials: Credentials,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let state = Arc::new(watch::channel(SessionState::Unauthenticated).0);
        let plain = ApiClient::new(Arc::clone(&transport), base_url);

        let token = match credentials {
            Credentials::Token(token) => token.expose_secret().parse::<ApiToken>()?,
            Credentials::Password { username, password } => {
                let ticket = request_ticket(&plain, &username, &password).await?;
                state.send_replace(SessionState::TicketObtained);
                mint_token(&plain, &username, &ticket).await?
            }
        };

        let tokens = TokenStore::new(token);
        let api = plain.with_transport(Arc::new(AuthenticatingTransport::new(
            transport,
            tokens.clone(),
        )));
        state.send_replace(SessionState::TokenActive);

        let scheduler = RenewalScheduler::start(
            Arc::new(HttpTokenRenewer::new(api.clone())),
            tokens.clone(),
            Duration::from_secs(TOKEN_RENEWAL_LEAD_SECS),
            shutdown.clone(),
            Arc::clone(&state),
        );

        tokio::spawn(close_on_shutdown(shutdown.clone(), Arc::clone(&state)));

        let current = tokens.get();
        info!(
            token = current.full_token_id(),
            expire = ?current.expire(),
            renewal = scheduler.is_some(),
            "PVE session established"
        );

        Ok(Self {
            tokens,
            api,
            scheduler,
            shutdown,
            state,
        })
    }

    /// Shared token slot of this session.
    #[must_use]
    pub const fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// API client that authenticates every request with the current token.
    #[must_use]
    pub const fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to lifecycle changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Returns true while a renewal is scheduled.
    #[must_use]
    pub fn renewal_scheduled(&self) -> bool {
        self.scheduler
            .as_ref()
            .is_some_and(|scheduler| !scheduler.is_finished())
    }

    /// Stop renewing. The installed token stays usable until it expires.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            debug!("Shutting down PVE session");
        }
        self.shutdown.cancel();
        self.state.send_replace(SessionState::Closed);
    }
}

impl Drop for AuthSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Publishes [`SessionState::Closed`] once `shutdown` fires, whether or not a
/// renewal task is still running.
async fn close_on_shutdown(shutdown: CancellationToken, state: Arc<watch::Sender<SessionState>>) {
    shutdown.cancelled().await;
    state.send_replace(SessionState::Closed);
}

async fn request_ticket(api: &ApiClient, username: &str, password: &SecretString) -> Result<Ticket> {
    let mut form = FormParams::new();
    form.push("username", username);
    form.push("password", password.expose_secret());

    api.call(Method::POST, &["access", "ticket"], Some(&form), ExpectStatus::OkOnly)
        .await
        .map_err(|err| authentication_error("ticket exchange", err))
}

async fn mint_token(api: &ApiClient, username: &str, ticket: &Ticket) -> Result<ApiToken> {
    let token_name = Uuid::new_v4().to_string();
    let mut request = api.request(
        Method::POST,
        &["access", "users", username, "token", &token_name],
        None,
    )?;

    let mut cookie = HeaderValue::from_str(&format!("PVEAuthCookie={}", ticket.ticket))
        .map_err(|_| Error::Authentication("ticket is not a valid cookie value".to_string()))?;
    cookie.set_sensitive(true);
    let csrf = HeaderValue::from_str(&ticket.csrf_prevention_token)
        .map_err(|_| Error::Authentication("CSRF token is not a valid header value".to_string()))?;
    request.headers_mut().insert(COOKIE, cookie);
    request
        .headers_mut()
        .insert(HeaderName::from_static(CSRF_HEADER), csrf);

    debug!(user = username, token_name = %token_name, "Minting API token");
    let response = api
        .send(request, ExpectStatus::OkOnly)
        .await
        .map_err(|err| authentication_error("token issuance", err))?;
    let minted: TokenResponse = ApiClient::decode(response)
        .await
        .map_err(|err| authentication_error("token issuance", err))?;

    minted
        .into_token()
        .map_err(|err| authentication_error("token issuance", err))
}

fn authentication_error(stage: &str, err: Error) -> Error {
    match err {
        Error::Status { .. } | Error::Decode(_) | Error::ConfigError(_) => {
            Error::Authentication(format!("{stage} failed: {err}"))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string, header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> PveClientConfig {
        PveClientConfig::new(server.uri(), "pve").unwrap()
    }

    async fn mount_ticket(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api2/json/access/ticket"))
            .and(header("Content-Type", "application/x-www-form-urlencoded"))
            .and(body_string("username=root%40pam&password=hunter2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "ticket": "PVE:root@pam:65A1B2C3::sig",
                    "CSRFPreventionToken": "65A1B2C3:csrf",
                    "username": "root@pam"
                }
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn bootstrap_with_token_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let session = AuthSession::bootstrap(
            &config(&server).with_token("root@pam!ci=0a1b2c"),
        )
        .await
        .unwrap();

        assert_eq!(session.tokens().get().full_token_id(), "root@pam!ci");
        assert_eq!(session.state(), SessionState::TokenActive);
        assert!(!session.renewal_scheduled());
    }

    #[tokio::test]
    async fn bootstrap_rejects_malformed_token() {
        let server = MockServer::start().await;
        let err = AuthSession::bootstrap(&config(&server).with_token("root@pam"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[tokio::test]
    async fn bootstrap_without_credentials_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(path_regex(".*"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = AuthSession::bootstrap(&config(&server)).await.unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
        assert!(err.to_string().contains("either token OR (username AND password)"));
    }

    #[tokio::test]
    async fn bootstrap_with_password_mints_token() {
        let server = MockServer::start().await;
        mount_ticket(&server).await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/api2/json/access/users/root@pam/token/[0-9a-f-]{36}$"))
            .and(header("Cookie", "PVEAuthCookie=PVE:root@pam:65A1B2C3::sig"))
            .and(header("CSRFPreventionToken", "65A1B2C3:csrf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "full-tokenid": "root@pam!minted",
                    "info": {"privsep": 0},
                    "value": "0f1e2d3c"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = AuthSession::bootstrap(
            &config(&server).with_password("root@pam", "hunter2"),
        )
        .await
        .unwrap();

        let token = session.tokens().get();
        assert_eq!(token.full_token_id(), "root@pam!minted");
        assert_eq!(token.authorization_value(), "PVEAPIToken=root@pam!minted=0f1e2d3c");
        assert!(!session.renewal_scheduled());
    }

    /// Mounts a token mint answering with a token that expires in one hour.
    async fn mount_expiring_mint(server: &MockServer) -> u64 {
        let expire = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 3_600;
        Mock::given(method("POST"))
            .and(path_regex(r"^/api2/json/access/users/root@pam/token/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "full-tokenid": "root@pam!minted",
                    "info": {"expire": expire.to_string()},
                    "value": "0f1e2d3c"
                }
            })))
            .mount(server)
            .await;
        expire
    }

    async fn wait_for_closed(session: &AuthSession) {
        let mut states = session.watch_state();
        tokio::time::timeout(
            Duration::from_secs(1),
            states.wait_for(|state| *state == SessionState::Closed),
        )
        .await
        .expect("session did not close")
        .unwrap();
    }

    #[tokio::test]
    async fn bootstrap_schedules_renewal_for_expiring_token() {
        let server = MockServer::start().await;
        mount_ticket(&server).await;
        let expire = mount_expiring_mint(&server).await;

        let session = AuthSession::bootstrap(
            &config(&server).with_password("root@pam", "hunter2"),
        )
        .await
        .unwrap();

        assert_eq!(
            session.tokens().get().expire(),
            Some(i64::try_from(expire).unwrap())
        );
        assert!(session.renewal_scheduled());

        session.shutdown();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn parent_cancellation_closes_renewing_session() {
        let server = MockServer::start().await;
        mount_ticket(&server).await;
        mount_expiring_mint(&server).await;
        let parent = CancellationToken::new();

        let session = AuthSession::bootstrap_with_shutdown(
            &config(&server).with_password("root@pam", "hunter2"),
            &parent,
        )
        .await
        .unwrap();
        assert!(session.renewal_scheduled());
        assert_eq!(session.state(), SessionState::TokenActive);

        parent.cancel();
        wait_for_closed(&session).await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn parent_cancellation_closes_session_without_renewal() {
        let server = MockServer::start().await;
        let parent = CancellationToken::new();

        let session = AuthSession::bootstrap_with_shutdown(
            &config(&server).with_token("root@pam!ci=0a1b2c"),
            &parent,
        )
        .await
        .unwrap();
        assert!(!session.renewal_scheduled());

        parent.cancel();
        wait_for_closed(&session).await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn bootstrap_rejected_password_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api2/json/access/ticket"))
            .respond_with(ResponseTemplate::new(401).set_body_string("authentication failure"))
            .mount(&server)
            .await;

        let err = AuthSession::bootstrap(&config(&server).with_password("root@pam", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert!(err.to_string().contains("ticket exchange"));
    }

    #[tokio::test]
    async fn bootstrap_malformed_mint_response_is_authentication_error() {
        let server = MockServer::start().await;
        mount_ticket(&server).await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/api2/json/access/users/root@pam/token/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"value": 1}})))
            .mount(&server)
            .await;

        let err = AuthSession::bootstrap(&config(&server).with_password("root@pam", "hunter2"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert!(err.to_string().contains("token issuance"));
    }

    #[tokio::test]
    async fn renewal_request_uses_token_resource_path() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api2/json/access/users/root@pam/token/ci"))
            .and(header("Authorization", "PVEAPIToken=root@pam!ci=0a1b2c"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"expire": 4_102_444_800_i64, "privsep": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = AuthSession::bootstrap(
            &config(&server).with_token("root@pam!ci=0a1b2c"),
        )
        .await
        .unwrap();

        let renewer = HttpTokenRenewer::new(session.api().clone());
        let info = crate::renewal::TokenRenewer::renew(&renewer, &session.tokens().get())
            .await
            .unwrap();
        assert_eq!(info.expire, Some(4_102_444_800));
    }
}
