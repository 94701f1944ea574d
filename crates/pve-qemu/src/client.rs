//! Asynchronous QEMU client implementation.

use std::sync::Arc;

use pve_access::AuthSession;
use pve_core::codec::{FormParams, IntOrString};
use pve_core::{ApiClient, Error, ExpectStatus, PveClientConfig};
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::models::MachineConfig;
use crate::tasks::{PollSettings, TaskPoller};
use crate::Result;

/// Builder for [`QemuClient`].
#[derive(Debug, Clone)]
pub struct QemuClientBuilder {
    config: PveClientConfig,
    poll: PollSettings,
    shutdown: Option<CancellationToken>,
}

impl QemuClientBuilder {
    /// Create a builder from connection settings.
    #[must_use]
    pub fn new(config: PveClientConfig) -> Self {
        Self {
            config,
            poll: PollSettings::default(),
            shutdown: None,
        }
    }

    /// Override how clone tasks are awaited.
    #[must_use]
    pub const fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Stop token renewal when `shutdown` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Authenticate and build the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] before any request if the configuration is
    /// incomplete, or the bootstrap error.
    pub async fn connect(self) -> Result<QemuClient> {
        let session = match &self.shutdown {
            Some(parent) => AuthSession::bootstrap_with_shutdown(&self.config, parent).await?,
            None => AuthSession::bootstrap(&self.config).await?,
        };
        Ok(QemuClient::from_session(session, self.config.node, self.poll))
    }
}

/// Client for VM provisioning on a single node.
#[derive(Debug, Clone)]
pub struct QemuClient {
    session: Arc<AuthSession>,
    api: ApiClient,
    node: String,
    poller: TaskPoller,
}

impl QemuClient {
    /// Authenticate with default poll settings.
    ///
    /// # Errors
    ///
    /// See [`QemuClientBuilder::connect`].
    pub async fn connect(config: PveClientConfig) -> Result<Self> {
        QemuClientBuilder::new(config).connect().await
    }

    /// Start building a client.
    #[must_use]
    pub fn builder(config: PveClientConfig) -> QemuClientBuilder {
        QemuClientBuilder::new(config)
    }

    /// Build a client on top of an established session.
    #[must_use]
    pub fn from_session(session: AuthSession, node: impl Into<String>, poll: PollSettings) -> Self {
        let node = node.into();
        let api = session.api().clone();
        let poller = TaskPoller::new(api.clone(), node.clone(), poll);
        Self {
            session: Arc::new(session),
            api,
            node,
            poller,
        }
    }

    /// Node all operations address.
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Underlying authenticated session.
    #[must_use]
    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    /// Task poller used by [`QemuClient::clone_vm`].
    #[must_use]
    pub const fn poller(&self) -> &TaskPoller {
        &self.poller
    }

    /// Allocate the next free VM id.
    ///
    /// # Errors
    ///
    /// Returns transport errors, [`Error::Status`] on any status but 200, or
    /// [`Error::Decode`] if the id is not a valid VM id.
    pub async fn next_id(&self) -> Result<u32> {
        let id: IntOrString = self
            .api
            .call(Method::GET, &["cluster", "next"], None, ExpectStatus::OkOnly)
            .await?;
        u32::try_from(id.get())
            .map_err(|_| Error::Decode(format!("Next VM id {id} is out of range")))
    }

    /// Clone a template into a newly allocated VM id.
    ///
    /// A linked clone sends `full=0`, a full clone `full=1`. With `wait`, returns
    /// only after the clone task stopped successfully.
    ///
    /// # Errors
    ///
    /// Returns id allocation errors, [`Error::Status`] on a non-2xx clone
    /// response, or task wait errors.
    pub async fn clone_vm(&self, template_id: u32, linked: bool, wait: bool) -> Result<u32> {
        let new_id = self.next_id().await?;

        let mut form = FormParams::new();
        form.push("newid", new_id);
        form.push_flag("full", !linked);

        let template = template_id.to_string();
        let upid: String = self
            .api
            .call(
                Method::POST,
                &["nodes", &self.node, "qemu", &template, "clone"],
                Some(&form),
                ExpectStatus::AnySuccess,
            )
            .await?;
        info!(template_id, new_id, linked, upid = %upid, "Clone accepted");

        if wait {
            self.poller.wait(&upid).await?;
        }
        Ok(new_id)
    }

    /// Apply hardware and network settings to a VM.
    ///
    /// # Errors
    ///
    /// Returns transport errors or [`Error::Status`] on any status but 200.
    pub async fn update_config(&self, vmid: u32, config: &MachineConfig) -> Result<()> {
        let vmid = vmid.to_string();
        self.api
            .call_unit(
                Method::PUT,
                &["nodes", &self.node, "qemu", &vmid, "config"],
                Some(&config.form_params()),
                ExpectStatus::OkOnly,
            )
            .await
    }

    /// Start a VM.
    ///
    /// # Errors
    ///
    /// Returns transport errors or [`Error::Status`] on any status but 200.
    pub async fn start_vm(&self, vmid: u32) -> Result<()> {
        let vmid = vmid.to_string();
        self.api
            .call_unit(
                Method::POST,
                &["nodes", &self.node, "qemu", &vmid, "status", "start"],
                None,
                ExpectStatus::OkOnly,
            )
            .await
    }
}
