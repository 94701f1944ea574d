//! Access API client for Proxmox VE.
//!
//! Bootstraps authenticated sessions from a password or a pre-formed API token
//! and keeps expiring tokens renewed in the background.

#![deny(missing_docs)]

pub mod models;
pub mod renewal;
pub mod session;

pub use models::{Ticket, TokenInfo, TokenResponse};
pub use renewal::{renewal_delay, HttpTokenRenewer, RenewalScheduler, TokenRenewer};
pub use session::{AuthSession, SessionState};

/// Convenient result alias that reuses the shared PVE error type.
pub type Result<T> = pve_core::Result<T>;
