//! # pve-core
//!
//! Core types and utilities for working with the Proxmox VE API.
//!
//! This crate provides the shared error type, client configuration, the HTTP
//! transport layer and the wire codecs used by the API-area crates.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy shared by every crate
//! - [`config`] - Connection configuration, credentials and endpoint normalisation
//! - [`client`] - HTTP client settings and workflow constants
//! - [`transport`] - Transport trait, token-injecting decorator and envelope handling
//! - [`token`] - API tokens and the shared token slot
//! - [`codec`] - Form encoding and string-or-number integers

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod token;
pub mod transport;

// Re-export commonly used types
pub use config::{Credentials, PveClientConfig};
pub use error::{Error, Result};
pub use token::{ApiToken, TokenStore};
pub use transport::{ApiClient, AuthenticatingTransport, ExpectStatus, HttpTransport, Transport};
