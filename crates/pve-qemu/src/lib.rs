//! QEMU client and data models for Proxmox VE.
//!
//! Provides typed structures and an asynchronous client for cloning,
//! configuring and starting QEMU VMs on a single node, and for waiting on the
//! node tasks those operations start.

#![deny(missing_docs)]

pub mod client;
pub mod models;
pub mod tasks;

pub use client::{QemuClient, QemuClientBuilder};
pub use models::{MachineConfig, NetworkConfig, TaskSummary};
pub use tasks::{PollSettings, TaskPoller};

/// Convenient result alias that reuses the shared PVE error type.
pub type Result<T> = pve_core::Result<T>;
