//! Data models for QEMU provisioning and task tracking.

use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use pve_core::codec::{int_or_string, FieldValue, FormField, FormParams, FormSchema};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Hardware and cloud-init settings applied to a cloned VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// VM id; addresses the request, not encoded in the body
    pub id: u32,
    /// Node name; addresses the request, not encoded in the body
    pub node: String,
    /// VM name
    pub name: String,
    /// Number of CPU sockets
    pub cpu_sockets: u32,
    /// Cores per socket
    pub cores_per_socket: u32,
    /// Memory in MiB
    pub memory_mib: u64,
    /// First network interface
    pub network: NetworkConfig,
    /// Start the VM when the node boots
    pub on_boot: bool,
}

const MACHINE_CONFIG_FIELDS: &[FormField<MachineConfig>] = &[
    FormField {
        param: "name",
        value: |config| FieldValue::Text(config.name.clone()),
    },
    FormField {
        param: "sockets",
        value: |config| FieldValue::Number(u64::from(config.cpu_sockets)),
    },
    FormField {
        param: "cores",
        value: |config| FieldValue::Number(u64::from(config.cores_per_socket)),
    },
    FormField {
        param: "memory",
        value: |config| FieldValue::Number(config.memory_mib),
    },
    FormField {
        param: "ipconfig0",
        value: |config| FieldValue::Text(config.network.directive()),
    },
    FormField {
        param: "onboot",
        value: |config| FieldValue::Flag(config.on_boot),
    },
];

static MACHINE_CONFIG_FORM: FormSchema<MachineConfig> = FormSchema::new(MACHINE_CONFIG_FIELDS);

impl MachineConfig {
    /// Form parameters for `PUT /nodes/{node}/qemu/{id}/config`.
    #[must_use]
    pub fn form_params(&self) -> FormParams {
        if self.network.directive().is_empty() {
            warn!(
                vmid = self.id,
                netmask = %self.network.netmask,
                "Netmask is not a dotted-quad IPv4 address; sending an empty ipconfig0"
            );
        }
        MACHINE_CONFIG_FORM.encode(self)
    }

    /// Names of the form parameters, in encoding order.
    #[must_use]
    pub fn form_fields() -> Vec<&'static str> {
        MACHINE_CONFIG_FORM.params()
    }
}

/// Static IPv4 configuration of a network interface.
///
/// Rendered as a cloud-init `ipconfig` directive, e.g.
/// `gw=10.0.0.1,ip=10.0.0.5/24`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Default gateway
    pub gateway_ip: String,
    /// Address, optionally already in CIDR form
    pub static_ip: String,
    /// Dotted-quad netmask; ignored when `static_ip` is in CIDR form
    pub netmask: String,
}

impl NetworkConfig {
    /// Prefix length of the netmask.
    ///
    /// Counts leading one bits; a non-contiguous mask yields `0`. Returns `None`
    /// if the netmask is not a dotted-quad IPv4 address.
    #[must_use]
    pub fn prefix_len(&self) -> Option<u32> {
        let mask: Ipv4Addr = self.netmask.trim().parse().ok()?;
        let bits = u32::from(mask);
        let ones = bits.leading_ones();
        let contiguous = bits.checked_shl(ones).unwrap_or(0) == 0;
        Some(if contiguous { ones } else { 0 })
    }

    /// Directive string; empty if the netmask cannot be parsed.
    #[must_use]
    pub fn directive(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.static_ip.contains('/') {
            return write!(f, "gw={},ip={}", self.gateway_ip, self.static_ip);
        }
        match self.prefix_len() {
            Some(prefix) => write!(
                f,
                "gw={},ip={}/{prefix}",
                self.gateway_ip, self.static_ip
            ),
            None => Ok(()),
        }
    }
}

/// Status of a node task, from `GET /nodes/{node}/tasks/{upid}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Task id (UPID)
    pub upid: String,
    /// `running` or `stopped`
    pub status: String,
    /// Exit status once stopped; `OK` on success
    #[serde(rename = "exitstatus", default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<String>,
    /// Node running the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Task type, e.g. `qmclone`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    /// Subject of the task, usually a VM id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// User that started the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Worker process id
    #[serde(
        default,
        deserialize_with = "int_or_string::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub pid: Option<i64>,
    /// Start time in Unix seconds
    #[serde(
        default,
        deserialize_with = "int_or_string::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub starttime: Option<i64>,
}

impl TaskSummary {
    /// Returns true once the task has finished, successfully or not.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.status == "stopped"
    }

    /// Returns true if the task stopped with exit status `OK`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.is_stopped() && self.exit_status.as_deref() == Some("OK")
    }

    /// Start time as a UTC timestamp.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.starttime
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}
