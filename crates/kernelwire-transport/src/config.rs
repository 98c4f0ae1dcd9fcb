use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::endpoint::endpoint;
use crate::error::{Result, TransportError};

/// The five sockets a kernel exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    Control,
    Shell,
    Stdin,
    Iopub,
    Heartbeat,
}

impl PortKind {
    /// All kinds in connection-file order.
    pub const ALL: [PortKind; 5] = [
        PortKind::Control,
        PortKind::Shell,
        PortKind::Stdin,
        PortKind::Iopub,
        PortKind::Heartbeat,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PortKind::Control => "control",
            PortKind::Shell => "shell",
            PortKind::Stdin => "stdin",
            PortKind::Iopub => "iopub",
            PortKind::Heartbeat => "hb",
        }
    }
}

/// Parsed Jupyter connection file.
///
/// Ports left at 0 are negotiated when the kernel binds; the server writes the
/// resolved values back so the file handed to clients is always complete.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default)]
    pub control_port: u16,
    #[serde(default)]
    pub shell_port: u16,
    #[serde(default)]
    pub stdin_port: u16,
    #[serde(default)]
    pub iopub_port: u16,
    #[serde(default)]
    pub hb_port: u16,
    #[serde(default = "default_signature_scheme")]
    pub signature_scheme: String,
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_name: Option<String>,
}

fn default_transport() -> String {
    "tcp".to_string()
}

fn default_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_signature_scheme() -> String {
    "hmac-sha256".to_string()
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            ip: default_ip(),
            control_port: 0,
            shell_port: 0,
            stdin_port: 0,
            iopub_port: 0,
            hb_port: 0,
            signature_scheme: default_signature_scheme(),
            key: String::new(),
            kernel_name: None,
        }
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("transport", &self.transport)
            .field("ip", &self.ip)
            .field("control_port", &self.control_port)
            .field("shell_port", &self.shell_port)
            .field("stdin_port", &self.stdin_port)
            .field("iopub_port", &self.iopub_port)
            .field("hb_port", &self.hb_port)
            .field("signature_scheme", &self.signature_scheme)
            .field("key", &if self.key.is_empty() { "" } else { "<redacted>" })
            .field("kernel_name", &self.kernel_name)
            .finish()
    }
}

impl ConnectionInfo {
    /// Parse connection info from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a connection file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| {
            TransportError::ConnectionFile {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_json(&text)
    }

    /// Write the connection file (pretty JSON).
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = self.to_json_pretty()?;
        std::fs::write(path, text).map_err(|source| TransportError::ConnectionFile {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn port(&self, kind: PortKind) -> u16 {
        match kind {
            PortKind::Control => self.control_port,
            PortKind::Shell => self.shell_port,
            PortKind::Stdin => self.stdin_port,
            PortKind::Iopub => self.iopub_port,
            PortKind::Heartbeat => self.hb_port,
        }
    }

    pub fn set_port(&mut self, kind: PortKind, port: u16) {
        match kind {
            PortKind::Control => self.control_port = port,
            PortKind::Shell => self.shell_port = port,
            PortKind::Stdin => self.stdin_port = port,
            PortKind::Iopub => self.iopub_port = port,
            PortKind::Heartbeat => self.hb_port = port,
        }
    }

    /// External endpoint of one channel.
    pub fn endpoint(&self, kind: PortKind) -> String {
        endpoint(&self.transport, &self.ip, self.port(kind))
    }
}
