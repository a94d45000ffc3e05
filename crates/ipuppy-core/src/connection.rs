//! Kernel connection file.
//!
//! The kernel writes this JSON document once it has bound its sockets. It is
//! read once and never mutated afterwards.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kernel channels a client can connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Request/reply channel.
    Shell,
    /// Broadcast channel for outputs and status.
    Iopub,
    /// Input requests from the kernel.
    Stdin,
    /// Shutdown and interrupt requests.
    Control,
    /// Heartbeat echo.
    Heartbeat,
}

/// Transport addresses and signing key of a running kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Address the kernel bound to.
    pub ip: String,
    /// `tcp` or `ipc`.
    #[serde(default = "default_transport")]
    pub transport: String,
    pub shell_port: u16,
    pub iopub_port: u16,
    pub stdin_port: u16,
    pub control_port: u16,
    pub hb_port: u16,
    /// HMAC key. Empty disables signing.
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_signature_scheme")]
    pub signature_scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_name: Option<String>,
}

fn default_transport() -> String {
    "tcp".to_string()
}

fn default_signature_scheme() -> String {
    "hmac-sha256".to_string()
}

impl ConnectionInfo {
    /// Parse a connection file.
    ///
    /// A file that exists but is not yet a complete document yields
    /// `Error::ConnectionFile`, so callers polling for it can retry.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let info: Self = serde_json::from_str(&text).map_err(|e| Error::ConnectionFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if info.signature_scheme != "hmac-sha256" {
            return Err(Error::ConnectionFile {
                path: path.to_path_buf(),
                message: format!("unsupported signature scheme '{}'", info.signature_scheme),
            });
        }

        Ok(info)
    }

    /// Port for a channel.
    pub fn port(&self, channel: Channel) -> u16 {
        match channel {
            Channel::Shell => self.shell_port,
            Channel::Iopub => self.iopub_port,
            Channel::Stdin => self.stdin_port,
            Channel::Control => self.control_port,
            Channel::Heartbeat => self.hb_port,
        }
    }

    /// ZeroMQ endpoint for a channel, e.g. `tcp://127.0.0.1:5555`.
    ///
    /// With the `ipc` transport the port is appended to the path, as Jupyter does.
    pub fn endpoint(&self, channel: Channel) -> String {
        let port = self.port(channel);
        if self.transport == "ipc" {
            format!("ipc://{}-{}", self.ip, port)
        } else {
            format!("{}://{}:{}", self.transport, self.ip, port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"{
        "shell_port": 53794,
        "iopub_port": 53795,
        "stdin_port": 53796,
        "control_port": 53797,
        "hb_port": 53798,
        "ip": "127.0.0.1",
        "key": "a0436f6c-1916-498b-8eb9-e81ab9368e84",
        "transport": "tcp",
        "signature_scheme": "hmac-sha256",
        "kernel_name": ""
    }"#;

    #[test]
    fn test_parse_ipykernel_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kernel.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let info = ConnectionInfo::from_file(&path).unwrap();
        assert_eq!(info.shell_port, 53794);
        assert_eq!(info.key, "a0436f6c-1916-498b-8eb9-e81ab9368e84");
        assert_eq!(info.endpoint(Channel::Shell), "tcp://127.0.0.1:53794");
        assert_eq!(info.endpoint(Channel::Iopub), "tcp://127.0.0.1:53795");
    }

    #[test]
    fn test_partial_file_is_connection_file_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kernel.json");
        std::fs::write(&path, &SAMPLE[..40]).unwrap();

        let err = ConnectionInfo::from_file(&path).unwrap_err();
        assert!(matches!(err, Error::ConnectionFile { .. }));
    }

    #[test]
    fn test_rejects_unknown_signature_scheme() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kernel.json");
        std::fs::write(&path, SAMPLE.replace("hmac-sha256", "hmac-md5")).unwrap();

        let err = ConnectionInfo::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("hmac-md5"));
    }

    #[test]
    fn test_ipc_endpoint() {
        let info: ConnectionInfo = serde_json::from_str(
            &SAMPLE
                .replace("\"tcp\"", "\"ipc\"")
                .replace("127.0.0.1", "/tmp/kernel-ipc"),
        )
        .unwrap();
        assert_eq!(info.endpoint(Channel::Shell), "ipc:///tmp/kernel-ipc-53794");
    }
}
