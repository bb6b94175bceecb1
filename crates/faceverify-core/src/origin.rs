//! Where the user is, relative to the camera.
//!
//! A session driven from another machine (over SSH) would open a camera the
//! user is not sitting in front of, so camera capture is only offered on a
//! local origin unless the user explicitly asks to try anyway.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessOrigin {
    Local,
    Remote { host: String },
}

impl AccessOrigin {
    /// Classify a host name or address.
    pub fn classify(host: &str) -> Self {
        if is_local_host(host) {
            AccessOrigin::Local
        } else {
            AccessOrigin::Remote {
                host: host.to_string(),
            }
        }
    }

    /// Detect the origin of the current terminal session from the SSH
    /// environment (`SSH_CONNECTION`, then `SSH_CLIENT`).
    pub fn detect() -> Self {
        let ssh = std::env::var("SSH_CONNECTION")
            .or_else(|_| std::env::var("SSH_CLIENT"))
            .ok();
        Self::from_ssh_env(ssh.as_deref())
    }

    /// Both SSH variables start with the client address.
    pub fn from_ssh_env(value: Option<&str>) -> Self {
        match value.and_then(|v| v.split_whitespace().next()) {
            Some(client) => Self::classify(client),
            None => AccessOrigin::Local,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, AccessOrigin::Local)
    }
}

impl fmt::Display for AccessOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessOrigin::Local => f.write_str("local access"),
            AccessOrigin::Remote { host } => write!(f, "remote access ({host})"),
        }
    }
}

fn is_local_host(host: &str) -> bool {
    host.contains("localhost") || host.contains("127.0.0.1") || host == "::1"
}
