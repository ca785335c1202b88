//! Control-plane data types and error definitions.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A single registered service instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Instance {
    /// Identity key used for diffing.
    pub id: String,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub version: String,
    pub weight: u32,
    pub healthy: bool,
    pub isolated: bool,
    pub metadata: HashMap<String, String>,
}

impl Instance {
    /// Create a healthy instance with the given identity and address.
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            weight: 100,
            healthy: true,
            ..Self::default()
        }
    }
}

/// Health breakdown of an instance set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstanceSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub isolated: usize,
}

impl InstanceSummary {
    /// Count healthy, unhealthy and isolated instances.
    ///
    /// Isolated instances are counted only as isolated, never as healthy or
    /// unhealthy.
    pub fn from_instances(instances: &[Instance]) -> Self {
        let mut summary = Self {
            total: instances.len(),
            ..Self::default()
        };
        for instance in instances {
            if instance.isolated {
                summary.isolated += 1;
            } else if instance.healthy {
                summary.healthy += 1;
            } else {
                summary.unhealthy += 1;
            }
        }
        summary
    }
}

/// A configuration file as last seen on the control plane.
///
/// `present` distinguishes a deleted file from a file with empty content.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigSnapshot {
    pub namespace: String,
    pub group: String,
    pub file_name: String,
    pub content: String,
    pub present: bool,
}

impl ConfigSnapshot {
    /// A file that exists with the given content.
    pub fn present(
        namespace: impl Into<String>,
        group: impl Into<String>,
        file_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            group: group.into(),
            file_name: file_name.into(),
            content: content.into(),
            present: true,
        }
    }

    /// A file that does not exist (or was deleted).
    pub fn absent(
        namespace: impl Into<String>,
        group: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            group: group.into(),
            file_name: file_name.into(),
            content: String::new(),
            present: false,
        }
    }

    /// True when the file exists and carries non-empty content.
    pub fn has_content(&self) -> bool {
        self.present && !self.content.is_empty()
    }
}

/// Subscription key for a service watch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub service: String,
    pub namespace: String,
}

impl ServiceKey {
    pub fn new(service: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.service)
    }
}

/// Subscription key for a configuration file watch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigKey {
    pub file_name: String,
    pub group: String,
    pub namespace: String,
}

impl ConfigKey {
    pub fn new(
        file_name: impl Into<String>,
        group: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            group: group.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.group, self.file_name)
    }
}

/// Errors returned by a control-plane client.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The control plane could not be reached or answered with a server error.
    #[error("control plane unavailable: {0}")]
    Unavailable(String),

    /// The request did not complete within the client's deadline.
    #[error("control plane request timed out after {0:?}")]
    Timeout(Duration),

    /// The request was refused (bad arguments, permissions). Retrying will not help.
    #[error("control plane rejected request: {0}")]
    Rejected(String),
}

impl FetchError {
    /// Whether the retry manager should try again after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Rejected(_))
    }
}
