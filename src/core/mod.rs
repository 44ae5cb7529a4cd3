//! Core data model shared by the pool, pipeline and splitting layers

pub mod connection;

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Connection properties handed through to the driver and pool configurator
pub type Properties = BTreeMap<String, String>;

/// Role of a cluster node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostRole {
    Writer,
    Reader,
}

impl fmt::Display for HostRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostRole::Writer => write!(f, "WRITER"),
            HostRole::Reader => write!(f, "READER"),
        }
    }
}

/// Describes one database node.
///
/// Two specs are equal when they point at the same network location
/// (host and port); the role is not part of the identity.
#[derive(Debug, Clone)]
pub struct HostSpec {
    host: String,
    port: Option<u16>,
    role: HostRole,
}

impl HostSpec {
    pub fn new(host: impl Into<String>, port: Option<u16>, role: HostRole) -> Self {
        Self {
            host: host.into(),
            port,
            role,
        }
    }

    pub fn writer(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, Some(port), HostRole::Writer)
    }

    pub fn reader(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, Some(port), HostRole::Reader)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn role(&self) -> HostRole {
        self.role
    }

    pub fn is_writer(&self) -> bool {
        self.role == HostRole::Writer
    }

    pub fn is_reader(&self) -> bool {
        self.role == HostRole::Reader
    }

    /// Copy of this spec with a different role
    pub fn with_role(&self, role: HostRole) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            role,
        }
    }

    /// Canonical URL, used as the default pool key
    pub fn url(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}/", self.host, port),
            None => format!("{}/", self.host),
        }
    }
}

impl PartialEq for HostSpec {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for HostSpec {}

impl Hash for HostSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{} ({})", self.host, port, self.role),
            None => write!(f, "{} ({})", self.host, self.role),
        }
    }
}

/// Ordered list of known nodes; index 0 is conventionally the writer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    hosts: Vec<HostSpec>,
}

impl Topology {
    pub fn new(hosts: Vec<HostSpec>) -> Self {
        Self { hosts }
    }

    pub fn hosts(&self) -> &[HostSpec] {
        &self.hosts
    }

    pub fn writer(&self) -> Option<&HostSpec> {
        self.hosts.iter().find(|h| h.is_writer())
    }

    pub fn readers(&self) -> Vec<HostSpec> {
        self.hosts.iter().filter(|h| h.is_reader()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// A topology with a single node has no separate reader
    pub fn is_single_host(&self) -> bool {
        self.hosts.len() == 1
    }
}

impl From<Vec<HostSpec>> for Topology {
    fn from(hosts: Vec<HostSpec>) -> Self {
        Self::new(hosts)
    }
}
