//! Utility functions and helpers

use std::net::IpAddr;

/// What kind of endpoint a host name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlType {
    /// A single concrete node
    Instance,
    /// Cluster writer endpoint; resolves to whichever node is the writer
    Cluster,
    /// Cluster reader endpoint; resolves to any reader
    ReaderCluster,
    /// Custom cluster endpoint over a subset of nodes
    CustomCluster,
    /// Raw IP address; the node behind it is unknown until queried
    IpAddress,
}

impl UrlType {
    /// Whether the endpoint pins one node
    pub fn is_instance(&self) -> bool {
        matches!(self, UrlType::Instance)
    }

    /// Whether the concrete node must be queried after connecting
    pub fn needs_identification(&self) -> bool {
        !self.is_instance()
    }
}

/// Classify a host name by the DNS conventions of managed clusters.
///
/// Names are matched on their second label, e.g.
/// `my-db.cluster-ro-xyz.us-east-2.rds.amazonaws.com` is a reader cluster.
pub fn identify_url_type(host: &str) -> UrlType {
    let host = host.trim();
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        return UrlType::IpAddress;
    }

    let label = host
        .split('.')
        .nth(1)
        .map(|l| l.to_ascii_lowercase())
        .unwrap_or_default();

    if label.starts_with("cluster-ro-") {
        UrlType::ReaderCluster
    } else if label.starts_with("cluster-custom-") {
        UrlType::CustomCluster
    } else if label.starts_with("cluster-") {
        UrlType::Cluster
    } else {
        UrlType::Instance
    }
}

/// Format duration for human-readable output
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 && duration.as_millis() > 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
