use crate::span::Tag;
use std::net::{IpAddr, ToSocketAddrs};

pub const CLIENT_VERSION_TAG_KEY: &str = "jaeger.version";
pub const HOSTNAME_TAG_KEY: &str = "hostname";
pub const PROCESS_IP_TAG_KEY: &str = "ip";

/// Host metadata captured once at exporter construction.
///
/// Collected a single time and injected, so tests can pass a fixed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    pub client_version: String,
    pub hostname: String,
    pub ip: Option<IpAddr>,
}

impl EnvironmentSnapshot {
    /// Queries the host for its name and address.
    pub fn collect() -> Self {
        let hostname = sys_info::hostname().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "hostname lookup failed");
            "unknown".to_string()
        });
        let ip = resolve_ip(&hostname);
        Self {
            client_version: format!("Rust-{}", env!("CARGO_PKG_VERSION")),
            hostname,
            ip,
        }
    }

    /// Builds a snapshot from known values.
    pub fn fixed(client_version: &str, hostname: &str, ip: Option<IpAddr>) -> Self {
        Self {
            client_version: client_version.to_string(),
            hostname: hostname.to_string(),
            ip,
        }
    }

    /// Host tags, in the order they lead the process tag list.
    pub fn tags(&self) -> Vec<Tag> {
        let mut tags = vec![
            Tag::new(CLIENT_VERSION_TAG_KEY, self.client_version.as_str()),
            Tag::new(HOSTNAME_TAG_KEY, self.hostname.as_str()),
        ];
        if let Some(ip) = self.ip {
            tags.push(Tag::new(PROCESS_IP_TAG_KEY, ip.to_string()));
        }
        tags
    }

    /// Host tags followed by the user's tags.
    pub fn merge_tags(&self, user_tags: &[Tag]) -> Vec<Tag> {
        let mut tags = self.tags();
        tags.extend(user_tags.iter().cloned());
        tags
    }
}

// First non-loopback address the hostname resolves to, IPv4 preferred.
fn resolve_ip(hostname: &str) -> Option<IpAddr> {
    let addrs: Vec<IpAddr> = (hostname, 0)
        .to_socket_addrs()
        .ok()?
        .map(|a| a.ip())
        .filter(|ip| !ip.is_loopback())
        .collect();
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}
