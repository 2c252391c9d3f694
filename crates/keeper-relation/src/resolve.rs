//! Host name resolution for published endpoints.
//!
//! Turns this unit's bound address into the host name clients should use.
//! The chain stops at the first link with an answer:
//! 1. **Overrides** — `[exchange] host-overrides` from the config
//! 2. **`/etc/hosts`** — first host name listed for the address
//! 3. **System reverse DNS** — a PTR query using `/etc/resolv.conf`
//!
//! When nothing answers, the address itself is returned.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::net::IpAddr;

use tracing::{debug, warn};
use trust_dns_resolver::TokioAsyncResolver;

use keeper_core::ExchangeConfig;

/// Maps an address to the host name published for it.
pub trait HostResolver {
    fn resolve_host(&self, address: &str) -> impl Future<Output = String> + Send;
}

/// Parsed `/etc/hosts`, indexed by address.
#[derive(Clone, Debug, Default)]
pub struct ReverseHosts {
    entries: HashMap<IpAddr, String>,
}

impl ReverseHosts {
    /// Parse `/etc/hosts`-format content. The first name on the first line
    /// that lists an address wins.
    pub fn parse(content: &str) -> Self {
        let mut entries = HashMap::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.split_whitespace();
            let Some(ip_str) = parts.next() else {
                continue;
            };
            let Ok(ip) = ip_str.parse::<IpAddr>() else {
                debug!(line = %line, "skipping /etc/hosts line with invalid IP");
                continue;
            };
            if let Some(name) = parts.next().filter(|name| !name.starts_with('#')) {
                entries.entry(ip).or_insert_with(|| name.to_lowercase());
            }
        }

        Self { entries }
    }

    pub fn lookup(&self, ip: &IpAddr) -> Option<&str> {
        self.entries.get(ip).map(String::as_str)
    }
}

/// The resolver the daemon uses.
#[derive(Clone, Debug, Default)]
pub struct SystemResolver {
    overrides: BTreeMap<String, String>,
    hosts: ReverseHosts,
    system_dns: bool,
}

impl SystemResolver {
    pub fn new(overrides: BTreeMap<String, String>, hosts_content: &str) -> Self {
        Self {
            overrides,
            hosts: ReverseHosts::parse(hosts_content),
            system_dns: true,
        }
    }

    /// Overrides from the config plus the local `/etc/hosts`.
    pub fn from_config(config: &ExchangeConfig) -> Self {
        let hosts = std::fs::read_to_string("/etc/hosts").unwrap_or_default();
        Self::new(config.host_overrides.clone(), &hosts)
    }

    /// Skip the system reverse lookup.
    pub fn without_system_dns(mut self) -> Self {
        self.system_dns = false;
        self
    }
}

impl HostResolver for SystemResolver {
    async fn resolve_host(&self, address: &str) -> String {
        if let Some(name) = self.overrides.get(address) {
            debug!(%address, %name, source = "override", "host resolved");
            return name.clone();
        }

        let Ok(ip) = address.parse::<IpAddr>() else {
            // Already a name.
            return address.to_string();
        };

        if let Some(name) = self.hosts.lookup(&ip) {
            debug!(%address, %name, source = "etc_hosts", "host resolved");
            return name.to_string();
        }

        if self.system_dns
            && let Some(name) = reverse_lookup(ip).await
        {
            debug!(%address, %name, source = "system_dns", "host resolved");
            return name;
        }

        warn!(%address, "no host name for address, publishing the address");
        address.to_string()
    }
}

/// Reverse lookup through the system's DNS configuration. `None` if no
/// PTR record names the address.
async fn reverse_lookup(ip: IpAddr) -> Option<String> {
    let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
        Ok(resolver) => resolver,
        Err(e) => {
            debug!(%ip, error = %e, "no system resolver configuration");
            return None;
        }
    };
    match resolver.reverse_lookup(ip).await {
        Ok(lookup) => lookup
            .iter()
            .next()
            .map(|name| name.to_string().trim_end_matches('.').to_string())
            .filter(|name| !name.is_empty()),
        Err(e) => {
            debug!(%ip, error = %e, "reverse lookup found no name");
            None
        }
    }
}

/// This machine's host name, used when no bind address is configured.
pub fn local_hostname() -> Option<String> {
    let name = hostname::get().ok()?.to_string_lossy().into_owned();
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOSTS: &str = "\
# static table
127.0.0.1   localhost
10.1.0.5    zk-0.cluster.local zk-0   # primary
10.1.0.5    other-name
fe80::1     zk-v6.cluster.local
not-an-ip   bogus
";

    // ── ReverseHosts ───────────────────────────────────────────────

    #[test]
    fn parse_takes_first_name_for_address() {
        let hosts = ReverseHosts::parse(HOSTS);
        let ip: IpAddr = "10.1.0.5".parse().unwrap();
        assert_eq!(hosts.lookup(&ip), Some("zk-0.cluster.local"));
    }

    #[test]
    fn parse_handles_ipv6_and_skips_invalid_lines() {
        let hosts = ReverseHosts::parse(HOSTS);
        let v6: IpAddr = "fe80::1".parse().unwrap();
        assert_eq!(hosts.lookup(&v6), Some("zk-v6.cluster.local"));
        assert_eq!(hosts.entries.len(), 3);
    }

    #[test]
    fn parse_empty_content() {
        let hosts = ReverseHosts::parse("");
        assert!(hosts.lookup(&"127.0.0.1".parse().unwrap()).is_none());
    }

    // ── SystemResolver ─────────────────────────────────────────────

    #[tokio::test]
    async fn overrides_take_priority() {
        let mut overrides = BTreeMap::new();
        overrides.insert("10.1.0.5".to_string(), "zk-public.example".to_string());
        let resolver = SystemResolver::new(overrides, HOSTS).without_system_dns();
        assert_eq!(resolver.resolve_host("10.1.0.5").await, "zk-public.example");
    }

    #[tokio::test]
    async fn etc_hosts_used_before_system_dns() {
        let resolver = SystemResolver::new(BTreeMap::new(), HOSTS).without_system_dns();
        assert_eq!(resolver.resolve_host("10.1.0.5").await, "zk-0.cluster.local");
    }

    #[tokio::test]
    async fn unknown_address_falls_back_to_literal() {
        let resolver = SystemResolver::new(BTreeMap::new(), HOSTS).without_system_dns();
        assert_eq!(resolver.resolve_host("192.0.2.44").await, "192.0.2.44");
    }

    #[tokio::test]
    async fn names_pass_through() {
        let resolver = SystemResolver::default();
        assert_eq!(resolver.resolve_host("zk-0.example").await, "zk-0.example");
    }

    #[test]
    fn local_hostname_is_not_empty() {
        if let Some(name) = local_hostname() {
            assert!(!name.is_empty());
        }
    }

    #[tokio::test]
    async fn system_lookup_returns_something_for_loopback() {
        let resolver = SystemResolver::new(BTreeMap::new(), "");
        // Either a real name or the literal, never empty.
        assert!(!resolver.resolve_host("127.0.0.1").await.is_empty());
    }
}
