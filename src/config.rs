use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::transport::DNS_PORT;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// "ip" (port 53) or "ip:port"
    #[serde(default)]
    pub nameservers: Vec<String>,
    /// resolv.conf-style file whose `nameserver` lines are appended
    #[serde(default)]
    pub resolv_conf: Option<String>,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub overrides: OverridesConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    /// Concurrent distinct-name lookups on the wire before new ones queue
    #[serde(default = "default_max_waiting")]
    pub max_waiting: usize,
    /// Per-transaction wait for a matching response
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Deadline on the cached result of one resolution
    #[serde(default = "default_resolution_timeout_ms")]
    pub resolution_timeout_ms: u64,
    /// How long a network result (or failure) stays cached
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: i64,
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,
    /// Take MX exchange addresses from the additional section instead of
    /// issuing A lookups for them
    #[serde(default)]
    pub use_additional_hints: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct OverridesConfig {
    /// Static MX override file (see `overrides`)
    pub mx_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogConfig {
    #[serde(default)]
    pub verbose: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_waiting: default_max_waiting(),
            query_timeout_ms: default_query_timeout_ms(),
            resolution_timeout_ms: default_resolution_timeout_ms(),
            cache_ttl_secs: default_cache_ttl(),
            bind_address: default_bind_address(),
            use_additional_hints: false,
        }
    }
}

impl ResolverConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_millis(self.resolution_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_waiting == 0 {
            return Err(anyhow::anyhow!("resolver.max_waiting must be at least 1"));
        }
        Ok(())
    }
}

// Default value functions
fn default_max_waiting() -> usize { 20 }
fn default_query_timeout_ms() -> u64 { 10_000 }
fn default_resolution_timeout_ms() -> u64 { 5_000 }
fn default_cache_ttl() -> i64 { 300 }
fn default_bind_address() -> SocketAddr { SocketAddr::from(([0, 0, 0, 0], 0)) }

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
        Self::parse(&content).map_err(|e| anyhow::anyhow!("Failed to parse config '{}': {}", path, e))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.resolver.validate()?;
        Ok(config)
    }

    /// Configured nameservers followed by those from `resolv_conf`, deduplicated
    pub fn nameserver_addrs(&self) -> anyhow::Result<Vec<SocketAddr>> {
        let mut addrs = Vec::new();
        for ns in &self.nameservers {
            push_unique(&mut addrs, parse_nameserver(ns)?);
        }
        if let Some(path) = &self.resolv_conf {
            let content = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("Failed to read resolver config '{}': {}", path, e))?;
            for addr in parse_resolv_conf(&content)? {
                push_unique(&mut addrs, addr);
            }
        }
        Ok(addrs)
    }
}

fn push_unique(addrs: &mut Vec<SocketAddr>, addr: SocketAddr) {
    if !addrs.contains(&addr) {
        addrs.push(addr);
    }
}

/// "192.0.2.1" -> 192.0.2.1:53, "192.0.2.1:5353" kept as is
pub fn parse_nameserver(s: &str) -> anyhow::Result<SocketAddr> {
    let s = s.trim();
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let ip: IpAddr = s
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid nameserver address '{}': {}", s, e))?;
    Ok(SocketAddr::new(ip, DNS_PORT))
}

/// Addresses from `nameserver <addr> [<addr>...]` lines; everything else is ignored
pub fn parse_resolv_conf(content: &str) -> anyhow::Result<Vec<SocketAddr>> {
    let mut addrs = Vec::new();
    for line in content.lines() {
        let mut words = line.split_whitespace();
        if words.next() != Some("nameserver") {
            continue;
        }
        for word in words {
            push_unique(&mut addrs, parse_nameserver(word)?);
        }
    }
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.resolver.max_waiting, 20);
        assert_eq!(config.resolver.query_timeout(), Duration::from_secs(10));
        assert_eq!(config.resolver.resolution_timeout(), Duration::from_secs(5));
        assert_eq!(config.resolver.cache_ttl_secs, 300);
        assert!(!config.resolver.use_additional_hints);
        assert!(!config.log.verbose);
    }

    #[test]
    fn test_parse_sections() {
        let config = Config::parse(
            r#"
            nameservers = ["192.0.2.1", "192.0.2.2:5353", "192.0.2.1"]

            [resolver]
            max_waiting = 4
            query_timeout_ms = 250

            [overrides]
            mx_file = "local-mx.txt"

            [log]
            verbose = true
            "#,
        )
        .unwrap();
        assert_eq!(config.resolver.max_waiting, 4);
        assert_eq!(config.resolver.query_timeout(), Duration::from_millis(250));
        assert_eq!(config.overrides.mx_file.as_deref(), Some("local-mx.txt"));
        assert!(config.log.verbose);
        assert_eq!(
            config.nameserver_addrs().unwrap(),
            vec![
                "192.0.2.1:53".parse::<SocketAddr>().unwrap(),
                "192.0.2.2:5353".parse().unwrap()
            ]
        );
    }

    #[test]
    fn test_zero_max_waiting_rejected() {
        assert!(Config::parse("[resolver]\nmax_waiting = 0\n").is_err());
    }

    #[test]
    fn test_resolv_conf_lines() {
        let addrs = parse_resolv_conf(
            "# comment\nsearch example.com\nnameserver 192.0.2.53\nnameserver 192.0.2.54  2001:db8::1\n",
        )
        .unwrap();
        assert_eq!(addrs.len(), 3);
        assert_eq!(addrs[0], "192.0.2.53:53".parse().unwrap());
        assert_eq!(addrs[2], "[2001:db8::1]:53".parse().unwrap());
    }

    #[test]
    fn test_bad_nameserver() {
        assert!(parse_nameserver("not-an-ip").is_err());
    }
}
