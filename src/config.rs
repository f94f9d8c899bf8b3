use std::{env, net::SocketAddr, time::Duration};

use anyhow::Result;

pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://data.openfacet.net/";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub upstream_base_url: String,
    pub cache_ttl_seconds: u64,
    pub upstream_timeout_seconds: u64,
    pub log_payloads: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_raw = lookup("DIAMOND_MCP_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_normalized = bind_raw
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .to_string();
        let mut bind_addr = bind_normalized
            .parse::<SocketAddr>()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 3000)));

        if let Some(port) = lookup("PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
            bind_addr.set_port(port);
        }

        let upstream_base_url = lookup("DIAMOND_MCP_UPSTREAM_BASE_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_UPSTREAM_BASE_URL.to_string());

        let cache_ttl_seconds = lookup("DIAMOND_MCP_CACHE_TTL_SECONDS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(24 * 60 * 60);

        let upstream_timeout_seconds = lookup("DIAMOND_MCP_UPSTREAM_TIMEOUT_SECONDS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(30);

        let log_payloads = lookup("DIAMOND_MCP_LOG_PAYLOADS")
            .map(|v| {
                matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
            .unwrap_or(false);

        Ok(Self {
            bind_addr,
            upstream_base_url,
            cache_ttl_seconds,
            upstream_timeout_seconds,
            log_payloads,
        })
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_seconds)
    }
}
