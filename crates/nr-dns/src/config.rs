use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::DnsError;

/// How dynamic updates reach the authoritative server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsUpdateConfig {
    /// Primary server to send updates to. Without one, nsupdate picks the
    /// MNAME of the zone's SOA.
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub tsig: Option<TsigKey>,
    #[serde(default = "default_nsupdate_path")]
    pub nsupdate_path: String,
}

/// TSIG key given as `name:secret`. The name may carry an algorithm
/// prefix (`hmac-sha256:name:secret`), as nsupdate's `key` directive accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsigKey {
    pub name: String,
    pub secret: String,
}

impl FromStr for TsigKey {
    type Err = DnsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((name, secret)) if !name.is_empty() && !secret.is_empty() => Ok(Self {
                name: name.to_string(),
                secret: secret.to_string(),
            }),
            _ => Err(DnsError::Config(
                "Invalid TSIG key: name or key missing".to_string(),
            )),
        }
    }
}

/// Polling policy for nameserver propagation checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// Server asked for the zone's SOA/NS when no update server is set.
    #[serde(default = "default_resolver")]
    pub resolver: String,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,
}

impl PropagationConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

fn default_nsupdate_path() -> String {
    "nsupdate".to_string()
}
fn default_resolver() -> String {
    "1.1.1.1".to_string()
}
fn default_check_interval() -> u64 {
    5
}
fn default_timeout() -> u64 {
    120
}
fn default_query_timeout() -> u64 {
    3000
}

impl Default for DnsUpdateConfig {
    fn default() -> Self {
        Self {
            server: None,
            tsig: None,
            nsupdate_path: default_nsupdate_path(),
        }
    }
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            resolver: default_resolver(),
            check_interval_secs: default_check_interval(),
            timeout_secs: default_timeout(),
            query_timeout_ms: default_query_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_propagation_config() {
        let config = PropagationConfig::default();
        assert_eq!(config.check_interval(), Duration::from_secs(5));
        assert_eq!(config.timeout(), Duration::from_secs(120));
        assert_eq!(config.resolver, "1.1.1.1");
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{ "server": "ns0.example.com" }"#;
        let config: DnsUpdateConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.server.as_deref(), Some("ns0.example.com"));
        assert_eq!(config.nsupdate_path, "nsupdate");
        assert!(config.tsig.is_none());
    }

    #[test]
    fn test_tsig_parse() {
        let key: TsigKey = "hmac-sha256:update-key:c2VjcmV0".parse().unwrap();
        assert_eq!(key.name, "hmac-sha256:update-key");
        assert_eq!(key.secret, "c2VjcmV0");

        assert!("nokey".parse::<TsigKey>().is_err());
        assert!(":secret".parse::<TsigKey>().is_err());
    }
}
