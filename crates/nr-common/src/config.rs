use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings read from `NSRENEW_*` environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Certificate domains, the first one names the live/archive slots
    pub domains: Vec<String>,
    /// ACME account contact address
    pub contact: Option<String>,
    /// ACME directory URL
    pub endpoint: String,
    pub data_dir: PathBuf,
    /// `dns-01` or `http-01`
    pub method: String,
    pub webroot: Option<PathBuf>,
    /// Primary nameserver receiving the updates
    pub master: Option<String>,
    /// `name:secret` TSIG key for the updates
    pub tsig: Option<String>,
    pub txt_ttl: u32,
    pub keep: bool,
    pub force: bool,
    pub tlsa: bool,
    /// `443` or `host+host:port` entries
    pub tlsa_ports: Vec<String>,
    pub tlsa_ttl: u32,
    pub renewal_days: u32,
    pub nsupdate: String,
    /// Used for zone discovery when no master is set
    pub resolver: String,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            contact: None,
            endpoint: "https://acme-staging-v02.api.letsencrypt.org/directory".to_string(),
            data_dir: PathBuf::from("/etc/letsencrypt"),
            method: "dns-01".to_string(),
            webroot: None,
            master: None,
            tsig: None,
            txt_ttl: 60,
            keep: false,
            force: false,
            tlsa: true,
            tlsa_ports: vec!["443".to_string()],
            tlsa_ttl: 3600,
            renewal_days: 30,
            nsupdate: "nsupdate".to_string(),
            resolver: "1.1.1.1".to_string(),
        }
    }
}

fn list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn flag(value: &str) -> bool {
    value == "1" || value.to_lowercase() == "true"
}

impl EnvConfig {
    /// Read the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparseable numbers keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = lookup("NSRENEW_DOMAINS") {
            config.domains = list(&v);
        }
        if let Some(v) = lookup("NSRENEW_CONTACT") {
            config.contact = Some(v.trim().to_string()).filter(|c| !c.is_empty());
        }
        if let Some(v) = lookup("NSRENEW_ENDPOINT") {
            config.endpoint = v;
        }
        if let Some(v) = lookup("NSRENEW_DATADIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("NSRENEW_METHOD") {
            config.method = v.trim().to_lowercase();
        }
        if let Some(v) = lookup("NSRENEW_WEBROOT") {
            config.webroot = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("NSRENEW_MASTER") {
            config.master = Some(v);
        }
        if let Some(v) = lookup("NSRENEW_TSIG") {
            config.tsig = Some(v);
        }
        if let Some(v) = lookup("NSRENEW_TXT_TTL") {
            if let Ok(ttl) = v.parse() {
                config.txt_ttl = ttl;
            }
        }
        if let Some(v) = lookup("NSRENEW_KEEP") {
            config.keep = flag(&v);
        }
        if let Some(v) = lookup("NSRENEW_FORCE") {
            config.force = flag(&v);
        }
        if let Some(v) = lookup("NSRENEW_TLSA") {
            config.tlsa = v.to_lowercase() != "false" && v != "0";
        }
        if let Some(v) = lookup("NSRENEW_TLSA_PORTS") {
            config.tlsa_ports = list(&v);
        }
        if let Some(v) = lookup("NSRENEW_TLSA_TTL") {
            if let Ok(ttl) = v.parse() {
                config.tlsa_ttl = ttl;
            }
        }
        if let Some(v) = lookup("NSRENEW_RENEWAL_DAYS") {
            if let Ok(days) = v.parse() {
                config.renewal_days = days;
            }
        }
        if let Some(v) = lookup("NSRENEW_NSUPDATE") {
            config.nsupdate = v;
        }
        if let Some(v) = lookup("NSRENEW_RESOLVER") {
            config.resolver = v;
        }

        config
    }

    /// Load the `.env` file (explicit path, else `/etc/nsrenew/.env`, else
    /// `./.env`), then the environment. Variables already set win.
    pub fn load(env_file: Option<&Path>) -> Self {
        if let Some(path) = env_file {
            load_dotenv(path);
        } else {
            let candidates = [PathBuf::from("/etc/nsrenew/.env"), PathBuf::from(".env")];
            for candidate in &candidates {
                if candidate.exists() {
                    load_dotenv(candidate);
                    break;
                }
            }
        }

        Self::from_env()
    }

    /// DNS updates are needed for DNS-01 challenges and TLSA publishing.
    pub fn needs_dns_updates(&self) -> bool {
        self.method == "dns-01" || self.tlsa
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.domains.is_empty() {
            return Err(AppError::Config("NSRENEW_DOMAINS lists no domain".into()));
        }
        if self.contact.is_none() {
            return Err(AppError::Config("NSRENEW_CONTACT is not set".into()));
        }
        match self.method.as_str() {
            "dns-01" => {}
            "http-01" => {
                if self.webroot.is_none() {
                    return Err(AppError::Config("http-01 needs NSRENEW_WEBROOT".into()));
                }
            }
            other => return Err(AppError::Config(format!("Unknown strategy {}", other))),
        }
        if self.needs_dns_updates() {
            match &self.tsig {
                Some(tsig) if tsig.contains(':') => {}
                Some(_) => return Err(AppError::Config("NSRENEW_TSIG must be name:secret".into())),
                None => return Err(AppError::Config("NSRENEW_TSIG is not set".into())),
            }
        }
        Ok(())
    }
}

/// Minimal `.env` support: `KEY=VALUE` per line, optional quotes
fn load_dotenv(path: &Path) {
    if let Ok(content) = std::fs::read_to_string(path) {
        for (key, value) in parse_dotenv(&content) {
            if std::env::var(&key).is_err() {
                // SAFETY: called before the runtime spawns any threads
                unsafe { std::env::set_var(key, value) };
            }
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}
