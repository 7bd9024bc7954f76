use std::time::Duration;
use thiserror::Error;

use crate::packet::DnsParseError;

#[derive(Error, Debug)]
pub enum DnsError {
    /// The update server rejected a batch. The directives were logged when
    /// the rejection was detected.
    #[error("DNS update rejected: {0}")]
    Transaction(String),

    #[error("Record {record} not visible on {} after {elapsed:?}", .servers.join(", "))]
    PropagationTimeout {
        record: String,
        servers: Vec<String>,
        elapsed: Duration,
    },

    #[error("No authoritative nameservers found for {0}")]
    NoNameservers(String),

    #[error("Failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    #[error("Query to {server} failed: {reason}")]
    Query { server: String, reason: String },

    #[error("Malformed DNS response: {0}")]
    Parse(#[from] DnsParseError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DnsError {
    pub fn is_transaction(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }
}

pub type DnsResult<T> = Result<T, DnsError>;
