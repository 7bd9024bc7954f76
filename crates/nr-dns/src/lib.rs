//! DNS plumbing for certificate renewal: a small RFC 1035 codec, direct
//! queries against chosen servers, nsupdate transactions and propagation
//! checks across a zone's authoritative nameservers.

pub mod config;
pub mod error;
pub mod nsupdate;
pub mod packet;
pub mod propagation;
pub mod query;
pub mod records;

pub use config::{DnsUpdateConfig, PropagationConfig, TsigKey};
pub use error::{DnsError, DnsResult};
pub use nsupdate::{DnsTransaction, NsupdateCommand, UpdateExecutor, UpdateOutput};
pub use propagation::{Nameserver, PropagationChecker};
pub use query::{DnsQuerier, UdpQuerier};
pub use records::RecordType;
