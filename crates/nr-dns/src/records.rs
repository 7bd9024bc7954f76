use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// DNS record types we query or update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    NS,
    CNAME,
    SOA,
    TXT,
    AAAA,
    TLSA,
    ANY,
    Unknown(u16),
}

/// Wire code and mnemonic (as nsupdate expects it) of each known type.
const TYPE_TABLE: [(RecordType, u16, &str); 8] = [
    (RecordType::A, 1, "A"),
    (RecordType::NS, 2, "NS"),
    (RecordType::CNAME, 5, "CNAME"),
    (RecordType::SOA, 6, "SOA"),
    (RecordType::TXT, 16, "TXT"),
    (RecordType::AAAA, 28, "AAAA"),
    (RecordType::TLSA, 52, "TLSA"),
    (RecordType::ANY, 255, "ANY"),
];

impl RecordType {
    pub fn from_u16(val: u16) -> Self {
        TYPE_TABLE
            .iter()
            .find(|(_, code, _)| *code == val)
            .map_or(Self::Unknown(val), |(rtype, _, _)| *rtype)
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::Unknown(code) => code,
            known => TYPE_TABLE
                .iter()
                .find(|(rtype, _, _)| *rtype == known)
                .map_or(0, |(_, code, _)| *code),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match TYPE_TABLE.iter().find(|(rtype, _, _)| rtype == self) {
            Some((_, _, mnemonic)) => f.write_str(mnemonic),
            None => write!(f, "TYPE{}", self.to_u16()),
        }
    }
}

/// DNS record class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordClass {
    IN,
    Any,
    Unknown(u16),
}

impl RecordClass {
    pub fn from_u16(val: u16) -> Self {
        match val {
            1 => Self::IN,
            255 => Self::Any,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::IN => 1,
            Self::Any => 255,
            Self::Unknown(v) => v,
        }
    }
}

/// DNS resource record data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    CNAME(String),
    NS(String),
    TXT(String),
    SOA {
        mname: String,
        rname: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    /// Raw bytes for record types we don't decode
    Raw(Vec<u8>),
}

/// A complete DNS resource record
#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: RecordType,
    pub class: RecordClass,
    pub ttl: u32,
    pub rdata: RData,
}

impl DnsRecord {
    fn new(name: &str, rtype: RecordType, ttl: u32, rdata: RData) -> Self {
        Self {
            name: name.to_string(),
            rtype,
            class: RecordClass::IN,
            ttl,
            rdata,
        }
    }

    pub fn a(name: &str, ip: Ipv4Addr, ttl: u32) -> Self {
        Self::new(name, RecordType::A, ttl, RData::A(ip))
    }

    pub fn aaaa(name: &str, ip: Ipv6Addr, ttl: u32) -> Self {
        Self::new(name, RecordType::AAAA, ttl, RData::AAAA(ip))
    }

    pub fn ns(name: &str, target: &str, ttl: u32) -> Self {
        Self::new(name, RecordType::NS, ttl, RData::NS(target.to_string()))
    }

    pub fn txt(name: &str, text: &str, ttl: u32) -> Self {
        Self::new(name, RecordType::TXT, ttl, RData::TXT(text.to_string()))
    }

    /// SOA with placeholder timers; only the names matter for zone discovery.
    pub fn soa(name: &str, mname: &str, rname: &str, ttl: u32) -> Self {
        Self::new(
            name,
            RecordType::SOA,
            ttl,
            RData::SOA {
                mname: mname.to_string(),
                rname: rname.to_string(),
                serial: 1,
                refresh: 3600,
                retry: 600,
                expire: 86400,
                minimum: 60,
            },
        )
    }
}

/// Compare two DNS names ignoring case and a trailing root dot.
pub fn same_name(a: &str, b: &str) -> bool {
    a.trim_end_matches('.')
        .eq_ignore_ascii_case(b.trim_end_matches('.'))
}
