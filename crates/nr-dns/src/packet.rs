//! DNS wire format (RFC 1035): query building and response parsing.

use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

use crate::records::{same_name, DnsRecord, RData, RecordClass, RecordType};

const HEADER_LEN: usize = 12;
const MAX_POINTERS: usize = 16;
const MAX_NAME_LEN: usize = 255;
/// EDNS pseudo-record, never surfaced
const TYPE_OPT: u16 = 41;

pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_SERVFAIL: u8 = 2;
pub const RCODE_NXDOMAIN: u8 = 3;
pub const RCODE_REFUSED: u8 = 5;

#[derive(Error, Debug)]
pub enum DnsParseError {
    #[error("Packet truncated at offset {0}")]
    Truncated(usize),
    #[error("Name compression loop detected")]
    CompressionLoop,
    #[error("Invalid UTF-8 in name")]
    InvalidUtf8,
    #[error("Packet too short: {0} bytes")]
    TooShort(usize),
    #[error("Name too long (exceeds 255 bytes)")]
    NameTooLong,
    #[error("Unsupported label type 0x{0:02x}")]
    BadLabel(u8),
}

/// Bounds-checked cursor over a whole message. Names are decoded against
/// the full buffer so compression pointers resolve.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DnsParseError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + n)
            .ok_or(DnsParseError::Truncated(self.pos))?;
        self.pos += n;
        Ok(bytes)
    }

    fn u16(&mut self) -> Result<u16, DnsParseError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DnsParseError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn name(&mut self) -> Result<String, DnsParseError> {
        let (name, end) = parse_name(self.buf, self.pos)?;
        self.pos = end;
        Ok(name)
    }
}

#[derive(Debug, Clone)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,
    pub qd_count: u16,
    pub an_count: u16,
    pub ns_count: u16,
    pub ar_count: u16,
}

impl DnsHeader {
    fn read(reader: &mut Reader<'_>) -> Result<Self, DnsParseError> {
        Ok(Self {
            id: reader.u16()?,
            flags: reader.u16()?,
            qd_count: reader.u16()?,
            an_count: reader.u16()?,
            ns_count: reader.u16()?,
            ar_count: reader.u16()?,
        })
    }

    fn write(&self, buf: &mut Vec<u8>) {
        for field in [self.id, self.flags, self.qd_count, self.an_count, self.ns_count, self.ar_count] {
            buf.extend_from_slice(&field.to_be_bytes());
        }
    }

    pub fn is_response(&self) -> bool {
        self.flags & 0x8000 != 0
    }

    pub fn is_truncated(&self) -> bool {
        self.flags & 0x0200 != 0
    }

    pub fn rcode(&self) -> u8 {
        (self.flags & 0xF) as u8
    }

    /// Name of the response code when the server could not answer at all.
    /// NXDOMAIN is an answer and yields `None`.
    pub fn server_failure(&self) -> Option<&'static str> {
        match self.rcode() {
            RCODE_SERVFAIL => Some("SERVFAIL"),
            RCODE_REFUSED => Some("REFUSED"),
            _ => None,
        }
    }
}

/// Decode the name at `start`. Returns it with the offset just past the name
/// as stored at `start` (past the first pointer when compressed).
pub fn parse_name(buf: &[u8], start: usize) -> Result<(String, usize), DnsParseError> {
    let mut labels: Vec<&str> = Vec::new();
    let mut wire_len = 1;
    let mut pos = start;
    let mut resume = None;
    let mut pointers = 0;

    loop {
        let len = *buf.get(pos).ok_or(DnsParseError::Truncated(pos))?;
        match len & 0xC0 {
            0xC0 => {
                let low = *buf.get(pos + 1).ok_or(DnsParseError::Truncated(pos))?;
                resume.get_or_insert(pos + 2);
                pointers += 1;
                if pointers > MAX_POINTERS {
                    return Err(DnsParseError::CompressionLoop);
                }
                pos = (usize::from(len & 0x3F) << 8) | usize::from(low);
            }
            0x00 if len == 0 => {
                return Ok((labels.join("."), resume.unwrap_or(pos + 1)));
            }
            0x00 => {
                let len = usize::from(len);
                let label = buf
                    .get(pos + 1..pos + 1 + len)
                    .ok_or(DnsParseError::Truncated(pos + 1))?;
                wire_len += len + 1;
                if wire_len > MAX_NAME_LEN {
                    return Err(DnsParseError::NameTooLong);
                }
                labels.push(std::str::from_utf8(label).map_err(|_| DnsParseError::InvalidUtf8)?);
                pos += 1 + len;
            }
            _ => return Err(DnsParseError::BadLabel(len)),
        }
    }
}

/// Append `name` as wire labels. A trailing root dot is ignored; labels
/// longer than 63 bytes are cut.
pub fn encode_name(name: &str, buf: &mut Vec<u8>) {
    for label in name.trim_end_matches('.').split('.').filter(|l| !l.is_empty()) {
        let bytes = &label.as_bytes()[..label.len().min(63)];
        buf.push(bytes.len() as u8);
        buf.extend_from_slice(bytes);
    }
    buf.push(0);
}

/// Build a single-question query packet (class IN).
///
/// Zone discovery goes through a recursive resolver and sets RD; checks
/// against authoritative servers clear it so the answer comes from the
/// server's own zone data.
pub fn build_query(id: u16, name: &str, qtype: RecordType, recursion_desired: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + name.len() + 6);
    DnsHeader {
        id,
        flags: if recursion_desired { 0x0100 } else { 0 },
        qd_count: 1,
        an_count: 0,
        ns_count: 0,
        ar_count: 0,
    }
    .write(&mut buf);
    encode_name(name, &mut buf);
    buf.extend_from_slice(&qtype.to_u16().to_be_bytes());
    buf.extend_from_slice(&RecordClass::IN.to_u16().to_be_bytes());
    buf
}

/// Parsed DNS response with separated sections.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub header: DnsHeader,
    pub answers: Vec<DnsRecord>,
    pub authority: Vec<DnsRecord>,
    pub additional: Vec<DnsRecord>,
}

impl ParsedResponse {
    /// TXT strings in the answer section owned by `name`.
    pub fn txt_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.answers.iter().filter_map(move |r| match &r.rdata {
            RData::TXT(text) if same_name(&r.name, name) => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Parse a response into its answer, authority and additional sections.
/// Owner names are lowercased.
pub fn parse_response_sections(buf: &[u8]) -> Result<ParsedResponse, DnsParseError> {
    if buf.len() < HEADER_LEN {
        return Err(DnsParseError::TooShort(buf.len()));
    }
    let mut reader = Reader::at(buf, 0);
    let header = DnsHeader::read(&mut reader)?;

    for _ in 0..header.qd_count {
        reader.name()?;
        reader.take(4)?; // QTYPE + QCLASS
    }

    let answers = read_records(&mut reader, header.an_count)?;
    let authority = read_records(&mut reader, header.ns_count)?;
    let additional = read_records(&mut reader, header.ar_count)?;

    Ok(ParsedResponse {
        header,
        answers,
        authority,
        additional,
    })
}

/// Read up to `count` records; a message that ends early (TC set) yields
/// what was complete.
fn read_records(reader: &mut Reader<'_>, count: u16) -> Result<Vec<DnsRecord>, DnsParseError> {
    let mut records = Vec::with_capacity(usize::from(count));

    for _ in 0..count {
        if reader.is_empty() {
            break;
        }
        let name = reader.name()?.to_lowercase();
        let type_code = reader.u16()?;
        let class = RecordClass::from_u16(reader.u16()?);
        let ttl = reader.u32()?;
        let rdlength = usize::from(reader.u16()?);
        let rdata_start = reader.pos;
        let raw = reader.take(rdlength)?;

        if type_code == TYPE_OPT {
            continue;
        }
        let rtype = RecordType::from_u16(type_code);
        records.push(DnsRecord {
            name,
            rtype,
            class,
            ttl,
            rdata: decode_rdata(reader.buf, rdata_start, raw, rtype)?,
        });
    }

    Ok(records)
}

fn decode_rdata(buf: &[u8], start: usize, raw: &[u8], rtype: RecordType) -> Result<RData, DnsParseError> {
    let rdata = match rtype {
        RecordType::A => match <[u8; 4]>::try_from(raw) {
            Ok(octets) => RData::A(Ipv4Addr::from(octets)),
            Err(_) => RData::Raw(raw.to_vec()),
        },
        RecordType::AAAA => match <[u8; 16]>::try_from(raw) {
            Ok(octets) => RData::AAAA(Ipv6Addr::from(octets)),
            Err(_) => RData::Raw(raw.to_vec()),
        },
        RecordType::CNAME => RData::CNAME(parse_name(buf, start)?.0),
        RecordType::NS => RData::NS(parse_name(buf, start)?.0.to_lowercase()),
        RecordType::TXT => RData::TXT(character_strings(raw)),
        RecordType::SOA => {
            let mut reader = Reader::at(buf, start);
            RData::SOA {
                mname: reader.name()?.to_lowercase(),
                rname: reader.name()?,
                serial: reader.u32()?,
                refresh: reader.u32()?,
                retry: reader.u32()?,
                expire: reader.u32()?,
                minimum: reader.u32()?,
            }
        }
        _ => RData::Raw(raw.to_vec()),
    };
    Ok(rdata)
}

/// Concatenate the `<len><bytes>` strings of a TXT rdata.
fn character_strings(mut raw: &[u8]) -> String {
    let mut text = String::new();
    while let Some((&len, rest)) = raw.split_first() {
        let len = usize::from(len);
        if len > rest.len() {
            break;
        }
        let (chunk, next) = rest.split_at(len);
        text.push_str(&String::from_utf8_lossy(chunk));
        raw = next;
    }
    text
}

/// Encode a record for parser fixtures; this crate never answers queries.
#[cfg(test)]
pub(crate) fn encode_record(record: &DnsRecord, buf: &mut Vec<u8>) {
    encode_name(&record.name, buf);
    buf.extend_from_slice(&record.rtype.to_u16().to_be_bytes());
    buf.extend_from_slice(&record.class.to_u16().to_be_bytes());
    buf.extend_from_slice(&record.ttl.to_be_bytes());

    let mut rdata = Vec::new();
    match &record.rdata {
        RData::A(ip) => rdata.extend_from_slice(&ip.octets()),
        RData::AAAA(ip) => rdata.extend_from_slice(&ip.octets()),
        RData::CNAME(name) | RData::NS(name) => encode_name(name, &mut rdata),
        RData::TXT(text) => {
            for chunk in text.as_bytes().chunks(255) {
                rdata.push(chunk.len() as u8);
                rdata.extend_from_slice(chunk);
            }
        }
        RData::SOA { mname, rname, serial, refresh, retry, expire, minimum } => {
            encode_name(mname, &mut rdata);
            encode_name(rname, &mut rdata);
            for v in [serial, refresh, retry, expire, minimum] {
                rdata.extend_from_slice(&v.to_be_bytes());
            }
        }
        RData::Raw(data) => rdata.extend_from_slice(data),
    }
    buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    buf.extend_from_slice(&rdata);
}
