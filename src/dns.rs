//! DNS message parsing and construction.
//!
//! Only what the proxy needs: the client's single question, the query sent
//! upstream, and enough of an upstream reply to read its response code and
//! carry its sections over to the client.

use std::fmt;

use crate::error::WireError;

const HEADER_LEN: usize = 12;
const MAX_NAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;
const POINTER_MASK: u8 = 0xC0;

const FLAG_QR: u16 = 0x8000;
const OPCODE_MASK: u16 = 0x7800;
const FLAG_AA: u16 = 0x0400;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;
const FLAG_AD: u16 = 0x0020;
const FLAG_CD: u16 = 0x0010;
const RCODE_MASK: u16 = 0x000F;

/// Header bits of the upstream reply that survive into the client's answer.
const UPSTREAM_FLAGS: u16 = FLAG_AA | FLAG_TC | FLAG_RA | FLAG_AD | FLAG_CD | RCODE_MASK;

/// The IN class, the only class forwarded upstream.
pub const CLASS_IN: u16 = 1;

/// DNS response code (RCODE).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    NoError,
    FormErr,
    ServFail,
    NxDomain,
    NotImp,
    Refused,
    Other(u8),
}

impl From<u8> for ResponseCode {
    fn from(code: u8) -> Self {
        match code {
            0 => ResponseCode::NoError,
            1 => ResponseCode::FormErr,
            2 => ResponseCode::ServFail,
            3 => ResponseCode::NxDomain,
            4 => ResponseCode::NotImp,
            5 => ResponseCode::Refused,
            other => ResponseCode::Other(other),
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCode::NoError => f.write_str("NOERROR"),
            ResponseCode::FormErr => f.write_str("FORMERR"),
            ResponseCode::ServFail => f.write_str("SERVFAIL"),
            ResponseCode::NxDomain => f.write_str("NXDOMAIN"),
            ResponseCode::NotImp => f.write_str("NOTIMP"),
            ResponseCode::Refused => f.write_str("REFUSED"),
            ResponseCode::Other(code) => write!(f, "RCODE{}", code),
        }
    }
}

/// Mnemonic for the common record types, for logging.
pub fn record_type_name(rtype: u16) -> Option<&'static str> {
    let name = match rtype {
        1 => "A",
        2 => "NS",
        5 => "CNAME",
        6 => "SOA",
        12 => "PTR",
        15 => "MX",
        16 => "TXT",
        28 => "AAAA",
        33 => "SRV",
        64 => "SVCB",
        65 => "HTTPS",
        255 => "ANY",
        _ => return None,
    };
    Some(name)
}

/// The question forwarded to every upstream: name and type only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Uncompressed wire form, length-prefixed labels up to the root label.
    /// Labels are arbitrary bytes and are forwarded untouched.
    pub name: Vec<u8>,
    pub qtype: u16,
}

impl Question {
    /// Question for a dotted name such as `example.com`, empty for the root.
    pub fn new(name: &str, qtype: u16) -> Self {
        let mut wire = Vec::with_capacity(name.len() + 2);
        encode_name(&mut wire, name);
        Self { name: wire, qtype }
    }

    /// Encode a recursive single-question query with the given transaction id.
    pub fn to_query(&self, id: u16) -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_LEN + self.name.len() + 4);

        data.extend_from_slice(&id.to_be_bytes());
        data.extend_from_slice(&FLAG_RD.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
        data.extend_from_slice(&[0x00; 6]); // ANCOUNT, NSCOUNT, ARCOUNT

        data.extend_from_slice(&self.name);
        data.extend_from_slice(&self.qtype.to_be_bytes());
        data.extend_from_slice(&CLASS_IN.to_be_bytes());

        data
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_name(&self.name, f)?;
        match record_type_name(self.qtype) {
            Some(name) => write!(f, " {}", name),
            None => write!(f, " TYPE{}", self.qtype),
        }
    }
}

/// A parsed client query.
#[derive(Debug, Clone)]
pub struct DnsQuery {
    pub id: u16,
    pub flags: u16,
    /// Question name in uncompressed wire form.
    pub name: Vec<u8>,
    pub qtype: u16,
    pub qclass: u16,
}

impl DnsQuery {
    /// Parse a client query carrying exactly one question.
    ///
    /// Anything after the question (EDNS OPT records and the like) is ignored.
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < HEADER_LEN {
            return Err(WireError::Truncated);
        }

        let id = read_u16(data, 0)?;
        let flags = read_u16(data, 2)?;
        if flags & FLAG_QR != 0 {
            return Err(WireError::NotAQuery);
        }

        let qdcount = read_u16(data, 4)?;
        if qdcount != 1 {
            return Err(WireError::QuestionCount(qdcount));
        }

        let end = question_name_end(data, HEADER_LEN)?;
        let qtype = read_u16(data, end)?;
        let qclass = read_u16(data, end + 2)?;

        Ok(Self {
            id,
            flags,
            name: data[HEADER_LEN..end].to_vec(),
            qtype,
            qclass,
        })
    }

    /// The question to forward upstream.
    pub fn question(&self) -> Question {
        Question {
            name: self.name.clone(),
            qtype: self.qtype,
        }
    }
}

/// Whether `reply` looks like the answer to `query`: a full header, the
/// same transaction id and the response bit set.
pub fn is_reply_to(reply: &[u8], query: &[u8]) -> bool {
    reply.len() >= HEADER_LEN
        && query.len() >= 2
        && reply[..2] == query[..2]
        && u16::from_be_bytes([reply[2], reply[3]]) & FLAG_QR != 0
}

/// A validated upstream reply.
///
/// Keeps the raw bytes so the sections can be copied to the client untouched.
#[derive(Debug, Clone)]
pub struct DnsMessage {
    bytes: Vec<u8>,
    id: u16,
    flags: u16,
}

impl DnsMessage {
    /// Parse and structurally validate an upstream reply.
    ///
    /// Every name, record header and rdata length in all four sections must
    /// fit inside the message. Trailing bytes are dropped.
    pub fn parse_response(mut bytes: Vec<u8>) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::Truncated);
        }

        let id = read_u16(&bytes, 0)?;
        let flags = read_u16(&bytes, 2)?;
        if flags & FLAG_QR == 0 {
            return Err(WireError::NotAResponse);
        }

        let qdcount = read_u16(&bytes, 4)? as usize;
        let rrcount = read_u16(&bytes, 6)? as usize
            + read_u16(&bytes, 8)? as usize
            + read_u16(&bytes, 10)? as usize;

        let mut pos = HEADER_LEN;
        for _ in 0..qdcount {
            pos = skip_name(&bytes, pos)? + 4; // QTYPE + QCLASS
        }
        for _ in 0..rrcount {
            pos = skip_name(&bytes, pos)?;
            let rdlength = read_u16(&bytes, pos + 8)? as usize;
            pos += 10 + rdlength;
        }
        if pos > bytes.len() {
            return Err(WireError::Truncated);
        }
        bytes.truncate(pos);

        Ok(Self { bytes, id, flags })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn response_code(&self) -> ResponseCode {
        ResponseCode::from((self.flags & RCODE_MASK) as u8)
    }

    pub fn is_nxdomain(&self) -> bool {
        self.response_code() == ResponseCode::NxDomain
    }

    pub fn answer_count(&self) -> u16 {
        self.count_at(6)
    }

    pub fn authority_count(&self) -> u16 {
        self.count_at(8)
    }

    pub fn additional_count(&self) -> u16 {
        self.count_at(10)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Build the answer for `query` out of this upstream reply.
    ///
    /// The header is fresh: the client's transaction id, opcode and RD bit,
    /// with the upstream's answer flags and response code. All four sections
    /// follow verbatim. The header keeps its length, so compression pointers
    /// in the copied sections still resolve.
    pub fn reply_to(&self, query: &DnsQuery) -> Vec<u8> {
        let flags =
            FLAG_QR | (query.flags & (OPCODE_MASK | FLAG_RD)) | (self.flags & UPSTREAM_FLAGS);

        let mut reply = Vec::with_capacity(self.bytes.len());
        reply.extend_from_slice(&query.id.to_be_bytes());
        reply.extend_from_slice(&flags.to_be_bytes());
        reply.extend_from_slice(&self.bytes[4..]);
        reply
    }

    fn count_at(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.bytes[offset], self.bytes[offset + 1]])
    }
}

fn read_u16(data: &[u8], pos: usize) -> Result<u16, WireError> {
    data.get(pos..pos + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(WireError::Truncated)
}

fn encode_name(buf: &mut Vec<u8>, name: &str) {
    if !name.is_empty() {
        for label in name.split('.') {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
    }
    buf.push(0);
}

/// Offset just past the uncompressed question name starting at `pos`.
///
/// Label contents are not inspected; any byte is valid in a label.
fn question_name_end(data: &[u8], mut pos: usize) -> Result<usize, WireError> {
    let mut wire_len = 1;

    loop {
        let len = *data.get(pos).ok_or(WireError::Truncated)? as usize;
        pos += 1;
        if len == 0 {
            return Ok(pos);
        }
        // Also rejects compression pointers, which a lone question never needs.
        if len > MAX_LABEL_LEN {
            return Err(WireError::BadLabel);
        }

        wire_len += len + 1;
        if wire_len > MAX_NAME_LEN {
            return Err(WireError::NameTooLong);
        }
        if data.len() < pos + len {
            return Err(WireError::Truncated);
        }
        pos += len;
    }
}

/// Write a wire-form name in presentation format, escaping dots, backslashes
/// and non-printable bytes inside labels.
fn fmt_name(wire: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut pos = 0;
    let mut labels = 0;

    while let Some(&len) = wire.get(pos) {
        if len == 0 {
            break;
        }
        let end = (pos + 1 + len as usize).min(wire.len());
        for &b in &wire[pos + 1..end] {
            match b {
                b'.' | b'\\' => write!(f, "\\{}", b as char)?,
                b if b.is_ascii_graphic() => write!(f, "{}", b as char)?,
                b => write!(f, "\\{:03}", b)?,
            }
        }
        f.write_str(".")?;
        labels += 1;
        pos = end;
    }

    if labels == 0 {
        f.write_str(".")?;
    }
    Ok(())
}

/// Offset just past the (possibly compressed) name starting at `pos`.
fn skip_name(data: &[u8], mut pos: usize) -> Result<usize, WireError> {
    let mut wire_len = 0;

    loop {
        let len = *data.get(pos).ok_or(WireError::Truncated)?;

        if len & POINTER_MASK == POINTER_MASK {
            let target = (read_u16(data, pos)? & 0x3FFF) as usize;
            if target >= pos {
                return Err(WireError::BadPointer(pos));
            }
            return Ok(pos + 2);
        }
        if len & POINTER_MASK != 0 {
            return Err(WireError::BadLabel);
        }

        pos += 1;
        if len == 0 {
            return Ok(pos);
        }

        wire_len += len as usize + 1;
        if wire_len > MAX_NAME_LEN {
            return Err(WireError::NameTooLong);
        }
        pos += len as usize;
    }
}
