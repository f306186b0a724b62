use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OBJECT_ID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_IP_ADDRESS: u8 = 0x40;
pub const TAG_COUNTER32: u8 = 0x41;
pub const TAG_GAUGE32: u8 = 0x42;
pub const TAG_TIMETICKS: u8 = 0x43;
pub const TAG_OPAQUE: u8 = 0x44;
pub const TAG_COUNTER64: u8 = 0x46;
pub const TAG_NO_SUCH_OBJECT: u8 = 0x80;
pub const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
pub const TAG_END_OF_MIB_VIEW: u8 = 0x82;

pub const PDU_GET_REQUEST: u8 = 0xA0;
pub const PDU_GET_RESPONSE: u8 = 0xA2;

pub const VERSION_2C: i64 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BerError {
    #[error("сообщение обрезано")]
    Truncated,
    #[error("неподдерживаемая длина BER")]
    UnsupportedLength,
    #[error("ожидался тег 0x{expected:02x}, получен 0x{found:02x}")]
    UnexpectedTag { expected: u8, found: u8 },
    #[error("некорректное целое число")]
    InvalidInteger,
    #[error("целое число не помещается в 64 бита")]
    IntegerOverflow,
    #[error("некорректный OID: {0}")]
    InvalidOid(String),
    #[error("лишние байты после сообщения")]
    TrailingData,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn arcs(&self) -> &[u32] {
        &self.0
    }
}

impl From<&[u32]> for Oid {
    fn from(arcs: &[u32]) -> Self {
        Self(arcs.to_vec())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arc) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{arc}")?;
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = BerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('.');
        let arcs = trimmed
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| BerError::InvalidOid(s.to_string()))?;
        if arcs.len() < 2 {
            return Err(BerError::InvalidOid(s.to_string()));
        }
        Ok(Self(arcs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
    Other(u8, Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: i64,
    pub community: Vec<u8>,
    pub pdu_type: u8,
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<VarBind>,
}

pub fn encode_get_request(
    community: &[u8],
    request_id: i32,
    oids: &[Oid],
) -> Result<Vec<u8>, BerError> {
    let varbinds: Vec<VarBind> = oids
        .iter()
        .map(|oid| VarBind {
            oid: oid.clone(),
            value: Value::Null,
        })
        .collect();
    encode_message(&Message {
        version: VERSION_2C,
        community: community.to_vec(),
        pdu_type: PDU_GET_REQUEST,
        request_id,
        error_status: 0,
        error_index: 0,
        varbinds,
    })
}

pub fn encode_message(message: &Message) -> Result<Vec<u8>, BerError> {
    let mut bindings = Vec::new();
    for varbind in &message.varbinds {
        let mut entry = Vec::new();
        write_tlv(&mut entry, TAG_OBJECT_ID, &oid_content(&varbind.oid)?);
        let (tag, content) = value_content(&varbind.value)?;
        write_tlv(&mut entry, tag, &content);
        write_tlv(&mut bindings, TAG_SEQUENCE, &entry);
    }

    let mut pdu = Vec::new();
    write_tlv(
        &mut pdu,
        TAG_INTEGER,
        &integer_content(i64::from(message.request_id)),
    );
    write_tlv(&mut pdu, TAG_INTEGER, &integer_content(message.error_status));
    write_tlv(&mut pdu, TAG_INTEGER, &integer_content(message.error_index));
    write_tlv(&mut pdu, TAG_SEQUENCE, &bindings);

    let mut body = Vec::new();
    write_tlv(&mut body, TAG_INTEGER, &integer_content(message.version));
    write_tlv(&mut body, TAG_OCTET_STRING, &message.community);
    write_tlv(&mut body, message.pdu_type, &pdu);

    let mut out = Vec::with_capacity(body.len() + 4);
    write_tlv(&mut out, TAG_SEQUENCE, &body);
    Ok(out)
}

pub fn decode_message(buf: &[u8]) -> Result<Message, BerError> {
    let mut outer = Reader::new(buf);
    let body = outer.expect(TAG_SEQUENCE)?;
    if !outer.is_empty() {
        return Err(BerError::TrailingData);
    }

    let mut msg = Reader::new(body);
    let version = decode_integer(msg.expect(TAG_INTEGER)?)?;
    let community = msg.expect(TAG_OCTET_STRING)?.to_vec();
    let (pdu_type, pdu) = msg.read_tlv()?;

    let mut pdu = Reader::new(pdu);
    let request_id = i32::try_from(decode_integer(pdu.expect(TAG_INTEGER)?)?)
        .map_err(|_| BerError::IntegerOverflow)?;
    let error_status = decode_integer(pdu.expect(TAG_INTEGER)?)?;
    let error_index = decode_integer(pdu.expect(TAG_INTEGER)?)?;

    let mut bindings = Reader::new(pdu.expect(TAG_SEQUENCE)?);
    let mut varbinds = Vec::new();
    while !bindings.is_empty() {
        let mut entry = Reader::new(bindings.expect(TAG_SEQUENCE)?);
        let oid = decode_oid(entry.expect(TAG_OBJECT_ID)?)?;
        let (tag, content) = entry.read_tlv()?;
        varbinds.push(VarBind {
            oid,
            value: decode_value(tag, content),
        });
    }

    Ok(Message {
        version,
        community,
        pdu_type,
        request_id,
        error_status,
        error_index,
        varbinds,
    })
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn next_byte(&mut self) -> Result<u8, BerError> {
        let b = *self.buf.get(self.pos).ok_or(BerError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_length(&mut self) -> Result<usize, BerError> {
        let first = self.next_byte()?;
        if first & 0x80 == 0 {
            return Ok(usize::from(first));
        }
        let count = usize::from(first & 0x7f);
        if count == 0 || count > 4 {
            return Err(BerError::UnsupportedLength);
        }
        let mut len = 0_usize;
        for _ in 0..count {
            len = (len << 8) | usize::from(self.next_byte()?);
        }
        Ok(len)
    }

    fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), BerError> {
        let tag = self.next_byte()?;
        let len = self.read_length()?;
        let end = self.pos.checked_add(len).ok_or(BerError::Truncated)?;
        if end > self.buf.len() {
            return Err(BerError::Truncated);
        }
        let content = &self.buf[self.pos..end];
        self.pos = end;
        Ok((tag, content))
    }

    fn expect(&mut self, expected: u8) -> Result<&'a [u8], BerError> {
        let (found, content) = self.read_tlv()?;
        if found != expected {
            return Err(BerError::UnexpectedTag { expected, found });
        }
        Ok(content)
    }
}

fn write_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
}

fn integer_content(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn unsigned_content(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes
        .iter()
        .take(bytes.len() - 1)
        .take_while(|b| **b == 0)
        .count();
    let mut out = Vec::with_capacity(bytes.len() - skip + 1);
    if bytes[skip] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[skip..]);
    out
}

fn push_base128(out: &mut Vec<u8>, mut value: u64) {
    let mut tmp = [0_u8; 10];
    let mut i = tmp.len();
    loop {
        i -= 1;
        tmp[i] = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    let last = tmp.len() - 1;
    for (j, b) in tmp.iter().enumerate().skip(i) {
        out.push(if j == last { *b } else { *b | 0x80 });
    }
}

fn oid_content(oid: &Oid) -> Result<Vec<u8>, BerError> {
    let arcs = oid.arcs();
    if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
        return Err(BerError::InvalidOid(oid.to_string()));
    }
    let mut out = Vec::with_capacity(arcs.len() + 4);
    push_base128(&mut out, u64::from(arcs[0]) * 40 + u64::from(arcs[1]));
    for arc in &arcs[2..] {
        push_base128(&mut out, u64::from(*arc));
    }
    Ok(out)
}

fn value_content(value: &Value) -> Result<(u8, Vec<u8>), BerError> {
    Ok(match value {
        Value::Integer(v) => (TAG_INTEGER, integer_content(*v)),
        Value::OctetString(v) => (TAG_OCTET_STRING, v.clone()),
        Value::Null => (TAG_NULL, Vec::new()),
        Value::ObjectId(oid) => (TAG_OBJECT_ID, oid_content(oid)?),
        Value::IpAddress(ip) => (TAG_IP_ADDRESS, ip.to_vec()),
        Value::Counter32(v) => (TAG_COUNTER32, unsigned_content(u64::from(*v))),
        Value::Gauge32(v) => (TAG_GAUGE32, unsigned_content(u64::from(*v))),
        Value::TimeTicks(v) => (TAG_TIMETICKS, unsigned_content(u64::from(*v))),
        Value::Opaque(v) => (TAG_OPAQUE, v.clone()),
        Value::Counter64(v) => (TAG_COUNTER64, unsigned_content(*v)),
        Value::NoSuchObject => (TAG_NO_SUCH_OBJECT, Vec::new()),
        Value::NoSuchInstance => (TAG_NO_SUCH_INSTANCE, Vec::new()),
        Value::EndOfMibView => (TAG_END_OF_MIB_VIEW, Vec::new()),
        Value::Other(tag, content) => (*tag, content.clone()),
    })
}

fn decode_integer(content: &[u8]) -> Result<i64, BerError> {
    if content.is_empty() {
        return Err(BerError::InvalidInteger);
    }
    if content.len() > 8 {
        return Err(BerError::IntegerOverflow);
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for b in content {
        value = (value << 8) | i64::from(*b);
    }
    Ok(value)
}

fn decode_unsigned(content: &[u8]) -> Result<u64, BerError> {
    if content.is_empty() {
        return Err(BerError::InvalidInteger);
    }
    let digits = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        _ => content,
    };
    if digits.len() > 8 {
        return Err(BerError::IntegerOverflow);
    }
    Ok(digits
        .iter()
        .fold(0_u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn decode_u32(content: &[u8]) -> Result<u32, BerError> {
    u32::try_from(decode_unsigned(content)?).map_err(|_| BerError::IntegerOverflow)
}

fn decode_oid(content: &[u8]) -> Result<Oid, BerError> {
    let invalid = || BerError::InvalidOid(format!("{content:02x?}"));
    if content.is_empty() || content[content.len() - 1] & 0x80 != 0 {
        return Err(invalid());
    }
    let mut subids = Vec::new();
    let mut current = 0_u64;
    for b in content {
        if current > (u64::MAX >> 7) {
            return Err(invalid());
        }
        current = (current << 7) | u64::from(b & 0x7f);
        if b & 0x80 == 0 {
            subids.push(current);
            current = 0;
        }
    }

    let first = subids[0];
    let (a, b) = match first {
        0..=39 => (0, first),
        40..=79 => (1, first - 40),
        _ => (2, first - 80),
    };
    let mut arcs = Vec::with_capacity(subids.len() + 1);
    arcs.push(a);
    arcs.push(u32::try_from(b).map_err(|_| invalid())?);
    for subid in &subids[1..] {
        arcs.push(u32::try_from(*subid).map_err(|_| invalid())?);
    }
    Ok(Oid(arcs))
}

/// Malformed value content never fails the whole message; it is kept as `Other`.
fn decode_value(tag: u8, content: &[u8]) -> Value {
    let decoded = match tag {
        TAG_INTEGER => decode_integer(content).ok().map(Value::Integer),
        TAG_OCTET_STRING => Some(Value::OctetString(content.to_vec())),
        TAG_NULL => Some(Value::Null),
        TAG_OBJECT_ID => decode_oid(content).ok().map(Value::ObjectId),
        TAG_IP_ADDRESS => <[u8; 4]>::try_from(content).ok().map(Value::IpAddress),
        TAG_COUNTER32 => decode_u32(content).ok().map(Value::Counter32),
        TAG_GAUGE32 => decode_u32(content).ok().map(Value::Gauge32),
        TAG_TIMETICKS => decode_u32(content).ok().map(Value::TimeTicks),
        TAG_OPAQUE => Some(Value::Opaque(content.to_vec())),
        TAG_COUNTER64 => decode_unsigned(content).ok().map(Value::Counter64),
        TAG_NO_SUCH_OBJECT => Some(Value::NoSuchObject),
        TAG_NO_SUCH_INSTANCE => Some(Value::NoSuchInstance),
        TAG_END_OF_MIB_VIEW => Some(Value::EndOfMibView),
        _ => None,
    };
    decoded.unwrap_or_else(|| Value::Other(tag, content.to_vec()))
}
