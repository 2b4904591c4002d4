//! Wire framing.
//!
//! A frame looks like `{FB;01;1A|64:KDY;KT0|055F}`:
//!
//! * `FB;01;1A` - source address, destination address, total frame length (hex)
//! * `64:KDY;KT0` - command type (hex) and the `;`-separated field list
//! * `055F` - 16 bit sum of every byte between `{` and the checksum
//!
//! Requests are sent from the master address `FB`, replies come back with the
//! device id first and `FB` second.

use crate::prelude::*;

use std::collections::BTreeMap;

/// Address of the bus master (us).
pub const MASTER: &str = "FB";

const START: u8 = b'{';
pub const END: u8 = b'}';

// Frame overhead that does not depend on the addresses or body:
// two braces, two header semicolons and four checksum digits.
const FIXED_OVERHEAD: usize = 2 + 2 + 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Address {
    Master,
    Device(u8),
}

impl Address {
    fn parse(s: &str) -> Result<Self, Error> {
        if s == MASTER {
            return Ok(Address::Master);
        }
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Protocol(format!("unexpected address {:?}", s)));
        }
        s.parse()
            .map(Address::Device)
            .map_err(|_| Error::Protocol(format!("address {:?} out of range", s)))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Master => f.write_str(MASTER),
            Address::Device(id) => write!(f, "{:02}", id),
        }
    }
}

/// The body of an outgoing query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Validated field identifiers, joined with `;` on the wire.
    Fields(Vec<Field>),
    /// A pre-encoded body such as `PAC=64;SAL=0`, sent verbatim.
    Raw(String),
}

impl Request {
    /// Build a field request from wire names, rejecting any unknown name.
    pub fn fields<S: AsRef<str>>(names: &[S]) -> Result<Self, Error> {
        Ok(Request::Fields(Field::parse_list(names)?))
    }

    /// Wrap a pre-encoded body. Every key, with or without `=value`, must
    /// name a known field.
    pub fn raw<S: Into<String>>(body: S) -> Result<Self, Error> {
        let body = body.into();
        for item in body.split(';') {
            let key = item.split_once('=').map_or(item, |(key, _)| key);
            key.parse::<Field>()?;
        }
        Ok(Request::Raw(body))
    }

    pub fn body(&self) -> String {
        match self {
            Request::Fields(fields) => fields
                .iter()
                .map(Field::as_str)
                .collect::<Vec<_>>()
                .join(";"),
            Request::Raw(body) => body.clone(),
        }
    }
}

impl From<Vec<Field>> for Request {
    fn from(fields: Vec<Field>) -> Self {
        Request::Fields(fields)
    }
}

impl From<&[Field]> for Request {
    fn from(fields: &[Field]) -> Self {
        Request::Fields(fields.to_vec())
    }
}

/// A fully parsed frame, in either direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub source: Address,
    pub destination: Address,
    pub command: CommandType,
    /// Field names with their raw value; requests carry no values.
    pub items: Vec<(Field, Option<String>)>,
}

/// A validated reply: the answering device and its raw hex values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawReply {
    pub inverter: u8,
    pub command: CommandType,
    pub values: BTreeMap<Field, String>,
}

/// Sum of all bytes truncated to 16 bits, as four uppercase hex digits.
pub fn checksum(content: &[u8]) -> String {
    let sum = content
        .iter()
        .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)));
    format!("{:04X}", sum)
}

/// Encode a query for `inverter`.
pub fn encode(inverter: u8, request: &Request, command: CommandType) -> Vec<u8> {
    assemble(
        Address::Master,
        Address::Device(inverter),
        command,
        &request.body(),
    )
}

/// Decode and validate a reply frame.
pub fn decode(raw: &[u8]) -> Result<RawReply, Error> {
    Frame::parse_checked(raw, true)?.into_reply()
}

// The length field counts its own hex digits, so find the width at which the
// total is stable rather than measuring the finished frame.
fn frame_length(without_length_field: usize) -> usize {
    let mut digits = 1;
    loop {
        let total = without_length_field + digits;
        let width = format!("{:X}", total).len();
        if width == digits {
            return total;
        }
        digits = width;
    }
}

// Replies go from a device to the master. Returns the device id.
fn check_reply_direction(source: Address, destination: Address) -> Result<u8, Error> {
    if destination != Address::Master {
        return Err(Error::Protocol(format!(
            "reply addressed to {}, expected {}",
            destination, MASTER
        )));
    }
    match source {
        Address::Device(inverter) => Ok(inverter),
        Address::Master => Err(Error::Protocol(format!("reply sent from {}", MASTER))),
    }
}

fn assemble(source: Address, destination: Address, command: CommandType, body: &str) -> Vec<u8> {
    let source = source.to_string();
    let destination = destination.to_string();
    let payload = format!("|{}:{}|", command.hex(), body);

    let length = frame_length(FIXED_OVERHEAD + source.len() + destination.len() + payload.len());
    let content = format!("{};{};{:X}{}", source, destination, length, payload);
    let checksum = checksum(content.as_bytes());

    let frame = format!("{{{}{}}}", content, checksum);
    debug_assert_eq!(frame.len(), length);
    frame.into_bytes()
}

impl Frame {
    /// Build a reply frame as an inverter would send it.
    pub fn reply(inverter: u8, command: CommandType, values: &[(Field, &str)]) -> Self {
        Self {
            source: Address::Device(inverter),
            destination: Address::Master,
            command,
            items: values
                .iter()
                .map(|(field, value)| (*field, Some(value.to_string())))
                .collect(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let body = self
            .items
            .iter()
            .map(|(field, value)| match value {
                Some(value) => format!("{}={}", field, value),
                None => field.to_string(),
            })
            .collect::<Vec<_>>()
            .join(";");

        assemble(self.source, self.destination, self.command, &body)
    }

    /// Strictly parse a frame in either direction. Any deviation rejects
    /// the whole frame.
    pub fn parse(raw: &[u8]) -> Result<Self, Error> {
        Self::parse_checked(raw, false)
    }

    // With `reply_only` the direction marker is checked right after the
    // header, before length and body.
    fn parse_checked(raw: &[u8], reply_only: bool) -> Result<Self, Error> {
        if raw.first() != Some(&START) || raw.last() != Some(&END) || raw.len() < 2 {
            return Err(Error::MalformedFrame(format!(
                "missing braces in {:?}",
                String::from_utf8_lossy(raw)
            )));
        }
        if !raw.is_ascii() {
            return Err(Error::MalformedFrame("non-ASCII bytes in frame".to_string()));
        }
        // ASCII checked above, so every byte is a char boundary
        let text = std::str::from_utf8(raw)
            .map_err(|_| Error::MalformedFrame("non-ASCII bytes in frame".to_string()))?;

        let inner = &text[1..text.len() - 1];
        if inner.len() < 4 {
            return Err(Error::MalformedFrame(format!("frame too short: {:?}", text)));
        }
        let (content, found) = inner.split_at(inner.len() - 4);

        let expected = checksum(content.as_bytes());
        if found != expected {
            return Err(Error::ChecksumMismatch {
                expected,
                found: found.to_string(),
            });
        }

        let content = content
            .strip_suffix('|')
            .ok_or_else(|| Error::MalformedFrame(format!("no trailing '|' in {:?}", text)))?;
        let (header, body) = content
            .split_once('|')
            .ok_or_else(|| Error::MalformedFrame(format!("no header in {:?}", text)))?;

        let header: Vec<&str> = header.split(';').collect();
        let [source, destination, length] = header[..] else {
            return Err(Error::MalformedFrame(format!(
                "header needs 3 parts, got {}",
                header.len()
            )));
        };

        let source = Address::parse(source)?;
        let destination = Address::parse(destination)?;
        if reply_only {
            check_reply_direction(source, destination)?;
        }

        let declared = usize::from_str_radix(length, 16)
            .map_err(|_| Error::MalformedFrame(format!("length {:?} is not hex", length)))?;
        if declared != raw.len() {
            return Err(Error::LengthMismatch {
                declared,
                actual: raw.len(),
            });
        }

        let (command, fields) = body
            .split_once(':')
            .ok_or_else(|| Error::MalformedFrame(format!("no command type in {:?}", body)))?;
        let command = CommandType::from_hex(command)?;

        let items = fields
            .split(';')
            .map(|item| -> Result<(Field, Option<String>), Error> {
                if item.is_empty() {
                    return Err(Error::MalformedFrame(format!("empty field in {:?}", fields)));
                }
                match item.split_once('=') {
                    Some((key, value)) => Ok((key.parse::<Field>()?, Some(value.to_string()))),
                    None => Ok((item.parse::<Field>()?, None)),
                }
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self {
            source,
            destination,
            command,
            items,
        })
    }

    /// Check the direction marker and turn the items into a value map.
    pub fn into_reply(self) -> Result<RawReply, Error> {
        let inverter = check_reply_direction(self.source, self.destination)?;

        let mut values = BTreeMap::new();
        for (field, value) in self.items {
            let value = value.ok_or_else(|| {
                Error::MalformedFrame(format!("field {} has no value", field))
            })?;
            values.insert(field, value);
        }

        Ok(RawReply {
            inverter,
            command: self.command,
            values,
        })
    }
}
