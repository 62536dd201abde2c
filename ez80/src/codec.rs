use std::collections::BTreeMap;

use crate::{
    command::Command,
    error::ProtocolError,
    ticks::{TICK_BYTES, unpack_ticks},
};

pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Bytes following the node id in every header: two length bytes and the command.
const HEADER_TAIL: usize = 3;

/// Builds the header and payload halves of a frame.
///
/// The header is the node id followed by `len / 256`, `len % 256` and the
/// command byte. Fails only when the payload length does not fit in 16 bits.
pub fn encode(
    node: &[u8],
    command: Command,
    payload: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), ProtocolError> {
    let len = payload.len();
    if len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLong { len });
    }

    let mut header = Vec::with_capacity(node.len() + HEADER_TAIL);
    header.extend_from_slice(node);
    header.push((len / 256) as u8);
    header.push((len % 256) as u8);
    header.push(command.byte());

    Ok((header, payload.to_vec()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Byte(u8),
    Length(u16),
    Ticks(u32),
    Bytes(Vec<u8>),
}

/// One entry of a frame layout: a name, a byte width and how to read those bytes.
///
/// `decode` is only ever handed exactly `width` bytes.
#[derive(Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub width: usize,
    pub decode: fn(&[u8]) -> Value,
}

impl Field {
    pub const fn new(name: &'static str, width: usize, decode: fn(&[u8]) -> Value) -> Self {
        Self {
            name,
            width,
            decode,
        }
    }

    pub const fn byte(name: &'static str) -> Self {
        Self::new(name, 1, decode_byte)
    }

    pub const fn ticks(name: &'static str) -> Self {
        Self::new(name, TICK_BYTES, decode_ticks)
    }

    pub const fn length(name: &'static str) -> Self {
        Self::new(name, 2, decode_length)
    }

    pub const fn bytes(name: &'static str, width: usize) -> Self {
        Self::new(name, width, decode_bytes)
    }
}

fn decode_byte(bytes: &[u8]) -> Value {
    Value::Byte(bytes[0])
}

fn decode_ticks(bytes: &[u8]) -> Value {
    Value::Ticks(unpack_ticks([bytes[0], bytes[1], bytes[2]]))
}

fn decode_length(bytes: &[u8]) -> Value {
    Value::Length(u16::from(bytes[0]) * 256 + u16::from(bytes[1]))
}

fn decode_bytes(bytes: &[u8]) -> Value {
    Value::Bytes(bytes.to_vec())
}

/// Decoded values keyed by field name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Fields(BTreeMap<&'static str, Value>);

impl Fields {
    pub fn get(&self, name: &'static str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn byte(&self, name: &'static str) -> Result<u8, ProtocolError> {
        match self.0.get(name) {
            Some(Value::Byte(value)) => Ok(*value),
            _ => Err(ProtocolError::MissingField(name)),
        }
    }

    pub fn length(&self, name: &'static str) -> Result<u16, ProtocolError> {
        match self.0.get(name) {
            Some(Value::Length(value)) => Ok(*value),
            _ => Err(ProtocolError::MissingField(name)),
        }
    }

    pub fn ticks(&self, name: &'static str) -> Result<u32, ProtocolError> {
        match self.0.get(name) {
            Some(Value::Ticks(value)) => Ok(*value),
            _ => Err(ProtocolError::MissingField(name)),
        }
    }

    pub fn bytes(&self, name: &'static str) -> Result<&[u8], ProtocolError> {
        match self.0.get(name) {
            Some(Value::Bytes(value)) => Ok(value),
            _ => Err(ProtocolError::MissingField(name)),
        }
    }
}

/// Walks `layout` over `bytes`, consuming each field's width in order.
/// Trailing bytes beyond the layout are ignored.
pub fn decode(bytes: &[u8], layout: &[Field]) -> Result<Fields, ProtocolError> {
    let mut fields = Fields::default();
    let mut rest = bytes;

    for field in layout {
        if rest.len() < field.width {
            return Err(ProtocolError::Truncated {
                field: field.name,
                expected: field.width,
                available: rest.len(),
            });
        }
        let (head, tail) = rest.split_at(field.width);
        fields.0.insert(field.name, (field.decode)(head));
        rest = tail;
    }

    Ok(fields)
}

pub fn header_layout(node_len: usize) -> [Field; 3] {
    [
        Field::bytes("node", node_len),
        Field::length("length"),
        Field::byte("command"),
    ]
}

pub const UPDATE_LAYOUT: [Field; 4] = [
    Field::byte("east_status"),
    Field::ticks("east_count"),
    Field::byte("west_status"),
    Field::ticks("west_count"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub node: Vec<u8>,
    pub length: u16,
    pub command: Command,
}

impl Header {
    pub fn size(node_len: usize) -> usize {
        node_len + HEADER_TAIL
    }

    pub fn decode(bytes: &[u8], node_len: usize) -> Result<Self, ProtocolError> {
        let fields = decode(bytes, &header_layout(node_len))?;
        Ok(Self {
            node: fields.bytes("node")?.to_vec(),
            length: fields.length("length")?,
            command: Command::try_from(fields.byte("command")?)?,
        })
    }
}

/// Status bytes and encoder counts of both arms, as carried by an update frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatePayload {
    pub east_status: u8,
    pub east_count: u32,
    pub west_status: u8,
    pub west_count: u32,
}

impl UpdatePayload {
    pub const SIZE: usize = 2 * (1 + TICK_BYTES);

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != Self::SIZE {
            return Err(ProtocolError::PayloadLength {
                command: Command::Update.as_char(),
                len: bytes.len(),
                expected: Self::SIZE,
            });
        }
        let fields = decode(bytes, &UPDATE_LAYOUT)?;
        Ok(Self {
            east_status: fields.byte("east_status")?,
            east_count: fields.ticks("east_count")?,
            west_status: fields.byte("west_status")?,
            west_count: fields.ticks("west_count")?,
        })
    }
}
