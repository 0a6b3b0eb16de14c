//! TLV (Type-Length-Value) codec used for the transportable form of PDUs.
//!
//! Wire format:
//! - Type: 1 byte
//! - Length: variable length number (1, 3, 5 or 9 bytes, big-endian)
//! - Value: `Length` bytes
//!
//! Integers inside values use the shortest of 1, 2, 4 or 8 big-endian bytes.

use crate::name::Name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvElement {
    pub type_: u8,
    pub value: Vec<u8>,
}

/// Errors that can occur during TLV decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TlvError {
    #[error("Buffer too short")]
    BufferTooShort,
    #[error("Unexpected TLV type: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedType { expected: u8, actual: u8 },
    #[error("Missing TLV element {0:#04x}")]
    Missing(u8),
    #[error("Invalid integer length: {0}")]
    InvalidInteger(usize),
    #[error("Trailing bytes after element: {0}")]
    TrailingBytes(usize),
}

impl TlvElement {
    pub fn new(type_: u8, value: Vec<u8>) -> Self {
        Self { type_, value }
    }

    pub fn encoded_length(&self) -> usize {
        1 + varnum_size(self.value.len() as u64) + self.value.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.encoded_length());
        self.encode_to(&mut buffer);
        buffer
    }

    pub fn encode_to(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.type_);
        write_varnum(self.value.len() as u64, buffer);
        buffer.extend_from_slice(&self.value);
    }

    /// Decode one element from the front of `data`, returning it with the
    /// number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), TlvError> {
        let (&type_, rest) = data.split_first().ok_or(TlvError::BufferTooShort)?;
        let (length, length_bytes) = read_varnum(rest)?;
        let length = usize::try_from(length).map_err(|_| TlvError::BufferTooShort)?;
        let start = 1 + length_bytes;
        let end = start.checked_add(length).ok_or(TlvError::BufferTooShort)?;
        if data.len() < end {
            return Err(TlvError::BufferTooShort);
        }
        Ok((TlvElement::new(type_, data[start..end].to_vec()), end))
    }

    /// Decode exactly one element of the given type, rejecting trailing bytes.
    pub fn decode_exact(data: &[u8], expected: u8) -> Result<Self, TlvError> {
        let (element, consumed) = Self::decode(data)?;
        if element.type_ != expected {
            return Err(TlvError::UnexpectedType {
                expected,
                actual: element.type_,
            });
        }
        if consumed != data.len() {
            return Err(TlvError::TrailingBytes(data.len() - consumed));
        }
        Ok(element)
    }
}

fn varnum_size(value: u64) -> usize {
    match value {
        0..=252 => 1,
        253..=0xFFFF => 3,
        0x1_0000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}

fn write_varnum(value: u64, buffer: &mut Vec<u8>) {
    match value {
        0..=252 => buffer.push(value as u8),
        253..=0xFFFF => {
            buffer.push(0xFD);
            buffer.extend_from_slice(&(value as u16).to_be_bytes());
        }
        0x1_0000..=0xFFFF_FFFF => {
            buffer.push(0xFE);
            buffer.extend_from_slice(&(value as u32).to_be_bytes());
        }
        _ => {
            buffer.push(0xFF);
            buffer.extend_from_slice(&value.to_be_bytes());
        }
    }
}

fn read_varnum(data: &[u8]) -> Result<(u64, usize), TlvError> {
    let (&first, rest) = data.split_first().ok_or(TlvError::BufferTooShort)?;
    let width = match first {
        0xFD => 2,
        0xFE => 4,
        0xFF => 8,
        short => return Ok((short as u64, 1)),
    };
    let bytes = rest.get(..width).ok_or(TlvError::BufferTooShort)?;
    Ok((be_to_u64(bytes), 1 + width))
}

fn be_to_u64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

/// Encode an unsigned integer in its shortest 1/2/4/8 byte form.
pub fn encode_integer(value: u64) -> Vec<u8> {
    if value <= u8::MAX as u64 {
        vec![value as u8]
    } else if value <= u16::MAX as u64 {
        (value as u16).to_be_bytes().to_vec()
    } else if value <= u32::MAX as u64 {
        (value as u32).to_be_bytes().to_vec()
    } else {
        value.to_be_bytes().to_vec()
    }
}

pub fn decode_integer(bytes: &[u8]) -> Result<u64, TlvError> {
    match bytes.len() {
        1 | 2 | 4 | 8 => Ok(be_to_u64(bytes)),
        other => Err(TlvError::InvalidInteger(other)),
    }
}

/// Sequential reader over the elements nested in one TLV value.
pub struct TlvReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> TlvReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn peek_type(&self) -> Option<u8> {
        self.data.get(self.offset).copied()
    }

    pub fn next_element(&mut self) -> Result<Option<TlvElement>, TlvError> {
        if self.is_empty() {
            return Ok(None);
        }
        let (element, consumed) = TlvElement::decode(&self.data[self.offset..])?;
        self.offset += consumed;
        Ok(Some(element))
    }

    /// Read the next element, which must have type `type_`.
    pub fn expect(&mut self, type_: u8) -> Result<Vec<u8>, TlvError> {
        match self.next_element()? {
            Some(element) if element.type_ == type_ => Ok(element.value),
            Some(element) => Err(TlvError::UnexpectedType {
                expected: type_,
                actual: element.type_,
            }),
            None => Err(TlvError::Missing(type_)),
        }
    }

    /// Read the next element only if it has type `type_`.
    pub fn optional(&mut self, type_: u8) -> Result<Option<Vec<u8>>, TlvError> {
        if self.peek_type() == Some(type_) {
            self.expect(type_).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Read every consecutive element of type `type_`.
    pub fn repeated(&mut self, type_: u8) -> Result<Vec<Vec<u8>>, TlvError> {
        let mut values = Vec::new();
        while let Some(value) = self.optional(type_)? {
            values.push(value);
        }
        Ok(values)
    }
}

pub fn encode_name(type_: u8, component_type: u8, name: &Name, buffer: &mut Vec<u8>) {
    let mut inner = Vec::new();
    for component in name {
        TlvElement::new(component_type, component.clone()).encode_to(&mut inner);
    }
    TlvElement::new(type_, inner).encode_to(buffer);
}

pub fn decode_name(value: &[u8], component_type: u8) -> Result<Name, TlvError> {
    let mut reader = TlvReader::new(value);
    let components = reader.repeated(component_type)?;
    if !reader.is_empty() {
        return Err(TlvError::TrailingBytes(value.len() - reader.offset));
    }
    Ok(Name { components })
}
