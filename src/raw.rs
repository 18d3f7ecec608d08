//! Raw key-value pairs of the BIP174 grammar.
//!
//! Every map of a PSBT is a sequence of
//! `<compact size keylen><keytype><keydata><compact size valuelen><value>` entries
//! terminated by a single `0x00` byte. This module reads and writes that framing;
//! the meaning of the individual keys lives in [`crate::map`].

use core::fmt;

use bitcoin::consensus::encode::{self, VarInt};
use bitcoin::hex::DisplayHex;

use crate::error::{Location, MalformedError};

/// A PSBT key: the key type byte followed by optional key data.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    pub type_value: u8,
    pub key: Vec<u8>,
}

impl Key {
    pub fn new(type_value: u8, key: Vec<u8>) -> Self {
        Self { type_value, key }
    }

    /// A key consisting of the type byte only.
    pub fn from_type(type_value: u8) -> Self {
        Self::new(type_value, Vec::new())
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.key.len());
        bytes.push(self.type_value);
        bytes.extend_from_slice(&self.key);
        bytes
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type: {:#04x}, key: {}", self.type_value, self.key.to_lower_hex_string())
    }
}

/// A key together with its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub key: Key,
    pub value: Vec<u8>,
}

impl Pair {
    pub fn new(key: Key, value: Vec<u8>) -> Self {
        Self { key, value }
    }

    pub(crate) fn encode_to(&self, buf: &mut Vec<u8>) {
        let key = self.key.to_bytes();
        write_compact_size(buf, key.len() as u64);
        buf.extend_from_slice(&key);
        write_compact_size(buf, self.value.len() as u64);
        buf.extend_from_slice(&self.value);
    }
}

/// Key data of a proprietary entry: `<identifier><subtype><subkeydata>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProprietaryKey {
    pub prefix: Vec<u8>,
    pub subtype: u64,
    pub key: Vec<u8>,
}

impl ProprietaryKey {
    pub fn new(prefix: Vec<u8>, subtype: u64, key: Vec<u8>) -> Self {
        Self {
            prefix,
            subtype,
            key,
        }
    }

    pub(crate) fn from_key_data(data: &[u8]) -> Result<Self, MalformedError> {
        let mut decoder = Decoder::new(data);
        let prefix_len = decoder.read_compact_size("proprietary identifier length")?;
        let prefix = decoder.read_bytes(prefix_len, "proprietary identifier")?.to_vec();
        let subtype = decoder.read_compact_size("proprietary subtype")?;
        let key = decoder.rest().to_vec();
        Ok(Self {
            prefix,
            subtype,
            key,
        })
    }

    pub(crate) fn to_key_data(&self) -> Vec<u8> {
        let mut data = Vec::new();
        write_compact_size(&mut data, self.prefix.len() as u64);
        data.extend_from_slice(&self.prefix);
        write_compact_size(&mut data, self.subtype);
        data.extend_from_slice(&self.key);
        data
    }
}

pub(crate) fn write_compact_size(buf: &mut Vec<u8>, n: u64) {
    buf.extend_from_slice(&encode::serialize(&VarInt(n)));
}

/// Writes the zero-length key closing a map.
pub(crate) fn write_terminator(buf: &mut Vec<u8>) {
    buf.push(0x00);
}

/// Forward-only reader over a byte slice.
pub(crate) struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let rest = self.data;
        self.data = &[];
        rest
    }

    pub(crate) fn read_compact_size(&mut self, what: &'static str) -> Result<u64, MalformedError> {
        let needed = match self.data.first() {
            None => return Err(MalformedError::Truncated(what)),
            Some(0xfd) => 3,
            Some(0xfe) => 5,
            Some(0xff) => 9,
            Some(_) => 1,
        };
        if self.data.len() < needed {
            return Err(MalformedError::Truncated(what));
        }
        let (VarInt(n), consumed) = encode::deserialize_partial::<VarInt>(self.data)
            .map_err(|_| MalformedError::InvalidCompactSize)?;
        self.data = &self.data[consumed..];
        Ok(n)
    }

    pub(crate) fn read_bytes(&mut self, len: u64, what: &'static str) -> Result<&'a [u8], MalformedError> {
        let len = usize::try_from(len).map_err(|_| MalformedError::Truncated(what))?;
        if self.data.len() < len {
            return Err(MalformedError::Truncated(what));
        }
        let (bytes, rest) = self.data.split_at(len);
        self.data = rest;
        Ok(bytes)
    }

    /// Reads one map up to and including its terminator.
    ///
    /// Pairs are returned in stream order; duplicate detection is left to the
    /// typed maps.
    pub(crate) fn read_map(&mut self, location: Location) -> Result<Vec<Pair>, MalformedError> {
        let mut pairs = Vec::new();
        loop {
            if self.data.is_empty() {
                return Err(MalformedError::MissingTerminator(location));
            }
            let key_len = self.read_compact_size("key length")?;
            if key_len == 0 {
                return Ok(pairs);
            }
            let key = self.read_bytes(key_len, "key")?;
            let value_len = self.read_compact_size("value length")?;
            let value = self.read_bytes(value_len, "value")?;
            pairs.push(Pair::new(Key::new(key[0], key[1..].to_vec()), value.to_vec()));
        }
    }
}
