//! Typed PSBT maps.
//!
//! Each map keeps one ordered collection per key class and a separate bucket for
//! unrecognised keys, which are carried verbatim so that a PSBT produced by another
//! implementation survives a parse/serialize cycle. Entries enter a map through a
//! single `insert` per map type, shared by the decoder and the updater, so the
//! uniqueness rules are enforced in exactly one place.

mod global;
mod input;
mod output;

pub use self::global::{Global, GlobalField};
pub(crate) use self::global::check_unsigned_tx;
pub use self::input::{Input, InputField};
pub use self::output::{Output, OutputField};

use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, KeySource};
use bitcoin::consensus::{Decodable, deserialize};
use bitcoin::{PublicKey, ScriptBuf};

use crate::error::{Location, MalformedError, ValidationError};
use crate::raw::{self, Pair};

/// A map serializable to raw key-value pairs.
pub trait Map {
    /// Returns the pairs of this map in serialization order.
    fn get_pairs(&self) -> Vec<Pair>;

    /// Appends the serialized map, terminator included.
    fn encode_to(&self, buf: &mut Vec<u8>) {
        for pair in self.get_pairs() {
            pair.encode_to(buf);
        }
        raw::write_terminator(buf);
    }
}

pub(crate) fn encode_key_source((fingerprint, path): &KeySource) -> Vec<u8> {
    let mut value = fingerprint.to_bytes().to_vec();
    for child in path {
        value.extend_from_slice(&u32::from(*child).to_le_bytes());
    }
    value
}

pub(crate) fn decode_key_source(
    value: &[u8],
    location: Location,
    field: &'static str,
) -> Result<KeySource, MalformedError> {
    if value.len() < 4 || value.len() % 4 != 0 {
        return Err(MalformedError::InvalidValue {
            location,
            field,
            reason: format!("key origin of {} bytes", value.len()),
        });
    }
    let mut fingerprint = [0u8; 4];
    fingerprint.copy_from_slice(&value[..4]);
    let path: Vec<ChildNumber> = value[4..]
        .chunks_exact(4)
        .map(|c| ChildNumber::from(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
        .collect();
    Ok((Fingerprint::from(fingerprint), DerivationPath::from(path)))
}

pub(crate) fn decode_pubkey(key: &raw::Key, location: Location) -> Result<PublicKey, MalformedError> {
    PublicKey::from_slice(&key.key).map_err(|_| invalid_key(key, location))
}

pub(crate) fn decode_value<T: Decodable>(
    value: &[u8],
    location: Location,
    field: &'static str,
) -> Result<T, MalformedError> {
    deserialize(value).map_err(|e| MalformedError::InvalidValue {
        location,
        field,
        reason: e.to_string(),
    })
}

pub(crate) fn invalid_key(key: &raw::Key, location: Location) -> MalformedError {
    MalformedError::InvalidKey {
        location,
        key: key.to_string(),
    }
}

/// Single-valued keys carry no key data.
pub(crate) fn expect_bare_key(key: &raw::Key, location: Location) -> Result<(), MalformedError> {
    if key.key.is_empty() {
        Ok(())
    } else {
        Err(invalid_key(key, location))
    }
}

pub(crate) fn set_once<T>(
    slot: &mut Option<T>,
    value: T,
    location: Location,
    field: &'static str,
) -> Result<(), ValidationError> {
    if slot.is_some() {
        return Err(ValidationError::new(location, field, "duplicate entry"));
    }
    *slot = Some(value);
    Ok(())
}

pub(crate) fn insert_unique<K: Ord, V>(
    map: &mut std::collections::BTreeMap<K, V>,
    key: K,
    value: V,
    location: Location,
    field: &'static str,
) -> Result<(), ValidationError> {
    use std::collections::btree_map::Entry;

    match map.entry(key) {
        Entry::Vacant(entry) => {
            entry.insert(value);
            Ok(())
        }
        Entry::Occupied(_) => Err(ValidationError::new(location, field, "duplicate key")),
    }
}

pub(crate) fn script_pair(type_value: u8, script: &ScriptBuf) -> Pair {
    Pair::new(raw::Key::from_type(type_value), script.to_bytes())
}
