use std::collections::BTreeMap;

use bitcoin::bip32::{KeySource, Xpub};
use bitcoin::consensus::encode::{deserialize_partial, serialize};
use bitcoin::transaction::Version;
use bitcoin::{Transaction, TxIn, TxOut, absolute};

use super::{Map, decode_key_source, encode_key_source, expect_bare_key, insert_unique, invalid_key};
use crate::consts::*;
use crate::error::{Location, MalformedError, ValidationError};
use crate::raw::{self, Pair, ProprietaryKey};

const LOCATION: Location = Location::Global;

/// The global PSBT map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    /// The transaction being built. Its scriptSigs and witnesses are always empty.
    pub unsigned_tx: Transaction,
    /// Explicit `PSBT_GLOBAL_VERSION` entry, if one was present.
    pub version: Option<u32>,
    pub xpub: BTreeMap<Xpub, KeySource>,
    pub proprietary: BTreeMap<ProprietaryKey, Vec<u8>>,
    pub unknown: BTreeMap<raw::Key, Vec<u8>>,
}

/// A single entry destined for the [`Global`] map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalField {
    Xpub(Xpub, KeySource),
    Version(u32),
    Proprietary(ProprietaryKey, Vec<u8>),
    Unknown(raw::Key, Vec<u8>),
}

impl GlobalField {
    pub fn name(&self) -> &'static str {
        match self {
            GlobalField::Xpub(..) => "xpub",
            GlobalField::Version(_) => "version",
            GlobalField::Proprietary(..) => "proprietary",
            GlobalField::Unknown(..) => "unknown",
        }
    }

    fn from_pair(pair: Pair) -> Result<Self, MalformedError> {
        let Pair { key, value } = pair;
        let field = match key.type_value {
            PSBT_GLOBAL_XPUB => {
                let xpub = Xpub::decode(&key.key).map_err(|_| invalid_key(&key, LOCATION))?;
                GlobalField::Xpub(xpub, decode_key_source(&value, LOCATION, "xpub")?)
            }
            PSBT_GLOBAL_VERSION => {
                expect_bare_key(&key, LOCATION)?;
                let raw: [u8; 4] = value.as_slice().try_into().map_err(|_| {
                    MalformedError::InvalidValue {
                        location: LOCATION,
                        field: "version",
                        reason: format!("expected 4 bytes, got {}", value.len()),
                    }
                })?;
                let version = u32::from_le_bytes(raw);
                if version > PSBT_HIGHEST_VERSION {
                    return Err(MalformedError::UnsupportedVersion(version));
                }
                GlobalField::Version(version)
            }
            PSBT_GLOBAL_PROPRIETARY => {
                GlobalField::Proprietary(ProprietaryKey::from_key_data(&key.key)?, value)
            }
            _ => GlobalField::Unknown(key, value),
        };
        Ok(field)
    }
}

impl Global {
    pub(crate) fn new(unsigned_tx: Transaction) -> Self {
        Self {
            unsigned_tx,
            version: None,
            xpub: BTreeMap::new(),
            proprietary: BTreeMap::new(),
            unknown: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, field: GlobalField) -> Result<(), ValidationError> {
        let name = field.name();
        match field {
            GlobalField::Xpub(xpub, source) => insert_unique(&mut self.xpub, xpub, source, LOCATION, name),
            GlobalField::Version(version) => {
                if version > PSBT_HIGHEST_VERSION {
                    return Err(ValidationError::new(LOCATION, name, format!("unsupported version {}", version)));
                }
                super::set_once(&mut self.version, version, LOCATION, name)
            }
            GlobalField::Proprietary(key, value) => {
                insert_unique(&mut self.proprietary, key, value, LOCATION, name)
            }
            GlobalField::Unknown(key, value) => {
                if matches!(
                    key.type_value,
                    PSBT_GLOBAL_UNSIGNED_TX | PSBT_GLOBAL_XPUB | PSBT_GLOBAL_VERSION | PSBT_GLOBAL_PROPRIETARY
                ) {
                    return Err(ValidationError::new(LOCATION, name, "key type is reserved"));
                }
                insert_unique(&mut self.unknown, key, value, LOCATION, name)
            }
        }
    }

    pub(crate) fn decode(pairs: Vec<Pair>) -> Result<Self, crate::Error> {
        let mut unsigned_tx = None;
        let mut fields = Vec::new();
        for pair in pairs {
            if pair.key.type_value == PSBT_GLOBAL_UNSIGNED_TX {
                expect_bare_key(&pair.key, LOCATION)?;
                let tx = decode_unsigned_tx(&pair.value)?;
                super::set_once(&mut unsigned_tx, tx, LOCATION, "unsigned_tx")?;
            } else {
                fields.push(GlobalField::from_pair(pair)?);
            }
        }

        let unsigned_tx =
            unsigned_tx.ok_or_else(|| ValidationError::new(LOCATION, "unsigned_tx", "missing"))?;
        check_unsigned_tx(&unsigned_tx)?;

        let mut global = Global::new(unsigned_tx);
        for field in fields {
            global.insert(field)?;
        }
        Ok(global)
    }
}

/// Rejects transactions carrying scriptSigs or witnesses.
pub(crate) fn check_unsigned_tx(tx: &Transaction) -> Result<(), ValidationError> {
    for (index, txin) in tx.input.iter().enumerate() {
        if !txin.script_sig.is_empty() {
            return Err(ValidationError::new(
                LOCATION,
                "unsigned_tx",
                format!("input {} has a scriptSig", index),
            ));
        }
        if !txin.witness.is_empty() {
            return Err(ValidationError::new(
                LOCATION,
                "unsigned_tx",
                format!("input {} has a witness", index),
            ));
        }
    }
    Ok(())
}

// Field by field, so a transaction without inputs is never mistaken for a segwit
// marker.
fn encode_unsigned_tx(tx: &Transaction) -> Vec<u8> {
    let mut value = serialize(&tx.version);
    value.extend(serialize(&tx.input));
    value.extend(serialize(&tx.output));
    value.extend(serialize(&tx.lock_time));
    value
}

fn decode_unsigned_tx(value: &[u8]) -> Result<Transaction, MalformedError> {
    let invalid = |reason: String| MalformedError::InvalidValue {
        location: LOCATION,
        field: "unsigned_tx",
        reason,
    };

    let (version, mut consumed) =
        deserialize_partial::<Version>(value).map_err(|e| invalid(e.to_string()))?;
    let (input, n) =
        deserialize_partial::<Vec<TxIn>>(&value[consumed..]).map_err(|e| invalid(e.to_string()))?;
    consumed += n;
    let (output, n) =
        deserialize_partial::<Vec<TxOut>>(&value[consumed..]).map_err(|e| invalid(e.to_string()))?;
    consumed += n;
    let (lock_time, n) = deserialize_partial::<absolute::LockTime>(&value[consumed..])
        .map_err(|e| invalid(e.to_string()))?;
    consumed += n;

    if consumed != value.len() {
        return Err(invalid(format!("{} trailing bytes", value.len() - consumed)));
    }

    Ok(Transaction {
        version,
        lock_time,
        input,
        output,
    })
}

impl Map for Global {
    fn get_pairs(&self) -> Vec<Pair> {
        let mut pairs = vec![Pair::new(
            raw::Key::from_type(PSBT_GLOBAL_UNSIGNED_TX),
            encode_unsigned_tx(&self.unsigned_tx),
        )];
        for (xpub, source) in &self.xpub {
            pairs.push(Pair::new(
                raw::Key::new(PSBT_GLOBAL_XPUB, xpub.encode().to_vec()),
                encode_key_source(source),
            ));
        }
        if let Some(version) = self.version {
            pairs.push(Pair::new(
                raw::Key::from_type(PSBT_GLOBAL_VERSION),
                version.to_le_bytes().to_vec(),
            ));
        }
        for (key, value) in &self.proprietary {
            pairs.push(Pair::new(raw::Key::new(PSBT_GLOBAL_PROPRIETARY, key.to_key_data()), value.clone()));
        }
        for (key, value) in &self.unknown {
            pairs.push(Pair::new(key.clone(), value.clone()));
        }
        pairs
    }
}
