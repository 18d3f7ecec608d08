use std::collections::BTreeMap;

use bitcoin::bip32::KeySource;
use bitcoin::{PublicKey, ScriptBuf};

use super::{
    Map, decode_key_source, decode_pubkey, encode_key_source, expect_bare_key, insert_unique,
    script_pair, set_once,
};
use crate::consts::*;
use crate::error::{Location, MalformedError, ValidationError};
use crate::raw::{self, Pair, ProprietaryKey};
use crate::script;

/// Per-output PSBT map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub redeem_script: Option<ScriptBuf>,
    pub witness_script: Option<ScriptBuf>,
    pub bip32_derivation: BTreeMap<PublicKey, KeySource>,
    pub proprietary: BTreeMap<ProprietaryKey, Vec<u8>>,
    pub unknown: BTreeMap<raw::Key, Vec<u8>>,
}

/// A single entry destined for an [`Output`] map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputField {
    RedeemScript(ScriptBuf),
    WitnessScript(ScriptBuf),
    Bip32Derivation(PublicKey, KeySource),
    Proprietary(ProprietaryKey, Vec<u8>),
    Unknown(raw::Key, Vec<u8>),
}

impl OutputField {
    pub fn name(&self) -> &'static str {
        match self {
            OutputField::RedeemScript(_) => "redeem_script",
            OutputField::WitnessScript(_) => "witness_script",
            OutputField::Bip32Derivation(..) => "bip32_derivation",
            OutputField::Proprietary(..) => "proprietary",
            OutputField::Unknown(..) => "unknown",
        }
    }

    pub(crate) fn from_pair(pair: Pair, location: Location) -> Result<Self, MalformedError> {
        let Pair { key, value } = pair;
        let field = match key.type_value {
            PSBT_OUT_REDEEM_SCRIPT => {
                expect_bare_key(&key, location)?;
                OutputField::RedeemScript(ScriptBuf::from_bytes(value))
            }
            PSBT_OUT_WITNESS_SCRIPT => {
                expect_bare_key(&key, location)?;
                OutputField::WitnessScript(ScriptBuf::from_bytes(value))
            }
            PSBT_OUT_BIP32_DERIVATION => {
                let pubkey = decode_pubkey(&key, location)?;
                OutputField::Bip32Derivation(pubkey, decode_key_source(&value, location, "bip32_derivation")?)
            }
            PSBT_OUT_PROPRIETARY => {
                OutputField::Proprietary(ProprietaryKey::from_key_data(&key.key)?, value)
            }
            _ => OutputField::Unknown(key, value),
        };
        Ok(field)
    }
}

impl Output {
    pub(crate) fn insert(&mut self, location: Location, field: OutputField) -> Result<(), ValidationError> {
        let name = field.name();
        match field {
            OutputField::RedeemScript(script) => {
                if script.is_empty() {
                    return Err(ValidationError::new(location, name, "empty script"));
                }
                set_once(&mut self.redeem_script, script, location, name)
            }
            OutputField::WitnessScript(script) => {
                script::check_witness_script(&script)
                    .map_err(|reason| ValidationError::new(location, name, reason))?;
                set_once(&mut self.witness_script, script, location, name)
            }
            OutputField::Bip32Derivation(pubkey, source) => {
                insert_unique(&mut self.bip32_derivation, pubkey, source, location, name)
            }
            OutputField::Proprietary(key, value) => {
                insert_unique(&mut self.proprietary, key, value, location, name)
            }
            OutputField::Unknown(key, value) => {
                if matches!(
                    key.type_value,
                    PSBT_OUT_REDEEM_SCRIPT..=PSBT_OUT_BIP32_DERIVATION | PSBT_OUT_PROPRIETARY
                ) {
                    return Err(ValidationError::new(location, name, "key type is reserved"));
                }
                insert_unique(&mut self.unknown, key, value, location, name)
            }
        }
    }

    pub(crate) fn decode(pairs: Vec<Pair>, index: usize) -> Result<Self, crate::Error> {
        let location = Location::Output(index);
        let mut output = Output::default();
        for pair in pairs {
            output.insert(location, OutputField::from_pair(pair, location)?)?;
        }
        Ok(output)
    }
}

impl Map for Output {
    fn get_pairs(&self) -> Vec<Pair> {
        let mut pairs = Vec::new();
        if let Some(script) = &self.redeem_script {
            pairs.push(script_pair(PSBT_OUT_REDEEM_SCRIPT, script));
        }
        if let Some(script) = &self.witness_script {
            pairs.push(script_pair(PSBT_OUT_WITNESS_SCRIPT, script));
        }
        for (pubkey, source) in &self.bip32_derivation {
            pairs.push(Pair::new(
                raw::Key::new(PSBT_OUT_BIP32_DERIVATION, pubkey.to_bytes()),
                encode_key_source(source),
            ));
        }
        for (key, value) in &self.proprietary {
            pairs.push(Pair::new(raw::Key::new(PSBT_OUT_PROPRIETARY, key.to_key_data()), value.clone()));
        }
        for (key, value) in &self.unknown {
            pairs.push(Pair::new(key.clone(), value.clone()));
        }
        pairs
    }
}
