use std::collections::BTreeMap;

use bitcoin::bip32::KeySource;
use bitcoin::consensus::serialize;
use bitcoin::{EcdsaSighashType, PublicKey, ScriptBuf, Transaction, TxOut, Witness, ecdsa};

use super::{
    Map, decode_key_source, decode_pubkey, decode_value, encode_key_source, expect_bare_key,
    insert_unique, script_pair, set_once,
};
use crate::consts::*;
use crate::error::{Location, MalformedError, ValidationError};
use crate::raw::{self, Pair, ProprietaryKey};
use crate::script;

/// Per-input PSBT map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Input {
    /// The full previous transaction, for non-witness spends.
    pub non_witness_utxo: Option<Transaction>,
    /// The spent output, for witness spends.
    pub witness_utxo: Option<TxOut>,
    pub partial_sigs: BTreeMap<PublicKey, ecdsa::Signature>,
    /// Sighash type the signers are asked to use. `ALL` when absent.
    pub sighash_type: Option<EcdsaSighashType>,
    pub redeem_script: Option<ScriptBuf>,
    pub witness_script: Option<ScriptBuf>,
    pub bip32_derivation: BTreeMap<PublicKey, KeySource>,
    pub final_script_sig: Option<ScriptBuf>,
    pub final_script_witness: Option<Witness>,
    /// Proof-of-reserves commitment (UTF-8).
    pub por_commitment: Option<String>,
    pub proprietary: BTreeMap<ProprietaryKey, Vec<u8>>,
    pub unknown: BTreeMap<raw::Key, Vec<u8>>,
}

/// A single entry destined for an [`Input`] map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputField {
    NonWitnessUtxo(Transaction),
    WitnessUtxo(TxOut),
    PartialSig(PublicKey, ecdsa::Signature),
    SighashType(EcdsaSighashType),
    RedeemScript(ScriptBuf),
    WitnessScript(ScriptBuf),
    Bip32Derivation(PublicKey, KeySource),
    FinalScriptSig(ScriptBuf),
    FinalScriptWitness(Witness),
    PorCommitment(String),
    Proprietary(ProprietaryKey, Vec<u8>),
    Unknown(raw::Key, Vec<u8>),
}

impl InputField {
    pub fn name(&self) -> &'static str {
        match self {
            InputField::NonWitnessUtxo(_) => "non_witness_utxo",
            InputField::WitnessUtxo(_) => "witness_utxo",
            InputField::PartialSig(..) => "partial_sig",
            InputField::SighashType(_) => "sighash_type",
            InputField::RedeemScript(_) => "redeem_script",
            InputField::WitnessScript(_) => "witness_script",
            InputField::Bip32Derivation(..) => "bip32_derivation",
            InputField::FinalScriptSig(_) => "final_script_sig",
            InputField::FinalScriptWitness(_) => "final_script_witness",
            InputField::PorCommitment(_) => "por_commitment",
            InputField::Proprietary(..) => "proprietary",
            InputField::Unknown(..) => "unknown",
        }
    }

    pub(crate) fn from_pair(pair: Pair, location: Location) -> Result<Self, MalformedError> {
        let Pair { key, value } = pair;
        let field = match key.type_value {
            PSBT_IN_NON_WITNESS_UTXO => {
                expect_bare_key(&key, location)?;
                InputField::NonWitnessUtxo(decode_value(&value, location, "non_witness_utxo")?)
            }
            PSBT_IN_WITNESS_UTXO => {
                expect_bare_key(&key, location)?;
                InputField::WitnessUtxo(decode_value(&value, location, "witness_utxo")?)
            }
            PSBT_IN_PARTIAL_SIG => {
                let pubkey = decode_pubkey(&key, location)?;
                let sig = ecdsa::Signature::from_slice(&value).map_err(|e| {
                    MalformedError::InvalidValue {
                        location,
                        field: "partial_sig",
                        reason: e.to_string(),
                    }
                })?;
                InputField::PartialSig(pubkey, sig)
            }
            PSBT_IN_SIGHASH_TYPE => {
                expect_bare_key(&key, location)?;
                let raw: [u8; 4] = value.as_slice().try_into().map_err(|_| {
                    MalformedError::InvalidValue {
                        location,
                        field: "sighash_type",
                        reason: format!("expected 4 bytes, got {}", value.len()),
                    }
                })?;
                let sighash = EcdsaSighashType::from_standard(u32::from_le_bytes(raw)).map_err(
                    |e| MalformedError::InvalidValue {
                        location,
                        field: "sighash_type",
                        reason: e.to_string(),
                    },
                )?;
                InputField::SighashType(sighash)
            }
            PSBT_IN_REDEEM_SCRIPT => {
                expect_bare_key(&key, location)?;
                InputField::RedeemScript(ScriptBuf::from_bytes(value))
            }
            PSBT_IN_WITNESS_SCRIPT => {
                expect_bare_key(&key, location)?;
                InputField::WitnessScript(ScriptBuf::from_bytes(value))
            }
            PSBT_IN_BIP32_DERIVATION => {
                let pubkey = decode_pubkey(&key, location)?;
                let source = decode_key_source(&value, location, "bip32_derivation")?;
                InputField::Bip32Derivation(pubkey, source)
            }
            PSBT_IN_FINAL_SCRIPTSIG => {
                expect_bare_key(&key, location)?;
                InputField::FinalScriptSig(ScriptBuf::from_bytes(value))
            }
            PSBT_IN_FINAL_SCRIPTWITNESS => {
                expect_bare_key(&key, location)?;
                InputField::FinalScriptWitness(decode_value(&value, location, "final_script_witness")?)
            }
            PSBT_IN_POR_COMMITMENT => {
                expect_bare_key(&key, location)?;
                let commitment = String::from_utf8(value).map_err(|e| MalformedError::InvalidValue {
                    location,
                    field: "por_commitment",
                    reason: e.to_string(),
                })?;
                InputField::PorCommitment(commitment)
            }
            PSBT_IN_PROPRIETARY => {
                InputField::Proprietary(ProprietaryKey::from_key_data(&key.key)?, value)
            }
            _ => InputField::Unknown(key, value),
        };
        Ok(field)
    }
}

fn is_known_type(type_value: u8) -> bool {
    matches!(type_value, PSBT_IN_NON_WITNESS_UTXO..=PSBT_IN_POR_COMMITMENT | PSBT_IN_PROPRIETARY)
}

impl Input {
    /// Adds one entry, enforcing the uniqueness rule of its key class.
    pub(crate) fn insert(&mut self, location: Location, field: InputField) -> Result<(), ValidationError> {
        let name = field.name();
        match field {
            InputField::NonWitnessUtxo(tx) => set_once(&mut self.non_witness_utxo, tx, location, name),
            InputField::WitnessUtxo(txout) => set_once(&mut self.witness_utxo, txout, location, name),
            InputField::PartialSig(pubkey, sig) => {
                insert_unique(&mut self.partial_sigs, pubkey, sig, location, name)
            }
            InputField::SighashType(sighash) => set_once(&mut self.sighash_type, sighash, location, name),
            InputField::RedeemScript(script) => {
                if script.is_empty() {
                    return Err(ValidationError::new(location, name, "empty script"));
                }
                set_once(&mut self.redeem_script, script, location, name)
            }
            InputField::WitnessScript(script) => {
                script::check_witness_script(&script)
                    .map_err(|reason| ValidationError::new(location, name, reason))?;
                set_once(&mut self.witness_script, script, location, name)
            }
            InputField::Bip32Derivation(pubkey, source) => {
                insert_unique(&mut self.bip32_derivation, pubkey, source, location, name)
            }
            InputField::FinalScriptSig(script) => set_once(&mut self.final_script_sig, script, location, name),
            InputField::FinalScriptWitness(witness) => {
                set_once(&mut self.final_script_witness, witness, location, name)
            }
            InputField::PorCommitment(commitment) => {
                set_once(&mut self.por_commitment, commitment, location, name)
            }
            InputField::Proprietary(key, value) => {
                insert_unique(&mut self.proprietary, key, value, location, name)
            }
            InputField::Unknown(key, value) => {
                if is_known_type(key.type_value) {
                    return Err(ValidationError::new(location, name, "key type is reserved"));
                }
                insert_unique(&mut self.unknown, key, value, location, name)
            }
        }
    }

    pub(crate) fn decode(pairs: Vec<Pair>, index: usize) -> Result<Self, crate::Error> {
        let location = Location::Input(index);
        let mut input = Input::default();
        for pair in pairs {
            input.insert(location, InputField::from_pair(pair, location)?)?;
        }
        Ok(input)
    }

    /// True once the input carries its final scriptSig or witness.
    pub fn is_finalized(&self) -> bool {
        self.final_script_sig.is_some() || self.final_script_witness.is_some()
    }

    /// True if the input holds any signature, partial or final.
    pub fn has_signatures(&self) -> bool {
        !self.partial_sigs.is_empty() || self.is_finalized()
    }

    /// Drops everything a finalized input no longer needs, keeping the UTXOs, the
    /// final scripts, proprietary and unknown entries.
    pub(crate) fn clear_finalized(&mut self) {
        self.partial_sigs.clear();
        self.sighash_type = None;
        self.redeem_script = None;
        self.witness_script = None;
        self.bip32_derivation.clear();
        self.por_commitment = None;
    }
}

impl Map for Input {
    fn get_pairs(&self) -> Vec<Pair> {
        let mut pairs = Vec::new();

        if let Some(tx) = &self.non_witness_utxo {
            pairs.push(Pair::new(raw::Key::from_type(PSBT_IN_NON_WITNESS_UTXO), serialize(tx)));
        }
        if let Some(txout) = &self.witness_utxo {
            pairs.push(Pair::new(raw::Key::from_type(PSBT_IN_WITNESS_UTXO), serialize(txout)));
        }
        for (pubkey, sig) in &self.partial_sigs {
            pairs.push(Pair::new(
                raw::Key::new(PSBT_IN_PARTIAL_SIG, pubkey.to_bytes()),
                sig.serialize().to_vec(),
            ));
        }
        if let Some(sighash) = &self.sighash_type {
            pairs.push(Pair::new(
                raw::Key::from_type(PSBT_IN_SIGHASH_TYPE),
                sighash.to_u32().to_le_bytes().to_vec(),
            ));
        }
        if let Some(script) = &self.redeem_script {
            pairs.push(script_pair(PSBT_IN_REDEEM_SCRIPT, script));
        }
        if let Some(script) = &self.witness_script {
            pairs.push(script_pair(PSBT_IN_WITNESS_SCRIPT, script));
        }
        for (pubkey, source) in &self.bip32_derivation {
            pairs.push(Pair::new(
                raw::Key::new(PSBT_IN_BIP32_DERIVATION, pubkey.to_bytes()),
                encode_key_source(source),
            ));
        }
        if let Some(script) = &self.final_script_sig {
            pairs.push(script_pair(PSBT_IN_FINAL_SCRIPTSIG, script));
        }
        if let Some(witness) = &self.final_script_witness {
            pairs.push(Pair::new(raw::Key::from_type(PSBT_IN_FINAL_SCRIPTWITNESS), serialize(witness)));
        }
        if let Some(commitment) = &self.por_commitment {
            pairs.push(Pair::new(
                raw::Key::from_type(PSBT_IN_POR_COMMITMENT),
                commitment.as_bytes().to_vec(),
            ));
        }
        for (key, value) in &self.proprietary {
            pairs.push(Pair::new(raw::Key::new(PSBT_IN_PROPRIETARY, key.to_key_data()), value.clone()));
        }
        for (key, value) in &self.unknown {
            pairs.push(Pair::new(key.clone(), value.clone()));
        }

        pairs
    }
}
