//! Combiner: merges PSBTs describing the same transaction.
//!
//! Every key class is unioned. When both sides hold an entry under the same
//! key, the one already in `self` wins.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::map::{Global, Input, Output};
use crate::psbt::Psbt;

fn merge<K: Ord, V>(into: &mut BTreeMap<K, V>, from: BTreeMap<K, V>) {
    for (key, value) in from {
        into.entry(key).or_insert(value);
    }
}

fn merge_option<T>(into: &mut Option<T>, from: Option<T>) {
    if into.is_none() {
        *into = from;
    }
}

impl Global {
    fn combine(&mut self, other: Global) {
        merge_option(&mut self.version, other.version);
        merge(&mut self.xpub, other.xpub);
        merge(&mut self.proprietary, other.proprietary);
        merge(&mut self.unknown, other.unknown);
    }
}

impl Input {
    fn combine(&mut self, other: Input) {
        merge_option(&mut self.non_witness_utxo, other.non_witness_utxo);
        merge_option(&mut self.witness_utxo, other.witness_utxo);
        merge(&mut self.partial_sigs, other.partial_sigs);
        merge_option(&mut self.sighash_type, other.sighash_type);
        merge_option(&mut self.redeem_script, other.redeem_script);
        merge_option(&mut self.witness_script, other.witness_script);
        merge(&mut self.bip32_derivation, other.bip32_derivation);
        merge_option(&mut self.final_script_sig, other.final_script_sig);
        merge_option(&mut self.final_script_witness, other.final_script_witness);
        merge_option(&mut self.por_commitment, other.por_commitment);
        merge(&mut self.proprietary, other.proprietary);
        merge(&mut self.unknown, other.unknown);
    }
}

impl Output {
    fn combine(&mut self, other: Output) {
        merge_option(&mut self.redeem_script, other.redeem_script);
        merge_option(&mut self.witness_script, other.witness_script);
        merge(&mut self.bip32_derivation, other.bip32_derivation);
        merge(&mut self.proprietary, other.proprietary);
        merge(&mut self.unknown, other.unknown);
    }
}

impl Psbt {
    /// Merges `other` into `self`.
    ///
    /// Fails with [`Error::UnsignedTxMismatch`] unless both PSBTs carry the same
    /// unsigned transaction.
    pub fn combine(&mut self, other: Psbt) -> Result<()> {
        if self.global.unsigned_tx != other.global.unsigned_tx {
            return Err(Error::UnsignedTxMismatch);
        }

        let Psbt {
            global,
            inputs,
            outputs,
            ..
        } = other;

        self.global.combine(global);
        for (input, other) in self.inputs.iter_mut().zip(inputs) {
            input.combine(other);
        }
        for (output, other) in self.outputs.iter_mut().zip(outputs) {
            output.combine(other);
        }
        self.invalidate_fee_cache();

        debug!(inputs = self.inputs.len(), outputs = self.outputs.len(), "combined psbt");
        Ok(())
    }
}
