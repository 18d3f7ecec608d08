//! Updater: typed additions to the maps, key-presence queries.

use bitcoin::{OutPoint, PublicKey, Script, ScriptBuf};

use crate::error::{Error, Location, Result};
use crate::keys::{HdSigner, Signer};
use crate::map::{GlobalField, InputField, OutputField};
use crate::psbt::Psbt;
use crate::script;

impl Psbt {
    /// Adds entries to the global map. All or nothing.
    pub fn update_global(&mut self, fields: impl IntoIterator<Item = GlobalField>) -> Result<()> {
        let mut global = self.global.clone();
        for field in fields {
            global.insert(field)?;
        }
        self.global = global;
        Ok(())
    }

    /// Adds entries to input `index`. All or nothing.
    pub fn update_input(
        &mut self,
        index: usize,
        fields: impl IntoIterator<Item = InputField>,
    ) -> Result<()> {
        let previous_output = self.tx_input(index)?.previous_output;
        let mut input = self.input(index)?.clone();
        for field in fields {
            self.check_input_field(index, &previous_output, &field)?;
            input.insert(Location::Input(index), field)?;
        }
        *self.input_mut(index)? = input;
        Ok(())
    }

    /// Adds entries to output `index`. All or nothing.
    pub fn update_output(
        &mut self,
        index: usize,
        fields: impl IntoIterator<Item = OutputField>,
    ) -> Result<()> {
        let mut output = self.output(index)?.clone();
        for field in fields {
            output.insert(Location::Output(index), field)?;
        }
        *self.output_mut(index)? = output;
        Ok(())
    }

    pub(crate) fn check_input_field(
        &self,
        index: usize,
        previous_output: &OutPoint,
        field: &InputField,
    ) -> Result<()> {
        if let InputField::NonWitnessUtxo(tx) = field {
            if tx.compute_txid() != previous_output.txid {
                return Err(Error::NonWitnessUtxoMismatch(index));
            }
        }
        Ok(())
    }

    fn tx_input(&self, index: usize) -> Result<&bitcoin::TxIn> {
        self.global.unsigned_tx.input.get(index).ok_or(Error::InputIndex(index))
    }

    /// The script locking the spent output, if the input carries a UTXO.
    pub(crate) fn prevout_script(&self, index: usize) -> Result<Option<ScriptBuf>> {
        let input = self.input(index)?;
        if let Some(txout) = &input.witness_utxo {
            return Ok(Some(txout.script_pubkey.clone()));
        }
        let vout = self.tx_input(index)?.previous_output.vout as usize;
        Ok(input
            .non_witness_utxo
            .as_ref()
            .and_then(|tx| tx.output.get(vout))
            .map(|txout| txout.script_pubkey.clone()))
    }

    /// True if `pubkey` appears in the script input `index` must satisfy.
    pub fn input_has_pubkey(&self, index: usize, pubkey: &PublicKey) -> Result<bool> {
        let input = self.input(index)?;
        let script = match (&input.witness_script, &input.redeem_script) {
            (Some(script), _) | (None, Some(script)) => script.clone(),
            (None, None) => match self.prevout_script(index)? {
                Some(script) => script,
                None => return Err(Error::MissingUtxo(index)),
            },
        };
        Ok(script::pubkey_in_script(pubkey, &script))
    }

    /// True if `pubkey` appears in the script output `index` pays to.
    pub fn output_has_pubkey(&self, index: usize, pubkey: &PublicKey) -> Result<bool> {
        let output = self.output(index)?;
        let script: &Script = match (&output.witness_script, &output.redeem_script) {
            (Some(script), _) | (None, Some(script)) => script.as_script(),
            (None, None) => self.global.unsigned_tx.output[index].script_pubkey.as_script(),
        };
        Ok(script::pubkey_in_script(pubkey, script))
    }

    /// True if one of the input's derivations belongs to `key`.
    pub fn input_has_hd_key(&self, index: usize, key: &impl HdSigner) -> Result<bool> {
        let input = self.input(index)?;
        has_hd_key(input.bip32_derivation.iter(), key)
    }

    /// True if one of the output's derivations belongs to `key`.
    pub fn output_has_hd_key(&self, index: usize, key: &impl HdSigner) -> Result<bool> {
        let output = self.output(index)?;
        has_hd_key(output.bip32_derivation.iter(), key)
    }
}

fn has_hd_key<'a>(
    derivations: impl Iterator<Item = (&'a PublicKey, &'a bitcoin::bip32::KeySource)>,
    key: &impl HdSigner,
) -> Result<bool> {
    let fingerprint = key.master_fingerprint();
    for (pubkey, (source_fingerprint, path)) in derivations {
        if *source_fingerprint != fingerprint {
            continue;
        }
        if let Some(derived) = key.derive_private_key(path)? {
            if Signer::public_key(&derived) == *pubkey {
                return Ok(true);
            }
        }
    }
    Ok(false)
}
