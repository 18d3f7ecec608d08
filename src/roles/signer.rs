//! Signer: sighash computation, partial signatures and their validation.

use bitcoin::bip32::DerivationPath;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::Message;
use bitcoin::sighash::SighashCache;
use bitcoin::{Amount, EcdsaSighashType, PrivateKey, PublicKey, ScriptBuf, TxOut, ecdsa};
use tracing::{debug, trace, warn};

use crate::error::{Error, Location, Result};
use crate::keys::{AsyncSigner, HdSigner, Signer, Verifier};
use crate::map::InputField;
use crate::psbt::Psbt;
use crate::script;

const DEFAULT_ALLOWED_SIGHASH: &[EcdsaSighashType] = &[EcdsaSighashType::All];

/// What a signature for one input commits to.
#[derive(Debug, Clone)]
struct SigningScript {
    /// The script the spend must satisfy: witness script, redeem script or the
    /// spent output's script, in that order of preference.
    script: ScriptBuf,
    value: Amount,
    segwit: bool,
}

impl Psbt {
    /// The output spent by input `index`.
    ///
    /// A non-witness UTXO must hash to the txid of the input's prevout and, when a
    /// witness UTXO is present too, both must describe the same output.
    pub(crate) fn resolve_utxo(&self, index: usize) -> Result<TxOut> {
        let input = self.input(index)?;
        let prevout = self.global.unsigned_tx.input[index].previous_output;

        if let Some(tx) = &input.non_witness_utxo {
            if tx.compute_txid() != prevout.txid {
                return Err(Error::NonWitnessUtxoMismatch(index));
            }
            let txout = tx
                .output
                .get(prevout.vout as usize)
                .ok_or(Error::MissingUtxo(index))?;
            if let Some(witness_utxo) = &input.witness_utxo {
                if witness_utxo != txout {
                    return Err(Error::WitnessUtxoMismatch(index));
                }
            }
            return Ok(txout.clone());
        }

        input.witness_utxo.clone().ok_or(Error::MissingUtxo(index))
    }

    fn signing_script(&self, index: usize) -> Result<SigningScript> {
        let input = self.input(index)?;
        let utxo = self.resolve_utxo(index)?;
        let location = Location::Input(index);

        let parent = match &input.redeem_script {
            Some(redeem) => {
                if ScriptBuf::new_p2sh(&redeem.script_hash()) != utxo.script_pubkey {
                    return Err(Error::ScriptMismatch {
                        location,
                        script: "Redeem",
                    });
                }
                redeem.clone()
            }
            None if utxo.script_pubkey.is_p2sh() => {
                return Err(Error::MissingScript {
                    location,
                    script: "Redeem",
                });
            }
            None => utxo.script_pubkey.clone(),
        };

        let (script, segwit) = match &input.witness_script {
            Some(witness) => {
                if ScriptBuf::new_p2wsh(&witness.wscript_hash()) != parent {
                    return Err(Error::ScriptMismatch {
                        location,
                        script: "Witness",
                    });
                }
                (witness.clone(), true)
            }
            None if parent.is_p2wsh() => {
                return Err(Error::MissingScript {
                    location,
                    script: "Witness",
                });
            }
            None => {
                let segwit = parent.is_p2wpkh();
                (parent, segwit)
            }
        };

        if !segwit && input.non_witness_utxo.is_none() {
            return Err(Error::NonSegwitWitnessUtxo(index));
        }

        Ok(SigningScript {
            script,
            value: utxo.value,
            segwit,
        })
    }

    fn sighash(
        &self,
        index: usize,
        signing: &SigningScript,
        sighash_type: EcdsaSighashType,
    ) -> Result<Message> {
        let mut cache = SighashCache::new(&self.global.unsigned_tx);
        let digest = if signing.segwit {
            let script_code = script::p2wpkh_script_code(&signing.script)
                .unwrap_or_else(|| signing.script.clone());
            cache
                .p2wsh_signature_hash(index, &script_code, signing.value, sighash_type)
                .map_err(|e| Error::Sighash(e.to_string()))?
                .to_byte_array()
        } else {
            cache
                .legacy_signature_hash(index, &signing.script, sighash_type.to_u32())
                .map_err(|e| Error::Sighash(e.to_string()))?
                .to_byte_array()
        };
        let msg = Message::from_digest(digest);
        trace!(index, segwit = signing.segwit, ?msg, "computed sighash");
        Ok(msg)
    }

    /// Checks the signing preconditions for `pubkey` and returns the digest to
    /// sign with the sighash type it commits to.
    fn prepare_signature(
        &self,
        index: usize,
        pubkey: &PublicKey,
        allowed: Option<&[EcdsaSighashType]>,
    ) -> Result<(Message, EcdsaSighashType)> {
        let input = self.input(index)?;
        let sighash_type = input.sighash_type.unwrap_or(EcdsaSighashType::All);
        if !allowed.unwrap_or(DEFAULT_ALLOWED_SIGHASH).contains(&sighash_type) {
            return Err(Error::SighashPolicy(sighash_type));
        }

        let signing = self.signing_script(index)?;
        if !script::pubkey_in_script(pubkey, &signing.script) {
            return Err(Error::KeyNotInScript {
                index,
                pubkey: *pubkey,
            });
        }

        Ok((self.sighash(index, &signing, sighash_type)?, sighash_type))
    }

    fn add_partial_sig(
        &mut self,
        index: usize,
        pubkey: PublicKey,
        signature: bitcoin::secp256k1::ecdsa::Signature,
        sighash_type: EcdsaSighashType,
    ) -> Result<()> {
        let sig = ecdsa::Signature {
            signature,
            sighash_type,
        };
        self.input_mut(index)?
            .insert(Location::Input(index), InputField::PartialSig(pubkey, sig))?;
        debug!(index, %pubkey, "added partial signature");
        Ok(())
    }

    /// Signs input `index` with `signer`.
    ///
    /// `allowed` restricts the sighash types the signer accepts; `None` means
    /// `SIGHASH_ALL` only.
    pub fn sign_input(
        &mut self,
        index: usize,
        signer: &impl Signer,
        allowed: Option<&[EcdsaSighashType]>,
    ) -> Result<()> {
        let pubkey = Signer::public_key(signer);
        let (msg, sighash_type) = self.prepare_signature(index, &pubkey, allowed)?;
        let signature = Signer::sign_ecdsa(signer, &msg)?;
        self.add_partial_sig(index, pubkey, signature, sighash_type)
    }

    /// Like [`sign_input`](Self::sign_input), suspending while `signer` signs.
    pub async fn sign_input_async(
        &mut self,
        index: usize,
        signer: &dyn AsyncSigner,
        allowed: Option<&[EcdsaSighashType]>,
    ) -> Result<()> {
        let pubkey = AsyncSigner::public_key(signer);
        let (msg, sighash_type) = self.prepare_signature(index, &pubkey, allowed)?;
        let signature = AsyncSigner::sign_ecdsa(signer, &msg).await?;
        self.add_partial_sig(index, pubkey, signature, sighash_type)
    }

    /// Signs every input `signer` can sign for.
    ///
    /// Per-input failures are logged and skipped; the call fails only if no input
    /// was signed.
    pub fn sign_all_inputs(
        &mut self,
        signer: &impl Signer,
        allowed: Option<&[EcdsaSighashType]>,
    ) -> Result<()> {
        let mut signed = 0;
        for index in 0..self.inputs.len() {
            match self.sign_input(index, signer, allowed) {
                Ok(()) => signed += 1,
                Err(err) => warn!(index, %err, "input not signed"),
            }
        }
        if signed == 0 {
            return Err(Error::NoInputsSigned);
        }
        Ok(())
    }

    /// Async [`sign_all_inputs`](Self::sign_all_inputs). Inputs are signed one
    /// after the other, in transaction order.
    pub async fn sign_all_inputs_async(
        &mut self,
        signer: &dyn AsyncSigner,
        allowed: Option<&[EcdsaSighashType]>,
    ) -> Result<()> {
        let mut signed = 0;
        for index in 0..self.inputs.len() {
            match self.sign_input_async(index, signer, allowed).await {
                Ok(()) => signed += 1,
                Err(err) => warn!(index, %err, "input not signed"),
            }
        }
        if signed == 0 {
            return Err(Error::NoInputsSigned);
        }
        Ok(())
    }

    /// Signs input `index` with every key of `hd` listed in its
    /// `bip32_derivation` entries.
    pub fn sign_input_hd(
        &mut self,
        index: usize,
        hd: &impl HdSigner,
        allowed: Option<&[EcdsaSighashType]>,
    ) -> Result<()> {
        let fingerprint = hd.master_fingerprint();
        let candidates: Vec<(PublicKey, DerivationPath)> = self
            .input(index)?
            .bip32_derivation
            .iter()
            .filter(|(_, (source, _))| *source == fingerprint)
            .map(|(pubkey, (_, path))| (*pubkey, path.clone()))
            .collect();

        let mut keys: Vec<PrivateKey> = Vec::new();
        for (pubkey, path) in candidates {
            let Some(key) = hd.derive_private_key(&path)? else {
                continue;
            };
            if Signer::public_key(&key) != pubkey {
                return Err(Error::DerivedKeyMismatch { index, pubkey });
            }
            keys.push(key);
        }
        if keys.is_empty() {
            return Err(Error::NoSigner(index));
        }

        for key in &keys {
            self.sign_input(index, key, allowed)?;
        }
        Ok(())
    }

    /// HD counterpart of [`sign_all_inputs`](Self::sign_all_inputs).
    pub fn sign_all_inputs_hd(
        &mut self,
        hd: &impl HdSigner,
        allowed: Option<&[EcdsaSighashType]>,
    ) -> Result<()> {
        let mut signed = 0;
        for index in 0..self.inputs.len() {
            match self.sign_input_hd(index, hd, allowed) {
                Ok(()) => signed += 1,
                Err(err) => warn!(index, %err, "input not signed"),
            }
        }
        if signed == 0 {
            return Err(Error::NoInputsSigned);
        }
        Ok(())
    }

    /// Verifies the partial signatures of input `index`, or only the one made by
    /// `pubkey`. Each signature is checked against the digest of its own sighash
    /// type.
    pub fn validate_signatures_of_input(
        &self,
        index: usize,
        verifier: &impl Verifier,
        pubkey: Option<&PublicKey>,
    ) -> Result<bool> {
        let input = self.input(index)?;
        if input.partial_sigs.is_empty() {
            return Err(Error::NoSignatures);
        }

        let sigs: Vec<_> = input
            .partial_sigs
            .iter()
            .filter(|(key, _)| pubkey.is_none_or(|wanted| *key == wanted))
            .collect();
        if sigs.is_empty() {
            return Err(Error::PubkeyNotFound);
        }

        let signing = self.signing_script(index)?;
        for (key, sig) in sigs {
            let msg = self.sighash(index, &signing, sig.sighash_type)?;
            if !verifier.verify(&msg, &sig.signature, key) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn validate_signatures_of_all_inputs(&self, verifier: &impl Verifier) -> Result<bool> {
        for index in 0..self.inputs.len() {
            if !self.validate_signatures_of_input(index, verifier, None)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
