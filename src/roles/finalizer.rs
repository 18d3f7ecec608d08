//! Finalizer: turns partial signatures into final scriptSigs and witnesses.

use bitcoin::opcodes::all::OP_PUSHBYTES_0;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::{PublicKey, Script, ScriptBuf, Witness, ecdsa};
use tracing::debug;

use crate::error::{Error, Result};
use crate::map::Input;
use crate::psbt::Psbt;
use crate::script::{InputScriptType, ScriptTemplate};

/// The unlocking data of one input.
#[derive(Debug, Default)]
struct FinalScripts {
    script_sig: Option<ScriptBuf>,
    witness: Option<Witness>,
}

impl Psbt {
    /// The template of the script input `index` must satisfy and the spend type
    /// it implies.
    fn spend_template(&self, index: usize) -> Result<(ScriptTemplate, InputScriptType)> {
        let input = self.input(index)?;
        let prevout = self.prevout_script(index)?;
        let Some(script) = input
            .witness_script
            .as_ref()
            .or(input.redeem_script.as_ref())
            .or(prevout.as_ref())
        else {
            return Err(Error::NoScript(index));
        };

        let template = ScriptTemplate::classify(script);
        let kind = InputScriptType::from_template(
            &template,
            input.redeem_script.is_some(),
            input.witness_script.is_some(),
        );
        Ok((template, kind))
    }

    /// Classifies how input `index` spends its previous output.
    pub fn classify_input(&self, index: usize) -> Result<InputScriptType> {
        Ok(self.spend_template(index)?.1)
    }

    /// Finalizes input `index`. An already finalized input is left as is.
    pub fn finalize_input(&mut self, index: usize) -> Result<()> {
        if self.input(index)?.is_finalized() {
            return Ok(());
        }

        let (template, kind) = self.spend_template(index)?;
        let input = self.input(index)?;
        if let Some(expected) = input.sighash_type {
            if input.partial_sigs.values().any(|sig| sig.sighash_type != expected) {
                return Err(Error::SighashMismatch(index));
            }
        }
        let scripts = final_scripts(input, template, kind, index)?;

        let input = self.input_mut(index)?;
        input.final_script_sig = scripts.script_sig;
        input.final_script_witness = scripts.witness;
        input.clear_finalized();

        debug!(index, ?kind, "finalized input");
        Ok(())
    }

    /// Finalizes every input in order.
    ///
    /// Stops at the first input that cannot be finalized; inputs before it stay
    /// finalized.
    pub fn finalize_all_inputs(&mut self) -> Result<()> {
        for index in 0..self.inputs.len() {
            self.finalize_input(index)?;
        }
        Ok(())
    }
}

fn final_scripts(
    input: &Input,
    template: ScriptTemplate,
    kind: InputScriptType,
    index: usize,
) -> Result<FinalScripts> {
    match (template, kind) {
        (ScriptTemplate::P2pk(pubkey), InputScriptType::P2pk) => {
            let sig = input.partial_sigs.get(&pubkey).ok_or(Error::Finalization(index))?;
            let script_sig = push_data(Builder::new(), &sig.serialize(), index)?.into_script();
            Ok(FinalScripts {
                script_sig: Some(script_sig),
                witness: None,
            })
        }
        (ScriptTemplate::P2pkh(hash), InputScriptType::P2pkh) => {
            let (pubkey, sig) = input
                .partial_sigs
                .iter()
                .find(|(pubkey, _)| pubkey.pubkey_hash() == hash)
                .ok_or(Error::Finalization(index))?;
            let script_sig = push_data(Builder::new(), &sig.serialize(), index)?
                .push_key(pubkey)
                .into_script();
            Ok(FinalScripts {
                script_sig: Some(script_sig),
                witness: None,
            })
        }
        (ScriptTemplate::P2wpkh(hash), InputScriptType::P2wpkh | InputScriptType::P2shP2wpkh) => {
            let (pubkey, sig) = input
                .partial_sigs
                .iter()
                .find(|(pubkey, _)| pubkey.wpubkey_hash().ok() == Some(hash))
                .ok_or(Error::Finalization(index))?;

            let mut witness = Witness::new();
            witness.push(sig.serialize());
            witness.push(pubkey.to_bytes());
            Ok(FinalScripts {
                script_sig: nested_script_sig(input, index)?,
                witness: Some(witness),
            })
        }
        (ScriptTemplate::Multisig { threshold, pubkeys }, kind) => {
            let sigs = multisig_signatures(input, threshold, &pubkeys, index)?;
            match kind {
                InputScriptType::P2shMultisig => {
                    let redeem = input.redeem_script.as_ref().ok_or(Error::Finalization(index))?;
                    let mut builder = Builder::new().push_opcode(OP_PUSHBYTES_0);
                    for sig in &sigs {
                        builder = push_data(builder, &sig.serialize(), index)?;
                    }
                    let script_sig = push_data(builder, redeem.as_bytes(), index)?.into_script();
                    Ok(FinalScripts {
                        script_sig: Some(script_sig),
                        witness: None,
                    })
                }
                InputScriptType::P2wshMultisig | InputScriptType::P2shP2wshMultisig => {
                    let witness_script =
                        input.witness_script.as_ref().ok_or(Error::Finalization(index))?;
                    // leading empty element consumed by the CHECKMULTISIG off-by-one
                    let mut witness = Witness::new();
                    witness.push(Vec::<u8>::new());
                    for sig in &sigs {
                        witness.push(sig.serialize());
                    }
                    witness.push(witness_script.as_bytes());
                    Ok(FinalScripts {
                        script_sig: nested_script_sig(input, index)?,
                        witness: Some(witness),
                    })
                }
                _ => Err(Error::Finalization(index)),
            }
        }
        _ => Err(Error::Finalization(index)),
    }
}

/// The first `threshold` signatures, in the order the script lists their keys.
fn multisig_signatures<'a>(
    input: &'a Input,
    threshold: usize,
    pubkeys: &[PublicKey],
    index: usize,
) -> Result<Vec<&'a ecdsa::Signature>> {
    let sigs: Vec<_> = pubkeys
        .iter()
        .filter_map(|pubkey| input.partial_sigs.get(pubkey))
        .take(threshold)
        .collect();
    if sigs.len() < threshold {
        return Err(Error::Finalization(index));
    }
    Ok(sigs)
}

/// `<redeem script>` for a witness spend nested in P2SH, nothing otherwise.
fn nested_script_sig(input: &Input, index: usize) -> Result<Option<ScriptBuf>> {
    input
        .redeem_script
        .as_deref()
        .map(|redeem: &Script| Ok(push_data(Builder::new(), redeem.as_bytes(), index)?.into_script()))
        .transpose()
}

fn push_data(builder: Builder, data: &[u8], index: usize) -> Result<Builder> {
    let push = PushBytesBuf::try_from(data.to_vec()).map_err(|_| Error::Finalization(index))?;
    Ok(builder.push_slice(push))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Signer;
    use crate::map::InputField;
    use crate::roles::InputSpec;
    use bitcoin::hashes::Hash;
    use bitcoin::hex::FromHex;
    use bitcoin::opcodes::all::OP_CHECKMULTISIG;
    use bitcoin::script::Instruction;
    use bitcoin::{
        Amount, NetworkKind, OutPoint, PrivateKey, Sequence, Transaction, TxIn, TxOut, Txid,
        absolute, transaction,
    };

    fn key(byte: u8) -> PrivateKey {
        PrivateKey::from_slice(&[byte; 32], NetworkKind::Test).unwrap()
    }

    fn unfunded_psbt() -> Psbt {
        let mut psbt = Psbt::new();
        psbt.add_input(InputSpec::new(OutPoint::new(Txid::all_zeros(), 0))).unwrap();
        psbt
    }

    #[test]
    fn no_script_then_no_signatures() {
        let mut psbt = unfunded_psbt();
        let err = psbt.finalize_all_inputs().unwrap_err();
        assert_eq!(err.to_string(), "No script found for input #0");

        let utxo = TxOut {
            value: Amount::from_sat(10_000),
            script_pubkey: ScriptBuf::from_bytes(
                Vec::from_hex("0014d85c2b71d0060b09c9886aeb815e50991dda124d").unwrap(),
            ),
        };
        psbt.update_input(0, [InputField::WitnessUtxo(utxo)]).unwrap();
        assert_eq!(psbt.classify_input(0).unwrap(), InputScriptType::P2wpkh);
        let err = psbt.finalize_all_inputs().unwrap_err();
        assert_eq!(err.to_string(), "Can not finalize input #0");
    }

    #[test]
    fn zero_inputs_finalize_vacuously() {
        let mut psbt = Psbt::new();
        psbt.finalize_all_inputs().unwrap();
        assert!(psbt.is_finalized());
    }

    fn multisig_script(keys: &[PrivateKey], threshold: i64) -> ScriptBuf {
        let mut builder = Builder::new().push_int(threshold);
        for key in keys {
            builder = builder.push_key(&Signer::public_key(key));
        }
        builder
            .push_int(keys.len() as i64)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script()
    }

    /// A previous transaction paying `value` to `script_pubkey` at output 0.
    fn funding_tx(script_pubkey: ScriptBuf, value: u64) -> Transaction {
        Transaction {
            version: transaction::Version::ONE,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array([0x60; 32]), 1),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(value),
                script_pubkey,
            }],
        }
    }

    fn pushes(script: &Script) -> Vec<Vec<u8>> {
        script
            .instructions()
            .map(|instruction| match instruction.unwrap() {
                Instruction::PushBytes(push) => push.as_bytes().to_vec(),
                Instruction::Op(op) => panic!("unexpected opcode {:?}", op),
            })
            .collect()
    }

    fn multisig_psbt(keys: &[PrivateKey], threshold: i64) -> Psbt {
        let witness_script = multisig_script(keys, threshold);
        let utxo = TxOut {
            value: Amount::from_sat(100_000),
            script_pubkey: ScriptBuf::new_p2wsh(&witness_script.wscript_hash()),
        };

        let mut psbt = Psbt::new();
        psbt.add_input(
            InputSpec::new(OutPoint::new(Txid::from_byte_array([4; 32]), 0))
                .with_field(InputField::WitnessUtxo(utxo))
                .with_field(InputField::WitnessScript(witness_script)),
        )
        .unwrap();
        psbt
    }

    #[test]
    fn multisig_signatures_follow_script_order() {
        let keys = [key(11), key(12), key(13)];
        let mut psbt = multisig_psbt(&keys, 2);
        assert_eq!(psbt.classify_input(0).unwrap(), InputScriptType::P2wshMultisig);

        psbt.sign_input(0, &keys[2], None).unwrap();
        assert!(matches!(psbt.finalize_input(0), Err(Error::Finalization(0))));
        psbt.sign_input(0, &keys[0], None).unwrap();

        let sig_a = psbt.input(0).unwrap().partial_sigs[&Signer::public_key(&keys[0])];
        let sig_c = psbt.input(0).unwrap().partial_sigs[&Signer::public_key(&keys[2])];
        let witness_script = psbt.input(0).unwrap().witness_script.clone().unwrap();

        psbt.finalize_all_inputs().unwrap();
        let input = psbt.input(0).unwrap();
        let witness = input.final_script_witness.as_ref().unwrap();
        let items: Vec<&[u8]> = witness.iter().collect();
        assert_eq!(items.len(), 4);
        assert!(items[0].is_empty());
        assert_eq!(items[1], sig_a.to_vec().as_slice());
        assert_eq!(items[2], sig_c.to_vec().as_slice());
        assert_eq!(items[3], witness_script.as_bytes());

        assert!(input.partial_sigs.is_empty());
        assert!(input.witness_script.is_none());
        assert!(input.witness_utxo.is_some());
    }

    #[test]
    fn finalizing_twice_is_a_no_op() {
        let keys = [key(21), key(22)];
        let mut psbt = multisig_psbt(&keys, 1);
        psbt.sign_input(0, &keys[1], None).unwrap();

        psbt.finalize_all_inputs().unwrap();
        let once = psbt.serialize();
        psbt.finalize_all_inputs().unwrap();
        assert_eq!(psbt.serialize(), once);
    }

    #[test]
    fn signature_sighash_must_match_input() {
        let keys = [key(31)];
        let mut psbt = multisig_psbt(&keys, 1);
        psbt.sign_input(0, &keys[0], None).unwrap();
        psbt.update_input(0, [InputField::SighashType(bitcoin::EcdsaSighashType::None)])
            .unwrap();
        assert!(matches!(psbt.finalize_input(0), Err(Error::SighashMismatch(0))));
    }

    #[test]
    fn nested_p2wpkh() {
        let key = key(41);
        let pubkey = Signer::public_key(&key);
        let redeem = ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash().unwrap());
        let utxo = TxOut {
            value: Amount::from_sat(40_000),
            script_pubkey: ScriptBuf::new_p2sh(&redeem.script_hash()),
        };
        let mut psbt = Psbt::new();
        psbt.add_input(
            InputSpec::new(OutPoint::new(Txid::from_byte_array([5; 32]), 2))
                .with_field(InputField::WitnessUtxo(utxo))
                .with_field(InputField::RedeemScript(redeem.clone())),
        )
        .unwrap();
        assert_eq!(psbt.classify_input(0).unwrap(), InputScriptType::P2shP2wpkh);

        psbt.sign_input(0, &key, None).unwrap();
        psbt.finalize_input(0).unwrap();

        let input = psbt.input(0).unwrap();
        let script_sig = input.final_script_sig.as_ref().unwrap();
        assert_eq!(script_sig.len(), 1 + redeem.len());
        assert_eq!(&script_sig.as_bytes()[1..], redeem.as_bytes());
        let witness = input.final_script_witness.as_ref().unwrap();
        assert_eq!(witness.len(), 2);
        assert_eq!(witness.nth(1).unwrap(), pubkey.to_bytes().as_slice());
        assert!(input.redeem_script.is_none());
    }

    #[test]
    fn p2sh_multisig_script_sig() {
        let keys = [key(51), key(52), key(53)];
        let redeem = multisig_script(&keys, 2);
        let prev = funding_tx(ScriptBuf::new_p2sh(&redeem.script_hash()), 80_000);

        let mut psbt = Psbt::new();
        psbt.add_input(
            InputSpec::new(OutPoint::new(prev.compute_txid(), 0))
                .with_field(InputField::NonWitnessUtxo(prev))
                .with_field(InputField::RedeemScript(redeem.clone())),
        )
        .unwrap();
        assert_eq!(psbt.classify_input(0).unwrap(), InputScriptType::P2shMultisig);

        psbt.sign_input(0, &keys[2], None).unwrap();
        psbt.sign_input(0, &keys[0], None).unwrap();
        let sigs = &psbt.input(0).unwrap().partial_sigs;
        let sig_a = sigs[&Signer::public_key(&keys[0])].to_vec();
        let sig_c = sigs[&Signer::public_key(&keys[2])].to_vec();

        psbt.finalize_all_inputs().unwrap();
        let input = psbt.input(0).unwrap();
        assert!(input.final_script_witness.is_none());
        let script_sig = input.final_script_sig.as_ref().unwrap();
        assert_eq!(script_sig.as_bytes()[0], 0x00);
        assert_eq!(pushes(script_sig), vec![Vec::new(), sig_a, sig_c, redeem.to_bytes()]);
        assert!(input.redeem_script.is_none());
        assert!(input.non_witness_utxo.is_some());
    }

    #[test]
    fn p2sh_p2wsh_multisig() {
        let keys = [key(61), key(62), key(63)];
        let witness_script = multisig_script(&keys, 2);
        let redeem = ScriptBuf::new_p2wsh(&witness_script.wscript_hash());
        let utxo = TxOut {
            value: Amount::from_sat(70_000),
            script_pubkey: ScriptBuf::new_p2sh(&redeem.script_hash()),
        };

        let mut psbt = Psbt::new();
        psbt.add_input(
            InputSpec::new(OutPoint::new(Txid::from_byte_array([6; 32]), 0))
                .with_field(InputField::WitnessUtxo(utxo))
                .with_field(InputField::RedeemScript(redeem.clone()))
                .with_field(InputField::WitnessScript(witness_script.clone())),
        )
        .unwrap();
        assert_eq!(psbt.classify_input(0).unwrap(), InputScriptType::P2shP2wshMultisig);

        psbt.sign_input(0, &keys[1], None).unwrap();
        psbt.sign_input(0, &keys[0], None).unwrap();
        let sigs = &psbt.input(0).unwrap().partial_sigs;
        let sig_a = sigs[&Signer::public_key(&keys[0])].to_vec();
        let sig_b = sigs[&Signer::public_key(&keys[1])].to_vec();

        psbt.finalize_all_inputs().unwrap();
        let input = psbt.input(0).unwrap();
        let script_sig = input.final_script_sig.as_ref().unwrap();
        assert_eq!(pushes(script_sig), vec![redeem.to_bytes()]);

        let witness: Vec<&[u8]> = input.final_script_witness.as_ref().unwrap().iter().collect();
        assert_eq!(witness.len(), 4);
        assert!(witness[0].is_empty());
        assert_eq!(witness[1], sig_a.as_slice());
        assert_eq!(witness[2], sig_b.as_slice());
        assert_eq!(witness[3], witness_script.as_bytes());
    }

    #[test]
    fn p2pk_script_sig() {
        let key = key(71);
        let prev = funding_tx(ScriptBuf::new_p2pk(&Signer::public_key(&key)), 30_000);

        let mut psbt = Psbt::new();
        psbt.add_input(
            InputSpec::new(OutPoint::new(prev.compute_txid(), 0))
                .with_field(InputField::NonWitnessUtxo(prev)),
        )
        .unwrap();
        assert_eq!(psbt.classify_input(0).unwrap(), InputScriptType::P2pk);

        psbt.sign_input(0, &key, None).unwrap();
        let sig = psbt.input(0).unwrap().partial_sigs[&Signer::public_key(&key)].to_vec();
        psbt.finalize_all_inputs().unwrap();

        let input = psbt.input(0).unwrap();
        assert_eq!(pushes(input.final_script_sig.as_ref().unwrap()), vec![sig]);
        assert!(input.final_script_witness.is_none());
    }
}
