use std::str::FromStr;

use async_trait::async_trait;
use bitcoin::bip32::{DerivationPath, Xpriv, Xpub};
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::script::Builder;
use bitcoin::secp256k1::{Message, Secp256k1, ecdsa};
use bitcoin::{
    Amount, NetworkKind, OutPoint, PrivateKey, PublicKey, ScriptBuf, Sequence, Transaction, TxIn,
    TxOut, Txid, Witness, absolute, transaction,
};
use psbt_toolkit::{
    AccountKey, AsyncSigner, Error, InputField, InputScriptType, InputSpec, KeyData, OutputField,
    OutputSpec, Psbt, Signer,
};

fn p2wpkh(pubkey: &PublicKey) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash().unwrap())
}

/// A legacy P2PKH spend whose bytes are fixed by RFC6979 nonces.
#[test]
fn p2pkh_spend_matches_known_transaction() {
    let key = PrivateKey::from_slice(&[0x11; 32], NetworkKind::Test).unwrap();
    let pubkey = Signer::public_key(&key);
    let dest = Signer::public_key(&PrivateKey::from_slice(&[0x22; 32], NetworkKind::Test).unwrap());

    let prev = Transaction {
        version: transaction::Version::ONE,
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array([0xab; 32]), 3),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(100_000),
            script_pubkey: ScriptBuf::new_p2pkh(&pubkey.pubkey_hash()),
        }],
    };
    let prev_txid = prev.compute_txid();
    assert_eq!(
        prev_txid.to_string(),
        "1d487402c584929311cf2a6b7e25c12648bd2f9503c30fd3daf9f2f21a8af30f"
    );

    let mut psbt = Psbt::new();
    psbt.add_input(
        InputSpec::new(OutPoint::new(prev_txid, 0)).with_field(InputField::NonWitnessUtxo(prev)),
    )
    .unwrap();
    psbt.add_output(OutputSpec::to_script(
        ScriptBuf::new_p2pkh(&dest.pubkey_hash()),
        Amount::from_sat(90_000),
    ))
    .unwrap();
    assert_eq!(psbt.classify_input(0).unwrap(), InputScriptType::P2pkh);

    psbt.sign_input(0, &key, None).unwrap();
    let sig = psbt.input(0).unwrap().partial_sigs[&pubkey];
    assert_eq!(
        sig.to_string(),
        "304402202162732f2618edbaba0cdd7f4e4757bf030a91bd98dfb1a862cb7d9ea8bc9da0\
         02206891f7f56a46dcf9724cedbde7e21f9afb24d62ae8b91add372c86bfe5d1d47801"
    );
    assert!(
        psbt.validate_signatures_of_input(0, &Secp256k1::verification_only(), Some(&pubkey))
            .unwrap()
    );

    psbt.finalize_all_inputs().unwrap();
    let tx = psbt.extract_transaction(false).unwrap();
    assert_eq!(
        serialize_hex(&tx),
        "02000000010ff38a1af2f2f9dad30fc303952fbd4826c1257e6b2acf11939284c50274481d00000000\
         6a47304402202162732f2618edbaba0cdd7f4e4757bf030a91bd98dfb1a862cb7d9ea8bc9da00220\
         6891f7f56a46dcf9724cedbde7e21f9afb24d62ae8b91add372c86bfe5d1d4780121034f355bdcb7\
         cc0af728ef3cceb9615d90684bb5b2ca5f859ab0f0b704075871aaffffffff01905f01000000000019\
         76a914531260aa2a199e228c537dfa42c82bea2c7c1f4d88ac00000000"
    );
    assert_eq!(tx.vsize(), 191);
    assert_eq!(psbt.fee().unwrap(), Amount::from_sat(10_000));
    assert_eq!(psbt.fee_rate().unwrap(), 52);
}

struct Cosigner {
    account: AccountKey,
    watch_only: AccountKey,
}

fn cosigner(seed: u8, name: &str) -> Cosigner {
    let secp = Secp256k1::new();
    let master = Xpriv::new_master(NetworkKind::Test, &[seed; 32]).unwrap();
    let path = DerivationPath::from_str("m/48'/1'/0'/2'").unwrap();
    let account = master.derive_priv(&secp, &path).unwrap();

    let data = KeyData {
        name: name.to_string(),
        xprv: Some(account.to_string()),
        xpub: Xpub::from_priv(&secp, &account).to_string(),
        fingerprint: master.fingerprint(&secp).to_string(),
        derivation_path: path.to_string(),
    };
    let watch_only = KeyData {
        xprv: None,
        ..data.clone()
    };
    Cosigner {
        account: AccountKey::from_key_data(&data).unwrap(),
        watch_only: AccountKey::from_key_data(&watch_only).unwrap(),
    }
}

/// Builds a 2-of-3 P2WSH spend with a change output back to the same wallet.
fn multisig_psbt(cosigners: &[Cosigner]) -> (Psbt, ScriptBuf) {
    let receive = DerivationPath::from_str("m/0/0").unwrap();
    let change = DerivationPath::from_str("m/1/0").unwrap();

    let derive = |child: &DerivationPath| {
        let mut keys: Vec<_> = cosigners
            .iter()
            .map(|c| c.account.derive_public_key(child).unwrap())
            .collect();
        keys.sort_by_key(|(pubkey, _)| pubkey.to_bytes());
        let mut builder = Builder::new().push_int(2);
        for (pubkey, _) in &keys {
            builder = builder.push_key(pubkey);
        }
        (builder.push_int(3).push_opcode(OP_CHECKMULTISIG).into_script(), keys)
    };
    let (witness_script, receive_keys) = derive(&receive);
    let (change_script, change_keys) = derive(&change);

    let utxo = TxOut {
        value: Amount::from_sat(1_000_000),
        script_pubkey: ScriptBuf::new_p2wsh(&witness_script.wscript_hash()),
    };
    let mut input = InputSpec::new(OutPoint::new(Txid::from_byte_array([0x31; 32]), 1))
        .with_sequence(Sequence::ENABLE_RBF_NO_LOCKTIME)
        .with_field(InputField::WitnessUtxo(utxo))
        .with_field(InputField::WitnessScript(witness_script.clone()));
    for (pubkey, source) in receive_keys {
        input = input.with_field(InputField::Bip32Derivation(pubkey, source));
    }

    let mut change_output = OutputSpec::to_script(
        ScriptBuf::new_p2wsh(&change_script.wscript_hash()),
        Amount::from_sat(499_000),
    )
    .with_field(OutputField::WitnessScript(change_script));
    for (pubkey, source) in change_keys {
        change_output = change_output.with_field(OutputField::Bip32Derivation(pubkey, source));
    }

    let recipient = Signer::public_key(&PrivateKey::from_slice(&[0x77; 32], NetworkKind::Test).unwrap());
    let mut psbt = Psbt::new();
    psbt.add_input(input).unwrap();
    psbt.add_outputs([
        OutputSpec::to_script(p2wpkh(&recipient), Amount::from_sat(500_000)),
        change_output,
    ])
    .unwrap();
    (psbt, witness_script)
}

#[test]
fn hd_multisig_coordination() {
    let cosigners = [cosigner(1, "alice"), cosigner(2, "bob"), cosigner(3, "carol")];
    let (unsigned, witness_script) = multisig_psbt(&cosigners);
    assert_eq!(unsigned.classify_input(0).unwrap(), InputScriptType::P2wshMultisig);
    assert!(unsigned.input_has_hd_key(0, &cosigners[0].account).unwrap());
    assert!(!unsigned.output_has_hd_key(0, &cosigners[0].account).unwrap());
    assert!(unsigned.output_has_hd_key(1, &cosigners[2].account).unwrap());
    let shared = unsigned.to_base64();

    let mut alice = Psbt::from_base64(&shared).unwrap();
    alice.sign_all_inputs_hd(&cosigners[0].account, None).unwrap();
    let mut bob = Psbt::from_base64(&shared).unwrap();
    bob.sign_input_hd(0, &cosigners[1].account, None).unwrap();

    let mut carol = Psbt::from_base64(&shared).unwrap();
    assert!(cosigners[2].watch_only.is_watch_only());
    assert!(matches!(
        carol.sign_input_hd(0, &cosigners[2].watch_only, None),
        Err(Error::NoSigner(0))
    ));
    assert!(matches!(
        carol.sign_all_inputs_hd(&cosigners[2].watch_only, None),
        Err(Error::NoInputsSigned)
    ));
    assert!(!carol.has_signatures());

    let mut combined = Psbt::from_base64(&alice.to_base64()).unwrap();
    combined.combine(bob).unwrap();
    let input = combined.input(0).unwrap();
    assert_eq!(input.partial_sigs.len(), 2);
    assert!(
        combined
            .validate_signatures_of_all_inputs(&Secp256k1::verification_only())
            .unwrap()
    );

    let receive = DerivationPath::from_str("m/0/0").unwrap();
    let script_order: Vec<PublicKey> = {
        let mut keys: Vec<_> = cosigners
            .iter()
            .map(|c| c.account.derive_public_key(&receive).unwrap().0)
            .collect();
        keys.sort_by_key(|pubkey| pubkey.to_bytes());
        keys
    };
    let expected_sigs: Vec<Vec<u8>> = script_order
        .iter()
        .filter_map(|pubkey| input.partial_sigs.get(pubkey))
        .map(|sig| sig.to_vec())
        .collect();

    combined.finalize_all_inputs().unwrap();
    let input = combined.input(0).unwrap();
    assert!(input.partial_sigs.is_empty());
    assert!(input.bip32_derivation.is_empty());
    assert!(input.witness_script.is_none());
    let witness: Vec<&[u8]> = input.final_script_witness.as_ref().unwrap().iter().collect();
    assert_eq!(witness.len(), 4);
    assert!(witness[0].is_empty());
    assert_eq!(witness[1], expected_sigs[0].as_slice());
    assert_eq!(witness[2], expected_sigs[1].as_slice());
    assert_eq!(witness[3], witness_script.as_bytes());

    let tx = combined.extract_transaction(false).unwrap();
    assert_eq!(tx.input[0].witness.len(), 4);
    assert!(tx.input[0].script_sig.is_empty());
    assert_eq!(combined.fee().unwrap(), Amount::from_sat(1_000));
}

#[test]
fn key_outside_the_script_cannot_sign() {
    let cosigners = [cosigner(4, "dave"), cosigner(5, "erin"), cosigner(6, "frank")];
    let (mut psbt, _) = multisig_psbt(&cosigners);
    let stranger = PrivateKey::from_slice(&[0x55; 32], NetworkKind::Test).unwrap();

    let err = psbt.sign_input(0, &stranger, None).unwrap_err();
    assert!(matches!(err, Error::KeyNotInScript { index: 0, .. }));
    assert!(matches!(psbt.sign_all_inputs(&stranger, None), Err(Error::NoInputsSigned)));
    assert!(!psbt.has_signatures());
}

/// Signs after yielding to the runtime, like a key held by a remote service.
struct RemoteSigner(PrivateKey);

#[async_trait]
impl AsyncSigner for RemoteSigner {
    fn public_key(&self) -> PublicKey {
        Signer::public_key(&self.0)
    }

    async fn sign_ecdsa(&self, msg: &Message) -> psbt_toolkit::Result<ecdsa::Signature> {
        tokio::task::yield_now().await;
        Signer::sign_ecdsa(&self.0, msg)
    }
}

fn wallet_psbt(key: &PrivateKey, foreign: &PrivateKey) -> Psbt {
    let mine = p2wpkh(&Signer::public_key(key));
    let theirs = p2wpkh(&Signer::public_key(foreign));
    let spend = |vout, script_pubkey: &ScriptBuf| {
        InputSpec::new(OutPoint::new(Txid::from_byte_array([0x41; 32]), vout)).with_field(
            InputField::WitnessUtxo(TxOut {
                value: Amount::from_sat(40_000),
                script_pubkey: script_pubkey.clone(),
            }),
        )
    };

    let mut psbt = Psbt::new();
    psbt.add_inputs([spend(0, &mine), spend(1, &theirs), spend(2, &mine)])
        .unwrap();
    psbt.add_output(OutputSpec::to_script(mine, Amount::from_sat(119_000)))
        .unwrap();
    psbt
}

#[tokio::test]
async fn async_signing_skips_foreign_inputs() {
    let key = PrivateKey::from_slice(&[0x61; 32], NetworkKind::Test).unwrap();
    let foreign = PrivateKey::from_slice(&[0x62; 32], NetworkKind::Test).unwrap();
    let remote = RemoteSigner(key);

    let mut psbt = wallet_psbt(&key, &foreign);
    psbt.sign_all_inputs_async(&remote, None).await.unwrap();
    assert_eq!(psbt.input(0).unwrap().partial_sigs.len(), 1);
    assert!(psbt.input(1).unwrap().partial_sigs.is_empty());
    assert_eq!(psbt.input(2).unwrap().partial_sigs.len(), 1);

    // RFC6979 makes the async and sync paths agree.
    let mut sync = wallet_psbt(&key, &foreign);
    sync.sign_all_inputs(&key, None).unwrap();
    assert_eq!(sync, psbt);

    psbt.sign_input_async(1, &foreign, None).await.unwrap();
    psbt.finalize_all_inputs().unwrap();
    let tx = psbt.extract_transaction(false).unwrap();
    assert!(tx.input.iter().all(|txin| txin.witness.len() == 2));
    assert_eq!(psbt.fee().unwrap(), Amount::from_sat(1_000));
}
