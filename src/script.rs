//! Recognition of the standard locking script templates.
//!
//! This is not a script interpreter. A script either matches one of the fixed
//! templates below or is [`ScriptTemplate::Unknown`].

use bitcoin::hashes::Hash;
use bitcoin::script::Instruction;
use bitcoin::{PubkeyHash, PublicKey, Script, ScriptBuf, WPubkeyHash};
use miniscript::miniscript::ScriptContext;
use miniscript::{Legacy, Miniscript, Segwitv0, Terminal};

/// Locking script templates understood by the signer and the finalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptTemplate {
    /// `<pubkey> OP_CHECKSIG`
    P2pk(PublicKey),
    P2pkh(PubkeyHash),
    P2wpkh(WPubkeyHash),
    /// Bare `OP_CHECKMULTISIG`, keys in script order.
    Multisig {
        threshold: usize,
        pubkeys: Vec<PublicKey>,
    },
    Unknown,
}

impl ScriptTemplate {
    pub fn classify(script: &Script) -> Self {
        let bytes = script.as_bytes();
        if script.is_p2pkh() {
            return ScriptTemplate::P2pkh(PubkeyHash::from_byte_array(hash20(&bytes[3..23])));
        }
        if script.is_p2wpkh() {
            return ScriptTemplate::P2wpkh(WPubkeyHash::from_byte_array(hash20(&bytes[2..22])));
        }
        if script.is_p2pk() {
            if let Ok(pubkey) = PublicKey::from_slice(&bytes[1..bytes.len() - 1]) {
                return ScriptTemplate::P2pk(pubkey);
            }
        }
        if let Some((threshold, pubkeys)) =
            parse_multisig::<Segwitv0>(script).or_else(|| parse_multisig::<Legacy>(script))
        {
            return ScriptTemplate::Multisig { threshold, pubkeys };
        }
        ScriptTemplate::Unknown
    }
}

fn hash20(bytes: &[u8]) -> [u8; 20] {
    let mut hash = [0u8; 20];
    hash.copy_from_slice(bytes);
    hash
}

fn parse_multisig<Ctx>(script: &Script) -> Option<(usize, Vec<PublicKey>)>
where
    Ctx: ScriptContext<Key = PublicKey>,
{
    let ms = Miniscript::<PublicKey, Ctx>::decode_consensus(script).ok()?;
    match ms.as_inner() {
        Terminal::Multi(thresh) => Some((thresh.k(), thresh.data().to_vec())),
        _ => None,
    }
}

/// How an input spends its previous output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputScriptType {
    P2pk,
    P2pkh,
    P2wpkh,
    P2shP2wpkh,
    P2shMultisig,
    P2wshMultisig,
    P2shP2wshMultisig,
    Unknown,
}

impl InputScriptType {
    pub(crate) fn from_template(template: &ScriptTemplate, is_p2sh: bool, is_p2wsh: bool) -> Self {
        match (template, is_p2sh, is_p2wsh) {
            (ScriptTemplate::P2pk(_), false, false) => InputScriptType::P2pk,
            (ScriptTemplate::P2pkh(_), false, false) => InputScriptType::P2pkh,
            (ScriptTemplate::P2wpkh(_), false, false) => InputScriptType::P2wpkh,
            (ScriptTemplate::P2wpkh(_), true, false) => InputScriptType::P2shP2wpkh,
            (ScriptTemplate::Multisig { .. }, true, false) => InputScriptType::P2shMultisig,
            (ScriptTemplate::Multisig { .. }, false, true) => InputScriptType::P2wshMultisig,
            (ScriptTemplate::Multisig { .. }, true, true) => InputScriptType::P2shP2wshMultisig,
            _ => InputScriptType::Unknown,
        }
    }

    pub fn is_segwit(&self) -> bool {
        matches!(
            self,
            InputScriptType::P2wpkh
                | InputScriptType::P2shP2wpkh
                | InputScriptType::P2wshMultisig
                | InputScriptType::P2shP2wshMultisig
        )
    }
}

pub(crate) fn check_witness_script(script: &Script) -> Result<(), &'static str> {
    if script.is_p2wpkh() || script.is_p2sh() || script.is_p2wsh() {
        Err("P2WPKH or P2SH can not be contained within P2WSH")
    } else {
        Ok(())
    }
}

/// The BIP143 scriptCode of a P2WPKH output: the equivalent P2PKH script.
pub(crate) fn p2wpkh_script_code(script: &Script) -> Option<ScriptBuf> {
    if !script.is_p2wpkh() {
        return None;
    }
    let hash = PubkeyHash::from_byte_array(hash20(&script.as_bytes()[2..22]));
    Some(ScriptBuf::new_p2pkh(&hash))
}

/// True if `script` pushes `pubkey` or its HASH160.
pub fn pubkey_in_script(pubkey: &PublicKey, script: &Script) -> bool {
    let key = pubkey.to_bytes();
    let hash = pubkey.pubkey_hash().to_byte_array();
    script.instructions().any(|instruction| match instruction {
        Ok(Instruction::PushBytes(push)) => {
            let data = push.as_bytes();
            data == key.as_slice() || data == hash.as_slice()
        }
        _ => false,
    })
}
