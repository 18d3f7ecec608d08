//! Signing capabilities consumed by the signer role.
//!
//! The PSBT never holds private keys. Signing goes through [`Signer`] (or
//! [`AsyncSigner`] for keys that live behind a device or a remote service),
//! HD signing through [`HdSigner`], and signature checks through [`Verifier`].

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use bitcoin::bip32::{DerivationPath, Fingerprint, KeySource, Xpriv, Xpub};
use bitcoin::secp256k1::{All, Message, Secp256k1, Verification, ecdsa};
use bitcoin::{PrivateKey, PublicKey};
use secp256k1::SECP256K1;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn secp() -> &'static Secp256k1<All> {
    SECP256K1
}

/// A key able to produce ECDSA signatures over a sighash digest.
pub trait Signer {
    fn public_key(&self) -> PublicKey;

    fn sign_ecdsa(&self, msg: &Message) -> Result<ecdsa::Signature>;
}

/// A [`Signer`] whose signing operation may suspend.
#[async_trait]
pub trait AsyncSigner: Send + Sync {
    fn public_key(&self) -> PublicKey;

    async fn sign_ecdsa(&self, msg: &Message) -> Result<ecdsa::Signature>;
}

#[async_trait]
impl<T: Signer + Send + Sync> AsyncSigner for T {
    fn public_key(&self) -> PublicKey {
        Signer::public_key(self)
    }

    async fn sign_ecdsa(&self, msg: &Message) -> Result<ecdsa::Signature> {
        Signer::sign_ecdsa(self, msg)
    }
}

/// A BIP32 key matched against the `bip32_derivation` entries of a PSBT.
pub trait HdSigner {
    /// Fingerprint of the master key the derivation paths start from.
    fn master_fingerprint(&self) -> Fingerprint;

    /// Derives the private key at `path` (a full path from the master), or
    /// `None` if this key cannot reach it.
    fn derive_private_key(&self, path: &DerivationPath) -> Result<Option<PrivateKey>>;
}

/// Verification of ECDSA signatures.
pub trait Verifier {
    fn verify(&self, msg: &Message, sig: &ecdsa::Signature, pubkey: &PublicKey) -> bool;
}

impl<C: Verification> Verifier for Secp256k1<C> {
    fn verify(&self, msg: &Message, sig: &ecdsa::Signature, pubkey: &PublicKey) -> bool {
        self.verify_ecdsa(msg, sig, &pubkey.inner).is_ok()
    }
}

impl Signer for PrivateKey {
    fn public_key(&self) -> PublicKey {
        PublicKey::from_private_key(secp(), self)
    }

    fn sign_ecdsa(&self, msg: &Message) -> Result<ecdsa::Signature> {
        Ok(secp().sign_ecdsa(msg, &self.inner))
    }
}

impl HdSigner for Xpriv {
    fn master_fingerprint(&self) -> Fingerprint {
        self.fingerprint(secp())
    }

    fn derive_private_key(&self, path: &DerivationPath) -> Result<Option<PrivateKey>> {
        Ok(Some(self.derive_priv(secp(), path)?.to_priv()))
    }
}

/// An account key file as written by a key generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyData {
    pub name: String,
    /// Absent for watch-only cosigners.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xprv: Option<String>,
    pub xpub: String,
    /// Master key fingerprint.
    pub fingerprint: String,
    /// Path from the master key to the account key.
    pub derivation_path: String,
}

impl KeyData {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

/// An account-level key with its origin.
///
/// Signs for any derivation whose master fingerprint matches and whose path
/// extends the account path.
#[derive(Debug, Clone)]
pub struct AccountKey {
    pub name: String,
    pub xpriv: Option<Xpriv>,
    pub xpub: Xpub,
    pub fingerprint: Fingerprint,
    pub derivation_path: DerivationPath,
}

impl AccountKey {
    pub fn from_key_data(data: &KeyData) -> Result<Self> {
        let invalid = |field: &str, e: &dyn std::fmt::Display| {
            Error::KeyData(format!("{}: invalid {}: {}", data.name, field, e))
        };
        let xpriv = match &data.xprv {
            Some(xprv) => Some(Xpriv::from_str(xprv).map_err(|e| invalid("xprv", &e))?),
            None => None,
        };
        let xpub = Xpub::from_str(&data.xpub).map_err(|e| invalid("xpub", &e))?;
        let fingerprint =
            Fingerprint::from_str(&data.fingerprint).map_err(|e| invalid("fingerprint", &e))?;
        let derivation_path = DerivationPath::from_str(&data.derivation_path)
            .map_err(|e| invalid("derivation path", &e))?;

        if let Some(xpriv) = &xpriv {
            if Xpub::from_priv(secp(), xpriv) != xpub {
                return Err(Error::KeyData(format!("{}: xprv does not match xpub", data.name)));
            }
        }

        Ok(Self {
            name: data.name.clone(),
            xpriv,
            xpub,
            fingerprint,
            derivation_path,
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_key_data(&KeyData::from_json_file(path)?)
    }

    pub fn is_watch_only(&self) -> bool {
        self.xpriv.is_none()
    }

    /// The public key at `child` below the account and its full key origin,
    /// ready for a `bip32_derivation` entry.
    pub fn derive_public_key(&self, child: &DerivationPath) -> Result<(PublicKey, KeySource)> {
        let derived = self.xpub.derive_pub(secp(), child)?;
        let path = self.derivation_path.extend(child);
        Ok((PublicKey::new(derived.public_key), (self.fingerprint, path)))
    }

    fn relative_path(&self, path: &DerivationPath) -> Option<DerivationPath> {
        let account: &[_] = self.derivation_path.as_ref();
        let full: &[_] = path.as_ref();
        full.strip_prefix(account).map(|rest| DerivationPath::from(rest.to_vec()))
    }
}

impl HdSigner for AccountKey {
    fn master_fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    fn derive_private_key(&self, path: &DerivationPath) -> Result<Option<PrivateKey>> {
        let Some(xpriv) = &self.xpriv else {
            return Ok(None);
        };
        let Some(child) = self.relative_path(path) else {
            return Ok(None);
        };
        Ok(Some(xpriv.derive_priv(secp(), &child)?.to_priv()))
    }
}
