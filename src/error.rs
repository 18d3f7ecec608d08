//! Error types for PSBT operations.

use core::fmt;

use bitcoin::{Amount, PublicKey};
use thiserror::Error;

/// Result type alias for PSBT operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which map of a PSBT an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Global,
    Input(usize),
    Output(usize),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Global => write!(f, "global map"),
            Location::Input(index) => write!(f, "input #{}", index),
            Location::Output(index) => write!(f, "output #{}", index),
        }
    }
}

/// Byte-level decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedError {
    #[error("Invalid PSBT magic bytes")]
    InvalidMagic,

    #[error("Unexpected end of data while reading {0}")]
    Truncated(&'static str),

    #[error("Map in {0} is missing its terminating zero-length key")]
    MissingTerminator(Location),

    #[error("Invalid compact size integer")]
    InvalidCompactSize,

    #[error("Invalid key {key} in {location}")]
    InvalidKey { location: Location, key: String },

    #[error("Invalid value for {field} in {location}: {reason}")]
    InvalidValue {
        location: Location,
        field: &'static str,
        reason: String,
    },

    #[error("Unsupported PSBT version {0}")]
    UnsupportedVersion(u32),

    #[error("{0} unexpected trailing bytes after the last output map")]
    TrailingData(usize),

    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid hex: {0}")]
    Hex(String),
}

/// A structural rule violation, naming the offending map and field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {field} in {location}: {reason}")]
pub struct ValidationError {
    pub location: Location,
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub(crate) fn new(location: Location, field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            location,
            field,
            reason: reason.into(),
        }
    }
}

/// Error types for PSBT operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed PSBT: {0}")]
    Malformed(#[from] MalformedError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Can not modify transaction, signatures exist.")]
    Immutable,

    #[error("No input #{0}")]
    InputIndex(usize),

    #[error("No output #{0}")]
    OutputIndex(usize),

    #[error("Duplicate input detected.")]
    DuplicateInput,

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("No signer available for input #{0}")]
    NoSigner(usize),

    #[error(
        "Sighash type is not allowed. Retry the sign method passing the allowed sighash types. Sighash type: {0}"
    )]
    SighashPolicy(bitcoin::EcdsaSighashType),

    #[error("No UTXO information for input #{0}")]
    MissingUtxo(usize),

    #[error("Non-witness UTXO hash for input #{0} doesn't match the hash specified in the prevout")]
    NonWitnessUtxoMismatch(usize),

    #[error("Witness UTXO for input #{0} does not match the output of its non-witness UTXO")]
    WitnessUtxoMismatch(usize),

    #[error("Input #{0} has witnessUtxo but non-segwit script")]
    NonSegwitWitnessUtxo(usize),

    #[error("{script} script for {location} doesn't match the scriptPubKey in the prevout")]
    ScriptMismatch {
        location: Location,
        script: &'static str,
    },

    #[error("{script} script missing for {location}")]
    MissingScript {
        location: Location,
        script: &'static str,
    },

    #[error("Can not sign for input #{index} with the key {pubkey}")]
    KeyNotInScript { index: usize, pubkey: PublicKey },

    #[error("Derived key for input #{index} does not match bip32 derivation {pubkey}")]
    DerivedKeyMismatch { index: usize, pubkey: PublicKey },

    #[error("Signer failed: {0}")]
    Signer(String),

    #[error("Sighash computation failed: {0}")]
    Sighash(String),

    #[error("No signatures to validate")]
    NoSignatures,

    #[error("No signatures for this pubkey")]
    PubkeyNotFound,

    #[error("No inputs were signed")]
    NoInputsSigned,

    #[error("No script found for input #{0}")]
    NoScript(usize),

    #[error("Signature sighash does not match input sighash type on input #{0}")]
    SighashMismatch(usize),

    #[error("Can not finalize input #{0}")]
    Finalization(usize),

    #[error("Sum of {0} amounts overflows")]
    AmountOverflow(&'static str),

    #[error("Not finalized")]
    NotFinalized,

    #[error("Outputs are spending more than inputs ({outputs} > {inputs})")]
    NegativeFee { inputs: Amount, outputs: Amount },

    #[error(
        "Fee rate of {fee_rate} sat/vB exceeds the maximum of {maximum} sat/vB (fee {fee} over {vsize} vbytes)"
    )]
    FeeTooHigh {
        fee: Amount,
        fee_rate: u64,
        maximum: u64,
        vsize: usize,
    },

    #[error("Combined PSBTs must have the same unsigned transaction")]
    UnsignedTxMismatch,

    #[error("BIP32 error: {0}")]
    Bip32(#[from] bitcoin::bip32::Error),

    #[error("Invalid key data: {0}")]
    KeyData(String),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
