//! Partially Signed Bitcoin Transactions (BIP174).
//!
//! A [`Psbt`] moves through the BIP174 roles:
//!
//! - creator: [`Psbt::new`], [`Psbt::add_input`], [`Psbt::add_output`]
//! - updater: [`Psbt::update_input`], [`Psbt::update_output`], [`Psbt::update_global`]
//! - signer: [`Psbt::sign_input`], [`Psbt::sign_all_inputs`] and their async and
//!   HD variants
//! - combiner: [`Psbt::combine`]
//! - finalizer: [`Psbt::finalize_all_inputs`]
//! - extractor: [`Psbt::extract_transaction`], [`Psbt::fee_rate`]
//!
//! ```no_run
//! use psbt_toolkit::{InputField, InputSpec, OutputSpec, Psbt};
//! # fn run(outpoint: bitcoin::OutPoint, utxo: bitcoin::TxOut, key: bitcoin::PrivateKey)
//! #     -> psbt_toolkit::Result<()> {
//! let mut psbt = Psbt::new();
//! psbt.add_input(InputSpec::new(outpoint).with_field(InputField::WitnessUtxo(utxo.clone())))?;
//! psbt.add_output(OutputSpec::to_script(utxo.script_pubkey, bitcoin::Amount::from_sat(9_000)))?;
//! psbt.sign_all_inputs(&key, None)?;
//! psbt.finalize_all_inputs()?;
//! let tx = psbt.extract_transaction(false)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consts;
pub mod error;
pub mod keys;
pub mod map;
pub mod psbt;
pub mod raw;
pub mod roles;
pub mod script;

pub use crate::config::PsbtConfig;
pub use crate::error::{Error, Location, MalformedError, Result, ValidationError};
pub use crate::keys::{AccountKey, AsyncSigner, HdSigner, KeyData, Signer, Verifier};
pub use crate::map::{Global, GlobalField, Input, InputField, Output, OutputField};
pub use crate::psbt::Psbt;
pub use crate::roles::{InputSpec, OutputSpec, OutputTarget};
pub use crate::script::{InputScriptType, ScriptTemplate};
