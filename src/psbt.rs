//! The PSBT container and its binary/text codecs.

use core::fmt;
use core::str::FromStr;
use std::sync::OnceLock;

use base64::{Engine, engine::general_purpose::STANDARD};
use bitcoin::hex::{DisplayHex, FromHex};
use bitcoin::{Amount, Transaction, absolute, transaction};
use tracing::debug;

use crate::config::PsbtConfig;
use crate::consts::PSBT_MAGIC;
use crate::error::{Error, Location, MalformedError, Result};
use crate::map::{Global, Input, Map, Output};
use crate::raw::Decoder;

/// Memoized result of the fee computation over a fully finalized PSBT.
#[derive(Debug, Clone)]
pub(crate) struct FeeSummary {
    pub(crate) fee: Amount,
    pub(crate) fee_rate: u64,
    pub(crate) tx: Transaction,
}

/// A Partially Signed Bitcoin Transaction.
///
/// The input and output maps are positionally tied to the unsigned transaction
/// and always have the same lengths as its input and output lists. Equality
/// compares the maps only; options and cached values are ignored.
#[derive(Debug, Clone)]
pub struct Psbt {
    pub(crate) global: Global,
    pub(crate) inputs: Vec<Input>,
    pub(crate) outputs: Vec<Output>,
    pub(crate) config: PsbtConfig,
    fee_cache: OnceLock<FeeSummary>,
}

impl Default for Psbt {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Psbt {
    fn eq(&self, other: &Self) -> bool {
        self.global == other.global && self.inputs == other.inputs && self.outputs == other.outputs
    }
}

impl Eq for Psbt {}

impl Psbt {
    /// An empty PSBT: version 2, locktime 0, no inputs or outputs.
    pub fn new() -> Self {
        Self::with_config(PsbtConfig::default())
    }

    pub fn with_config(config: PsbtConfig) -> Self {
        let tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![],
            output: vec![],
        };
        Self::from_parts(Global::new(tx), config)
    }

    /// Wraps an unsigned transaction, creating one empty map per input and output.
    pub fn from_unsigned_tx(tx: Transaction) -> Result<Self> {
        crate::map::check_unsigned_tx(&tx)?;
        Ok(Self::from_parts(Global::new(tx), PsbtConfig::default()))
    }

    fn from_parts(global: Global, config: PsbtConfig) -> Self {
        let inputs = vec![Input::default(); global.unsigned_tx.input.len()];
        let outputs = vec![Output::default(); global.unsigned_tx.output.len()];
        Self {
            global,
            inputs,
            outputs,
            config,
            fee_cache: OnceLock::new(),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = PSBT_MAGIC.to_vec();
        self.global.encode_to(&mut buf);
        for input in &self.inputs {
            input.encode_to(&mut buf);
        }
        for output in &self.outputs {
            output.encode_to(&mut buf);
        }
        buf
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut decoder = Decoder::new(bytes);
        let magic = decoder
            .read_bytes(PSBT_MAGIC.len() as u64, "magic")
            .map_err(|_| MalformedError::InvalidMagic)?;
        if magic != PSBT_MAGIC {
            return Err(MalformedError::InvalidMagic.into());
        }

        let global = Global::decode(decoder.read_map(Location::Global)?)?;

        let input_count = global.unsigned_tx.input.len();
        let mut inputs = Vec::with_capacity(input_count);
        for index in 0..input_count {
            inputs.push(Input::decode(decoder.read_map(Location::Input(index))?, index)?);
        }

        let output_count = global.unsigned_tx.output.len();
        let mut outputs = Vec::with_capacity(output_count);
        for index in 0..output_count {
            outputs.push(Output::decode(decoder.read_map(Location::Output(index))?, index)?);
        }

        if decoder.remaining() != 0 {
            return Err(MalformedError::TrailingData(decoder.remaining()).into());
        }

        debug!(inputs = input_count, outputs = output_count, "decoded psbt");
        Ok(Self {
            global,
            inputs,
            outputs,
            config: PsbtConfig::default(),
            fee_cache: OnceLock::new(),
        })
    }

    pub fn serialize_hex(&self) -> String {
        self.serialize().to_lower_hex_string()
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = Vec::<u8>::from_hex(s.trim()).map_err(|e| MalformedError::Hex(e.to_string()))?;
        Self::deserialize(&bytes)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.serialize())
    }

    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = STANDARD.decode(s.trim()).map_err(MalformedError::from)?;
        Self::deserialize(&bytes)
    }

    pub fn config(&self) -> &PsbtConfig {
        &self.config
    }

    /// Replaces the options, e.g. after [`deserialize`](Self::deserialize).
    pub fn set_config(&mut self, config: PsbtConfig) {
        self.config = config;
        self.invalidate_fee_cache();
    }

    pub fn global(&self) -> &Global {
        &self.global
    }

    pub fn unsigned_tx(&self) -> &Transaction {
        &self.global.unsigned_tx
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn input(&self, index: usize) -> Result<&Input> {
        self.inputs.get(index).ok_or(Error::InputIndex(index))
    }

    pub fn output(&self, index: usize) -> Result<&Output> {
        self.outputs.get(index).ok_or(Error::OutputIndex(index))
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// True once any input holds a partial signature or a final script.
    pub fn has_signatures(&self) -> bool {
        self.inputs.iter().any(Input::has_signatures)
    }

    /// True if every input is finalized.
    pub fn is_finalized(&self) -> bool {
        self.inputs.iter().all(Input::is_finalized)
    }

    pub(crate) fn check_mutable(&self) -> Result<()> {
        if self.has_signatures() {
            return Err(Error::Immutable);
        }
        Ok(())
    }

    pub(crate) fn input_mut(&mut self, index: usize) -> Result<&mut Input> {
        self.fee_cache.take();
        self.inputs.get_mut(index).ok_or(Error::InputIndex(index))
    }

    pub(crate) fn output_mut(&mut self, index: usize) -> Result<&mut Output> {
        self.fee_cache.take();
        self.outputs.get_mut(index).ok_or(Error::OutputIndex(index))
    }

    pub(crate) fn fee_cache(&self) -> &OnceLock<FeeSummary> {
        &self.fee_cache
    }

    pub(crate) fn invalidate_fee_cache(&mut self) {
        self.fee_cache.take();
    }
}

impl fmt::Display for Psbt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl FromStr for Psbt {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_base64(s)
    }
}
