//! Creator: builds the unsigned transaction.
//!
//! Every mutator here fails with [`Error::Immutable`] once an input carries a
//! signature, since any change would invalidate it.

use core::str::FromStr;

use bitcoin::{
    Address, Amount, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Witness, absolute, transaction,
};
use tracing::debug;

use crate::error::{Error, Location, Result};
use crate::map::{Input, InputField, Output, OutputField};
use crate::psbt::Psbt;

/// An input to append: the outpoint it spends plus initial map entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub previous_output: OutPoint,
    /// `0xffffffff` when absent.
    pub sequence: Option<Sequence>,
    pub fields: Vec<InputField>,
}

impl InputSpec {
    pub fn new(previous_output: OutPoint) -> Self {
        Self {
            previous_output,
            sequence: None,
            fields: Vec::new(),
        }
    }

    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_field(mut self, field: InputField) -> Self {
        self.fields.push(field);
        self
    }
}

/// Where an output pays to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Script(ScriptBuf),
    /// Resolved against the network of the PSBT's [`PsbtConfig`](crate::PsbtConfig).
    Address(String),
}

/// An output to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub target: OutputTarget,
    pub value: Amount,
    pub fields: Vec<OutputField>,
}

impl OutputSpec {
    pub fn to_script(script_pubkey: ScriptBuf, value: Amount) -> Self {
        Self {
            target: OutputTarget::Script(script_pubkey),
            value,
            fields: Vec::new(),
        }
    }

    pub fn to_address(address: impl Into<String>, value: Amount) -> Self {
        Self {
            target: OutputTarget::Address(address.into()),
            value,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: OutputField) -> Self {
        self.fields.push(field);
        self
    }
}

impl Psbt {
    /// Appends an input and its map.
    ///
    /// The initial fields are applied before anything is appended, so a failing
    /// field leaves the PSBT untouched.
    pub fn add_input(&mut self, spec: InputSpec) -> Result<()> {
        self.check_mutable()?;

        let InputSpec {
            previous_output,
            sequence,
            fields,
        } = spec;

        let tx = &self.global.unsigned_tx;
        if tx.input.iter().any(|txin| txin.previous_output == previous_output) {
            return Err(Error::DuplicateInput);
        }

        let index = tx.input.len();
        let mut input = Input::default();
        for field in fields {
            self.check_input_field(index, &previous_output, &field)?;
            input.insert(Location::Input(index), field)?;
        }

        self.global.unsigned_tx.input.push(TxIn {
            previous_output,
            script_sig: ScriptBuf::new(),
            sequence: sequence.unwrap_or(Sequence::MAX),
            witness: Witness::new(),
        });
        self.inputs.push(input);
        self.invalidate_fee_cache();

        debug!(index, %previous_output, "added input");
        Ok(())
    }

    pub fn add_inputs(&mut self, specs: impl IntoIterator<Item = InputSpec>) -> Result<()> {
        for spec in specs {
            self.add_input(spec)?;
        }
        Ok(())
    }

    /// Appends an output and its map. Outputs may repeat.
    pub fn add_output(&mut self, spec: OutputSpec) -> Result<()> {
        self.check_mutable()?;

        let OutputSpec {
            target,
            value,
            fields,
        } = spec;

        let script_pubkey = match target {
            OutputTarget::Script(script) => script,
            OutputTarget::Address(address) => self.address_to_script(&address)?,
        };

        let index = self.global.unsigned_tx.output.len();
        let mut output = Output::default();
        for field in fields {
            output.insert(Location::Output(index), field)?;
        }

        self.global.unsigned_tx.output.push(TxOut {
            value,
            script_pubkey,
        });
        self.outputs.push(output);
        self.invalidate_fee_cache();

        debug!(index, %value, "added output");
        Ok(())
    }

    pub fn add_outputs(&mut self, specs: impl IntoIterator<Item = OutputSpec>) -> Result<()> {
        for spec in specs {
            self.add_output(spec)?;
        }
        Ok(())
    }

    fn address_to_script(&self, address: &str) -> Result<ScriptBuf> {
        let invalid = |reason: String| Error::InvalidAddress {
            address: address.to_string(),
            reason,
        };
        let address = Address::from_str(address)
            .map_err(|e| invalid(e.to_string()))?
            .require_network(self.config.network)
            .map_err(|e| invalid(e.to_string()))?;
        Ok(address.script_pubkey())
    }

    pub fn set_version(&mut self, version: i32) -> Result<()> {
        self.check_mutable()?;
        self.global.unsigned_tx.version = transaction::Version(version);
        self.invalidate_fee_cache();
        Ok(())
    }

    pub fn set_locktime(&mut self, locktime: u32) -> Result<()> {
        self.check_mutable()?;
        self.global.unsigned_tx.lock_time = absolute::LockTime::from_consensus(locktime);
        self.invalidate_fee_cache();
        Ok(())
    }

    pub fn set_input_sequence(&mut self, index: usize, sequence: Sequence) -> Result<()> {
        self.check_mutable()?;
        let txin = self
            .global
            .unsigned_tx
            .input
            .get_mut(index)
            .ok_or(Error::InputIndex(index))?;
        txin.sequence = sequence;
        self.invalidate_fee_cache();
        Ok(())
    }

    /// Sets the fee rate limit, in sat/vB, enforced by
    /// [`extract_transaction`](Self::extract_transaction).
    pub fn set_maximum_fee_rate(&mut self, rate: u64) {
        self.config.maximum_fee_rate = rate;
    }

    pub fn version(&self) -> i32 {
        self.global.unsigned_tx.version.0
    }

    pub fn locktime(&self) -> u32 {
        self.global.unsigned_tx.lock_time.to_consensus_u32()
    }

    pub fn tx_inputs(&self) -> &[TxIn] {
        &self.global.unsigned_tx.input
    }

    pub fn tx_outputs(&self) -> &[TxOut] {
        &self.global.unsigned_tx.output
    }
}
