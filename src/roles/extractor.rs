//! Extractor: the network transaction and its fee.

use bitcoin::{Amount, Transaction};
use tracing::debug;

use crate::error::{Error, Result};
use crate::psbt::{FeeSummary, Psbt};

impl Psbt {
    /// The unsigned transaction with every input's final scriptSig and witness.
    fn assemble_final_tx(&self) -> Result<Transaction> {
        if !self.is_finalized() {
            return Err(Error::NotFinalized);
        }
        let mut tx = self.global.unsigned_tx.clone();
        for (txin, input) in tx.input.iter_mut().zip(&self.inputs) {
            if let Some(script_sig) = &input.final_script_sig {
                txin.script_sig = script_sig.clone();
            }
            if let Some(witness) = &input.final_script_witness {
                txin.witness = witness.clone();
            }
        }
        Ok(tx)
    }

    fn compute_fee_summary(&self) -> Result<FeeSummary> {
        let tx = self.assemble_final_tx()?;

        let mut inputs = Amount::ZERO;
        for index in 0..self.inputs.len() {
            inputs = inputs
                .checked_add(self.resolve_utxo(index)?.value)
                .ok_or(Error::AmountOverflow("inputs"))?;
        }
        let outputs = tx
            .output
            .iter()
            .try_fold(Amount::ZERO, |sum, txout| sum.checked_add(txout.value))
            .ok_or(Error::AmountOverflow("outputs"))?;
        let fee = inputs
            .checked_sub(outputs)
            .ok_or(Error::NegativeFee { inputs, outputs })?;

        let vsize = tx.vsize() as u64;
        let fee_rate = fee.to_sat() / vsize;
        debug!(%fee, fee_rate, vsize, "computed fee");
        Ok(FeeSummary { fee, fee_rate, tx })
    }

    fn fee_summary(&self) -> Result<&FeeSummary> {
        if let Some(summary) = self.fee_cache().get() {
            return Ok(summary);
        }
        let summary = self.compute_fee_summary()?;
        Ok(self.fee_cache().get_or_init(|| summary))
    }

    /// Sum of the spent outputs minus sum of the created outputs.
    ///
    /// Requires every input to be finalized.
    pub fn fee(&self) -> Result<Amount> {
        Ok(self.fee_summary()?.fee)
    }

    /// Fee per virtual byte of the extracted transaction, rounded down.
    ///
    /// Requires every input to be finalized. The value is memoized until the
    /// next mutation.
    pub fn fee_rate(&self) -> Result<u64> {
        Ok(self.fee_summary()?.fee_rate)
    }

    /// The signed transaction, ready for broadcast.
    ///
    /// Unless `disable_fee_check` is set, fails with [`Error::FeeTooHigh`] when
    /// the fee rate exceeds the configured maximum.
    pub fn extract_transaction(&self, disable_fee_check: bool) -> Result<Transaction> {
        if disable_fee_check {
            return self.assemble_final_tx();
        }

        let summary = self.fee_summary()?;
        let maximum = self.config.maximum_fee_rate;
        if summary.fee_rate > maximum {
            return Err(Error::FeeTooHigh {
                fee: summary.fee,
                fee_rate: summary.fee_rate,
                maximum,
                vsize: summary.tx.vsize(),
            });
        }
        debug!(txid = %summary.tx.compute_txid(), "extracted transaction");
        Ok(summary.tx.clone())
    }
}
