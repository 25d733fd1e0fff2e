use std::sync::Arc;

use bitcoin::{
    absolute::LockTime, transaction::Version, Amount, OutPoint, ScriptBuf, Sequence,
    SignedAmount, Transaction, TxIn, TxOut, Witness,
};
use wabisabi_primitives::{
    coin::Coin,
    constants::SHARED_OVERHEAD_VSIZE,
    fees::{fee_for_vsize, is_allowed_output_script, output_vsize},
};

use crate::{
    errors::ConstructionError, parameters::MultipartyTransactionParameters, signing::SigningState,
};

/// A coinjoin still accepting inputs and outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructionState {
    parameters: Arc<MultipartyTransactionParameters>,
    inputs: Vec<Coin>,
    outputs: Vec<TxOut>,
}

impl ConstructionState {
    /// Creates an empty transaction under `parameters`.
    pub fn new(parameters: MultipartyTransactionParameters) -> Self {
        Self {
            parameters: Arc::new(parameters),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// The rules this transaction follows.
    pub fn parameters(&self) -> &MultipartyTransactionParameters {
        &self.parameters
    }

    /// The inputs added so far, in insertion order.
    pub fn inputs(&self) -> &[Coin] {
        &self.inputs
    }

    /// The outputs added so far, in insertion order.
    pub fn outputs(&self) -> &[TxOut] {
        &self.outputs
    }

    /// Virtual size of the transaction if it were finalized now.
    pub fn estimated_vsize(&self) -> u64 {
        let inputs: u64 = self.inputs.iter().filter_map(Coin::input_vsize).sum();
        let outputs: u64 = self
            .outputs
            .iter()
            .map(|o| output_vsize(&o.script_pubkey))
            .sum();
        SHARED_OVERHEAD_VSIZE + inputs + outputs
    }

    /// Effective value of the inputs minus the outputs and their fees.
    ///
    /// Shared overhead is not charged to anyone, so a zero balance still leaves a small fee.
    pub fn balance(&self) -> SignedAmount {
        let fee_rate = self.parameters.fee_rate;
        let inputs: i64 = self
            .inputs
            .iter()
            .filter_map(|c| c.effective_value(fee_rate))
            .map(|a| a.to_sat() as i64)
            .sum();
        let outputs: i64 = self
            .outputs
            .iter()
            .map(|o| {
                let fee = fee_for_vsize(fee_rate, output_vsize(&o.script_pubkey));
                (o.value + fee).to_sat() as i64
            })
            .sum();
        SignedAmount::from_sat(inputs - outputs)
    }

    /// Returns a new state with `coin` added as an input.
    pub fn add_input(&self, coin: Coin) -> Result<Self, ConstructionError> {
        if !coin.script_pubkey().is_p2wpkh() {
            return Err(ConstructionError::ScriptNotAllowed);
        }
        check_range(coin.amount(), &self.parameters.allowed_input_amounts)?;
        if self.inputs.iter().any(|c| c.outpoint == coin.outpoint) {
            return Err(ConstructionError::DuplicateInput(coin.outpoint));
        }

        let mut next = self.clone();
        next.inputs.push(coin);
        next.check_vsize()?;
        Ok(next)
    }

    /// Returns a new state with `output` added.
    pub fn add_output(&self, output: TxOut) -> Result<Self, ConstructionError> {
        if !is_allowed_output_script(&output.script_pubkey) {
            return Err(ConstructionError::ScriptNotAllowed);
        }
        if output.value < output.script_pubkey.minimal_non_dust() {
            return Err(ConstructionError::DustOutput(output.value));
        }
        check_range(output.value, &self.parameters.allowed_output_amounts)?;

        let mut next = self.clone();
        next.outputs.push(output);
        next.check_vsize()?;
        Ok(next)
    }

    /// Removes the input spending `outpoint`, if present.
    pub fn remove_input(&self, outpoint: &OutPoint) -> Self {
        let mut next = self.clone();
        next.inputs.retain(|c| c.outpoint != *outpoint);
        next
    }

    /// Fixes the transaction and moves to signing.
    ///
    /// Inputs are ordered by descending value and outputs by descending value then script, so the
    /// final layout does not reveal registration order.
    pub fn finalize(&self) -> Result<SigningState, ConstructionError> {
        if self.inputs.is_empty() {
            return Err(ConstructionError::NoInputs);
        }
        let balance = self.balance();
        if balance.is_negative() {
            return Err(ConstructionError::NegativeBalance(balance));
        }

        let mut inputs = self.inputs.clone();
        inputs.sort_by(|a, b| {
            b.amount()
                .cmp(&a.amount())
                .then_with(|| a.outpoint.cmp(&b.outpoint))
        });

        let mut outputs = self.outputs.clone();
        outputs.sort_by(|a, b| {
            b.value
                .cmp(&a.value)
                .then_with(|| a.script_pubkey.cmp(&b.script_pubkey))
        });

        let unsigned = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: inputs
                .iter()
                .map(|coin| TxIn {
                    previous_output: coin.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: outputs,
        };

        Ok(SigningState::new(self.parameters.clone(), inputs, unsigned))
    }

    fn check_vsize(&self) -> Result<(), ConstructionError> {
        let vsize = self.estimated_vsize();
        let max = self.parameters.max_transaction_vsize;
        if vsize > max {
            return Err(ConstructionError::TooMuchVsize { vsize, max });
        }
        Ok(())
    }
}

fn check_range(
    amount: Amount,
    range: &std::ops::RangeInclusive<Amount>,
) -> Result<(), ConstructionError> {
    if amount < *range.start() {
        return Err(ConstructionError::NotEnoughFunds {
            amount,
            min: *range.start(),
        });
    }
    if amount > *range.end() {
        return Err(ConstructionError::TooMuchFunds {
            amount,
            max: *range.end(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bitcoin::{FeeRate, ScriptBuf};
    use wabisabi_test_utils::bitcoin::{
        generate_p2tr_script, generate_p2wpkh_coins, generate_p2wpkh_script,
    };

    use super::*;

    fn parameters() -> MultipartyTransactionParameters {
        MultipartyTransactionParameters {
            fee_rate: FeeRate::from_sat_per_kwu(250),
            allowed_input_amounts: Amount::from_sat(5_000)..=Amount::from_sat(1_000_000),
            allowed_output_amounts: Amount::from_sat(5_000)..=Amount::from_sat(1_000_000),
            max_transaction_vsize: 1_000,
        }
    }

    fn txout(sats: u64, script_pubkey: ScriptBuf) -> TxOut {
        TxOut {
            value: Amount::from_sat(sats),
            script_pubkey,
        }
    }

    #[test]
    fn adding_returns_a_new_state() {
        let empty = ConstructionState::new(parameters());
        let (coin, _) = generate_p2wpkh_coins(&[Amount::from_sat(10_000)]).remove(0);

        let with_input = empty.add_input(coin.clone()).expect("valid input");
        assert!(empty.inputs().is_empty());
        assert_eq!(with_input.inputs(), &[coin]);
        assert_eq!(with_input.estimated_vsize(), SHARED_OVERHEAD_VSIZE + 68);
    }

    #[test]
    fn duplicate_inputs_are_rejected() {
        let (coin, _) = generate_p2wpkh_coins(&[Amount::from_sat(10_000)]).remove(0);
        let state = ConstructionState::new(parameters())
            .add_input(coin.clone())
            .expect("valid input");

        assert_eq!(
            state.add_input(coin.clone()),
            Err(ConstructionError::DuplicateInput(coin.outpoint))
        );
    }

    #[test]
    fn amounts_outside_the_allowed_range_are_rejected() {
        let state = ConstructionState::new(parameters());
        let coins =
            generate_p2wpkh_coins(&[Amount::from_sat(4_999), Amount::from_sat(1_000_001)]);

        assert!(matches!(
            state.add_input(coins[0].0.clone()),
            Err(ConstructionError::NotEnoughFunds { .. })
        ));
        assert!(matches!(
            state.add_input(coins[1].0.clone()),
            Err(ConstructionError::TooMuchFunds { .. })
        ));
        assert!(matches!(
            state.add_output(txout(4_999, generate_p2wpkh_script())),
            Err(ConstructionError::NotEnoughFunds { .. })
        ));
    }

    #[test]
    fn unsupported_scripts_are_rejected() {
        let state = ConstructionState::new(parameters());
        let mut coin = generate_p2wpkh_coins(&[Amount::from_sat(10_000)]).remove(0).0;
        coin.txout.script_pubkey = generate_p2tr_script();

        assert_eq!(state.add_input(coin), Err(ConstructionError::ScriptNotAllowed));
        assert_eq!(
            state.add_output(txout(10_000, ScriptBuf::new())),
            Err(ConstructionError::ScriptNotAllowed)
        );
        assert!(state
            .add_output(txout(10_000, generate_p2tr_script()))
            .is_ok());
    }

    #[test]
    fn vsize_limit_is_enforced() {
        let mut state = ConstructionState::new(parameters());
        for (coin, _) in generate_p2wpkh_coins(&[Amount::from_sat(10_000); 14]) {
            state = state.add_input(coin).expect("fits");
        }
        // 15 + 14 * 68 = 967
        let (coin, _) = generate_p2wpkh_coins(&[Amount::from_sat(10_000)]).remove(0);
        assert_eq!(
            state.add_input(coin),
            Err(ConstructionError::TooMuchVsize {
                vsize: 1_035,
                max: 1_000
            })
        );
    }

    #[test]
    fn finalize_requires_non_negative_balance() {
        let (coin, _) = generate_p2wpkh_coins(&[Amount::from_sat(10_000)]).remove(0);
        let state = ConstructionState::new(parameters())
            .add_input(coin)
            .expect("valid input");

        // effective input 9_932, output costs 10_000 + 31
        let over = state
            .add_output(txout(10_000, generate_p2wpkh_script()))
            .expect("valid output");
        assert!(matches!(
            over.finalize(),
            Err(ConstructionError::NegativeBalance(_))
        ));

        let exact = state
            .add_output(txout(9_901, generate_p2wpkh_script()))
            .expect("valid output");
        assert_eq!(exact.balance(), SignedAmount::ZERO);
        assert!(exact.finalize().is_ok());

        assert_eq!(
            ConstructionState::new(parameters()).finalize(),
            Err(ConstructionError::NoInputs)
        );
    }

    #[test]
    fn finalize_orders_by_value() {
        let coins = generate_p2wpkh_coins(&[
            Amount::from_sat(10_000),
            Amount::from_sat(30_000),
            Amount::from_sat(20_000),
        ]);
        let mut state = ConstructionState::new(parameters());
        for (coin, _) in &coins {
            state = state.add_input(coin.clone()).expect("valid input");
        }
        state = state
            .add_output(txout(6_000, generate_p2wpkh_script()))
            .and_then(|s| s.add_output(txout(9_000, generate_p2wpkh_script())))
            .expect("valid outputs");

        let signing = state.finalize().expect("balanced");
        let input_values: Vec<_> = signing
            .inputs()
            .iter()
            .map(|c| c.amount().to_sat())
            .collect();
        let output_values: Vec<_> = signing
            .outputs()
            .iter()
            .map(|o| o.value.to_sat())
            .collect();

        assert_eq!(input_values, vec![30_000, 20_000, 10_000]);
        assert_eq!(output_values, vec![9_000, 6_000]);
    }
}
