use std::sync::Arc;

use bitcoin::{Amount, Transaction, TxOut, Witness};
use wabisabi_primitives::{coin::Coin, witness::verify_p2wpkh_witness};

use crate::{errors::SigningError, parameters::MultipartyTransactionParameters};

/// A finalized coinjoin collecting witnesses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningState {
    parameters: Arc<MultipartyTransactionParameters>,
    inputs: Vec<Coin>,
    unsigned: Transaction,
    witnesses: Vec<Option<Witness>>,
}

impl SigningState {
    pub(crate) fn new(
        parameters: Arc<MultipartyTransactionParameters>,
        inputs: Vec<Coin>,
        unsigned: Transaction,
    ) -> Self {
        let witnesses = vec![None; inputs.len()];
        Self {
            parameters,
            inputs,
            unsigned,
            witnesses,
        }
    }

    /// The rules this transaction was built under.
    pub fn parameters(&self) -> &MultipartyTransactionParameters {
        &self.parameters
    }

    /// Inputs in transaction order.
    pub fn inputs(&self) -> &[Coin] {
        &self.inputs
    }

    /// Outputs in transaction order.
    pub fn outputs(&self) -> &[TxOut] {
        &self.unsigned.output
    }

    /// Index of the input spending `coin`'s outpoint.
    pub fn input_index(&self, coin: &Coin) -> Option<usize> {
        self.inputs.iter().position(|c| c.outpoint == coin.outpoint)
    }

    /// The transaction without witnesses.
    pub fn create_unsigned_transaction(&self) -> Transaction {
        self.unsigned.clone()
    }

    /// Total input value minus total output value.
    pub fn fee(&self) -> Amount {
        let inputs: Amount = self.inputs.iter().map(Coin::amount).sum();
        let outputs: Amount = self.unsigned.output.iter().map(|o| o.value).sum();
        inputs - outputs
    }

    /// Returns a new state with `witness` recorded for input `index`.
    pub fn add_witness(&self, index: usize, witness: Witness) -> Result<Self, SigningError> {
        let coin = self
            .inputs
            .get(index)
            .ok_or(SigningError::InvalidInputIndex(index))?;
        if self.witnesses[index].is_some() {
            return Err(SigningError::AlreadySigned(index));
        }

        verify_p2wpkh_witness(&self.unsigned, index, coin, &witness)
            .map_err(|source| SigningError::InvalidWitness { index, source })?;

        let mut next = self.clone();
        next.witnesses[index] = Some(witness);
        Ok(next)
    }

    /// Whether every input has a witness.
    pub fn is_fully_signed(&self) -> bool {
        self.witnesses.iter().all(Option::is_some)
    }

    /// Inputs still lacking a witness.
    pub fn unsigned_inputs(&self) -> impl Iterator<Item = &Coin> + '_ {
        self.inputs
            .iter()
            .zip(&self.witnesses)
            .filter(|(_, w)| w.is_none())
            .map(|(c, _)| c)
    }

    /// The fully signed transaction.
    pub fn create_transaction(&self) -> Result<Transaction, SigningError> {
        let missing = self.witnesses.iter().filter(|w| w.is_none()).count();
        if missing > 0 {
            return Err(SigningError::NotFullySigned(missing));
        }

        let mut tx = self.unsigned.clone();
        for (input, witness) in tx.input.iter_mut().zip(&self.witnesses) {
            input.witness = witness.clone().unwrap_or_default();
        }
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{secp256k1::SecretKey, FeeRate, ScriptBuf};
    use wabisabi_primitives::witness::sign_p2wpkh_input;
    use wabisabi_test_utils::bitcoin::{generate_p2wpkh_coins, generate_p2wpkh_script};

    use super::*;
    use crate::construction::ConstructionState;

    fn signing_state() -> (SigningState, Vec<(Coin, SecretKey)>) {
        let parameters = MultipartyTransactionParameters {
            fee_rate: FeeRate::from_sat_per_kwu(250),
            allowed_input_amounts: Amount::from_sat(5_000)..=Amount::from_sat(1_000_000),
            allowed_output_amounts: Amount::from_sat(5_000)..=Amount::from_sat(1_000_000),
            max_transaction_vsize: 100_000,
        };
        let coins = generate_p2wpkh_coins(&[Amount::from_sat(50_000), Amount::from_sat(70_000)]);

        let mut state = ConstructionState::new(parameters);
        for (coin, _) in &coins {
            state = state.add_input(coin.clone()).expect("valid input");
        }
        for value in [60_000, 55_000] {
            state = state
                .add_output(TxOut {
                    value: Amount::from_sat(value),
                    script_pubkey: generate_p2wpkh_script(),
                })
                .expect("valid output");
        }

        (state.finalize().expect("balanced"), coins)
    }

    fn witness_for(state: &SigningState, coins: &[(Coin, SecretKey)], index: usize) -> Witness {
        let coin = &state.inputs()[index];
        let (_, key) = coins
            .iter()
            .find(|(c, _)| c.outpoint == coin.outpoint)
            .expect("own coin");
        sign_p2wpkh_input(&state.create_unsigned_transaction(), index, coin, key)
            .expect("key matches")
    }

    #[test]
    fn fully_signed_transaction_pays_the_residual_as_fee() {
        let (state, coins) = signing_state();
        assert!(!state.is_fully_signed());
        assert_eq!(state.unsigned_inputs().count(), 2);

        let state = state
            .add_witness(0, witness_for(&state, &coins, 0))
            .expect("valid witness");
        assert_eq!(state.unsigned_inputs().count(), 1);
        assert_eq!(
            state.create_transaction(),
            Err(SigningError::NotFullySigned(1))
        );

        let state = state
            .add_witness(1, witness_for(&state, &coins, 1))
            .expect("valid witness");
        assert!(state.is_fully_signed());

        let tx = state.create_transaction().expect("fully signed");
        assert!(tx.input.iter().all(|i| i.witness.len() == 2));
        assert_eq!(state.fee(), Amount::from_sat(120_000 - 115_000));
    }

    #[test]
    fn witness_for_the_wrong_input_is_rejected() {
        let (state, coins) = signing_state();
        let witness = witness_for(&state, &coins, 0);

        assert!(matches!(
            state.add_witness(1, witness),
            Err(SigningError::InvalidWitness { index: 1, .. })
        ));
    }

    #[test]
    fn inputs_cannot_be_signed_twice() {
        let (state, coins) = signing_state();
        let witness = witness_for(&state, &coins, 0);
        let state = state.add_witness(0, witness.clone()).expect("valid witness");

        assert_eq!(
            state.add_witness(0, witness),
            Err(SigningError::AlreadySigned(0))
        );
        assert_eq!(
            state.add_witness(7, Witness::new()),
            Err(SigningError::InvalidInputIndex(7))
        );
    }

    #[test]
    fn malformed_witness_is_rejected() {
        let (state, _) = signing_state();
        let mut witness = Witness::new();
        witness.push(ScriptBuf::new().as_bytes());

        assert!(matches!(
            state.add_witness(0, witness),
            Err(SigningError::InvalidWitness { .. })
        ));
    }
}
