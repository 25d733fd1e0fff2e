use crate::{
    construction::ConstructionState, errors::CoinjoinStateError, signing::SigningState,
};

/// The transaction of a round, in whichever state it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoinjoinState {
    /// Inputs and outputs are being added.
    Construction(ConstructionState),

    /// Witnesses are being collected.
    Signing(SigningState),
}

impl CoinjoinState {
    /// The construction state, or an error once finalized.
    pub fn as_construction(&self) -> Result<&ConstructionState, CoinjoinStateError> {
        match self {
            Self::Construction(state) => Ok(state),
            Self::Signing(_) => Err(CoinjoinStateError::AlreadyFinalized),
        }
    }

    /// The signing state, or an error before finalization.
    pub fn as_signing(&self) -> Result<&SigningState, CoinjoinStateError> {
        match self {
            Self::Signing(state) => Ok(state),
            Self::Construction(_) => Err(CoinjoinStateError::NotFinalized),
        }
    }

    /// Moves from construction to signing. Can only happen once.
    pub fn finalize(&self) -> Result<Self, CoinjoinStateError> {
        Ok(Self::Signing(self.as_construction()?.finalize()?))
    }

    /// Whether the transaction has been finalized.
    pub const fn is_finalized(&self) -> bool {
        matches!(self, Self::Signing(_))
    }
}

impl From<ConstructionState> for CoinjoinState {
    fn from(state: ConstructionState) -> Self {
        Self::Construction(state)
    }
}

impl From<SigningState> for CoinjoinState {
    fn from(state: SigningState) -> Self {
        Self::Signing(state)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{Amount, FeeRate};
    use wabisabi_test_utils::bitcoin::generate_p2wpkh_coins;

    use super::*;
    use crate::parameters::MultipartyTransactionParameters;

    #[test]
    fn finalize_happens_once() {
        let (coin, _) = generate_p2wpkh_coins(&[Amount::from_sat(10_000)]).remove(0);
        let construction = ConstructionState::new(MultipartyTransactionParameters {
            fee_rate: FeeRate::from_sat_per_kwu(250),
            allowed_input_amounts: Amount::from_sat(5_000)..=Amount::from_sat(1_000_000),
            allowed_output_amounts: Amount::from_sat(5_000)..=Amount::from_sat(1_000_000),
            max_transaction_vsize: 1_000,
        })
        .add_input(coin)
        .expect("valid input");

        let state = CoinjoinState::from(construction);
        let finalized = state.finalize().expect("balanced");

        assert!(finalized.is_finalized());
        assert!(finalized.as_signing().is_ok());
        assert_eq!(
            finalized.finalize(),
            Err(CoinjoinStateError::AlreadyFinalized)
        );
        assert_eq!(
            state.as_signing().map(|_| ()),
            Err(CoinjoinStateError::NotFinalized)
        );
    }
}
