//! Registered outputs.

use bitcoin::{Amount, FeeRate, ScriptBuf, TxOut};
use wabisabi_primitives::fees::{fee_for_vsize, output_vsize};

/// One registered output of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bob {
    /// Where the output pays.
    pub script: ScriptBuf,

    /// The amount credential value spent on it, covering the output value and its fee.
    pub credential_amount: Amount,
}

impl Bob {
    /// Creates a Bob.
    pub const fn new(script: ScriptBuf, credential_amount: Amount) -> Self {
        Self {
            script,
            credential_amount,
        }
    }

    /// Virtual size of the output.
    pub fn output_vsize(&self) -> u64 {
        output_vsize(&self.script)
    }

    /// The output value, `None` if the credential does not cover the output's fee.
    pub fn output_amount(&self, fee_rate: FeeRate) -> Option<Amount> {
        self.credential_amount
            .checked_sub(fee_for_vsize(fee_rate, self.output_vsize()))
    }

    /// The output, if its value is positive.
    pub fn txout(&self, fee_rate: FeeRate) -> Option<TxOut> {
        Some(TxOut {
            value: self.output_amount(fee_rate)?,
            script_pubkey: self.script.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use wabisabi_test_utils::bitcoin::generate_p2wpkh_script;

    use super::*;

    #[test]
    fn output_pays_its_own_fee() {
        let bob = Bob::new(generate_p2wpkh_script(), Amount::from_sat(10_000));
        let rate = FeeRate::from_sat_per_kwu(250);

        assert_eq!(bob.output_amount(rate), Some(Amount::from_sat(9_969)));

        let poor = Bob::new(generate_p2wpkh_script(), Amount::from_sat(30));
        assert_eq!(poor.txout(rate), None);
    }
}
