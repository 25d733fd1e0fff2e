//! Coins offered to a coinjoin.

use bitcoin::{Amount, FeeRate, OutPoint, ScriptBuf, TxOut};
use serde::{Deserialize, Serialize};

use crate::fees::{fee_for_vsize, input_vsize};

/// An unspent output together with the data needed to spend it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    /// Where the output lives.
    pub outpoint: OutPoint,

    /// Its value and locking script.
    pub txout: TxOut,
}

impl Coin {
    /// Creates a coin.
    pub const fn new(outpoint: OutPoint, txout: TxOut) -> Self {
        Self { outpoint, txout }
    }

    /// The value of the coin.
    pub const fn amount(&self) -> Amount {
        self.txout.value
    }

    /// The locking script of the coin.
    pub const fn script_pubkey(&self) -> &ScriptBuf {
        &self.txout.script_pubkey
    }

    /// Virtual size of spending this coin, `None` for unsupported scripts.
    pub fn input_vsize(&self) -> Option<u64> {
        input_vsize(&self.txout.script_pubkey)
    }

    /// Value left once the coin pays for its own input at `fee_rate`.
    ///
    /// `None` if the script is unsupported or the fee exceeds the value.
    pub fn effective_value(&self, fee_rate: FeeRate) -> Option<Amount> {
        let vsize = self.input_vsize()?;
        self.amount().checked_sub(fee_for_vsize(fee_rate, vsize))
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{hashes::Hash, Txid, WPubkeyHash};

    use super::*;

    fn coin(sats: u64) -> Coin {
        Coin::new(
            OutPoint::new(Txid::all_zeros(), 0),
            TxOut {
                value: Amount::from_sat(sats),
                script_pubkey: ScriptBuf::new_p2wpkh(&WPubkeyHash::all_zeros()),
            },
        )
    }

    #[test]
    fn effective_value_subtracts_input_fee() {
        let rate = FeeRate::from_sat_per_kwu(250);
        assert_eq!(coin(10_000).effective_value(rate), Some(Amount::from_sat(9_932)));
        assert_eq!(coin(10).effective_value(rate), None);
    }
}
