//! Fee and virtual size accounting.
//!
//! Fee rates are carried as [`FeeRate`] (sat/kwu internally) and fees are always rounded up, so a
//! participant paying for `n` vbytes never underpays the round's fee rate.

use bitcoin::{Amount, FeeRate, Script};

use crate::constants::{
    MAX_VSIZE_CREDENTIAL_VALUE, P2TR_INPUT_VSIZE, P2WPKH_INPUT_VSIZE, SHARED_OVERHEAD_VSIZE,
};

/// Returns the fee for `vsize` vbytes at `fee_rate`, rounded up to the next satoshi.
pub fn fee_for_vsize(fee_rate: FeeRate, vsize: u64) -> Amount {
    let sat_per_kwu = fee_rate.to_sat_per_kwu();
    let weight = vsize.saturating_mul(4);
    Amount::from_sat(sat_per_kwu.saturating_mul(weight).div_ceil(1000))
}

/// Converts a node fee estimate in BTC/kvB into a [`FeeRate`].
pub fn fee_rate_from_btc_per_kvb(btc_per_kvb: f64) -> FeeRate {
    let sat_per_kvb = (btc_per_kvb * 100_000_000.0).round().max(0.0) as u64;
    FeeRate::from_sat_per_kwu(sat_per_kvb.div_ceil(4))
}

/// Virtual size of spending an output locked with `script`, if it is of a spendable kind.
pub fn input_vsize(script: &Script) -> Option<u64> {
    if script.is_p2wpkh() {
        Some(P2WPKH_INPUT_VSIZE)
    } else if script.is_p2tr() {
        Some(P2TR_INPUT_VSIZE)
    } else {
        None
    }
}

/// Virtual size of an output paying to `script`.
pub fn output_vsize(script: &Script) -> u64 {
    let len = script.len() as u64;
    8 + compact_size_len(len) + len
}

/// Returns `true` if outputs paying to `script` are accepted in a coinjoin.
pub fn is_allowed_output_script(script: &Script) -> bool {
    script.is_p2wpkh() || script.is_p2wsh() || script.is_p2tr()
}

/// Vsize each participant may use for its input and outputs.
pub fn max_vsize_allocation_per_alice(max_transaction_vsize: u64, max_input_count: usize) -> u64 {
    let available = max_transaction_vsize.saturating_sub(SHARED_OVERHEAD_VSIZE);
    (available / max_input_count.max(1) as u64).min(MAX_VSIZE_CREDENTIAL_VALUE)
}

/// Serde helper encoding a [`FeeRate`] as its sat/kwu integer.
pub mod serde_sat_per_kwu {
    use bitcoin::FeeRate;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes the rate as sat/kwu.
    pub fn serialize<S: Serializer>(rate: &FeeRate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(rate.to_sat_per_kwu())
    }

    /// Deserializes a sat/kwu integer.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<FeeRate, D::Error> {
        u64::deserialize(deserializer).map(FeeRate::from_sat_per_kwu)
    }
}

const fn compact_size_len(n: u64) -> u64 {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{hashes::Hash, ScriptBuf, WPubkeyHash, WScriptHash};

    use super::*;

    #[test]
    fn fee_rounds_up() {
        let rate = FeeRate::from_sat_per_kwu(250);
        assert_eq!(fee_for_vsize(rate, 68), Amount::from_sat(68));

        let rate = FeeRate::from_sat_per_kwu(251);
        assert_eq!(fee_for_vsize(rate, 1), Amount::from_sat(2));

        assert_eq!(fee_for_vsize(FeeRate::ZERO, 1_000), Amount::ZERO);
    }

    #[test]
    fn node_estimate_is_converted_to_kwu() {
        // 0.0001 BTC/kvB = 10 sat/vB = 2500 sat/kwu
        assert_eq!(
            fee_rate_from_btc_per_kvb(0.0001),
            FeeRate::from_sat_per_kwu(2_500)
        );
    }

    #[test]
    fn script_vsizes() {
        let p2wpkh = ScriptBuf::new_p2wpkh(&WPubkeyHash::all_zeros());
        let p2wsh = ScriptBuf::new_p2wsh(&WScriptHash::all_zeros());

        assert_eq!(input_vsize(&p2wpkh), Some(68));
        assert_eq!(input_vsize(&p2wsh), None);
        assert_eq!(output_vsize(&p2wpkh), 31);
        assert_eq!(output_vsize(&p2wsh), 43);
        assert!(is_allowed_output_script(&p2wsh));
        assert!(!is_allowed_output_script(&ScriptBuf::new()));
    }

    #[test]
    fn per_alice_allocation_is_capped() {
        assert_eq!(max_vsize_allocation_per_alice(100_000, 100), 255);
        assert_eq!(max_vsize_allocation_per_alice(10_015, 100), 100);
    }
}
