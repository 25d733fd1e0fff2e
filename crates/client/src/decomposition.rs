//! Splitting a participant's value into outputs.

use bitcoin::{Amount, FeeRate};
use wabisabi_primitives::fees::fee_for_vsize;

/// Most outputs registered for one participant in a round.
pub const MAX_OUTPUTS: usize = 4;

/// Bounds on how value may be split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecompositionLimits {
    /// Fee rate of the round.
    pub fee_rate: FeeRate,

    /// Smallest output the round accepts.
    pub min_output: Amount,

    /// Vsize of one output.
    pub output_vsize: u64,

    /// Vsize credit available for all outputs.
    pub available_vsize: u64,

    /// Most outputs to create.
    pub max_outputs: usize,
}

impl DecompositionLimits {
    /// Smallest credential value that pays for an output and its fee.
    pub fn min_credential(&self) -> u64 {
        self.min_output.to_sat() + fee_for_vsize(self.fee_rate, self.output_vsize).to_sat()
    }

    fn max_count(&self) -> usize {
        let by_vsize = self
            .available_vsize
            .checked_div(self.output_vsize)
            .unwrap_or(u64::MAX);
        self.max_outputs
            .min(usize::try_from(by_vsize).unwrap_or(usize::MAX))
    }
}

/// Splits `total` worth of amount credentials into one credential value per output.
///
/// Values are equal except the last, which also carries the remainder. Each value covers an
/// output of at least `min_output` plus that output's fee. The count shrinks until that holds,
/// so an empty result means not even one output is affordable.
pub fn decompose(total: u64, limits: &DecompositionLimits) -> Vec<u64> {
    let min_credential = limits.min_credential();

    for count in (1..=limits.max_count()).rev() {
        let share = total / count as u64;
        if share < min_credential {
            continue;
        }

        let mut values = vec![share; count];
        if let Some(last) = values.last_mut() {
            *last += total - share * count as u64;
        }
        return values;
    }

    Vec::new()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn limits() -> DecompositionLimits {
        DecompositionLimits {
            fee_rate: FeeRate::from_sat_per_kwu(250),
            min_output: Amount::from_sat(5_000),
            output_vsize: 31,
            available_vsize: 187,
            max_outputs: MAX_OUTPUTS,
        }
    }

    #[test]
    fn splits_evenly_with_remainder_last() {
        assert_eq!(
            decompose(999_932, &limits()),
            vec![249_983, 249_983, 249_983, 249_983]
        );
        assert_eq!(
            decompose(100_003, &limits()),
            vec![25_000, 25_000, 25_000, 25_003]
        );
    }

    #[test]
    fn fewer_outputs_when_value_is_low() {
        // 12_000 / 3 = 4_000 is below 5_031, 12_000 / 2 = 6_000 is not.
        assert_eq!(decompose(12_000, &limits()), vec![6_000, 6_000]);
        assert_eq!(decompose(5_031, &limits()), vec![5_031]);
        assert!(decompose(5_030, &limits()).is_empty());
    }

    #[test]
    fn vsize_credit_bounds_the_count() {
        let limits = DecompositionLimits {
            available_vsize: 70,
            ..limits()
        };
        assert_eq!(decompose(1_000_000, &limits).len(), 2);

        let limits = DecompositionLimits {
            available_vsize: 30,
            ..limits
        };
        assert!(decompose(1_000_000, &limits).is_empty());
    }

    proptest! {
        #[test]
        fn decomposition_conserves_value_and_pays_every_output(
            total in 0u64..10_000_000,
            available_vsize in 0u64..400,
        ) {
            let limits = DecompositionLimits { available_vsize, ..limits() };
            let values = decompose(total, &limits);

            prop_assert!(values.len() <= MAX_OUTPUTS);
            prop_assert!(values.len() as u64 * limits.output_vsize <= available_vsize);
            if values.is_empty() {
                prop_assert!(
                    total < limits.min_credential() || available_vsize < limits.output_vsize
                );
            } else {
                prop_assert_eq!(values.iter().sum::<u64>(), total);
                prop_assert!(values.iter().all(|v| *v >= limits.min_credential()));
                prop_assert!(values[values.len() - 1] - values[0] < values.len() as u64);
            }
        }
    }
}
