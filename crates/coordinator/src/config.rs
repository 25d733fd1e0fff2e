//! Coordinator configuration.

use std::time::Duration;

use bitcoin::{hashes::Hash, Amount, Network, ScriptBuf, WScriptHash};
use serde::{Deserialize, Serialize};
use wabisabi_primitives::constants::DEFAULT_COORDINATOR_IDENTIFIER;

/// Round sizing, timing and policy.
///
/// Every field has a default, so a config file only needs to name the values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WabiSabiConfig {
    /// The network rounds build transactions for.
    pub network: Network,

    /// Fewest inputs a round needs to proceed past input registration.
    pub min_input_count_by_round: usize,

    /// Most inputs a round accepts. Reaching it ends input registration early.
    pub max_input_count_by_round: usize,

    /// Smallest input or output value accepted.
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub min_registrable_amount: Amount,

    /// Largest input or output value accepted.
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub max_registrable_amount: Amount,

    /// How long a regular round accepts inputs.
    pub standard_input_registration_timeout: Duration,

    /// How long a blame round accepts inputs.
    pub blame_input_registration_timeout: Duration,

    /// How long participants have to confirm their connection. Also the lifetime of an unconfirmed
    /// registration during input registration.
    pub connection_confirmation_timeout: Duration,

    /// How long participants have to register outputs.
    pub output_registration_timeout: Duration,

    /// How long participants have to sign.
    pub transaction_signing_timeout: Duration,

    /// How long an ended round stays visible before it is dropped.
    pub round_expiry_timeout: Duration,

    /// Confirmation target passed to fee estimation.
    pub confirmation_target: u16,

    /// Whether inputs that were only noted (not banned) may register again.
    pub allow_noted_input_registration: bool,

    /// Destination for value left unclaimed when output registration ends.
    pub blame_script: ScriptBuf,

    /// String ownership proofs commit to.
    pub coordinator_identifier: String,

    /// Size limit of a coinjoin, in vbytes.
    pub max_transaction_vsize: u64,
}

impl Default for WabiSabiConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            min_input_count_by_round: 21,
            max_input_count_by_round: 100,
            min_registrable_amount: Amount::from_sat(5_000),
            max_registrable_amount: Amount::from_int_btc(43_000),
            standard_input_registration_timeout: Duration::from_secs(60 * 60),
            blame_input_registration_timeout: Duration::from_secs(3 * 60),
            connection_confirmation_timeout: Duration::from_secs(60),
            output_registration_timeout: Duration::from_secs(60),
            transaction_signing_timeout: Duration::from_secs(60),
            round_expiry_timeout: Duration::from_secs(5 * 60),
            confirmation_target: 2,
            allow_noted_input_registration: false,
            blame_script: ScriptBuf::new_p2wsh(&WScriptHash::all_zeros()),
            coordinator_identifier: DEFAULT_COORDINATOR_IDENTIFIER.to_string(),
            max_transaction_vsize: 100_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: WabiSabiConfig = toml::from_str(
            r#"
                network = "regtest"
                min_input_count_by_round = 2
                min_registrable_amount = 10000

                [connection_confirmation_timeout]
                secs = 30
                nanos = 0
            "#,
        )
        .expect("must parse");

        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.min_input_count_by_round, 2);
        assert_eq!(config.min_registrable_amount, Amount::from_sat(10_000));
        assert_eq!(
            config.connection_confirmation_timeout,
            Duration::from_secs(30)
        );
        assert_eq!(config.max_input_count_by_round, 100);
        assert_eq!(
            config.coordinator_identifier,
            DEFAULT_COORDINATOR_IDENTIFIER
        );
    }
}
