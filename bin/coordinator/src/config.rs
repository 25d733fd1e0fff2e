//! Configuration of the coordinator binary.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wabisabi_coordinator::WabiSabiConfig;

/// Everything read from `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Config {
    /// Address the JSON-RPC server listens on.
    pub rpc_addr: String,

    /// How often rounds are stepped.
    pub tick_interval: Duration,

    /// Worker threads of the runtime.
    pub num_threads: Option<u8>,

    /// Stack size of each worker thread.
    pub thread_stack_size: Option<usize>,

    /// How long shutdown may take before it is abandoned.
    pub shutdown_timeout: Duration,

    /// The Bitcoin node.
    pub btc_client: BtcClientConfig,

    /// Round policy.
    #[serde(default)]
    pub wabisabi: WabiSabiConfig,
}

/// Connection details of the bitcoind JSON-RPC interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BtcClientConfig {
    pub url: String,
    pub user: String,
    pub pass: String,

    /// Timeout of a single request, defaults to thirty seconds.
    pub request_timeout: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use bitcoin::{Amount, Network};

    use super::*;

    #[test]
    fn test_config_serde_toml() {
        let config = r#"
            rpc_addr = "127.0.0.1:37128"
            tick_interval = { secs = 1, nanos = 0 }
            num_threads = 4
            shutdown_timeout = { secs = 30, nanos = 0 }

            [btc_client]
            url = "http://localhost:18443"
            user = "user"
            pass = "password"

            [wabisabi]
            network = "regtest"
            min_input_count_by_round = 5
            min_registrable_amount = 10000
            standard_input_registration_timeout = { secs = 600, nanos = 0 }
        "#;

        let config = toml::from_str::<Config>(config);
        assert!(
            config.is_ok(),
            "must be able to deserialize config from toml but got: {}",
            config.unwrap_err()
        );

        let config = config.unwrap();
        assert_eq!(config.wabisabi.network, Network::Regtest);
        assert_eq!(config.wabisabi.min_input_count_by_round, 5);
        assert_eq!(
            config.wabisabi.min_registrable_amount,
            Amount::from_sat(10_000)
        );
        assert_eq!(
            config.wabisabi.max_input_count_by_round,
            WabiSabiConfig::default().max_input_count_by_round,
            "unset policy values must fall back to their defaults"
        );
        assert!(config.btc_client.request_timeout.is_none());

        let serialized = toml::to_string(&config).unwrap();
        let deserialized = toml::from_str::<Config>(&serialized).unwrap();
        assert_eq!(
            deserialized, config,
            "must be able to serialize and deserialize config to toml"
        );
    }

    #[test]
    fn policy_section_is_optional() {
        let config = r#"
            rpc_addr = "127.0.0.1:37128"
            tick_interval = { secs = 1, nanos = 0 }
            shutdown_timeout = { secs = 30, nanos = 0 }

            [btc_client]
            url = "http://localhost:8332"
            user = "user"
            pass = "password"
        "#;

        let config = toml::from_str::<Config>(config).unwrap();
        assert_eq!(config.wabisabi, WabiSabiConfig::default());
    }
}
