//! The coordinator's view of bitcoind, over its JSON-RPC interface.

use anyhow::Context;
use async_trait::async_trait;
use base64::{prelude::BASE64_STANDARD, Engine};
use bitcoin::{
    consensus::encode::serialize_hex, Amount, FeeRate, OutPoint, ScriptBuf, Transaction, TxOut,
    Txid,
};
use jsonrpsee::{
    core::{client::ClientT, ClientError},
    http_client::{HeaderMap, HeaderValue, HttpClient, HttpClientBuilder},
    rpc_params,
};
use serde::Deserialize;
use tracing::{debug, warn};
use wabisabi_primitives::{
    fees::fee_rate_from_btc_per_kvb,
    node::{BitcoinRpc, NodeRpcError, TxOutInfo},
};

use crate::{config::BtcClientConfig, constants::DEFAULT_NODE_REQUEST_TIMEOUT};

/// `gettxout` result, trimmed to what the coordinator reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetTxOut {
    confirmations: u32,
    value: f64,
    script_pub_key: ScriptPubKey,
    coinbase: bool,
}

#[derive(Debug, Deserialize)]
struct ScriptPubKey {
    hex: String,
}

/// `estimatesmartfee` result.
#[derive(Debug, Deserialize)]
struct EstimateSmartFee {
    /// BTC per kvB, absent when the node has no estimate.
    feerate: Option<f64>,

    #[serde(default)]
    errors: Vec<String>,
}

/// A bitcoind JSON-RPC client authenticating with a user and password.
#[derive(Debug, Clone)]
pub(crate) struct BitcoindClient {
    client: HttpClient,
}

impl BitcoindClient {
    pub(crate) fn new(config: &BtcClientConfig) -> anyhow::Result<Self> {
        let credentials = BASE64_STANDARD.encode(format!("{}:{}", config.user, config.pass));
        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Basic {credentials}"))
                .context("credentials must fit in an http header")?,
        );

        let client = HttpClientBuilder::default()
            .set_headers(headers)
            .request_timeout(
                config
                    .request_timeout
                    .unwrap_or(DEFAULT_NODE_REQUEST_TIMEOUT),
            )
            .build(&config.url)
            .with_context(|| format!("invalid bitcoind url {}", config.url))?;

        Ok(Self { client })
    }
}

fn node_error(err: ClientError) -> NodeRpcError {
    match err {
        ClientError::Call(err) => NodeRpcError::Rpc {
            code: err.code(),
            message: err.message().to_string(),
        },
        ClientError::Transport(err) => NodeRpcError::Connection(err.to_string()),
        ClientError::RequestTimeout => NodeRpcError::Connection("request timed out".to_string()),
        ClientError::ParseError(err) => NodeRpcError::Malformed(err.to_string()),
        other => NodeRpcError::Malformed(other.to_string()),
    }
}

#[async_trait]
impl BitcoinRpc for BitcoindClient {
    async fn get_tx_out(
        &self,
        outpoint: OutPoint,
        include_mempool: bool,
    ) -> Result<Option<TxOutInfo>, NodeRpcError> {
        let response: Option<GetTxOut> = self
            .client
            .request(
                "gettxout",
                rpc_params![outpoint.txid.to_string(), outpoint.vout, include_mempool],
            )
            .await
            .map_err(node_error)?;

        let Some(response) = response else {
            debug!(%outpoint, "output is spent or unknown");
            return Ok(None);
        };

        let value = Amount::from_btc(response.value)
            .map_err(|err| NodeRpcError::Malformed(format!("output value: {err}")))?;
        let script_pubkey = ScriptBuf::from_hex(&response.script_pub_key.hex)
            .map_err(|err| NodeRpcError::Malformed(format!("output script: {err}")))?;

        Ok(Some(TxOutInfo {
            txout: TxOut {
                value,
                script_pubkey,
            },
            confirmations: response.confirmations,
            is_coinbase: response.coinbase,
        }))
    }

    async fn estimate_smart_fee(&self, conf_target: u16) -> Result<FeeRate, NodeRpcError> {
        let response: EstimateSmartFee = self
            .client
            .request("estimatesmartfee", rpc_params![conf_target])
            .await
            .map_err(node_error)?;

        match response.feerate {
            Some(btc_per_kvb) => Ok(fee_rate_from_btc_per_kvb(btc_per_kvb)),
            None => {
                warn!(%conf_target, errors = ?response.errors, "node has no fee estimate");
                Err(NodeRpcError::NoFeeEstimate)
            }
        }
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, NodeRpcError> {
        self.client
            .request("sendrawtransaction", rpc_params![serialize_hex(tx)])
            .await
            .map_err(node_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gettxout_response_parses() {
        let raw = r#"{
            "bestblock": "0000000000000000000000000000000000000000000000000000000000000000",
            "confirmations": 12,
            "value": 0.01000000,
            "scriptPubKey": {
                "asm": "0 0000000000000000000000000000000000000000",
                "hex": "00140000000000000000000000000000000000000000",
                "address": "bcrt1qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqq",
                "type": "witness_v0_keyhash"
            },
            "coinbase": false
        }"#;

        let parsed: GetTxOut = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.confirmations, 12);
        assert_eq!(
            Amount::from_btc(parsed.value).unwrap(),
            Amount::from_sat(1_000_000)
        );
        assert!(ScriptBuf::from_hex(&parsed.script_pub_key.hex)
            .unwrap()
            .is_p2wpkh());
    }

    #[test]
    fn missing_fee_estimate_parses() {
        let raw = r#"{ "errors": ["Insufficient data or no feerate found"], "blocks": 2 }"#;
        let parsed: EstimateSmartFee = serde_json::from_str(raw).unwrap();
        assert!(parsed.feerate.is_none());
        assert_eq!(parsed.errors.len(), 1);
    }

    #[tokio::test]
    async fn client_builds_from_config() {
        let config = BtcClientConfig {
            url: "http://localhost:18443".to_string(),
            user: "user".to_string(),
            pass: "password".to_string(),
            request_timeout: None,
        };
        assert!(BitcoindClient::new(&config).is_ok());
    }
}
