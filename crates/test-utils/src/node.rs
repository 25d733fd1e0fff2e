//! An in-memory stand-in for a Bitcoin node.

use std::collections::HashMap;

use async_trait::async_trait;
use bitcoin::{FeeRate, OutPoint, Transaction, Txid};
use parking_lot::Mutex;
use wabisabi_primitives::{
    coin::Coin,
    node::{BitcoinRpc, NodeRpcError, TxOutInfo},
};

#[derive(Debug)]
struct NodeState {
    utxos: HashMap<OutPoint, TxOutInfo>,
    fee_rate: Option<FeeRate>,
    reject_broadcasts: bool,
    mempool: Vec<Transaction>,
}

/// A node whose UTXO set and fee estimate are set by the test.
///
/// Broadcast transactions are kept in a mempool and their inputs are removed from the UTXO set.
#[derive(Debug)]
pub struct MockBitcoinRpc {
    state: Mutex<NodeState>,
}

impl Default for MockBitcoinRpc {
    fn default() -> Self {
        Self::new(FeeRate::from_sat_per_kwu(250))
    }
}

impl MockBitcoinRpc {
    /// Creates a node estimating `fee_rate` for every target.
    pub fn new(fee_rate: FeeRate) -> Self {
        Self {
            state: Mutex::new(NodeState {
                utxos: HashMap::new(),
                fee_rate: Some(fee_rate),
                reject_broadcasts: false,
                mempool: Vec::new(),
            }),
        }
    }

    /// Adds a confirmed, non-coinbase coin.
    pub fn add_coin(&self, coin: &Coin) {
        self.add_coin_with(coin, 6, false);
    }

    /// Adds a coin with explicit confirmation count and origin.
    pub fn add_coin_with(&self, coin: &Coin, confirmations: u32, is_coinbase: bool) {
        self.state.lock().utxos.insert(
            coin.outpoint,
            TxOutInfo {
                txout: coin.txout.clone(),
                confirmations,
                is_coinbase,
            },
        );
    }

    /// Marks a coin spent.
    pub fn spend(&self, outpoint: &OutPoint) {
        self.state.lock().utxos.remove(outpoint);
    }

    /// Changes the fee estimate. `None` makes estimation fail.
    pub fn set_fee_rate(&self, fee_rate: Option<FeeRate>) {
        self.state.lock().fee_rate = fee_rate;
    }

    /// Makes every subsequent broadcast fail.
    pub fn reject_broadcasts(&self, reject: bool) {
        self.state.lock().reject_broadcasts = reject;
    }

    /// Transactions broadcast so far.
    pub fn mempool(&self) -> Vec<Transaction> {
        self.state.lock().mempool.clone()
    }
}

#[async_trait]
impl BitcoinRpc for MockBitcoinRpc {
    async fn get_tx_out(
        &self,
        outpoint: OutPoint,
        _include_mempool: bool,
    ) -> Result<Option<TxOutInfo>, NodeRpcError> {
        Ok(self.state.lock().utxos.get(&outpoint).cloned())
    }

    async fn estimate_smart_fee(&self, _conf_target: u16) -> Result<FeeRate, NodeRpcError> {
        self.state.lock().fee_rate.ok_or(NodeRpcError::NoFeeEstimate)
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, NodeRpcError> {
        let mut state = self.state.lock();
        if state.reject_broadcasts {
            return Err(NodeRpcError::Rpc {
                code: -26,
                message: "txn-mempool-conflict".to_string(),
            });
        }

        for input in &tx.input {
            state.utxos.remove(&input.previous_output);
        }
        state.mempool.push(tx.clone());
        Ok(tx.compute_txid())
    }
}
