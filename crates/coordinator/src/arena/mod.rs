//! The arena: every round the coordinator runs, and the locks that keep them consistent.
//!
//! Rounds live in a single table behind an async mutex. Each registered input additionally has
//! its own lock in the [`AliceRegistry`](registry::AliceRegistry). Whenever both are needed the
//! Alice lock is taken first. Slow work such as node lookups, proof verification and credential
//! preparation happens with no table lock held, and every change is re-validated once the table
//! lock is taken again.

mod handlers;
mod registry;
mod steps;


use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use bitcoin::OutPoint;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use wabisabi_common::periodic::PeriodicAction;
use wabisabi_primitives::{
    api::WabiSabiApi,
    errors::{ApiError, ProtocolError, ProtocolErrorCode},
    ids::RoundId,
    messages::{
        ConnectionConfirmationRequest, ConnectionConfirmationResponse, InputRegistrationRequest,
        InputRegistrationResponse, InputsRemovalRequest, OutputRegistrationRequest,
        OutputRegistrationResponse, ReadyToSignRequest, ReissueCredentialRequest,
        ReissueCredentialResponse, TransactionSignaturesRequest,
    },
    node::BitcoinRpc,
    round_state::RoundState,
};

use self::registry::AliceRegistry;
use crate::{
    config::WabiSabiConfig,
    errors::ArenaError,
    prison::{Inmate, Prison},
    round::Round,
};

/// Owns all rounds and answers participant requests about them.
pub struct Arena {
    config: WabiSabiConfig,
    rpc: Arc<dyn BitcoinRpc>,
    rounds: AsyncMutex<Vec<Round>>,
    alices: AliceRegistry,
    prison: Mutex<Prison>,
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Arena {
    /// Creates an arena without any round. The first tick creates one.
    pub fn new(config: WabiSabiConfig, rpc: Arc<dyn BitcoinRpc>) -> Self {
        Self {
            config,
            rpc,
            rounds: AsyncMutex::new(Vec::new()),
            alices: AliceRegistry::default(),
            prison: Mutex::new(Prison::new()),
        }
    }

    /// The coordinator configuration.
    pub const fn config(&self) -> &WabiSabiConfig {
        &self.config
    }

    /// The prison record of `outpoint`, if any.
    pub fn inmate(&self, outpoint: &OutPoint) -> Option<Inmate> {
        self.prison.lock().get(outpoint).cloned()
    }

    /// Snapshot of every round still held by the arena.
    pub async fn round_states(&self) -> Vec<RoundState> {
        self.rounds
            .lock()
            .await
            .iter()
            .map(Round::to_round_state)
            .collect()
    }

    /// Releases every Alice of `round` from the registry.
    ///
    /// Runs under the table lock, so the Alice locks are not taken. Handlers still holding an
    /// entry re-check the round and find it ended.
    fn release_alices(&self, round: &Round) {
        for alice in round.alices() {
            self.alices.release(&alice.id);
        }
    }
}

fn find_round<'a>(rounds: &'a [Round], id: &RoundId) -> Result<&'a Round, ProtocolError> {
    rounds
        .iter()
        .find(|r| r.id() == *id)
        .ok_or_else(|| ProtocolErrorCode::RoundNotFound.into())
}

fn find_round_mut<'a>(
    rounds: &'a mut [Round],
    id: &RoundId,
) -> Result<&'a mut Round, ProtocolError> {
    rounds
        .iter_mut()
        .find(|r| r.id() == *id)
        .ok_or_else(|| ProtocolErrorCode::RoundNotFound.into())
}

/// Runs a node call unless `cancel` fires first.
async fn until_cancelled<T, E>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, ApiError>
where
    ApiError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ApiError::Cancelled),
        res = fut => res.map_err(ApiError::from),
    }
}

impl PeriodicAction for Arena {
    type Error = ArenaError;

    fn name(&self) -> &'static str {
        "arena"
    }

    fn run(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.step(cancel)
    }
}

#[async_trait]
impl WabiSabiApi for Arena {
    async fn register_input(
        &self,
        request: InputRegistrationRequest,
        cancel: &CancellationToken,
    ) -> Result<InputRegistrationResponse, ApiError> {
        self.handle_register_input(request, cancel).await
    }

    async fn confirm_connection(
        &self,
        request: ConnectionConfirmationRequest,
        _cancel: &CancellationToken,
    ) -> Result<ConnectionConfirmationResponse, ApiError> {
        Ok(self.handle_confirm_connection(request).await?)
    }

    async fn register_output(
        &self,
        request: OutputRegistrationRequest,
        _cancel: &CancellationToken,
    ) -> Result<OutputRegistrationResponse, ApiError> {
        Ok(self.handle_register_output(request).await?)
    }

    async fn ready_to_sign(
        &self,
        request: ReadyToSignRequest,
        _cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        Ok(self.handle_ready_to_sign(request).await?)
    }

    async fn remove_input(
        &self,
        request: InputsRemovalRequest,
        _cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        Ok(self.handle_remove_input(request).await?)
    }

    async fn sign_transaction(
        &self,
        request: TransactionSignaturesRequest,
        _cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        Ok(self.handle_sign_transaction(request).await?)
    }

    async fn reissue_credentials(
        &self,
        request: ReissueCredentialRequest,
        _cancel: &CancellationToken,
    ) -> Result<ReissueCredentialResponse, ApiError> {
        Ok(self.handle_reissue_credentials(request).await?)
    }

    async fn get_status(&self, cancel: &CancellationToken) -> Result<Vec<RoundState>, ApiError> {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        Ok(self.round_states().await)
    }
}
