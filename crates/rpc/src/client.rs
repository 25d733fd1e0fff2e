//! [`WabiSabiApi`] over a JSON-RPC connection.

use std::future::Future;

use async_trait::async_trait;
use jsonrpsee::core::{client::ClientT, ClientError};
use tokio_util::sync::CancellationToken;
use wabisabi_primitives::{
    api::WabiSabiApi,
    errors::ApiError,
    messages::{
        ConnectionConfirmationRequest, ConnectionConfirmationResponse, InputRegistrationRequest,
        InputRegistrationResponse, InputsRemovalRequest, OutputRegistrationRequest,
        OutputRegistrationResponse, ReadyToSignRequest, ReissueCredentialRequest,
        ReissueCredentialResponse, TransactionSignaturesRequest,
    },
    round_state::RoundState,
};

use crate::{errors::from_rpc_error, WabiSabiCoordinatorApiClient};

/// Talks to a remote coordinator through any jsonrpsee client.
#[derive(Debug, Clone)]
pub struct RpcArenaClient<C> {
    client: C,
}

impl<C> RpcArenaClient<C> {
    /// Wraps `client`.
    pub const fn new(client: C) -> Self {
        Self { client }
    }
}

fn from_client_error(err: ClientError) -> ApiError {
    match err {
        ClientError::Call(object) => from_rpc_error(&object),
        other => ApiError::Transport(other.to_string()),
    }
}

async fn call<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, ApiError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ApiError::Cancelled),
        res = fut => res.map_err(from_client_error),
    }
}

#[async_trait]
impl<C> WabiSabiApi for RpcArenaClient<C>
where
    C: ClientT + Send + Sync,
{
    async fn register_input(
        &self,
        request: InputRegistrationRequest,
        cancel: &CancellationToken,
    ) -> Result<InputRegistrationResponse, ApiError> {
        call(cancel, self.client.register_input(request)).await
    }

    async fn confirm_connection(
        &self,
        request: ConnectionConfirmationRequest,
        cancel: &CancellationToken,
    ) -> Result<ConnectionConfirmationResponse, ApiError> {
        call(cancel, self.client.confirm_connection(request)).await
    }

    async fn register_output(
        &self,
        request: OutputRegistrationRequest,
        cancel: &CancellationToken,
    ) -> Result<OutputRegistrationResponse, ApiError> {
        call(cancel, self.client.register_output(request)).await
    }

    async fn ready_to_sign(
        &self,
        request: ReadyToSignRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        call(cancel, self.client.ready_to_sign(request)).await
    }

    async fn remove_input(
        &self,
        request: InputsRemovalRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        call(cancel, self.client.remove_input(request)).await
    }

    async fn sign_transaction(
        &self,
        request: TransactionSignaturesRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        call(cancel, self.client.sign_transaction(request)).await
    }

    async fn reissue_credentials(
        &self,
        request: ReissueCredentialRequest,
        cancel: &CancellationToken,
    ) -> Result<ReissueCredentialResponse, ApiError> {
        call(cancel, self.client.reissue_credentials(request)).await
    }

    async fn get_status(&self, cancel: &CancellationToken) -> Result<Vec<RoundState>, ApiError> {
        call(cancel, self.client.get_status()).await
    }
}
