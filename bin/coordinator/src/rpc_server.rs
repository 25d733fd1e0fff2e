//! Serves participant requests over JSON-RPC.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use jsonrpsee::{
    core::RpcResult,
    server::{ServerBuilder, ServerHandle},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wabisabi_coordinator::Arena;
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
use wabisabi_rpc::{errors::to_rpc_error, WabiSabiCoordinatorApiServer};

/// Starts the JSON-RPC server and returns a handle to stop it.
pub(crate) async fn start_rpc(
    rpc_impl: CoordinatorRpc,
    rpc_addr: &str,
) -> anyhow::Result<ServerHandle> {
    let module = rpc_impl.into_rpc();

    info!("starting coordinator rpc server at {rpc_addr}");
    let server = ServerBuilder::new()
        .build(rpc_addr)
        .await
        .with_context(|| format!("cannot bind rpc server to {rpc_addr}"))?;

    Ok(server.start(module))
}

/// Hands requests to the arena, abandoning them once `shutdown` fires.
#[derive(Debug, Clone)]
pub(crate) struct CoordinatorRpc {
    arena: Arc<Arena>,
    shutdown: CancellationToken,
}

impl CoordinatorRpc {
    pub(crate) const fn new(arena: Arc<Arena>, shutdown: CancellationToken) -> Self {
        Self { arena, shutdown }
    }
}

/// Converts the outcome of `method` into a JSON-RPC reply.
fn reply<T>(method: &'static str, result: Result<T, ApiError>) -> RpcResult<T> {
    result.map_err(|err| {
        match &err {
            ApiError::Protocol(_) | ApiError::Cancelled => debug!(%method, %err, "request failed"),
            ApiError::Node(_) | ApiError::Transport(_) => warn!(%method, %err, "request failed"),
        }
        to_rpc_error(err)
    })
}

#[async_trait]
impl WabiSabiCoordinatorApiServer for CoordinatorRpc {
    async fn register_input(
        &self,
        request: InputRegistrationRequest,
    ) -> RpcResult<InputRegistrationResponse> {
        reply(
            "registerInput",
            self.arena.register_input(request, &self.shutdown).await,
        )
    }

    async fn confirm_connection(
        &self,
        request: ConnectionConfirmationRequest,
    ) -> RpcResult<ConnectionConfirmationResponse> {
        reply(
            "confirmConnection",
            self.arena.confirm_connection(request, &self.shutdown).await,
        )
    }

    async fn register_output(
        &self,
        request: OutputRegistrationRequest,
    ) -> RpcResult<OutputRegistrationResponse> {
        reply(
            "registerOutput",
            self.arena.register_output(request, &self.shutdown).await,
        )
    }

    async fn ready_to_sign(&self, request: ReadyToSignRequest) -> RpcResult<()> {
        reply(
            "readyToSign",
            self.arena.ready_to_sign(request, &self.shutdown).await,
        )
    }

    async fn sign_transaction(&self, request: TransactionSignaturesRequest) -> RpcResult<()> {
        reply(
            "signTransaction",
            self.arena.sign_transaction(request, &self.shutdown).await,
        )
    }

    async fn remove_input(&self, request: InputsRemovalRequest) -> RpcResult<()> {
        reply(
            "removeInput",
            self.arena.remove_input(request, &self.shutdown).await,
        )
    }

    async fn reissue_credentials(
        &self,
        request: ReissueCredentialRequest,
    ) -> RpcResult<ReissueCredentialResponse> {
        reply(
            "reissueCredentials",
            self.arena.reissue_credentials(request, &self.shutdown).await,
        )
    }

    async fn get_status(&self) -> RpcResult<Vec<RoundState>> {
        reply("getStatus", self.arena.get_status(&self.shutdown).await)
    }
}
