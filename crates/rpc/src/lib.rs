//! JSON-RPC surface of the coordinator.
//!
//! [`WabiSabiCoordinatorApi`] mirrors the participant requests of
//! [`WabiSabiApi`](wabisabi_primitives::api::WabiSabiApi) one method per request, under the
//! `wabisabi` namespace. Failures travel as JSON-RPC error objects, see [`errors`].
//!
//! With the `client` feature, [`RpcArenaClient`] implements `WabiSabiApi` on top of any
//! jsonrpsee client so participants can talk to a remote coordinator.

#[cfg(feature = "client")]
mod client;
pub mod errors;

use jsonrpsee::{core::RpcResult, proc_macros::rpc};
use wabisabi_primitives::{
    messages::{
        ConnectionConfirmationRequest, ConnectionConfirmationResponse, InputRegistrationRequest,
        InputRegistrationResponse, InputsRemovalRequest, OutputRegistrationRequest,
        OutputRegistrationResponse, ReadyToSignRequest, ReissueCredentialRequest,
        ReissueCredentialResponse, TransactionSignaturesRequest,
    },
    round_state::RoundState,
};

#[cfg(feature = "client")]
pub use crate::client::RpcArenaClient;

/// Requests participants send to the coordinator.
#[cfg_attr(not(feature = "client"), rpc(server, namespace = "wabisabi"))]
#[cfg_attr(feature = "client", rpc(server, client, namespace = "wabisabi"))]
pub trait WabiSabiCoordinatorApi {
    /// Registers an input in a round.
    #[method(name = "registerInput")]
    async fn register_input(
        &self,
        request: InputRegistrationRequest,
    ) -> RpcResult<InputRegistrationResponse>;

    /// Confirms that a registered input is still there.
    #[method(name = "confirmConnection")]
    async fn confirm_connection(
        &self,
        request: ConnectionConfirmationRequest,
    ) -> RpcResult<ConnectionConfirmationResponse>;

    /// Registers an output, paid for with credentials.
    #[method(name = "registerOutput")]
    async fn register_output(
        &self,
        request: OutputRegistrationRequest,
    ) -> RpcResult<OutputRegistrationResponse>;

    /// Signals that an input has registered all its outputs.
    #[method(name = "readyToSign")]
    async fn ready_to_sign(&self, request: ReadyToSignRequest) -> RpcResult<()>;

    /// Submits witnesses for the coinjoin.
    #[method(name = "signTransaction")]
    async fn sign_transaction(&self, request: TransactionSignaturesRequest) -> RpcResult<()>;

    /// Unregisters an input during input registration.
    #[method(name = "removeInput")]
    async fn remove_input(&self, request: InputsRemovalRequest) -> RpcResult<()>;

    /// Exchanges credentials for others of the same total value.
    #[method(name = "reissueCredentials")]
    async fn reissue_credentials(
        &self,
        request: ReissueCredentialRequest,
    ) -> RpcResult<ReissueCredentialResponse>;

    /// Returns the state of every round the coordinator still knows about.
    #[method(name = "getStatus")]
    async fn get_status(&self) -> RpcResult<Vec<RoundState>>;
}
