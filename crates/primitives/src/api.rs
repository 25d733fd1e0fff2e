//! The coordinator request surface.
//!
//! The coordinator implements it in-process and the RPC client implements it over the wire, so
//! participants are written against this trait only.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    errors::ApiError,
    messages::{
        ConnectionConfirmationRequest, ConnectionConfirmationResponse, InputRegistrationRequest,
        InputRegistrationResponse, InputsRemovalRequest, OutputRegistrationRequest,
        OutputRegistrationResponse, ReadyToSignRequest, ReissueCredentialRequest,
        ReissueCredentialResponse, TransactionSignaturesRequest,
    },
    round_state::RoundState,
};

/// Requests a participant can make to a coordinator.
#[async_trait]
pub trait WabiSabiApi: Send + Sync {
    /// Registers an input.
    async fn register_input(
        &self,
        request: InputRegistrationRequest,
        cancel: &CancellationToken,
    ) -> Result<InputRegistrationResponse, ApiError>;

    /// Confirms an Alice's connection.
    async fn confirm_connection(
        &self,
        request: ConnectionConfirmationRequest,
        cancel: &CancellationToken,
    ) -> Result<ConnectionConfirmationResponse, ApiError>;

    /// Registers an output.
    async fn register_output(
        &self,
        request: OutputRegistrationRequest,
        cancel: &CancellationToken,
    ) -> Result<OutputRegistrationResponse, ApiError>;

    /// Signals that an Alice is ready to sign.
    async fn ready_to_sign(
        &self,
        request: ReadyToSignRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError>;

    /// Removes an input during input registration.
    async fn remove_input(
        &self,
        request: InputsRemovalRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError>;

    /// Submits input witnesses.
    async fn sign_transaction(
        &self,
        request: TransactionSignaturesRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError>;

    /// Reissues credentials.
    async fn reissue_credentials(
        &self,
        request: ReissueCredentialRequest,
        cancel: &CancellationToken,
    ) -> Result<ReissueCredentialResponse, ApiError>;

    /// Returns the state of every known round.
    async fn get_status(&self, cancel: &CancellationToken) -> Result<Vec<RoundState>, ApiError>;
}
