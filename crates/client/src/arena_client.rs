//! Credential bookkeeping around the coordinator API.

use std::{fmt, sync::Arc};

use bitcoin::{OutPoint, ScriptBuf};
use parking_lot::Mutex;
use rand::thread_rng;
use tokio_util::sync::CancellationToken;
use wabisabi_primitives::{
    api::WabiSabiApi,
    credentials::{
        Credential, CredentialClient, CredentialError, CredentialPool, CredentialsResponse,
        PendingIssuance, RealCredentialsRequest, ZeroCredentialsRequest, CREDENTIAL_NUMBER,
    },
    ids::{AliceId, RoundId},
    messages::{
        ConnectionConfirmationRequest, InputRegistrationRequest, InputWitnessPair,
        InputsRemovalRequest, OutputRegistrationRequest, ReadyToSignRequest,
        ReissueCredentialRequest, TransactionSignaturesRequest,
    },
    ownership::OwnershipProof,
    round_state::RoundState,
};

use crate::errors::CoinJoinClientError;

/// Credentials of one issuer: how to build requests and what is held.
#[derive(Debug)]
struct CredentialWallet {
    client: CredentialClient,
    pool: Mutex<CredentialPool>,
}

impl CredentialWallet {
    fn new(client: CredentialClient) -> Self {
        Self {
            client,
            pool: Mutex::new(CredentialPool::new()),
        }
    }

    fn zero_request(&self) -> (ZeroCredentialsRequest, PendingIssuance) {
        self.client.create_zero_request(&mut thread_rng())
    }

    /// Builds a request presenting `valuable` padded with zero credentials from the pool.
    fn real_request(
        &self,
        values: &[u64],
        valuable: Vec<Credential>,
    ) -> Result<(RealCredentialsRequest, PendingIssuance), CredentialError> {
        let mut presented = valuable;
        let missing = CREDENTIAL_NUMBER.saturating_sub(presented.len());
        presented.extend(self.pool.lock().take_zero(missing)?);

        self.client
            .create_real_request(values, presented, &mut thread_rng())
    }

    /// Checks `response` and keeps every credential it carries.
    fn receive(
        &self,
        pending: PendingIssuance,
        response: CredentialsResponse,
    ) -> Result<(), CredentialError> {
        let credentials = pending.complete(response)?;
        self.pool.lock().add(credentials);
        Ok(())
    }

    /// Checks `response` and hands its credentials to the caller.
    fn issued<const N: usize>(
        pending: PendingIssuance,
        response: CredentialsResponse,
    ) -> Result<[Credential; N], CredentialError> {
        <[Credential; N]>::try_from(pending.complete(response)?)
            .map_err(|_| CredentialError::ResponseMismatch)
    }

    fn keep(&self, credentials: impl IntoIterator<Item = Credential>) {
        self.pool.lock().add(credentials);
    }
}

/// A participant's connection to one round.
///
/// Builds credential requests for every coordinator call, checks the responses, and keeps the
/// zero credentials needed to pad later presentations. Cloning shares the held credentials.
#[derive(Clone)]
pub struct ArenaClient {
    api: Arc<dyn WabiSabiApi>,
    amount: Arc<CredentialWallet>,
    vsize: Arc<CredentialWallet>,
}

impl fmt::Debug for ArenaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaClient")
            .field("amount", &self.amount)
            .field("vsize", &self.vsize)
            .finish_non_exhaustive()
    }
}

impl ArenaClient {
    /// Creates a client for the issuers of `round`.
    pub fn new(api: Arc<dyn WabiSabiApi>, round: &RoundState) -> Self {
        Self {
            api,
            amount: Arc::new(CredentialWallet::new(CredentialClient::new(round.amount_issuer))),
            vsize: Arc::new(CredentialWallet::new(CredentialClient::new(round.vsize_issuer))),
        }
    }

    /// Total value of the amount credentials held.
    pub fn amount_total(&self) -> u64 {
        self.amount.pool.lock().total_value()
    }

    /// Total value of the vsize credentials held.
    pub fn vsize_total(&self) -> u64 {
        self.vsize.pool.lock().total_value()
    }

    /// Removes and returns every non-zero credential held, amount first.
    pub fn take_valuable(&self) -> (Vec<Credential>, Vec<Credential>) {
        (
            self.amount.pool.lock().take_valuable(),
            self.vsize.pool.lock().take_valuable(),
        )
    }

    /// Puts credentials back into the pools.
    pub fn keep(
        &self,
        amount: impl IntoIterator<Item = Credential>,
        vsize: impl IntoIterator<Item = Credential>,
    ) {
        self.amount.keep(amount);
        self.vsize.keep(vsize);
    }

    /// Registers `input` and keeps the zero credentials issued for it.
    pub async fn register_input(
        &self,
        round_id: RoundId,
        input: OutPoint,
        ownership_proof: OwnershipProof,
        cancel: &CancellationToken,
    ) -> Result<AliceId, CoinJoinClientError> {
        let (zero_amount_credentials, amount_pending) = self.amount.zero_request();
        let (zero_vsize_credentials, vsize_pending) = self.vsize.zero_request();

        let response = self
            .api
            .register_input(
                InputRegistrationRequest {
                    round_id,
                    input,
                    ownership_proof,
                    zero_amount_credentials,
                    zero_vsize_credentials,
                },
                cancel,
            )
            .await?;

        self.amount
            .receive(amount_pending, response.amount_credentials)?;
        self.vsize.receive(vsize_pending, response.vsize_credentials)?;
        Ok(response.alice_id)
    }

    /// Confirms the connection of `alice_id`, asking for credentials worth `amount` and `vsize`.
    ///
    /// Returns whether the real credentials were issued, which only happens once the round is
    /// in connection confirmation.
    pub async fn confirm_connection(
        &self,
        round_id: RoundId,
        alice_id: AliceId,
        amount: u64,
        vsize: u64,
        cancel: &CancellationToken,
    ) -> Result<bool, CoinJoinClientError> {
        let (zero_amount_credentials, zero_amount_pending) = self.amount.zero_request();
        let (zero_vsize_credentials, zero_vsize_pending) = self.vsize.zero_request();
        let (real_amount_credentials, real_amount_pending) =
            self.amount.real_request(&[amount], Vec::new())?;
        let (real_vsize_credentials, real_vsize_pending) =
            match self.vsize.real_request(&[vsize], Vec::new()) {
                Ok(request) => request,
                Err(err) => {
                    self.amount.keep(real_amount_credentials.presented);
                    return Err(err.into());
                }
            };

        let presented_amount = real_amount_credentials.presented.clone();
        let presented_vsize = real_vsize_credentials.presented.clone();

        let response = self
            .api
            .confirm_connection(
                ConnectionConfirmationRequest {
                    round_id,
                    alice_id,
                    zero_amount_credentials,
                    real_amount_credentials,
                    zero_vsize_credentials,
                    real_vsize_credentials,
                },
                cancel,
            )
            .await?;

        self.amount
            .receive(zero_amount_pending, response.zero_amount_credentials)?;
        self.vsize
            .receive(zero_vsize_pending, response.zero_vsize_credentials)?;

        match (response.real_amount_credentials, response.real_vsize_credentials) {
            (Some(amount), Some(vsize)) => {
                self.amount.receive(real_amount_pending, amount)?;
                self.vsize.receive(real_vsize_pending, vsize)?;
                Ok(true)
            }
            _ => {
                // Nothing was spent, the presented credentials are still good.
                self.keep(presented_amount, presented_vsize);
                Ok(false)
            }
        }
    }

    /// Exchanges `amount_presented` and `vsize_presented` for credentials worth
    /// `amount_values` and `vsize_values`, which must add up to the presented totals.
    ///
    /// The requested credentials are returned in request order. Zero credentials issued along
    /// with them are kept.
    pub async fn reissue(
        &self,
        round_id: RoundId,
        amount_presented: Vec<Credential>,
        amount_values: &[u64],
        vsize_presented: Vec<Credential>,
        vsize_values: &[u64],
        cancel: &CancellationToken,
    ) -> Result<([Credential; 2], [Credential; 2]), CoinJoinClientError> {
        let (real_amount_credentials, real_amount_pending) =
            self.amount.real_request(amount_values, amount_presented)?;
        let (real_vsize_credentials, real_vsize_pending) =
            self.vsize.real_request(vsize_values, vsize_presented)?;
        let (zero_amount_credentials, zero_amount_pending) = self.amount.zero_request();
        let (zero_vsize_credentials, zero_vsize_pending) = self.vsize.zero_request();

        let response = self
            .api
            .reissue_credentials(
                ReissueCredentialRequest {
                    round_id,
                    real_amount_credentials,
                    real_vsize_credentials,
                    zero_amount_credentials,
                    zero_vsize_credentials,
                },
                cancel,
            )
            .await?;

        self.amount
            .receive(zero_amount_pending, response.zero_amount_credentials)?;
        self.vsize
            .receive(zero_vsize_pending, response.zero_vsize_credentials)?;

        Ok((
            CredentialWallet::issued(real_amount_pending, response.real_amount_credentials)?,
            CredentialWallet::issued(real_vsize_pending, response.real_vsize_credentials)?,
        ))
    }

    /// Registers `script`, spending `amount_credential` and `vsize_credential` on it.
    pub async fn register_output(
        &self,
        round_id: RoundId,
        script: ScriptBuf,
        amount_credential: Credential,
        vsize_credential: Credential,
        cancel: &CancellationToken,
    ) -> Result<(), CoinJoinClientError> {
        let (amount_credentials, amount_pending) =
            self.amount.real_request(&[], vec![amount_credential])?;
        let (vsize_credentials, vsize_pending) =
            self.vsize.real_request(&[], vec![vsize_credential])?;

        let response = self
            .api
            .register_output(
                OutputRegistrationRequest {
                    round_id,
                    script,
                    amount_credentials,
                    vsize_credentials,
                },
                cancel,
            )
            .await?;

        self.amount
            .receive(amount_pending, response.amount_credentials)?;
        self.vsize.receive(vsize_pending, response.vsize_credentials)?;
        Ok(())
    }

    /// Signals that `alice_id` has registered all its outputs.
    pub async fn ready_to_sign(
        &self,
        round_id: RoundId,
        alice_id: AliceId,
        ownership_proof: OwnershipProof,
        cancel: &CancellationToken,
    ) -> Result<(), CoinJoinClientError> {
        self.api
            .ready_to_sign(
                ReadyToSignRequest {
                    round_id,
                    alice_id,
                    ownership_proof,
                },
                cancel,
            )
            .await?;
        Ok(())
    }

    /// Unregisters `alice_id`.
    pub async fn remove_input(
        &self,
        round_id: RoundId,
        alice_id: AliceId,
        cancel: &CancellationToken,
    ) -> Result<(), CoinJoinClientError> {
        self.api
            .remove_input(InputsRemovalRequest { round_id, alice_id }, cancel)
            .await?;
        Ok(())
    }

    /// Submits witnesses for the coinjoin.
    pub async fn sign_transaction(
        &self,
        round_id: RoundId,
        input_witness_pairs: Vec<InputWitnessPair>,
        cancel: &CancellationToken,
    ) -> Result<(), CoinJoinClientError> {
        self.api
            .sign_transaction(
                TransactionSignaturesRequest {
                    round_id,
                    input_witness_pairs,
                },
                cancel,
            )
            .await?;
        Ok(())
    }
}
