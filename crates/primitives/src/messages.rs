//! Requests and responses exchanged between participants and the coordinator.

use bitcoin::{OutPoint, ScriptBuf, Witness};
use serde::{Deserialize, Serialize};
use wabisabi_credentials::{CredentialsResponse, RealCredentialsRequest, ZeroCredentialsRequest};

use crate::{
    ids::{AliceId, RoundId},
    ownership::OwnershipProof,
};

/// Registers one input in a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRegistrationRequest {
    /// The round the request is for.
    pub round_id: RoundId,
    /// The coin being registered.
    pub input: OutPoint,
    /// Proof of control over the coin, bound to the round.
    pub ownership_proof: OwnershipProof,
    /// Zero-valued amount credentials.
    pub zero_amount_credentials: ZeroCredentialsRequest,
    /// Zero-valued vsize credentials.
    pub zero_vsize_credentials: ZeroCredentialsRequest,
}

/// Answer to an [`InputRegistrationRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRegistrationResponse {
    /// Identifier of the newly registered Alice.
    pub alice_id: AliceId,
    /// Amount credentials.
    pub amount_credentials: CredentialsResponse,
    /// Vsize credentials.
    pub vsize_credentials: CredentialsResponse,
}

/// Keeps an Alice alive during input registration and claims its real credentials once the round
/// reaches connection confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfirmationRequest {
    /// The round the request is for.
    pub round_id: RoundId,
    /// The Alice the request acts on.
    pub alice_id: AliceId,
    /// Zero-valued amount credentials.
    pub zero_amount_credentials: ZeroCredentialsRequest,
    /// Amount credentials carrying value.
    pub real_amount_credentials: RealCredentialsRequest,
    /// Zero-valued vsize credentials.
    pub zero_vsize_credentials: ZeroCredentialsRequest,
    /// Vsize credentials carrying value.
    pub real_vsize_credentials: RealCredentialsRequest,
}

/// Answer to a [`ConnectionConfirmationRequest`]. The real credentials are only present once the
/// connection was confirmed in the connection confirmation phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfirmationResponse {
    /// Zero-valued amount credentials.
    pub zero_amount_credentials: CredentialsResponse,
    /// Zero-valued vsize credentials.
    pub zero_vsize_credentials: CredentialsResponse,
    /// Amount credentials carrying value.
    pub real_amount_credentials: Option<CredentialsResponse>,
    /// Vsize credentials carrying value.
    pub real_vsize_credentials: Option<CredentialsResponse>,
}

impl ConnectionConfirmationResponse {
    /// Whether the confirmation also delivered real credentials.
    pub const fn is_confirmed(&self) -> bool {
        self.real_amount_credentials.is_some() && self.real_vsize_credentials.is_some()
    }
}

/// Registers one output, paid for by the presented credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRegistrationRequest {
    /// The round the request is for.
    pub round_id: RoundId,
    /// The destination of the output.
    pub script: ScriptBuf,
    /// Amount credentials.
    pub amount_credentials: RealCredentialsRequest,
    /// Vsize credentials.
    pub vsize_credentials: RealCredentialsRequest,
}

/// Answer to an [`OutputRegistrationRequest`], carrying the change credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRegistrationResponse {
    /// Amount credentials.
    pub amount_credentials: CredentialsResponse,
    /// Vsize credentials.
    pub vsize_credentials: CredentialsResponse,
}

/// Signals that an Alice has registered all its outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyToSignRequest {
    /// The round the request is for.
    pub round_id: RoundId,
    /// The Alice the request acts on.
    pub alice_id: AliceId,
    /// Proof of control over the coin, bound to the round.
    pub ownership_proof: OwnershipProof,
}

/// Withdraws an input during input registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputsRemovalRequest {
    /// The round the request is for.
    pub round_id: RoundId,
    /// The Alice the request acts on.
    pub alice_id: AliceId,
}

/// A witness for one input of the coinjoin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputWitnessPair {
    /// Index of the input in the unsigned transaction.
    pub input_index: u32,
    /// The witness for that input.
    pub witness: Witness,
}

/// Submits witnesses for inputs of the coinjoin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignaturesRequest {
    /// The round the request is for.
    pub round_id: RoundId,
    /// Witnesses by input index.
    pub input_witness_pairs: Vec<InputWitnessPair>,
}

/// Swaps credentials for fresh ones of equal total value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReissueCredentialRequest {
    /// The round the request is for.
    pub round_id: RoundId,
    /// Amount credentials carrying value.
    pub real_amount_credentials: RealCredentialsRequest,
    /// Vsize credentials carrying value.
    pub real_vsize_credentials: RealCredentialsRequest,
    /// Zero-valued amount credentials.
    pub zero_amount_credentials: ZeroCredentialsRequest,
    /// Zero-valued vsize credentials.
    pub zero_vsize_credentials: ZeroCredentialsRequest,
}

/// Answer to a [`ReissueCredentialRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReissueCredentialResponse {
    /// Amount credentials carrying value.
    pub real_amount_credentials: CredentialsResponse,
    /// Vsize credentials carrying value.
    pub real_vsize_credentials: CredentialsResponse,
    /// Zero-valued amount credentials.
    pub zero_amount_credentials: CredentialsResponse,
    /// Zero-valued vsize credentials.
    pub zero_vsize_credentials: CredentialsResponse,
}
