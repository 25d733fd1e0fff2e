//! Request and response envelopes for credential issuance.

use serde::{Deserialize, Serialize};

use crate::credential::{Credential, IssuanceRequest};

/// Common view over the two request kinds.
pub trait CredentialsRequest {
    /// The public difference between requested and presented values.
    fn delta(&self) -> i64;

    /// The credentials being spent.
    fn presented(&self) -> &[Credential];

    /// The credentials being asked for.
    fn requested(&self) -> &[IssuanceRequest];

    /// Returns `true` for requests that only bootstrap zero-valued credentials.
    fn is_zero_request(&self) -> bool;
}

/// Requests zero-valued credentials without presenting any. Used to fill a holder's pool with the
/// placeholders needed to pad later presentations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZeroCredentialsRequest {
    /// The zero-valued issuance requests.
    pub requested: Vec<IssuanceRequest>,
}

impl CredentialsRequest for ZeroCredentialsRequest {
    fn delta(&self) -> i64 {
        0
    }

    fn presented(&self) -> &[Credential] {
        &[]
    }

    fn requested(&self) -> &[IssuanceRequest] {
        &self.requested
    }

    fn is_zero_request(&self) -> bool {
        true
    }
}

/// Spends `presented` and asks for `requested` such that
/// `sum(requested) == sum(presented) + delta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealCredentialsRequest {
    /// Positive when value enters the round (input confirmation), negative when it leaves
    /// (output registration), zero for reissuance.
    pub delta: i64,

    /// Credentials being spent.
    pub presented: Vec<Credential>,

    /// Credentials being issued.
    pub requested: Vec<IssuanceRequest>,
}

impl CredentialsRequest for RealCredentialsRequest {
    fn delta(&self) -> i64 {
        self.delta
    }

    fn presented(&self) -> &[Credential] {
        &self.presented
    }

    fn requested(&self) -> &[IssuanceRequest] {
        &self.requested
    }

    fn is_zero_request(&self) -> bool {
        false
    }
}

/// The issuer's answer: one credential per issuance request, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsResponse {
    /// The issued credentials.
    pub issued: Vec<Credential>,
}
