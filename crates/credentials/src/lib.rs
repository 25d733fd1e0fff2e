//! Numeric credentials used to account for value and block space in a coinjoin round.
//!
//! The coordinator runs one [`CredentialIssuer`](issuer::CredentialIssuer) per round and per
//! resource (amount, vsize). Participants trade credentials in and out of the issuer through
//! requests whose presented and requested values are tied together by a public `delta`, which lets
//! the coordinator enforce conservation of value without learning how credentials are split.
//!
//! The zero-knowledge machinery of the real scheme is outside this crate. Issued credentials are
//! authenticated with a keyed MAC held by the issuer, behind the same request/response contract.

pub mod client;
pub mod credential;
pub mod errors;
pub mod issuer;
pub mod pool;
pub mod requests;

/// Number of credentials presented (for non-zero requests) and requested in every request.
pub const CREDENTIAL_NUMBER: usize = 2;

pub use client::{CredentialClient, PendingIssuance};
pub use credential::{Credential, IssuanceRequest, Mac, SerialNumber};
pub use errors::CredentialError;
pub use issuer::{CredentialIssuer, IssuerParameters, PreparedResponse};
pub use pool::CredentialPool;
pub use requests::{
    CredentialsRequest, CredentialsResponse, RealCredentialsRequest, ZeroCredentialsRequest,
};
