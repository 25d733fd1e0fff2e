//! Coordinator-side credential issuance.
//!
//! Issuance is split in two steps. [`CredentialIssuer::prepare_response`] checks a request against
//! the issuer key and the current ledger without changing it, and [`CredentialIssuer::commit`]
//! applies one or more prepared responses atomically after re-checking them under the ledger lock.
//! This lets a caller verify requests against several issuers before committing any of them.

use std::{collections::HashSet, fmt};

use bitcoin::hashes::{sha256, Hash, HashEngine};
use parking_lot::Mutex;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{
    credential::{Credential, Mac, SerialNumber},
    errors::CredentialError,
    requests::{CredentialsRequest, CredentialsResponse},
    CREDENTIAL_NUMBER,
};

/// Public description of an issuer, handed to clients in the round state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssuerParameters {
    /// Commitment to the issuer key. Clients use it to tell issuers apart.
    #[serde(with = "hex::serde")]
    pub fingerprint: [u8; 32],

    /// Largest value a single credential may carry.
    pub max_amount: u64,
}

#[derive(Debug, Default)]
struct Ledger {
    /// Sum of all committed deltas.
    balance: i64,

    /// Serials of credentials that have been presented.
    spent: HashSet<SerialNumber>,

    /// Serials of credentials that have been issued.
    issued: HashSet<SerialNumber>,
}

/// A response that passed validation but has not been applied to the ledger yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedResponse {
    issuer: [u8; 32],
    delta: i64,
    spent: Vec<SerialNumber>,
    issued: Vec<SerialNumber>,
    response: CredentialsResponse,
}

impl PreparedResponse {
    /// The delta this response will apply to the issuer balance.
    pub const fn delta(&self) -> i64 {
        self.delta
    }

    /// The response that will be returned to the holder once committed.
    pub const fn response(&self) -> &CredentialsResponse {
        &self.response
    }
}

/// Issues and redeems credentials for a single resource of a single round.
pub struct CredentialIssuer {
    secret: [u8; 32],
    parameters: IssuerParameters,
    ledger: Mutex<Ledger>,
}

impl fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("parameters", &self.parameters)
            .field("balance", &self.balance())
            .finish_non_exhaustive()
    }
}

impl CredentialIssuer {
    /// Creates an issuer with a freshly drawn key.
    pub fn new<R: RngCore + CryptoRng>(max_amount: u64, rng: &mut R) -> Self {
        let mut secret = [0u8; 32];
        rng.fill_bytes(&mut secret);
        Self::from_secret(secret, max_amount)
    }

    /// Creates an issuer from a known key.
    pub fn from_secret(secret: [u8; 32], max_amount: u64) -> Self {
        let mut engine = sha256::Hash::engine();
        engine.input(b"wabisabi/issuer-fingerprint");
        engine.input(&secret);
        let fingerprint = sha256::Hash::from_engine(engine).to_byte_array();

        Self {
            secret,
            parameters: IssuerParameters {
                fingerprint,
                max_amount,
            },
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Returns the public parameters.
    pub const fn parameters(&self) -> IssuerParameters {
        self.parameters
    }

    /// Returns the largest value a single credential may carry.
    pub const fn max_amount(&self) -> u64 {
        self.parameters.max_amount
    }

    /// Returns the sum of all committed deltas.
    pub fn balance(&self) -> i64 {
        self.ledger.lock().balance
    }

    /// Returns `true` if a credential with this serial has been presented.
    pub fn is_spent(&self, serial: &SerialNumber) -> bool {
        self.ledger.lock().spent.contains(serial)
    }

    /// Checks `request` and builds the response that would be issued for it.
    ///
    /// The ledger is only read. Nothing is spent or issued until the returned value is passed to
    /// [`commit`](Self::commit).
    pub fn prepare_response(
        &self,
        request: &impl CredentialsRequest,
    ) -> Result<PreparedResponse, CredentialError> {
        let presented = request.presented();
        let requested = request.requested();
        let delta = request.delta();

        if requested.len() != CREDENTIAL_NUMBER {
            return Err(CredentialError::InvalidCredentialCount {
                kind: "requested",
                expected: CREDENTIAL_NUMBER,
                got: requested.len(),
            });
        }

        if request.is_zero_request() {
            if !presented.is_empty() || delta != 0 || requested.iter().any(|r| r.value != 0) {
                return Err(CredentialError::NonZeroRequest);
            }
        } else if presented.len() != CREDENTIAL_NUMBER {
            return Err(CredentialError::InvalidCredentialCount {
                kind: "presented",
                expected: CREDENTIAL_NUMBER,
                got: presented.len(),
            });
        }

        if let Some(r) = requested.iter().find(|r| r.value > self.max_amount()) {
            return Err(CredentialError::ValueOutOfRange {
                value: r.value,
                max: self.max_amount(),
            });
        }

        let mut seen = HashSet::new();
        for serial in presented
            .iter()
            .map(|c| c.serial)
            .chain(requested.iter().map(|r| r.serial))
        {
            if !seen.insert(serial) {
                return Err(CredentialError::DuplicateSerial(serial));
            }
        }

        for credential in presented {
            if !self.is_authentic(credential) {
                return Err(CredentialError::InvalidMac(credential.serial));
            }
        }

        let presented_sum: i128 = presented.iter().map(|c| c.value as i128).sum();
        let requested_sum: i128 = requested.iter().map(|r| r.value as i128).sum();
        if requested_sum != presented_sum + delta as i128 {
            return Err(CredentialError::UnbalancedRequest {
                requested: requested_sum,
                presented: presented_sum,
                delta,
            });
        }

        let prepared = PreparedResponse {
            issuer: self.parameters.fingerprint,
            delta,
            spent: presented.iter().map(|c| c.serial).collect(),
            issued: requested.iter().map(|r| r.serial).collect(),
            response: CredentialsResponse {
                issued: requested
                    .iter()
                    .map(|r| Credential {
                        value: r.value,
                        serial: r.serial,
                        mac: Mac::compute(&self.secret, r.value, &r.serial),
                    })
                    .collect(),
            },
        };

        let ledger = self.ledger.lock();
        Self::check_against(&ledger, std::slice::from_ref(&prepared))?;

        Ok(prepared)
    }

    /// Re-checks a batch of prepared responses against the current ledger.
    pub fn validate(&self, batch: &[PreparedResponse]) -> Result<(), CredentialError> {
        if batch.iter().any(|p| p.issuer != self.parameters.fingerprint) {
            return Err(CredentialError::WrongIssuer);
        }

        let ledger = self.ledger.lock();
        Self::check_against(&ledger, batch)
    }

    /// Applies a batch of prepared responses, returning the responses for the holders.
    ///
    /// Either every response in the batch is applied or none is.
    pub fn commit(
        &self,
        batch: Vec<PreparedResponse>,
    ) -> Result<Vec<CredentialsResponse>, CredentialError> {
        if batch.iter().any(|p| p.issuer != self.parameters.fingerprint) {
            return Err(CredentialError::WrongIssuer);
        }

        let mut ledger = self.ledger.lock();
        Self::check_against(&ledger, &batch)?;

        let mut responses = Vec::with_capacity(batch.len());
        for prepared in batch {
            ledger.balance += prepared.delta;
            ledger.spent.extend(prepared.spent);
            ledger.issued.extend(prepared.issued);
            responses.push(prepared.response);
        }

        Ok(responses)
    }

    /// Convenience for the common single-request case.
    pub fn handle_request(
        &self,
        request: &impl CredentialsRequest,
    ) -> Result<CredentialsResponse, CredentialError> {
        let prepared = self.prepare_response(request)?;
        let mut responses = self.commit(vec![prepared])?;
        responses.pop().ok_or(CredentialError::ResponseMismatch)
    }

    fn is_authentic(&self, credential: &Credential) -> bool {
        Mac::compute(&self.secret, credential.value, &credential.serial) == credential.mac
    }

    fn check_against(ledger: &Ledger, batch: &[PreparedResponse]) -> Result<(), CredentialError> {
        let mut spent = HashSet::new();
        let mut issued = HashSet::new();
        let mut balance = ledger.balance;

        for prepared in batch {
            for serial in &prepared.spent {
                if ledger.spent.contains(serial) {
                    return Err(CredentialError::CredentialAlreadySpent(*serial));
                }
                if !spent.insert(*serial) {
                    return Err(CredentialError::DuplicateSerial(*serial));
                }
            }

            for serial in &prepared.issued {
                if ledger.issued.contains(serial) {
                    return Err(CredentialError::SerialReused(*serial));
                }
                if !issued.insert(*serial) {
                    return Err(CredentialError::DuplicateSerial(*serial));
                }
            }

            let next = balance.checked_add(prepared.delta).filter(|b| *b >= 0);
            balance = next.ok_or(CredentialError::NegativeBalance {
                balance,
                delta: prepared.delta,
            })?;
        }

        Ok(())
    }
}
