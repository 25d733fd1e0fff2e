//! Holder-side construction of credential requests.

use rand::{CryptoRng, RngCore};

use crate::{
    credential::{Credential, IssuanceRequest},
    errors::CredentialError,
    issuer::IssuerParameters,
    requests::{CredentialsResponse, RealCredentialsRequest, ZeroCredentialsRequest},
    CREDENTIAL_NUMBER,
};

/// Builds requests against one issuer and checks the responses it returns.
#[derive(Debug, Clone, Copy)]
pub struct CredentialClient {
    parameters: IssuerParameters,
}

/// The holder's record of an in-flight request, used to check the issuer's response.
#[derive(Debug, Clone)]
#[must_use = "a pending issuance yields credentials only once completed"]
pub struct PendingIssuance {
    requested: Vec<IssuanceRequest>,
}

impl CredentialClient {
    /// Creates a client for the issuer described by `parameters`.
    pub const fn new(parameters: IssuerParameters) -> Self {
        Self { parameters }
    }

    /// The issuer this client talks to.
    pub const fn parameters(&self) -> IssuerParameters {
        self.parameters
    }

    /// Builds a request for [`CREDENTIAL_NUMBER`] zero-valued credentials.
    pub fn create_zero_request<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> (ZeroCredentialsRequest, PendingIssuance) {
        let requested: Vec<_> = (0..CREDENTIAL_NUMBER)
            .map(|_| IssuanceRequest::new(0, rng))
            .collect();

        (
            ZeroCredentialsRequest {
                requested: requested.clone(),
            },
            PendingIssuance { requested },
        )
    }

    /// Builds a request that spends `presented` and asks for credentials worth `amounts`.
    ///
    /// `amounts` is padded with zeros up to [`CREDENTIAL_NUMBER`]. The delta is derived from the
    /// difference between requested and presented totals.
    pub fn create_real_request<R: RngCore + CryptoRng>(
        &self,
        amounts: &[u64],
        presented: Vec<Credential>,
        rng: &mut R,
    ) -> Result<(RealCredentialsRequest, PendingIssuance), CredentialError> {
        if amounts.len() > CREDENTIAL_NUMBER {
            return Err(CredentialError::InvalidCredentialCount {
                kind: "requested",
                expected: CREDENTIAL_NUMBER,
                got: amounts.len(),
            });
        }
        if presented.len() != CREDENTIAL_NUMBER {
            return Err(CredentialError::InvalidCredentialCount {
                kind: "presented",
                expected: CREDENTIAL_NUMBER,
                got: presented.len(),
            });
        }
        if let Some(value) = amounts.iter().find(|v| **v > self.parameters.max_amount) {
            return Err(CredentialError::ValueOutOfRange {
                value: *value,
                max: self.parameters.max_amount,
            });
        }

        let requested: Vec<_> = amounts
            .iter()
            .copied()
            .chain(std::iter::repeat(0))
            .take(CREDENTIAL_NUMBER)
            .map(|value| IssuanceRequest::new(value, rng))
            .collect();

        let requested_sum: i128 = requested.iter().map(|r| r.value as i128).sum();
        let presented_sum: i128 = presented.iter().map(|c| c.value as i128).sum();
        let delta = i64::try_from(requested_sum - presented_sum).map_err(|_| {
            CredentialError::UnbalancedRequest {
                requested: requested_sum,
                presented: presented_sum,
                delta: 0,
            }
        })?;

        Ok((
            RealCredentialsRequest {
                delta,
                presented,
                requested: requested.clone(),
            },
            PendingIssuance { requested },
        ))
    }
}

impl PendingIssuance {
    /// Checks that `response` certifies exactly what was requested and returns the credentials.
    pub fn complete(
        self,
        response: CredentialsResponse,
    ) -> Result<Vec<Credential>, CredentialError> {
        if response.issued.len() != self.requested.len() {
            return Err(CredentialError::ResponseMismatch);
        }

        let matches = response
            .issued
            .iter()
            .zip(&self.requested)
            .all(|(issued, requested)| {
                issued.value == requested.value && issued.serial == requested.serial
            });
        if !matches {
            return Err(CredentialError::ResponseMismatch);
        }

        Ok(response.issued)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::thread_rng;

    use super::*;
    use crate::CredentialIssuer;

    fn fund(issuer: &CredentialIssuer, client: &CredentialClient, value: u64) -> Vec<Credential> {
        let mut rng = thread_rng();
        let (request, pending) = client.create_zero_request(&mut rng);
        let zeros = pending
            .complete(issuer.handle_request(&request).expect("zero request"))
            .expect("matching response");

        let (request, pending) = client
            .create_real_request(&[value], zeros, &mut rng)
            .expect("valid request");
        pending
            .complete(issuer.handle_request(&request).expect("deposit"))
            .expect("matching response")
    }

    #[test]
    fn amounts_are_padded_and_delta_is_derived() {
        let issuer = CredentialIssuer::new(1_000, &mut thread_rng());
        let client = CredentialClient::new(issuer.parameters());
        let funded = fund(&issuer, &client, 800);

        let (request, _pending) = client
            .create_real_request(&[300], funded, &mut thread_rng())
            .expect("valid request");

        assert_eq!(request.requested.len(), CREDENTIAL_NUMBER);
        assert_eq!(request.requested[1].value, 0);
        assert_eq!(request.delta, -500);
    }

    #[test]
    fn too_many_amounts_are_rejected() {
        let issuer = CredentialIssuer::new(1_000, &mut thread_rng());
        let client = CredentialClient::new(issuer.parameters());
        let funded = fund(&issuer, &client, 10);

        assert!(matches!(
            client.create_real_request(&[1, 2, 3], funded, &mut thread_rng()),
            Err(CredentialError::InvalidCredentialCount { .. })
        ));
    }

    #[test]
    fn mismatching_response_is_rejected() {
        let issuer = CredentialIssuer::new(1_000, &mut thread_rng());
        let client = CredentialClient::new(issuer.parameters());
        let (_, pending) = client.create_zero_request(&mut thread_rng());
        let (other, _) = client.create_zero_request(&mut thread_rng());

        let response = issuer.handle_request(&other).expect("zero request");
        assert_eq!(
            pending.complete(response),
            Err(CredentialError::ResponseMismatch)
        );
    }

    proptest! {
        #[test]
        fn issuer_balance_equals_outstanding_value(
            deposits in proptest::collection::vec(1u64..1_000, 1..6),
            split in 0u64..100,
        ) {
            let issuer = CredentialIssuer::new(1_000, &mut thread_rng());
            let client = CredentialClient::new(issuer.parameters());
            let mut rng = thread_rng();

            let mut outstanding = 0u64;
            for deposit in &deposits {
                let funded = fund(&issuer, &client, *deposit);

                let keep = deposit * split / 100;
                let (request, pending) = client
                    .create_real_request(&[keep], funded, &mut rng)
                    .expect("valid request");
                let kept = pending
                    .complete(issuer.handle_request(&request).expect("withdrawal"))
                    .expect("matching response");

                outstanding += kept.iter().map(|c| c.value).sum::<u64>();
            }

            prop_assert_eq!(issuer.balance(), outstanding as i64);
        }
    }
}
