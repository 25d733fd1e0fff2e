//! Holder-side storage of issued credentials.

use crate::{credential::Credential, errors::CredentialError};

/// Credentials held by a participant for one issuer, split by whether they carry value.
#[derive(Debug, Clone, Default)]
pub struct CredentialPool {
    valuable: Vec<Credential>,
    zero: Vec<Credential>,
}

impl CredentialPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds freshly issued credentials.
    pub fn add(&mut self, credentials: impl IntoIterator<Item = Credential>) {
        for credential in credentials {
            if credential.is_zero() {
                self.zero.push(credential);
            } else {
                self.valuable.push(credential);
            }
        }
    }

    /// Removes `n` zero-valued credentials.
    pub fn take_zero(&mut self, n: usize) -> Result<Vec<Credential>, CredentialError> {
        if self.zero.len() < n {
            return Err(CredentialError::InsufficientCredentials("zero"));
        }
        Ok(self.zero.split_off(self.zero.len() - n))
    }

    /// Removes the valuable credential with exactly this serial.
    pub fn take(&mut self, credential: &Credential) -> Option<Credential> {
        let pos = self.valuable.iter().position(|c| c == credential)?;
        Some(self.valuable.swap_remove(pos))
    }

    /// Removes and returns every valuable credential.
    pub fn take_valuable(&mut self) -> Vec<Credential> {
        std::mem::take(&mut self.valuable)
    }

    /// Valuable credentials currently held.
    pub fn valuable(&self) -> &[Credential] {
        &self.valuable
    }

    /// Number of zero-valued credentials currently held.
    pub fn zero_count(&self) -> usize {
        self.zero.len()
    }

    /// Sum of all held values.
    pub fn total_value(&self) -> u64 {
        self.valuable.iter().map(|c| c.value).sum()
    }
}

#[cfg(test)]
mod tests {
    use rand::thread_rng;

    use super::*;
    use crate::{client::CredentialClient, CredentialIssuer};

    fn issued(values: [u64; 2]) -> Vec<Credential> {
        let issuer = CredentialIssuer::new(1_000, &mut thread_rng());
        let client = CredentialClient::new(issuer.parameters());
        let mut rng = thread_rng();

        let (request, pending) = client.create_zero_request(&mut rng);
        let zeros = pending
            .complete(issuer.handle_request(&request).expect("zero request"))
            .expect("matching response");

        let (request, pending) = client
            .create_real_request(&values, zeros, &mut rng)
            .expect("valid amounts");
        pending
            .complete(issuer.handle_request(&request).expect("real request"))
            .expect("matching response")
    }

    #[test]
    fn add_partitions_by_value() {
        let mut pool = CredentialPool::new();
        pool.add(issued([7, 0]));

        assert_eq!(pool.valuable().len(), 1);
        assert_eq!(pool.zero_count(), 1);
        assert_eq!(pool.total_value(), 7);
    }

    #[test]
    fn take_zero_fails_when_pool_is_short() {
        let mut pool = CredentialPool::new();
        pool.add(issued([0, 0]));

        assert_eq!(pool.take_zero(2).map(|v| v.len()), Ok(2));
        assert_eq!(
            pool.take_zero(1),
            Err(CredentialError::InsufficientCredentials("zero"))
        );
    }

    #[test]
    fn take_removes_a_specific_credential() {
        let mut pool = CredentialPool::new();
        let creds = issued([3, 4]);
        pool.add(creds.clone());

        assert_eq!(pool.take(&creds[0]), Some(creds[0]));
        assert_eq!(pool.take(&creds[0]), None);
        assert_eq!(pool.total_value(), 4);
        assert_eq!(pool.take_valuable(), vec![creds[1]]);
        assert_eq!(pool.total_value(), 0);
    }
}
