//! The credential value types exchanged between issuer and holder.

use std::fmt;

use bitcoin::hashes::{hmac, sha256, Hash, HashEngine};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// Domain separator for credential MACs.
const CREDENTIAL_MAC_DOMAIN: &[u8] = b"wabisabi/credential-mac";

/// Unique identifier of a credential, chosen by the holder at request time and revealed when the
/// credential is presented. The issuer refuses to accept the same serial twice.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SerialNumber(#[serde(with = "hex::serde")] [u8; 32]);

impl SerialNumber {
    /// Draws a fresh serial number.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for SerialNumber {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerialNumber({self})")
    }
}

/// Authentication tag binding a credential's value to its serial number under the issuer key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mac(#[serde(with = "hex::serde")] [u8; 32]);

impl Mac {
    /// Computes the tag for `(value, serial)` under `key`.
    pub(crate) fn compute(key: &[u8; 32], value: u64, serial: &SerialNumber) -> Self {
        let mut engine = hmac::HmacEngine::<sha256::Hash>::new(key);
        engine.input(CREDENTIAL_MAC_DOMAIN);
        engine.input(&value.to_le_bytes());
        engine.input(serial.as_bytes());
        Self(hmac::Hmac::<sha256::Hash>::from_engine(engine).to_byte_array())
    }
}

impl fmt::Debug for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mac({})", hex::encode(self.0))
    }
}

/// What a holder asks the issuer to certify: a value and the serial it will later be spent under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssuanceRequest {
    /// The value to certify.
    pub value: u64,

    /// The serial number under which the credential will be presented.
    pub serial: SerialNumber,
}

impl IssuanceRequest {
    /// Creates a request for `value` with a freshly drawn serial.
    pub fn new<R: RngCore + CryptoRng>(value: u64, rng: &mut R) -> Self {
        Self {
            value,
            serial: SerialNumber::random(rng),
        }
    }
}

/// A credential issued by a [`CredentialIssuer`](crate::issuer::CredentialIssuer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credential {
    /// The certified value.
    pub value: u64,

    /// The serial number revealed on presentation.
    pub serial: SerialNumber,

    /// Issuer tag over `value` and `serial`.
    pub mac: Mac,
}

impl Credential {
    /// Returns `true` if this credential carries no value.
    pub const fn is_zero(&self) -> bool {
        self.value == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_serializes_as_hex() {
        let serial = SerialNumber::from([0xab; 32]);
        let json = serde_json::to_string(&serial).expect("serialize");

        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        assert_eq!(
            serde_json::from_str::<SerialNumber>(&json).expect("deserialize"),
            serial
        );
    }

    #[test]
    fn mac_depends_on_every_input() {
        let key = [1u8; 32];
        let serial = SerialNumber::from([2u8; 32]);
        let mac = Mac::compute(&key, 10, &serial);

        assert_ne!(mac, Mac::compute(&[3u8; 32], 10, &serial));
        assert_ne!(mac, Mac::compute(&key, 11, &serial));
        assert_ne!(mac, Mac::compute(&key, 10, &SerialNumber::from([4u8; 32])));
    }
}
