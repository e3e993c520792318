pub mod util;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{self, Debug, Display};

pub use util::{content_hash, ContentHash};

/// Canonical byte form of a value. Everything that gets signed, hashed or
/// shipped between parties goes through these two functions so that every
/// party sees the same bytes.
pub trait CanonicalBytes: Serialize + DeserializeOwned {
    /// Serialize to CBOR bytes using ciborium
    fn to_cbor(&self) -> Result<Vec<u8>, ciborium::ser::Error<std::io::Error>> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes using ciborium
    fn from_cbor(bytes: &[u8]) -> Result<Self, ciborium::de::Error<std::io::Error>> {
        ciborium::de::from_reader(bytes)
    }
}

impl<T: Serialize + DeserializeOwned> CanonicalBytes for T {}

/// A deterministic transition rule set. `verify` must depend on nothing but the
/// transaction itself so that any party replaying it reaches the same verdict.
pub trait Contract {
    type Transaction: Serialize + DeserializeOwned + Clone + Debug;
    type Rejection: Clone + Debug + Display;

    fn verify(tx: &Self::Transaction) -> Result<(), Self::Rejection>;

    /// Decodes `bytes` and verifies the result. Bytes that fail to decode are
    /// rejected, never skipped.
    fn verify_bytes(bytes: &[u8]) -> Result<Self::Transaction, ContractError<Self::Rejection>> {
        let tx = Self::Transaction::from_cbor(bytes)
            .map_err(|e| ContractError::Deser(e.to_string()))?;
        Self::verify(&tx).map_err(ContractError::Rejected)?;
        Ok(tx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractError<R> {
    Deser(String),
    Rejected(R),
}

impl<R: Display> Display for ContractError<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractError::Deser(e) => write!(f, "undecodable transaction: {}", e),
            ContractError::Rejected(rule) => write!(f, "{}", rule),
        }
    }
}

impl<R: Display + Debug> std::error::Error for ContractError<R> {}
