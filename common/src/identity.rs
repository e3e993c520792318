use crate::util::truncated_base32;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identity of a party: its Ed25519 verifying key.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartyId(pub VerifyingKey);

impl PartyId {
    pub fn verify(&self, bytes: &[u8], signature: &Signature) -> bool {
        self.0.verify(bytes, signature).is_ok()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0.as_bytes()).into_string()
    }

    pub fn from_base58(encoded: &str) -> Option<Self> {
        let bytes = bs58::decode(encoded).into_vec().ok()?;
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        VerifyingKey::from_bytes(&bytes).ok().map(PartyId)
    }
}

impl From<VerifyingKey> for PartyId {
    fn from(vk: VerifyingKey) -> Self {
        PartyId(vk)
    }
}

impl From<&VerifyingKey> for PartyId {
    fn from(vk: &VerifyingKey) -> Self {
        PartyId(*vk)
    }
}

// Signer sets are BTreeSets so that a proposal encodes the same way no matter
// which order parties were added in.
impl Ord for PartyId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl PartialOrd for PartyId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", truncated_base32(self.as_bytes()))
    }
}

impl fmt::Debug for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartyId({})", self)
    }
}

/// A party's private signing key.
#[derive(Clone)]
pub struct PartyKey(SigningKey);

impl PartyKey {
    pub fn generate() -> Self {
        PartyKey(SigningKey::generate(&mut OsRng))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        PartyKey(SigningKey::from_bytes(bytes))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn party(&self) -> PartyId {
        PartyId(self.0.verifying_key())
    }

    pub fn sign(&self, bytes: &[u8]) -> Signature {
        self.0.sign(bytes)
    }
}

impl fmt::Debug for PartyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PartyKey").field(&self.party()).finish()
    }
}
