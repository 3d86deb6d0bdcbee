//! Request signing
//!
//! The exchange verifies a detached signature over the exact encoded bytes
//! of an order or cancel record. No pre-hashing happens here.

pub mod ed25519;
pub mod ss58;

pub use ed25519::Ed25519Signer;
pub use ss58::{AccountId, SS58_PREFIX};

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::core::Result;

pub trait Signer: Send + Sync {
    fn sign(&self, payload: &[u8]) -> Result<MultiSignature>;
    fn account_id(&self) -> AccountId;
    fn signer_type(&self) -> SignerType;

    /// Public trading identity (SS58 address).
    fn address(&self) -> String {
        self.account_id().to_ss58()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerType {
    Ed25519,
}

/// Signature tagged with its scheme, as the exchange expects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiSignature {
    Ed25519([u8; 64]),
}

impl MultiSignature {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MultiSignature::Ed25519(b) => b,
        }
    }
}

impl Serialize for MultiSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            MultiSignature::Ed25519(b) => map.serialize_entry("Ed25519", &hex::encode(b))?,
        }
        map.end()
    }
}
