//! Ed25519 signer for the trading (proxy) identity

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signer as _, SigningKey};
use parking_lot::RwLock;
use std::sync::Arc;

use super::{AccountId, MultiSignature, Signer, SignerType};
use crate::core::{Error, Result};

pub struct Ed25519Signer {
    key: Arc<RwLock<Option<SigningKey>>>,
    account: AccountId,
}

impl Ed25519Signer {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let account = AccountId(signing_key.verifying_key().to_bytes());
        Self {
            key: Arc::new(RwLock::new(Some(signing_key))),
            account,
        }
    }

    /// Accepts a 32-byte seed (or a 64-byte keypair, seed first) as `0x` hex
    /// or base64.
    pub fn from_encoded(secret: &str) -> Result<Self> {
        let secret = secret.trim();
        let bytes = match secret.strip_prefix("0x") {
            Some(h) => hex::decode(h).map_err(|e| Error::Signing(format!("bad hex seed: {}", e)))?,
            None => match hex::decode(secret) {
                Ok(b) => b,
                Err(_) => BASE64
                    .decode(secret)
                    .map_err(|e| Error::Signing(format!("bad base64 seed: {}", e)))?,
            },
        };

        let seed: [u8; 32] = match bytes.len() {
            32 | 64 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes[..32]);
                arr
            }
            n => return Err(Error::Signing(format!("invalid Ed25519 key length {}", n))),
        };
        Ok(Self::from_seed(seed))
    }

    /// Drop the private key. Every later `sign` fails.
    pub fn wipe(&self) {
        *self.key.write() = None;
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, payload: &[u8]) -> Result<MultiSignature> {
        let key = self.key.read();
        let signing_key = key
            .as_ref()
            .ok_or_else(|| Error::Signing("signing key unavailable".into()))?;
        let signature = signing_key.sign(payload);
        Ok(MultiSignature::Ed25519(signature.to_bytes()))
    }

    fn account_id(&self) -> AccountId {
        self.account
    }

    fn signer_type(&self) -> SignerType {
        SignerType::Ed25519
    }
}
