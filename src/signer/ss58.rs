//! SS58 account addresses (base58 + blake2b checksum)

use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

use crate::core::EncodingError;

/// Network prefix of the exchange chain.
pub const SS58_PREFIX: u16 = 88;

const CHECKSUM_LEN: usize = 2;
const CHECKSUM_PREAMBLE: &[u8] = b"SS58PRE";

/// 32-byte public account identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    pub fn to_ss58(&self) -> String {
        self.to_ss58_with_prefix(SS58_PREFIX)
    }

    pub fn to_ss58_with_prefix(&self, prefix: u16) -> String {
        let ident = prefix & 0b0011_1111_1111_1111;
        let mut data = match ident {
            0..=63 => vec![ident as u8],
            _ => {
                let first = ((ident & 0b0000_0000_1111_1100) as u8 >> 2) | 0b0100_0000;
                let second = ((ident >> 8) as u8) | (((ident & 0b0000_0000_0000_0011) as u8) << 6);
                vec![first, second]
            }
        };
        data.extend_from_slice(&self.0);
        let hash = checksum(&data);
        data.extend_from_slice(&hash[..CHECKSUM_LEN]);
        bs58::encode(data).into_string()
    }

    /// Decode an address of any network prefix; returns the key and prefix.
    pub fn from_ss58_any(address: &str) -> Result<(Self, u16), EncodingError> {
        let invalid = || EncodingError::InvalidAddress(address.to_string());
        let data = bs58::decode(address).into_vec().map_err(|_| invalid())?;

        let (prefix_len, prefix) = match data.first() {
            Some(b) if *b < 64 => (1, *b as u16),
            Some(b) if *b < 128 => {
                let second = *data.get(1).ok_or_else(invalid)?;
                let lower = (*b << 2) | (second >> 6);
                let upper = second & 0b0011_1111;
                (2, (lower as u16) | ((upper as u16) << 8))
            }
            _ => return Err(invalid()),
        };

        if data.len() != prefix_len + 32 + CHECKSUM_LEN {
            return Err(invalid());
        }
        let body_len = prefix_len + 32;
        let hash = checksum(&data[..body_len]);
        if data[body_len..] != hash[..CHECKSUM_LEN] {
            return Err(invalid());
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&data[prefix_len..body_len]);
        Ok((Self(key), prefix))
    }

    /// Decode an address of the exchange network.
    pub fn from_ss58(address: &str) -> Result<Self, EncodingError> {
        let (account, prefix) = Self::from_ss58_any(address)?;
        if prefix != SS58_PREFIX {
            return Err(EncodingError::InvalidAddress(address.to_string()));
        }
        Ok(account)
    }
}

fn checksum(data: &[u8]) -> Vec<u8> {
    let mut hasher = Blake2b512::new();
    hasher.update(CHECKSUM_PREAMBLE);
    hasher.update(data);
    hasher.finalize().to_vec()
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_ss58())
    }
}

impl FromStr for AccountId {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_ss58(s)
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_ss58())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_ss58(&s).map_err(serde::de::Error::custom)
    }
}
