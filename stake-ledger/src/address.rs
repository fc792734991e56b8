//! Bech32 address conversion

use crate::{Error, Result};
use bech32::{FromBase32, ToBase32, Variant};

/// Public key length of an account address
pub const PUBKEY_LEN: usize = 32;

/// Leading zero bytes that mark a smart contract address
const SC_ADDRESS_ZERO_PREFIX: usize = 8;

/// Encodes / decodes addresses under a fixed human-readable part
#[derive(Debug, Clone)]
pub struct AddressCodec {
    hrp: String,
}

impl AddressCodec {
    /// Codec for `hrp` (e.g. `erd`)
    pub fn new(hrp: impl Into<String>) -> Self {
        Self { hrp: hrp.into() }
    }

    /// Public key → bech32 address
    pub fn encode(&self, pubkey: &[u8]) -> Result<String> {
        if pubkey.len() != PUBKEY_LEN {
            return Err(Error::Decode(format!(
                "public key must be {} bytes, got {}",
                PUBKEY_LEN,
                pubkey.len()
            )));
        }
        bech32::encode(&self.hrp, pubkey.to_base32(), Variant::Bech32)
            .map_err(|e| Error::Decode(format!("bech32 encode: {}", e)))
    }

    /// Bech32 address → public key
    pub fn decode(&self, address: &str) -> Result<Vec<u8>> {
        let (hrp, data, _) = bech32::decode(address)
            .map_err(|e| Error::Decode(format!("bech32 decode {:?}: {}", address, e)))?;
        if hrp != self.hrp {
            return Err(Error::Decode(format!(
                "unexpected address prefix {:?} in {:?}",
                hrp, address
            )));
        }
        let pubkey = Vec::<u8>::from_base32(&data)
            .map_err(|e| Error::Decode(format!("bech32 payload {:?}: {}", address, e)))?;
        if pubkey.len() != PUBKEY_LEN {
            return Err(Error::Decode(format!(
                "address {:?} decodes to {} bytes",
                address,
                pubkey.len()
            )));
        }
        Ok(pubkey)
    }

    /// Whether `address` names a smart contract. Undecodable input is not a contract.
    pub fn is_smart_contract(&self, address: &str) -> bool {
        self.decode(address)
            .map(|pubkey| is_smart_contract_pubkey(&pubkey))
            .unwrap_or(false)
    }
}

/// Contract public keys start with eight zero bytes
pub fn is_smart_contract_pubkey(pubkey: &[u8]) -> bool {
    pubkey.len() >= SC_ADDRESS_ZERO_PREFIX
        && pubkey[..SC_ADDRESS_ZERO_PREFIX].iter().all(|b| *b == 0)
}
