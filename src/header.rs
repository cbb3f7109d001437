//! Block header decoding
//!
//! Header values are RLP lists in the Ethereum field order. The walker only
//! needs the parent pointer and the number, so decoding stops after the ninth
//! field and ignores the rest (post-London fields, extra data, seals).
//! A header's own hash is not stored; it is the keccak-256 of the encoded value.

use alloy_primitives::{keccak256, Address, Bloom, B256, U256};
use alloy_rlp::{Decodable, Header};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeaderDecodeError {
    #[error("header value is not an RLP list")]
    NotAList,

    #[error("header list claims {claimed} payload bytes but only {available} remain")]
    Truncated { claimed: usize, available: usize },

    #[error(transparent)]
    Rlp(#[from] alloy_rlp::Error),
}

/// The parts of a header the canonical walker relies on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderRecord {
    pub number: u64,
    pub parent_hash: B256,
    /// keccak-256 of the full encoded header
    pub hash: B256,
}

impl HeaderRecord {
    pub fn decode(encoded: &[u8]) -> Result<Self, HeaderDecodeError> {
        let mut buf = encoded;
        let list = Header::decode(&mut buf)?;
        if !list.list {
            return Err(HeaderDecodeError::NotAList);
        }
        if list.payload_length > buf.len() {
            return Err(HeaderDecodeError::Truncated {
                claimed: list.payload_length,
                available: buf.len(),
            });
        }

        // fields come from the list payload only, never from trailing bytes
        let mut fields = &buf[..list.payload_length];
        let parent_hash = B256::decode(&mut fields)?;
        let _ommers_hash = B256::decode(&mut fields)?;
        let _beneficiary = Address::decode(&mut fields)?;
        let _state_root = B256::decode(&mut fields)?;
        let _transactions_root = B256::decode(&mut fields)?;
        let _receipts_root = B256::decode(&mut fields)?;
        let _logs_bloom = Bloom::decode(&mut fields)?;
        let _difficulty = U256::decode(&mut fields)?;
        let number = u64::decode(&mut fields)?;

        Ok(Self {
            number,
            parent_hash,
            hash: keccak256(encoded),
        })
    }
}
