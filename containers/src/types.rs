use ethereum_types::H256;
use hex::FromHex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a single unit of ledger data (a block).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub H256);

impl BlockId {
    pub const LENGTH: usize = 32;

    pub fn from_bytes(bytes: [u8; Self::LENGTH]) -> Self {
        BlockId(H256::from(bytes))
    }

    /// Builds an id whose trailing eight bytes hold `value` (big endian).
    pub fn from_low_u64_be(value: u64) -> Self {
        BlockId(H256::from_low_u64_be(value))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<[u8; 32]> for BlockId {
    fn from(bytes: [u8; 32]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl FromStr for BlockId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes: [u8; 32] = <[u8; 32]>::from_hex(s)?;
        Ok(BlockId(H256::from(bytes)))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0.as_bytes()))
    }
}

/// Solidification view of a stored block as the ledger reports it.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMetadata {
    pub block_id: BlockId,
    pub parents: Vec<BlockId>,
    pub is_solid: bool,
}

impl BlockMetadata {
    pub fn new(block_id: BlockId, parents: Vec<BlockId>, is_solid: bool) -> Self {
        Self {
            block_id,
            parents,
            is_solid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_block_id_hex_round_trip() {
        let id = BlockId::from_low_u64_be(0xdead_beef);
        let encoded = id.to_string();

        assert_eq!(encoded.len(), 64);
        assert!(encoded.ends_with("deadbeef"));
        assert_eq!(encoded.parse::<BlockId>().unwrap(), id);
    }

    #[test]
    fn test_block_id_accepts_prefixed_hex() {
        let id = BlockId::from_low_u64_be(7);
        let prefixed = format!("0x{id}");

        assert_eq!(prefixed.parse::<BlockId>().unwrap(), id);
    }

    #[test]
    fn test_block_id_rejects_short_input() {
        assert!("abcd".parse::<BlockId>().is_err());
    }

    #[test]
    fn test_default_block_id_is_zero() {
        assert!(BlockId::default().is_zero());
        assert!(!BlockId::from_low_u64_be(1).is_zero());
    }
}
