use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::abi::keccak256;
use crate::error::Error;

/// A 20-byte EVM account or contract address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    /// Parse a `0x`-prefixed (or bare) 40-character hex address.
    ///
    /// Mixed-case input is accepted without checksum verification.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        let hex_part = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        if hex_part.len() != 40 {
            return Err(Error::InvalidRequest(format!(
                "address must be 20 bytes of hex, got {s:?}"
            )));
        }
        let bytes = hex::decode(hex_part)
            .map_err(|e| Error::InvalidRequest(format!("invalid address {s:?}: {e}")))?;
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&bytes);
        Ok(Address(addr))
    }

    pub fn is_valid(s: &str) -> bool {
        Self::parse(s).is_ok()
    }

    /// Left-pad to the 32-byte word used for `bytes32` recipients.
    pub fn to_bytes32(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }

    /// Take the low 20 bytes of a 32-byte word.
    pub fn from_bytes32(word: &[u8; 32]) -> Self {
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&word[12..]);
        Address(addr)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// EIP-55 mixed-case checksum encoding.
    pub fn to_checksum(&self) -> String {
        let hex_addr = hex::encode(self.0);
        let hash = keccak256(hex_addr.as_bytes());

        let mut result = String::with_capacity(42);
        result.push_str("0x");
        for (i, c) in hex_addr.chars().enumerate() {
            let hash_nibble = if i % 2 == 0 {
                (hash[i / 2] >> 4) & 0x0f
            } else {
                hash[i / 2] & 0x0f
            };
            if hash_nibble >= 8 {
                result.push(c.to_ascii_uppercase());
            } else {
                result.push(c);
            }
        }
        result
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_eip55_checksum() {
        let addr = Address::parse("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        assert_eq!(addr.to_checksum(), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(Address::parse("not-an-address").is_err());
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("0xzz5aeb6053f3e94c9b9a09f33669435e7ef1beaed").is_err());
        assert!(Address::parse("").is_err());
    }

    #[test]
    fn test_bytes32_is_left_padded() {
        let addr = Address::parse("0x7a411471724e12Bd057652B1FF7c52c068e1C9b7").unwrap();
        let word = addr.to_bytes32();
        assert_eq!(&word[..12], &[0u8; 12]);
        assert_eq!(
            hex::encode(word),
            "0000000000000000000000007a411471724e12bd057652b1ff7c52c068e1c9b7"
        );
    }

    #[test]
    fn test_serde_uses_checksum_string() {
        let addr = Address::parse("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    proptest! {
        #[test]
        fn prop_bytes32_round_trip(bytes in any::<[u8; 20]>()) {
            let addr = Address(bytes);
            prop_assert_eq!(Address::from_bytes32(&addr.to_bytes32()), addr);
        }

        #[test]
        fn prop_checksum_parses_back(bytes in any::<[u8; 20]>()) {
            let addr = Address(bytes);
            prop_assert_eq!(Address::parse(&addr.to_checksum()).unwrap(), addr);
        }
    }
}
