use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// A 32-byte hash kept in wire byte order.
///
/// Block and transaction hashes are displayed big-endian, i.e. with the
/// bytes reversed relative to how they appear inside serialized headers.
/// `Display`/`FromStr` (and serde, which goes through them) use that
/// reversed 64-character lowercase hex form.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct H256(pub [u8; 32]);

impl H256 {
    /// The all-zero hash, used as the "previous block" of the genesis
    /// header and as the hash reported for height -1.
    pub const ZERO: H256 = H256([0u8; 32]);
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for H256 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidHash(e.to_string()))?;
        let mut arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidHash(format!("wrong length: {}", s.len())))?;
        arr.reverse();
        Ok(H256(arr))
    }
}

impl From<[u8; 32]> for H256 {
    fn from(bytes: [u8; 32]) -> Self {
        H256(bytes)
    }
}

impl TryFrom<&[u8]> for H256 {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Ok(H256(value
            .try_into()
            .map_err(|_| Error::InvalidLength(value.len()))?))
    }
}

impl Serialize for H256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for H256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct HexVisitor;

        impl<'de> Visitor<'de> for HexVisitor {
            type Value = H256;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a 64-character hex string")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                v.parse().map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}

pub fn double_sha256(input: &[u8]) -> H256 {
    H256(Sha256::digest(Sha256::digest(input)).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_reverses_wire_order() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        bytes[31] = 0x01;
        let hash = H256(bytes);
        let s = hash.to_string();
        assert!(s.starts_with("01"));
        assert!(s.ends_with("ab"));
        assert_eq!(s.parse::<H256>().unwrap(), hash);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("zz".repeat(32).parse::<H256>().is_err());
        assert!("ab".parse::<H256>().is_err());
    }

    #[test]
    fn double_sha256_empty() {
        // sha256d("") displayed big-endian
        assert_eq!(
            double_sha256(b"").to_string(),
            "56944c5d3f98413ef45cf54545538103cc9f298e0575820ad3591376e2e0f65d"
        );
    }
}
