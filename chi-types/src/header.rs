use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::hash::{double_sha256, H256};
use crate::network::Params;
use crate::powdata::PowData;
use crate::u256::U256;
use crate::Work;

/// Serialized length of the pure header fields (version, prev_blockhash,
/// merkle_root, timestamp, bits, nonce).
pub const PURE_HEADER_SIZE: usize = 4 + 32 + 32 + 4 + 4 + 4; // 80

/// Fixed length of one on-disk record: pure header, base powdata and the
/// cumulative chainwork.
pub const DISK_HEADER_SIZE: usize = PURE_HEADER_SIZE + PowData::BASE_SIZE + 32; // 117

/// The pure 80-byte block header, Bitcoin wire compatible.
///
/// On this chain the pure header's `bits` field is zero by consensus; the
/// real difficulty lives in the powdata attached alongside.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub prev_block_hash: H256,
    pub merkle_root: H256,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl Header {
    pub const SIZE: usize = PURE_HEADER_SIZE;

    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.prev_block_hash.0);
        out[36..68].copy_from_slice(&self.merkle_root.0);
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() != Self::SIZE {
            return Err(Error::InvalidLength(data.len()));
        }

        Ok(Header {
            version: u32::from_le_bytes(data[0..4].try_into().expect("4 bytes")),
            prev_block_hash: H256::try_from(&data[4..36])?,
            merkle_root: H256::try_from(&data[36..68])?,
            timestamp: u32::from_le_bytes(data[68..72].try_into().expect("4 bytes")),
            bits: u32::from_le_bytes(data[72..76].try_into().expect("4 bytes")),
            nonce: u32::from_le_bytes(data[76..80].try_into().expect("4 bytes")),
        })
    }

    #[must_use]
    pub fn block_hash(&self) -> H256 {
        double_sha256(&self.to_bytes())
    }
}

/// A header together with its powdata, height and cumulative chainwork,
/// which is what the store keeps per block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedHeader {
    pub header: Header,
    pub pow: PowData,
    pub block_height: u32,
    pub chainwork: Work,
}

impl ExtendedHeader {
    #[must_use]
    pub fn block_hash(&self) -> H256 {
        self.header.block_hash()
    }

    /// Serializes the fixed-size disk record: pure header, base powdata and
    /// the chainwork as 32 big-endian bytes. The AuxPoW proof, if any, is
    /// not stored; it has been verified at ingest and can be dropped.
    #[must_use]
    pub fn serialize_disk(&self) -> [u8; DISK_HEADER_SIZE] {
        let mut out = [0u8; DISK_HEADER_SIZE];
        out[..PURE_HEADER_SIZE].copy_from_slice(&self.header.to_bytes());
        out[PURE_HEADER_SIZE..PURE_HEADER_SIZE + PowData::BASE_SIZE]
            .copy_from_slice(&self.pow.serialize_base());
        out[PURE_HEADER_SIZE + PowData::BASE_SIZE..]
            .copy_from_slice(&self.chainwork.to_be_bytes());
        out
    }

    pub fn deserialize_disk(data: &[u8], height: u32) -> Result<Self, Error> {
        if data.len() != DISK_HEADER_SIZE {
            return Err(Error::InvalidLength(data.len()));
        }

        let header = Header::from_bytes(&data[..PURE_HEADER_SIZE])?;
        let (pow, pos) = PowData::deserialize_base(data, PURE_HEADER_SIZE)?;

        let work_bytes: [u8; 32] = data[pos..pos + 32].try_into().expect("32 bytes");
        let chainwork = U256::from_be_bytes(&work_bytes);

        Ok(ExtendedHeader {
            header,
            pow,
            block_height: height,
            chainwork,
        })
    }

    /// Deserializes a full header which may include AuxPoW, starting at
    /// `start`. Headers covered by a checkpoint (and the genesis header when
    /// no checkpoints are configured) carry only the base powdata; everything
    /// above carries the full proof.
    ///
    /// Returns the header and the end position. Unless `expect_trailing` is
    /// set, all input bytes must be consumed.
    pub fn deserialize_full(
        data: &[u8],
        height: u32,
        expect_trailing: bool,
        start: usize,
        params: &Params,
    ) -> Result<(Self, usize), Error> {
        let pure_end = start + PURE_HEADER_SIZE;
        if data.len() < pure_end {
            return Err(Error::Truncated(start));
        }
        let header = Header::from_bytes(&data[start..pure_end])?;

        let base_only = (height == 0 && params.checkpoints.is_empty())
            || i64::from(height) <= params.max_checkpoint();
        let (pow, end) = if base_only {
            PowData::deserialize_base(data, pure_end)?
        } else {
            PowData::deserialize_full(data, pure_end)?
        };

        if !expect_trailing && end != data.len() {
            return Err(Error::TrailingData);
        }

        let extended = ExtendedHeader {
            header,
            pow,
            block_height: height,
            chainwork: Work::ZERO,
        };
        Ok((extended, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::H256;
    use crate::powdata::{PowAlgo, PowData};

    // Bitcoin mainnet block 685440, reused as a pure-codec vector.
    const HEADER_HEX: &str = "04e0ff2f1d761d390c19df86dc01f970c0f53663171a75288c2406000000000000000000245470d64414a15c7333cae23c3fa9caa92cb4490f61a6a215660e09aa134e53f1e7b2607b5f0d1792aed66f";

    fn sample_header() -> Header {
        Header::from_bytes(&hex::decode(HEADER_HEX).unwrap()).unwrap()
    }

    #[test]
    fn pure_codec_round_trip() {
        let header = sample_header();
        assert_eq!(header.version, 0x2fff_e004);
        assert_eq!(
            header.prev_block_hash.to_string(),
            "00000000000000000006248c28751a176336f5c070f901dc86df190c391d761d"
        );
        assert_eq!(header.timestamp, 1_622_337_521);
        assert_eq!(hex::encode(header.to_bytes()), HEADER_HEX);
    }

    #[test]
    fn block_hash_matches_known_value() {
        assert_eq!(
            sample_header().block_hash().to_string(),
            "000000000000000000016f0484972d135afba541c837d0c07c1530ffeee293cd"
        );
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            Header::from_bytes(&[0u8; 79]),
            Err(Error::InvalidLength(79))
        ));
        assert!(matches!(
            ExtendedHeader::deserialize_disk(&[0u8; 116], 7),
            Err(Error::InvalidLength(116))
        ));
    }

    #[test]
    fn disk_codec_round_trip() {
        let extended = ExtendedHeader {
            header: sample_header(),
            pow: PowData::base(PowAlgo::Neoscrypt, 0x1e03_ffff),
            block_height: 123,
            chainwork: U256::new(5, 77),
        };
        let bytes = extended.serialize_disk();
        assert_eq!(bytes.len(), DISK_HEADER_SIZE);
        let back = ExtendedHeader::deserialize_disk(&bytes, 123).unwrap();
        assert_eq!(back, extended);
    }

    #[test]
    fn full_codec_base_region() {
        // With no checkpoints, only the genesis header uses the base form.
        let params = Params::new(H256::ZERO, false, Vec::new());
        let extended = ExtendedHeader {
            header: sample_header(),
            pow: PowData::base(PowAlgo::Sha256d, 0x1d00_ffff),
            block_height: 0,
            chainwork: Work::ZERO,
        };
        let mut data = extended.header.to_bytes().to_vec();
        data.extend_from_slice(&extended.pow.serialize_base());

        let (back, end) =
            ExtendedHeader::deserialize_full(&data, 0, false, 0, &params).unwrap();
        assert_eq!(end, data.len());
        assert_eq!(back, extended);

        // At height 1 the same bytes are short: a full proof is expected.
        assert!(ExtendedHeader::deserialize_full(&data, 1, false, 0, &params).is_err());
    }
}
