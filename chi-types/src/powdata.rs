use crate::aux::AuxData;
use crate::error::Error;
use crate::hash::{double_sha256, H256};
use crate::header::Header;
use crate::u256::U256;
use crate::Work;

/// Mining algorithm of a block. The ids are consensus values and appear on
/// the wire and in checkpoint metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PowAlgo {
    Sha256d = 1,
    Neoscrypt = 2,
}

/// Bit set in the serialized algo byte when the proof is merge-mined.
pub const MERGE_MINE_FLAG: u8 = 0x80;

impl PowAlgo {
    pub fn from_id(id: u8) -> Result<Self, Error> {
        match id {
            1 => Ok(PowAlgo::Sha256d),
            2 => Ok(PowAlgo::Neoscrypt),
            other => Err(Error::UnknownAlgo(other)),
        }
    }

    #[must_use]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Log2 of the relative weight of one hash of this algorithm, used to
    /// balance aggregate hashrate between the algorithms when accumulating
    /// chainwork.
    #[must_use]
    pub fn log2_weight(self) -> u32 {
        match self {
            PowAlgo::Sha256d => 0,
            PowAlgo::Neoscrypt => 10,
        }
    }

    /// Hashes serialized header bytes with this algorithm's PoW function.
    pub fn pow_hash(self, data: &[u8]) -> H256 {
        match self {
            PowAlgo::Sha256d => double_sha256(data),
            PowAlgo::Neoscrypt => {
                let params = scrypt::Params::new(10, 1, 1, 32).expect("valid scrypt params");
                let mut output = [0u8; 32];
                scrypt::scrypt(data, data, &params, &mut output)
                    .expect("32-byte scrypt output");
                H256(output)
            }
        }
    }
}

/// The attached proof: either a standalone "fake header" that was mined
/// directly, or an AuxPoW proof from a merge-mined parent chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PowProof {
    Standalone(Header),
    MergeMined(AuxData),
}

/// Proof-of-work data carried next to the pure header.
///
/// The base form (`algo`, `bits`) is what ends up in the fixed-size disk
/// record; the proof only exists in the full wire form and is dropped after
/// verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PowData {
    pub algo: PowAlgo,
    pub bits: u32,
    pub proof: Option<PowProof>,
}

impl PowData {
    /// Length of the base serialization: algo byte plus compact bits.
    pub const BASE_SIZE: usize = 5;

    #[must_use]
    pub fn base(algo: PowAlgo, bits: u32) -> Self {
        PowData {
            algo,
            bits,
            proof: None,
        }
    }

    #[must_use]
    pub fn serialize_base(&self) -> [u8; Self::BASE_SIZE] {
        let mut out = [0u8; Self::BASE_SIZE];
        out[0] = self.algo.id();
        out[1..5].copy_from_slice(&self.bits.to_le_bytes());
        out
    }

    pub fn deserialize_base(data: &[u8], start: usize) -> Result<(Self, usize), Error> {
        let (algo, bits, pos) = read_algo_and_bits(data, start)?;
        Ok((PowData::base(algo.0, bits), pos))
    }

    /// Serializes the full wire form: flagged algo byte, bits, then either
    /// the fake header or the AuxPoW proof.
    pub fn serialize_full(&self, out: &mut Vec<u8>) -> Result<(), Error> {
        let proof = self
            .proof
            .as_ref()
            .ok_or_else(|| Error::InvalidPowData("full form requires a proof".into()))?;
        let flag = match proof {
            PowProof::Standalone(_) => 0,
            PowProof::MergeMined(_) => MERGE_MINE_FLAG,
        };
        out.push(self.algo.id() | flag);
        out.extend_from_slice(&self.bits.to_le_bytes());
        match proof {
            PowProof::Standalone(fake) => out.extend_from_slice(&fake.to_bytes()),
            PowProof::MergeMined(aux) => aux.serialize_into(out),
        }
        Ok(())
    }

    pub fn deserialize_full(data: &[u8], start: usize) -> Result<(Self, usize), Error> {
        let ((algo, merge_mined), bits, pos) = read_algo_and_bits(data, start)?;

        let (proof, end) = if merge_mined {
            let (aux, end) = AuxData::deserialize(data, pos)?;
            (PowProof::MergeMined(aux), end)
        } else {
            let fake_end = pos + Header::SIZE;
            if data.len() < fake_end {
                return Err(Error::Truncated(pos));
            }
            let fake = Header::from_bytes(&data[pos..fake_end])?;
            (PowProof::Standalone(fake), fake_end)
        };

        Ok((
            PowData {
                algo,
                bits,
                proof: Some(proof),
            },
            end,
        ))
    }

    /// Expected number of hashes represented by this block, weighted by
    /// algorithm.
    pub fn work(&self) -> Result<Work, Error> {
        let target = U256::from_compact(self.bits)?;
        Ok(target.inverse() << self.algo.log2_weight())
    }

    /// Verifies the proof of work against the hash of the block header it
    /// belongs to.
    pub fn verify(&self, block_hash: &H256) -> Result<(), Error> {
        let target = U256::from_compact(self.bits)?;
        match &self.proof {
            None => Err(Error::InvalidPowData("missing proof data".into())),
            Some(PowProof::Standalone(fake)) => {
                // The fake header commits to the actual block through its
                // merkle root.
                if fake.merkle_root != *block_hash {
                    return Err(Error::BadPow("fake header does not commit to block hash"));
                }
                let pow_hash = self.algo.pow_hash(&fake.to_bytes());
                if U256::from_le_bytes(&pow_hash.0) > target {
                    return Err(Error::BadPow("insufficient proof of work"));
                }
                Ok(())
            }
            Some(PowProof::MergeMined(aux)) => {
                if self.algo != PowAlgo::Sha256d {
                    return Err(Error::BadPow("merge mining is only allowed for sha256d"));
                }
                aux.verify(block_hash, target)
            }
        }
    }
}

type FlaggedAlgo = (PowAlgo, bool);

fn read_algo_and_bits(data: &[u8], start: usize) -> Result<(FlaggedAlgo, u32, usize), Error> {
    if data.len() < start + PowData::BASE_SIZE {
        return Err(Error::Truncated(start));
    }
    let raw = data[start];
    let algo = PowAlgo::from_id(raw & !MERGE_MINE_FLAG)?;
    let merge_mined = raw & MERGE_MINE_FLAG != 0;
    let bits = u32::from_le_bytes(data[start + 1..start + 5].try_into().expect("4 bytes"));
    Ok(((algo, merge_mined), bits, start + 5))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_header(merkle_root: H256) -> Header {
        Header {
            version: 1,
            prev_block_hash: H256::ZERO,
            merkle_root,
            timestamp: 1_231_469_665,
            bits: 0,
            nonce: 42,
        }
    }

    // Bitcoin mainnet block 1: its sha256d hash is below the 0x1d00ffff
    // target, which makes it a usable standalone proof.
    fn mined_fake_header() -> Header {
        Header {
            version: 1,
            prev_block_hash: "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
                .parse()
                .unwrap(),
            merkle_root: "0e3e2357e806b6cdb1f70b54c3a3a17b6714ee1f0e68bebb44a74b1efd512098"
                .parse()
                .unwrap(),
            timestamp: 1_231_469_665,
            bits: 486_604_799,
            nonce: 2_573_394_689,
        }
    }

    #[test]
    fn base_codec_round_trip() {
        let pow = PowData::base(PowAlgo::Neoscrypt, 0x1e03_ffff);
        let bytes = pow.serialize_base();
        let (back, pos) = PowData::deserialize_base(&bytes, 0).unwrap();
        assert_eq!(pos, PowData::BASE_SIZE);
        assert_eq!(back, pow);
    }

    #[test]
    fn base_codec_masks_merge_mine_flag() {
        let mut bytes = PowData::base(PowAlgo::Sha256d, 0x0300_8000).serialize_base();
        bytes[0] |= MERGE_MINE_FLAG;
        let (back, _) = PowData::deserialize_base(&bytes, 0).unwrap();
        assert_eq!(back.algo, PowAlgo::Sha256d);
    }

    #[test]
    fn full_codec_standalone_round_trip() {
        let pow = PowData {
            algo: PowAlgo::Sha256d,
            bits: 0x1d00_ffff,
            proof: Some(PowProof::Standalone(fake_header(H256::ZERO))),
        };
        let mut bytes = Vec::new();
        pow.serialize_full(&mut bytes).unwrap();
        assert_eq!(bytes.len(), PowData::BASE_SIZE + Header::SIZE);
        let (back, end) = PowData::deserialize_full(&bytes, 0).unwrap();
        assert_eq!(end, bytes.len());
        assert_eq!(back, pow);
    }

    #[test]
    fn unknown_algo_rejected() {
        let bytes = [9u8, 0, 0, 0, 0];
        assert!(matches!(
            PowData::deserialize_base(&bytes, 0),
            Err(Error::UnknownAlgo(9))
        ));
    }

    #[test]
    fn verify_standalone_accepts_real_work() {
        let fake = mined_fake_header();
        let block_hash = fake.merkle_root;
        let pow = PowData {
            algo: PowAlgo::Sha256d,
            bits: 0x1d00_ffff,
            proof: Some(PowProof::Standalone(fake)),
        };
        pow.verify(&block_hash).unwrap();
    }

    #[test]
    fn verify_standalone_rejects_wrong_commitment() {
        let fake = mined_fake_header();
        let pow = PowData {
            algo: PowAlgo::Sha256d,
            bits: 0x1d00_ffff,
            proof: Some(PowProof::Standalone(fake)),
        };
        let err = pow.verify(&H256::ZERO).unwrap_err();
        assert!(err.to_string().contains("commit"));
    }

    #[test]
    fn verify_standalone_rejects_weak_work() {
        let fake = mined_fake_header();
        let block_hash = fake.merkle_root;
        let pow = PowData {
            algo: PowAlgo::Sha256d,
            // Far below the hash of block 1.
            bits: 0x0300_8000,
            proof: Some(PowProof::Standalone(fake)),
        };
        let err = pow.verify(&block_hash).unwrap_err();
        assert!(err.to_string().contains("insufficient"));
    }

    #[test]
    fn verify_requires_a_proof() {
        let proofless = PowData::base(PowAlgo::Neoscrypt, 0x1d00_ffff);
        assert!(proofless.verify(&H256::ZERO).is_err());
    }

    #[test]
    fn weighted_work() {
        let sha = PowData::base(PowAlgo::Sha256d, 0x1d00_ffff);
        let neo = PowData::base(PowAlgo::Neoscrypt, 0x1d00_ffff);
        assert_eq!(
            neo.work().unwrap(),
            sha.work().unwrap() << PowAlgo::Neoscrypt.log2_weight()
        );
    }
}
