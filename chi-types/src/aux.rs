use bitcoin::consensus;
use bitcoin::hashes::Hash;
use bitcoin::Transaction;

use crate::error::Error;
use crate::hash::{double_sha256, H256};
use crate::header::Header;
use crate::merkle;
use crate::u256::U256;

/// AuxPoW proof: evidence that the block was merge-mined inside a parent
/// chain's block.
///
/// Wire layout follows the classic auxpow serialization: coinbase
/// transaction, parent block hash, coinbase merkle branch, chain merkle
/// branch, parent block header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuxData {
    /// Raw serialized coinbase transaction of the parent block.
    pub coinbase_tx: Vec<u8>,
    /// Hash of the parent block; present on the wire but not used for
    /// verification (the parent header is hashed directly).
    pub parent_hash: H256,
    pub coinbase_merkle: Vec<H256>,
    pub coinbase_index: u32,
    pub chain_merkle: Vec<H256>,
    pub chain_index: u32,
    pub parent_block: Header,
}

impl AuxData {
    pub fn deserialize(data: &[u8], start: usize) -> Result<(Self, usize), Error> {
        if start >= data.len() {
            return Err(Error::Truncated(start));
        }
        let (_, tx_len) = consensus::deserialize_partial::<Transaction>(&data[start..])?;
        let coinbase_tx = data[start..start + tx_len].to_vec();
        let mut pos = start + tx_len;

        let parent_hash = take_hash(data, &mut pos)?;
        let (coinbase_merkle, coinbase_index) = read_branch(data, &mut pos)?;
        let (chain_merkle, chain_index) = read_branch(data, &mut pos)?;

        if data.len() < pos + Header::SIZE {
            return Err(Error::Truncated(pos));
        }
        let parent_block = Header::from_bytes(&data[pos..pos + Header::SIZE])?;
        pos += Header::SIZE;

        Ok((
            AuxData {
                coinbase_tx,
                parent_hash,
                coinbase_merkle,
                coinbase_index,
                chain_merkle,
                chain_index,
                parent_block,
            },
            pos,
        ))
    }

    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.coinbase_tx);
        out.extend_from_slice(&self.parent_hash.0);
        write_branch(out, &self.coinbase_merkle, self.coinbase_index);
        write_branch(out, &self.chain_merkle, self.chain_index);
        out.extend_from_slice(&self.parent_block.to_bytes());
    }

    pub fn coinbase_tx(&self) -> Result<Transaction, Error> {
        Ok(consensus::deserialize(&self.coinbase_tx)?)
    }

    /// Verifies the merge-mined proof for a block with the given hash
    /// against the decoded target.
    pub fn verify(&self, block_hash: &H256, target: U256) -> Result<(), Error> {
        let coinbase = self.coinbase_tx()?;
        let coinbase_txid = H256::from(coinbase.compute_txid().to_raw_hash().to_byte_array());

        if merkle::compute_root_from_proof(
            coinbase_txid,
            self.coinbase_index as usize,
            &self.coinbase_merkle,
        ) != self.parent_block.merkle_root
        {
            return Err(Error::BadPow("coinbase is not in the parent block"));
        }

        let chain_root = merkle::compute_root_from_proof(
            *block_hash,
            self.chain_index as usize,
            &self.chain_merkle,
        );
        let script_sig = &coinbase
            .input
            .first()
            .ok_or_else(|| Error::InvalidPowData("coinbase has no inputs".into()))?
            .script_sig;
        if !script_sig.to_hex_string().contains(&chain_root.to_string()) {
            return Err(Error::BadPow("coinbase does not commit to the chain merkle root"));
        }

        // Merge-mined proofs are always against a sha256d parent chain.
        let pow_hash = double_sha256(&self.parent_block.to_bytes());
        if U256::from_le_bytes(&pow_hash.0) > target {
            return Err(Error::BadPow("parent block has insufficient proof of work"));
        }
        Ok(())
    }
}

fn take_hash(data: &[u8], pos: &mut usize) -> Result<H256, Error> {
    if data.len() < *pos + 32 {
        return Err(Error::Truncated(*pos));
    }
    let hash = H256::try_from(&data[*pos..*pos + 32])?;
    *pos += 32;
    Ok(hash)
}

fn read_branch(data: &[u8], pos: &mut usize) -> Result<(Vec<H256>, u32), Error> {
    let count = read_compact_size(data, pos)?;
    let count = usize::try_from(count).map_err(|_| Error::Truncated(*pos))?;
    if data.len() < pos.saturating_add(count.saturating_mul(32)) {
        return Err(Error::Truncated(*pos));
    }
    let mut hashes = Vec::with_capacity(count);
    for _ in 0..count {
        hashes.push(take_hash(data, pos)?);
    }
    if data.len() < *pos + 4 {
        return Err(Error::Truncated(*pos));
    }
    let index = u32::from_le_bytes(data[*pos..*pos + 4].try_into().expect("4 bytes"));
    *pos += 4;
    Ok((hashes, index))
}

fn write_branch(out: &mut Vec<u8>, hashes: &[H256], index: u32) {
    write_compact_size(out, hashes.len() as u64);
    for hash in hashes {
        out.extend_from_slice(&hash.0);
    }
    out.extend_from_slice(&index.to_le_bytes());
}

fn read_compact_size(data: &[u8], pos: &mut usize) -> Result<u64, Error> {
    if data.len() <= *pos {
        return Err(Error::Truncated(*pos));
    }
    let first = data[*pos];
    *pos += 1;
    let (value, extra) = match first {
        0xff => {
            if data.len() < *pos + 8 {
                return Err(Error::Truncated(*pos));
            }
            (
                u64::from_le_bytes(data[*pos..*pos + 8].try_into().expect("8 bytes")),
                8,
            )
        }
        0xfe => {
            if data.len() < *pos + 4 {
                return Err(Error::Truncated(*pos));
            }
            (
                u64::from(u32::from_le_bytes(
                    data[*pos..*pos + 4].try_into().expect("4 bytes"),
                )),
                4,
            )
        }
        0xfd => {
            if data.len() < *pos + 2 {
                return Err(Error::Truncated(*pos));
            }
            (
                u64::from(u16::from_le_bytes(
                    data[*pos..*pos + 2].try_into().expect("2 bytes"),
                )),
                2,
            )
        }
        n => (u64::from(n), 0),
    };
    *pos += extra;
    Ok(value)
}

fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        out.push(n as u8);
    } else if n <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&n.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal one-input one-output transaction whose script_sig is the
    /// given bytes.
    fn coinbase_with_script(script: &[u8]) -> Vec<u8> {
        let mut tx = Vec::new();
        tx.extend_from_slice(&1u32.to_le_bytes()); // version
        tx.push(1); // input count
        tx.extend_from_slice(&[0u8; 32]); // prevout txid
        tx.extend_from_slice(&u32::MAX.to_le_bytes()); // prevout index
        tx.push(script.len() as u8);
        tx.extend_from_slice(script);
        tx.extend_from_slice(&u32::MAX.to_le_bytes()); // sequence
        tx.push(1); // output count
        tx.extend_from_slice(&0u64.to_le_bytes()); // value
        tx.push(0); // empty script_pubkey
        tx.extend_from_slice(&0u32.to_le_bytes()); // locktime
        tx
    }

    fn block_hash() -> H256 {
        "00000000839a8e6886ab5951d76f411475428afc90947ee320161bbf18eb6048"
            .parse()
            .unwrap()
    }

    fn sample_aux() -> AuxData {
        // With empty branches, the chain merkle root is the block hash
        // itself, which the coinbase script embeds in display order.
        let script = hex::decode(block_hash().to_string()).unwrap();
        let coinbase_tx = coinbase_with_script(&script);
        let coinbase_txid = double_sha256(&coinbase_tx);

        let parent_block = Header {
            version: 1,
            prev_block_hash: H256::ZERO,
            // With an empty coinbase branch, the merkle root is the
            // coinbase txid.
            merkle_root: coinbase_txid,
            timestamp: 1_231_469_665,
            bits: 0x1d00_ffff,
            nonce: 7,
        };
        let parent_hash = parent_block.block_hash();

        AuxData {
            coinbase_tx,
            parent_hash,
            coinbase_merkle: Vec::new(),
            coinbase_index: 0,
            chain_merkle: Vec::new(),
            chain_index: 0,
            parent_block,
        }
    }

    #[test]
    fn wire_round_trip() {
        let aux = sample_aux();
        let mut bytes = Vec::new();
        aux.serialize_into(&mut bytes);
        let (back, end) = AuxData::deserialize(&bytes, 0).unwrap();
        assert_eq!(end, bytes.len());
        assert_eq!(back, aux);
    }

    #[test]
    fn verify_accepts_valid_proof() {
        let aux = sample_aux();
        aux.verify(&block_hash(), U256::MAX).unwrap();
    }

    #[test]
    fn verify_rejects_wrong_parent_merkle_root() {
        let mut aux = sample_aux();
        aux.parent_block.merkle_root = H256::ZERO;
        let err = aux.verify(&block_hash(), U256::MAX).unwrap_err();
        assert!(err.to_string().contains("parent block"));
    }

    #[test]
    fn verify_rejects_missing_chain_commitment() {
        let aux = sample_aux();
        // A different block hash is not embedded in the coinbase script.
        let other = double_sha256(b"other block");
        let err = aux.verify(&other, U256::MAX).unwrap_err();
        assert!(err.to_string().contains("chain merkle root"));
    }

    #[test]
    fn verify_rejects_weak_parent_pow() {
        let aux = sample_aux();
        let err = aux
            .verify(&block_hash(), U256::from(0x8000u32))
            .unwrap_err();
        assert!(err.to_string().contains("insufficient"));
    }

    #[test]
    fn compact_size_round_trip() {
        for n in [0u64, 0xfc, 0xfd, 0xffff, 0x1_0000, 0x1_0000_0000] {
            let mut out = Vec::new();
            write_compact_size(&mut out, n);
            let mut pos = 0;
            assert_eq!(read_compact_size(&out, &mut pos).unwrap(), n);
            assert_eq!(pos, out.len());
        }
    }
}
