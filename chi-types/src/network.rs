use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::H256;
use crate::powdata::PowAlgo;
use crate::u256::U256;
use crate::Work;

/// Number of headers in one difficulty retarget window / header chunk.
pub const CHUNK_SIZE: i64 = 2016;

/// Difficulty-relevant data of a single block: the fields the retarget
/// computation needs from the last blocks of an algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgoHeader {
    pub height: u32,
    pub timestamp: u32,
    pub bits: u32,
}

/// Trusted data for one completed 2016-header window.
///
/// Because difficulty retargets continuously per algorithm, a checkpoint
/// carries, in addition to the window's final hash and cumulative chainwork,
/// the difficulty data of the last blocks of each algorithm so retargeting
/// can resume right after the checkpoint without older headers on disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub hash: H256,
    #[serde(with = "serde_u256_hex")]
    pub chainwork: Work,
    /// Keyed by the decimal algorithm id; entries ascend by height.
    pub algo_headers: BTreeMap<String, Vec<AlgoHeader>>,
}

impl Checkpoint {
    pub fn algo_headers(&self, algo: PowAlgo) -> &[AlgoHeader] {
        self.algo_headers
            .get(&algo.id().to_string())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Read-only network parameters: genesis hash, testnet flag and the
/// checkpoint list.
#[derive(Clone, Debug)]
pub struct Params {
    pub genesis: H256,
    /// On testnet, expected targets are reported as zero and header
    /// verification stops after the structural checks; proof of work is
    /// effectively unverified beyond those.
    pub testnet: bool,
    pub checkpoints: Vec<Checkpoint>,
}

impl Params {
    pub fn mainnet() -> Self {
        Params {
            genesis: "e5062d76e5f50c42f493826ac9920b63a8def2626fd70a5cec707ec4a3c3c9f4"
                .parse()
                .expect("valid genesis hash"),
            testnet: false,
            checkpoints: Vec::new(),
        }
    }

    pub fn new(genesis: H256, testnet: bool, checkpoints: Vec<Checkpoint>) -> Self {
        Params {
            genesis,
            testnet,
            checkpoints,
        }
    }

    /// Height of the last checkpointed header, -1 with no checkpoints.
    pub fn max_checkpoint(&self) -> i64 {
        self.checkpoints.len() as i64 * CHUNK_SIZE - 1
    }
}

pub mod serde_u256_hex {
    use super::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_be_hex())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        U256::from_be_hex(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_checkpoint_without_checkpoints() {
        let params = Params::new(H256::ZERO, true, Vec::new());
        assert_eq!(params.max_checkpoint(), -1);
    }

    #[test]
    fn checkpoint_serde() {
        let json = serde_json::json!({
            "hash": "00000000839a8e6886ab5951d76f411475428afc90947ee320161bbf18eb6048",
            "chainwork": "0000000000000000000000000000000000000000000000000000000200020002",
            "algo_headers": {
                "1": [{"height": 2015, "timestamp": 1231469665, "bits": 486604799}],
                "2": []
            }
        });
        let cp: Checkpoint = serde_json::from_value(json).unwrap();
        assert_eq!(cp.chainwork, U256::from(0x2_0002_0002u64));
        assert_eq!(cp.algo_headers(PowAlgo::Sha256d).len(), 1);
        assert_eq!(cp.algo_headers(PowAlgo::Neoscrypt).len(), 0);
        let back = serde_json::to_value(&cp).unwrap();
        assert_eq!(
            back["chainwork"],
            "0000000000000000000000000000000000000000000000000000000200020002"
        );
    }
}
