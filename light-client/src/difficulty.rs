use chi_types::{AlgoHeader, PowAlgo, Target};

use crate::error::Result;

/// Number of per-algorithm difficulty records exported with each checkpoint:
/// enough lookback for the retarget computation to resume right after it.
pub const NUM_BLOCKS: usize = 24;

/// Callback handed to the difficulty engine: difficulty data of the last
/// block of `algo` at height `<= h`, or `None` if there is no such block.
pub type DifficultyLookup<'a> = dyn FnMut(PowAlgo, i64) -> Result<Option<AlgoHeader>> + 'a;

/// The external difficulty engine.
///
/// The store is agnostic of the retargeting rules; it only feeds the engine
/// per-algorithm lookback data (from pending in-memory blocks, the header
/// files, or checkpoint metadata) and compares the engine's target against
/// the bits each header claims.
pub trait TargetEngine: Send + Sync {
    /// Computes the expected target for a block of `algo` at `height`.
    fn get_target(
        &self,
        lookup: &mut DifficultyLookup<'_>,
        algo: PowAlgo,
        height: i64,
    ) -> Result<Target>;
}
