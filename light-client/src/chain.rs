use std::cmp;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;
use parking_lot::Mutex;

use chi_types::{
    AlgoHeader, Checkpoint, ExtendedHeader, Header, PowAlgo, Target, Work, CHUNK_SIZE,
    DISK_HEADER_SIZE, H256, PURE_HEADER_SIZE,
};

use crate::config::Config;
use crate::difficulty::NUM_BLOCKS;
use crate::error::{Error, Result};
use crate::file::HeaderFile;

/// The registry map shared by all chains of one store: forkpoint hash to
/// chain. Guarded by its own lock, which is always taken after a chain's
/// own lock.
pub(crate) type ChainMap = Mutex<HashMap<H256, Arc<Blockchain>>>;

const RECORD: u64 = DISK_HEADER_SIZE as u64;

/// A tip is considered stale when its timestamp is this far in the past.
const STALE_DELAY_SECS: u64 = 8 * 60 * 60;

pub(crate) fn best_chain(chains: &ChainMap, cfg: &Config) -> Arc<Blockchain> {
    chains
        .lock()
        .get(&cfg.net.genesis)
        .expect("best chain is always registered")
        .clone()
}

/// Mutable identity of a chain. The fields describe the *data* the chain
/// holds, not the file it sits on: a reorg swaps these between two chain
/// objects while the files are renamed underneath.
struct ChainState {
    /// Height of the first header this chain owns.
    forkpoint: i64,
    /// Block hash at the forkpoint; doubles as the chain's registry id.
    forkpoint_hash: H256,
    /// Block hash at forkpoint - 1; `None` only for the best chain.
    prev_hash: Option<H256>,
    /// Chain this one branches off; `None` only for the best chain.
    parent: Option<Arc<Blockchain>>,
    /// Cached number of records in the backing file.
    size: i64,
}

/// One chain of headers backed by a fixed-record file.
///
/// The best chain is anchored at genesis and owns `blockchain_headers`;
/// every other chain is a fork that owns a `forks/fork2_*` file and
/// delegates reads below its forkpoint to its parent.
///
/// Lock order is uniform across the store: a chain's own lock first, then
/// the registry lock, then (only inside the swap) ancestor and sibling
/// locks.
pub struct Blockchain {
    cfg: Arc<Config>,
    chains: Arc<ChainMap>,
    state: Mutex<ChainState>,
}

impl Blockchain {
    pub(crate) fn new(
        cfg: Arc<Config>,
        chains: Arc<ChainMap>,
        forkpoint: i64,
        parent: Option<Arc<Blockchain>>,
        forkpoint_hash: H256,
        prev_hash: Option<H256>,
    ) -> Result<Arc<Self>> {
        assert!(
            !(0 < forkpoint && forkpoint <= cfg.net.max_checkpoint()),
            "cannot fork below the last checkpoint, forkpoint: {forkpoint}"
        );
        let chain = Arc::new(Blockchain {
            cfg,
            chains,
            state: Mutex::new(ChainState {
                forkpoint,
                forkpoint_hash,
                prev_hash,
                parent,
                size: 0,
            }),
        });
        chain.update_size()?;
        Ok(chain)
    }

    /// The chain's registry id: its forkpoint hash.
    pub fn get_id(&self) -> H256 {
        self.state.lock().forkpoint_hash
    }

    pub fn forkpoint(&self) -> i64 {
        self.state.lock().forkpoint
    }

    pub fn prev_hash(&self) -> Option<H256> {
        self.state.lock().prev_hash
    }

    pub fn parent(&self) -> Option<Arc<Blockchain>> {
        self.state.lock().parent.clone()
    }

    pub fn size(&self) -> i64 {
        self.state.lock().size
    }

    pub fn height(&self) -> i64 {
        let state = self.state.lock();
        self.height_locked(&state)
    }

    /// Current on-disk location. Never cache this: it changes when files
    /// swap identities during a reorg.
    pub fn path(&self) -> PathBuf {
        let state = self.state.lock();
        self.path_locked(&state)
    }

    pub fn update_size(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.update_size_locked(&mut state)
    }

    fn height_locked(&self, state: &ChainState) -> i64 {
        state.forkpoint + state.size - 1
    }

    fn path_locked(&self, state: &ChainState) -> PathBuf {
        if state.parent.is_none() {
            return self.cfg.headers_dir().join("blockchain_headers");
        }
        assert!(state.forkpoint > 0, "fork at non-positive forkpoint");
        let prev_hash = state
            .prev_hash
            .expect("fork chains always know their prev hash")
            .to_string();
        let first_hash = state.forkpoint_hash.to_string();
        let basename = format!(
            "fork2_{}_{}_{}",
            state.forkpoint,
            prev_hash.trim_start_matches('0'),
            first_hash.trim_start_matches('0'),
        );
        self.cfg.forks_dir().join(basename)
    }

    fn file_locked(&self, state: &ChainState) -> HeaderFile {
        HeaderFile::new(self.path_locked(state), self.cfg.headers_dir().to_path_buf())
    }

    fn update_size_locked(&self, state: &mut ChainState) -> Result<()> {
        state.size = self.file_locked(state).size()? as i64;
        Ok(())
    }

    // --- read path ---

    pub fn read_header(&self, height: i64) -> Result<Option<ExtendedHeader>> {
        let state = self.state.lock();
        self.read_header_locked(&state, height)
    }

    fn read_header_locked(&self, state: &ChainState, height: i64) -> Result<Option<ExtendedHeader>> {
        if height < 0 {
            return Ok(None);
        }
        if height < state.forkpoint {
            return match &state.parent {
                Some(parent) => parent.read_header(height),
                None => Ok(None),
            };
        }
        if height > self.height_locked(state) {
            return Ok(None);
        }
        let delta = (height - state.forkpoint) as u64;
        match self.file_locked(state).read_record(delta)? {
            None => Ok(None),
            Some(record) => Ok(Some(ExtendedHeader::deserialize_disk(&record, height as u32)?)),
        }
    }

    /// Block hash at the given height. Heights covered by a checkpoint
    /// boundary come straight from the checkpoint metadata, without file
    /// I/O.
    pub fn get_hash(&self, height: i64) -> Result<H256> {
        let state = self.state.lock();
        self.get_hash_locked(&state, height)
    }

    fn get_hash_locked(&self, state: &ChainState, height: i64) -> Result<H256> {
        if height == -1 {
            return Ok(H256::ZERO);
        }
        if height == 0 {
            return Ok(self.cfg.net.genesis);
        }
        let at_chunk_boundary = (height + 1) % CHUNK_SIZE == 0;
        if height <= self.cfg.net.max_checkpoint() && at_chunk_boundary {
            let index = (height / CHUNK_SIZE) as usize;
            return Ok(self.cfg.net.checkpoints[index].hash);
        }
        match self.read_header_locked(state, height)? {
            Some(header) => Ok(header.block_hash()),
            None => Err(Error::MissingHeader(height)),
        }
    }

    /// Cumulative chainwork at the given height, falling back to checkpoint
    /// metadata for unstored heights at window boundaries.
    pub fn get_chainwork(&self, height: i64) -> Result<Work> {
        let state = self.state.lock();
        self.get_chainwork_locked(&state, height)
    }

    /// Chainwork at the tip (or at height 0 for an empty chain).
    pub fn total_chainwork(&self) -> Result<Work> {
        let state = self.state.lock();
        let height = cmp::max(0, self.height_locked(&state));
        self.get_chainwork_locked(&state, height)
    }

    fn get_chainwork_locked(&self, state: &ChainState, height: i64) -> Result<Work> {
        if height == -1 {
            return Ok(Work::ZERO);
        }
        if let Some(header) = self.read_header_locked(state, height)? {
            return Ok(header.chainwork);
        }
        if height <= self.cfg.net.max_checkpoint() {
            let index = height / CHUNK_SIZE;
            if height == (index + 1) * CHUNK_SIZE - 1 {
                return Ok(self.cfg.net.checkpoints[index as usize].chainwork);
            }
        }
        Err(Error::MissingHeader(height))
    }

    pub fn check_hash(&self, height: i64, header_hash: &H256) -> bool {
        match self.get_hash(height) {
            Ok(hash) => hash == *header_hash,
            Err(_) => false,
        }
    }

    pub fn check_header(&self, header: &ExtendedHeader) -> bool {
        self.check_hash(i64::from(header.block_height), &header.block_hash())
    }

    // --- verification ---

    /// Verifies a single header against its expected predecessor hash and
    /// difficulty target, in consensus order: optional known-hash check,
    /// previous hash, the zero-bits rule of the pure header, then (except on
    /// testnet) the powdata bits and the AuxPoW / standalone proof. Proofs
    /// covered by a checkpoint are not re-verified.
    pub fn verify_header(
        &self,
        header: &ExtendedHeader,
        prev_hash: &H256,
        target: Target,
        expected_header_hash: Option<&H256>,
        skip_auxpow: bool,
    ) -> Result<()> {
        let hash = header.block_hash();
        if let Some(expected) = expected_header_hash {
            if *expected != hash {
                return Err(Error::Verification(format!(
                    "hash mismatches with expected: {expected} vs {hash}"
                )));
            }
        }
        if *prev_hash != header.header.prev_block_hash {
            return Err(Error::Verification(format!(
                "prev hash mismatch: {} vs {}",
                prev_hash, header.header.prev_block_hash
            )));
        }
        if header.header.bits != 0 {
            return Err(Error::Verification(format!(
                "main header has non-zero bits: {:#x}",
                header.header.bits
            )));
        }
        if self.cfg.net.testnet {
            return Ok(());
        }
        let bits = target.target_to_bits();
        if bits != header.pow.bits {
            return Err(Error::Verification(format!(
                "bits mismatch: {:#x} vs {:#x}",
                bits, header.pow.bits
            )));
        }

        let covered = i64::from(header.block_height) <= self.cfg.net.max_checkpoint();
        if !skip_auxpow && !covered {
            header
                .pow
                .verify(&hash)
                .map_err(|e| Error::Verification(e.to_string()))?;
        }
        Ok(())
    }

    /// Verifies a chunk of consecutive full headers and returns them in
    /// disk form, with the AuxPoW proofs stripped and cumulative chainwork
    /// attached.
    pub fn verify_chunk(&self, index: i64, data: &[u8]) -> Result<Vec<u8>> {
        let start_height = index * CHUNK_SIZE;
        let mut prev_hash = self.get_hash(start_height - 1)?;

        // Accumulated chainwork up to the previous block.
        let mut work = self.get_chainwork(start_height - 1)?;

        // Blocks of this chunk verified so far: later headers may need them
        // as difficulty lookback before they reach the file.
        let mut earlier_blocks: HashMap<i64, ExtendedHeader> = HashMap::new();

        let mut stripped = Vec::new();
        let mut position = 0usize;
        let mut i = 0i64;
        while position < data.len() {
            let height = start_height + i;
            let expected_header_hash = match self.get_hash(height) {
                Ok(hash) => Some(hash),
                Err(Error::MissingHeader(_)) => None,
                Err(e) => return Err(e),
            };

            let (mut header, next) =
                ExtendedHeader::deserialize_full(data, height as u32, true, position, &self.cfg.net)?;
            position = next;

            let target = self.get_expected_target(&header, &earlier_blocks)?;
            self.verify_header(&header, &prev_hash, target, expected_header_hash.as_ref(), false)?;
            prev_hash = header.block_hash();

            work = work
                .checked_add(header.pow.work()?)
                .ok_or_else(|| Error::Verification("chainwork overflow".into()))?;
            header.chainwork = work;
            stripped.extend_from_slice(&header.serialize_disk());

            earlier_blocks.insert(height, header);
            i += 1;
        }

        Ok(stripped)
    }

    // --- difficulty adapter ---

    /// Expected difficulty target for a header.
    ///
    /// `extra_blocks` maps heights to not-yet-persisted headers that take
    /// precedence over the file during lookback.
    pub fn get_expected_target(
        &self,
        header: &ExtendedHeader,
        extra_blocks: &HashMap<i64, ExtendedHeader>,
    ) -> Result<Target> {
        if self.cfg.net.testnet {
            return Ok(Target::ZERO);
        }
        let mut lookup =
            |algo: PowAlgo, height: i64| self.difficulty_data_for_block(algo, height, extra_blocks);
        self.cfg
            .engine
            .get_target(&mut lookup, header.pow.algo, i64::from(header.block_height))
    }

    /// Difficulty data (height, timestamp, bits) of the last block of the
    /// given algorithm at height `<= height`, consulting pending blocks,
    /// then the files, then checkpoint metadata. `None` if no such block
    /// exists at all.
    ///
    /// Written as a loop: the lookback distance can be large and this must
    /// not grow the stack.
    pub fn difficulty_data_for_block(
        &self,
        algo: PowAlgo,
        height: i64,
        extra_blocks: &HashMap<i64, ExtendedHeader>,
    ) -> Result<Option<AlgoHeader>> {
        let mut h = height;
        loop {
            if h < 0 {
                return Ok(None);
            }

            let header = match extra_blocks.get(&h) {
                Some(header) => Some(header.clone()),
                None => self.read_header(h)?,
            };

            if let Some(header) = header {
                if header.pow.algo == algo {
                    return Ok(Some(AlgoHeader {
                        height: h as u32,
                        timestamp: header.header.timestamp,
                        bits: header.pow.bits,
                    }));
                }
                h -= 1;
                continue;
            }

            // An absent header above the last checkpoint cannot happen
            // legitimately.
            if h > self.cfg.net.max_checkpoint() {
                return Err(Error::MissingHeader(h));
            }

            // Fall back to the per-algorithm records the checkpoint stores,
            // newest first.
            let checkpoint = &self.cfg.net.checkpoints[(h / CHUNK_SIZE) as usize];
            for record in checkpoint.algo_headers(algo).iter().rev() {
                if i64::from(record.height) <= h {
                    return Ok(Some(*record));
                }
            }

            return Err(Error::MissingHeader(h));
        }
    }

    // --- save path ---

    fn write_locked(
        &self,
        state: &mut ChainState,
        data: &[u8],
        offset: u64,
        truncate: bool,
    ) -> Result<()> {
        let file = self.file_locked(state);
        file.ensure_available()?;
        file.write(data, offset, truncate, state.size as u64 * RECORD)?;
        self.update_size_locked(state)
    }

    /// Persists a verified, disk-form chunk at its place in the file, then
    /// checks whether this chain overtook its parent.
    pub fn save_chunk(self: &Arc<Self>, index: i64, chunk: &[u8]) -> Result<()> {
        assert!(index >= 0, "negative chunk index: {index}");
        let chunk_within_checkpoint_region = index < self.cfg.net.checkpoints.len() as i64;
        {
            let mut state = self.state.lock();
            // Chunks in the checkpoint region belong to the main file.
            if chunk_within_checkpoint_region && state.parent.is_some() {
                drop(state);
                let best = best_chain(&self.chains, &self.cfg);
                return best.save_chunk(index, chunk);
            }

            let delta_height = index * CHUNK_SIZE - state.forkpoint;
            let mut delta_bytes = delta_height * DISK_HEADER_SIZE as i64;
            let mut data = chunk;
            // If this chunk straddles the forkpoint, the part before it is
            // the parent's responsibility.
            if delta_bytes < 0 {
                let skip = cmp::min((-delta_bytes) as usize, chunk.len());
                data = &chunk[skip..];
                delta_bytes = 0;
            }
            // Never truncate inside the preallocated checkpoint region: that
            // would destroy the sparse layout of other regions.
            let truncate = !chunk_within_checkpoint_region;
            self.write_locked(&mut state, data, delta_bytes as u64, truncate)?;
        }
        self.swap_with_parent()
    }

    /// Appends a single header at the tip, computing its cumulative
    /// chainwork, then checks for a swap.
    pub fn save_header(self: &Arc<Self>, header: &ExtendedHeader) -> Result<()> {
        {
            let mut state = self.state.lock();
            let height = i64::from(header.block_height);

            let mut record = header.clone();
            record.chainwork = self
                .get_chainwork_locked(&state, height - 1)?
                .checked_add(header.pow.work()?)
                .ok_or_else(|| Error::Verification("chainwork overflow".into()))?;

            let delta = height - state.forkpoint;
            // Headers are only ever appended to the end.
            assert_eq!(delta, state.size, "save_header is append-only");
            let data = record.serialize_disk();
            self.write_locked(&mut state, &data, delta as u64 * RECORD, true)?;
        }
        self.swap_with_parent()
    }

    /// Creates a new fork of `parent` whose first header is `header`.
    ///
    /// The header is validated against `parent` but `parent` itself is not
    /// required to be registered; callers hand in the chain they mean.
    pub fn fork(parent: &Arc<Blockchain>, header: &ExtendedHeader) -> Result<Arc<Blockchain>> {
        if !parent.can_connect(header, false, false) {
            return Err(Error::Verification(
                "forking header does not connect to parent chain".into(),
            ));
        }
        let forkpoint = i64::from(header.block_height);
        let prev_hash = parent.get_hash(forkpoint - 1)?;
        let chain = Blockchain::new(
            parent.cfg.clone(),
            parent.chains.clone(),
            forkpoint,
            Some(parent.clone()),
            header.block_hash(),
            Some(prev_hash),
        )?;
        {
            let parent_state = parent.state.lock();
            parent.file_locked(&parent_state).ensure_available()?;
        }
        {
            let state = chain.state.lock();
            chain.file_locked(&state).create_empty()?;
        }
        chain.save_header(header)?;
        // Register; save_header may already have done so through a swap,
        // in which case this re-inserts the same chain.
        let id = chain.get_id();
        chain.chains.lock().insert(id, chain.clone());
        Ok(chain)
    }

    /// Whether `header` extends this chain. Any internal failure (missing
    /// data, verification error, I/O) means "no".
    pub fn can_connect(&self, header: &ExtendedHeader, check_height: bool, skip_auxpow: bool) -> bool {
        let height = i64::from(header.block_height);
        if check_height && self.height() != height - 1 {
            return false;
        }
        if height == 0 {
            return header.block_hash() == self.cfg.net.genesis;
        }
        let prev_hash = match self.get_hash(height - 1) {
            Ok(hash) => hash,
            Err(_) => return false,
        };
        if prev_hash != header.header.prev_block_hash {
            return false;
        }
        let target = match self.get_expected_target(header, &HashMap::new()) {
            Ok(target) => target,
            Err(_) => return false,
        };
        self.verify_header(header, &prev_hash, target, None, skip_auxpow)
            .is_ok()
    }

    /// Verifies and persists one hex-encoded chunk of full headers.
    /// All failures are logged and reported as `false`.
    pub fn connect_chunk(self: &Arc<Self>, index: i64, hex_data: &str) -> bool {
        assert!(index >= 0, "negative chunk index: {index}");
        let result = hex::decode(hex_data)
            .map_err(Error::from)
            .and_then(|data| {
                // verify_chunk also strips the AuxPoW proofs
                let stripped = self.verify_chunk(index, &data)?;
                self.save_chunk(index, &stripped)
            });
        match result {
            Ok(()) => true,
            Err(e) => {
                info!(target: "chain", "verify_chunk index {index} failed: {e}");
                false
            }
        }
    }

    // --- reorg ---

    /// Swaps this chain with its parent for as long as it holds more
    /// chainwork, reparenting former siblings that now connect to it.
    pub fn swap_with_parent(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock();
        let mut chains = self.chains.lock();
        let mut count = 0usize;
        loop {
            let old_parent = match &state.parent {
                Some(parent) => parent.clone(),
                None => break,
            };
            if !self.swap_with_parent_once(&mut state, &mut chains)? {
                break;
            }
            count += 1;
            assert!(
                count <= chains.len(),
                "swapping fork with parent too many times: {count}"
            );
            // We might have become the parent of some of our former
            // siblings.
            let candidates: Vec<Arc<Blockchain>> = chains
                .values()
                .filter(|chain| !Arc::ptr_eq(chain, self))
                .cloned()
                .collect();
            for sibling in candidates {
                let (is_child, forkpoint, prev_hash) = {
                    let sibling_state = sibling.state.lock();
                    let is_child = sibling_state
                        .parent
                        .as_ref()
                        .map_or(false, |p| Arc::ptr_eq(p, &old_parent));
                    (is_child, sibling_state.forkpoint, sibling_state.prev_hash)
                };
                if !is_child {
                    continue;
                }
                let Some(prev_hash) = prev_hash else { continue };
                let connects = match self.get_hash_locked(&state, forkpoint - 1) {
                    Ok(hash) => hash == prev_hash,
                    Err(_) => false,
                };
                if connects {
                    sibling.state.lock().parent = Some(self.clone());
                }
            }
        }
        Ok(())
    }

    /// Performs one swap step if this chain became stronger than its
    /// parent. Both chains keep containing the same headers; their ids
    /// change and so they are stored in different files.
    fn swap_with_parent_once(
        self: &Arc<Self>,
        state: &mut ChainState,
        chains: &mut HashMap<H256, Arc<Blockchain>>,
    ) -> Result<bool> {
        let parent = match &state.parent {
            Some(parent) => parent.clone(),
            None => return Ok(false),
        };
        let tip = cmp::max(0, self.height_locked(state));
        let my_work = self.get_chainwork_locked(state, tip)?;
        if parent.total_chainwork()? >= my_work {
            return Ok(false);
        }

        let child_old_id = state.forkpoint_hash;
        let child_old_path = self.path_locked(state);
        let child_file = self.file_locked(state);
        child_file.ensure_available()?;
        let my_data = child_file.read_all()?;

        let mut parent_state = parent.state.lock();
        info!(
            target: "chain",
            "swapping {} {}",
            state.forkpoint,
            parent_state.forkpoint
        );
        assert!(
            state.forkpoint > parent_state.forkpoint,
            "forkpoint of parent chain ({}) should be at lower height than its child's ({})",
            parent_state.forkpoint,
            state.forkpoint
        );

        let parent_old_id = parent_state.forkpoint_hash;
        let parent_branch_size = parent.height_locked(&parent_state) - state.forkpoint + 1;
        let parent_file = parent.file_locked(&parent_state);
        parent_file.ensure_available()?;
        let offset = (state.forkpoint - parent_state.forkpoint) as u64 * RECORD;
        let parent_data =
            parent_file.read_range(offset, cmp::max(0, parent_branch_size) as u64 * RECORD)?;

        // The demoted chain's new first hash comes from the displaced
        // records about to move into its file.
        let displaced_first = Header::from_bytes(
            parent_data
                .get(..PURE_HEADER_SIZE)
                .ok_or_else(|| Error::Verification("displaced parent branch is empty".into()))?,
        )?
        .block_hash();

        // Exchange the file contents: the child file receives the parent's
        // displaced branch, the parent file receives the child's records.
        self.write_locked(state, &parent_data, 0, true)?;
        parent.write_locked(&mut parent_state, &my_data, offset, true)?;

        let grandparent = parent_state.parent.take();
        parent_state.parent = Some(self.clone());
        state.parent = grandparent;
        std::mem::swap(&mut state.forkpoint, &mut parent_state.forkpoint);
        state.forkpoint_hash = parent_old_id;
        parent_state.forkpoint_hash = displaced_first;
        std::mem::swap(&mut state.prev_hash, &mut parent_state.prev_hash);

        // The child takes the parent's on-disk name; the demoted chain
        // moves to a fresh fork filename.
        std::fs::rename(&child_old_path, parent.path_locked(&parent_state))?;
        self.update_size_locked(state)?;
        parent.update_size_locked(&mut parent_state)?;

        chains.remove(&child_old_id);
        chains.remove(&parent_old_id);
        chains.insert(state.forkpoint_hash, self.clone());
        chains.insert(parent_state.forkpoint_hash, parent.clone());
        Ok(true)
    }

    // --- registry-wide helpers ---

    pub fn get_direct_children(self: &Arc<Self>) -> Vec<Arc<Blockchain>> {
        let snapshot: Vec<Arc<Blockchain>> = self.chains.lock().values().cloned().collect();
        snapshot
            .into_iter()
            .filter(|chain| {
                !Arc::ptr_eq(chain, self)
                    && chain
                        .state
                        .lock()
                        .parent
                        .as_ref()
                        .map_or(false, |p| Arc::ptr_eq(p, self))
            })
            .collect()
    }

    pub fn get_max_child(self: &Arc<Self>) -> Option<i64> {
        self.get_direct_children()
            .iter()
            .map(|chain| chain.forkpoint())
            .max()
    }

    /// The max height where there is a fork related to this chain.
    pub fn get_max_forkpoint(self: &Arc<Self>) -> i64 {
        self.get_max_child().unwrap_or_else(|| self.forkpoint())
    }

    pub fn get_branch_size(self: &Arc<Self>) -> i64 {
        self.height() - self.get_max_forkpoint() + 1
    }

    /// Short display name: the hash at the max forkpoint, zeros stripped.
    pub fn get_name(self: &Arc<Self>) -> Result<String> {
        let hash = self.get_hash(self.get_max_forkpoint())?.to_string();
        Ok(hash.trim_start_matches('0').chars().take(10).collect())
    }

    /// Map from each chain on the way to the best chain (this one included)
    /// to the height of the last block shared with it.
    pub fn get_parent_heights(self: &Arc<Self>) -> Vec<(Arc<Blockchain>, i64)> {
        let mut result = vec![(self.clone(), self.height())];
        let mut chain = self.clone();
        while let Some(parent) = chain.parent() {
            result.push((parent.clone(), chain.forkpoint() - 1));
            chain = parent;
        }
        result
    }

    pub fn get_height_of_last_common_block_with_chain(
        self: &Arc<Self>,
        other_chain: &Arc<Blockchain>,
    ) -> i64 {
        let ours = self.get_parent_heights();
        let theirs = other_chain.get_parent_heights();
        let mut last_common = 0;
        for (chain, our_height) in &ours {
            if let Some((_, their_height)) =
                theirs.iter().find(|(theirs, _)| Arc::ptr_eq(theirs, chain))
            {
                last_common = cmp::max(last_common, cmp::min(*our_height, *their_height));
            }
        }
        last_common
    }

    // --- tip queries ---

    pub fn header_at_tip(&self) -> Result<Option<ExtendedHeader>> {
        let height = self.height();
        self.read_header(height)
    }

    /// True if there is no tip, or the tip's timestamp is older than eight
    /// hours. Only the latest header's timestamp is checked; consensus
    /// allows roughly two hours of clock leeway in either direction.
    pub fn is_tip_stale(&self) -> Result<bool> {
        let header = match self.header_at_tip()? {
            Some(header) => header,
            None => return Ok(true),
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(u64::from(header.header.timestamp) + STALE_DELAY_SECS < now)
    }

    // --- checkpoint export ---

    /// Produces checkpoint metadata for every completed 2016-header window:
    /// hash, chainwork, and the difficulty data of the last blocks of each
    /// algorithm, which the continuous retargeting needs as lookback.
    pub fn get_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let mut checkpoints = Vec::new();
        let windows = self.height() / CHUNK_SIZE;

        for index in 0..windows {
            let height = (index + 1) * CHUNK_SIZE - 1;
            let header = self
                .read_header(height)?
                .ok_or(Error::MissingHeader(height))?;

            let mut algo_headers = BTreeMap::new();
            for algo in [PowAlgo::Sha256d, PowAlgo::Neoscrypt] {
                let mut records = Vec::with_capacity(NUM_BLOCKS);
                let mut h = height;
                while records.len() < NUM_BLOCKS {
                    let record = self
                        .difficulty_data_for_block(algo, h, &HashMap::new())?
                        .ok_or(Error::MissingHeader(h))?;
                    h = i64::from(record.height) - 1;
                    records.push(record);
                }
                records.reverse();
                algo_headers.insert(algo.id().to_string(), records);
            }

            checkpoints.push(Checkpoint {
                hash: header.block_hash(),
                chainwork: header.chainwork,
                algo_headers,
            });
        }
        Ok(checkpoints)
    }
}
