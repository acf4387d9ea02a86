use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::info;
use parking_lot::Mutex;

use chi_types::{ExtendedHeader, Work, CHUNK_SIZE, DISK_HEADER_SIZE, H256};

use crate::chain::{best_chain, Blockchain, ChainMap};
use crate::config::Config;
use crate::error::Result;
use crate::file::HeaderFile;

/// Process-wide index of live chains, keyed by forkpoint hash. The chain
/// at some key is the best chain that includes the given hash.
#[derive(Clone)]
pub struct Registry {
    cfg: Arc<Config>,
    chains: Arc<ChainMap>,
}

/// Builds the registry from the on-disk state: the best chain from
/// `blockchain_headers`, then every valid `forks/fork2_*` file, deleting
/// anything inconsistent along the way.
pub fn read_blockchains(config: Config) -> Result<Registry> {
    let cfg = Arc::new(config);
    let chains: Arc<ChainMap> = Arc::new(Mutex::new(HashMap::new()));
    std::fs::create_dir_all(cfg.headers_dir())?;

    let best = Blockchain::new(cfg.clone(), chains.clone(), 0, None, cfg.net.genesis, None)?;
    chains.lock().insert(cfg.net.genesis, best.clone());
    let registry = Registry {
        cfg: cfg.clone(),
        chains,
    };

    // Consistency check: the first header past the checkpoint region must
    // connect to it, otherwise the whole file is untrustworthy.
    let max_checkpoint = cfg.net.max_checkpoint();
    if best.height() > max_checkpoint {
        let header_after = best.read_header(max_checkpoint + 1).unwrap_or(None);
        let connects = header_after
            .as_ref()
            .map_or(false, |header| best.can_connect(header, false, true));
        if !connects {
            info!(
                target: "chain",
                "deleting best chain, cannot connect header after last checkpoint"
            );
            std::fs::remove_file(best.path())?;
            best.update_size()?;
        }
    }

    let forks_dir = cfg.forks_dir();
    std::fs::create_dir_all(&forks_dir)?;

    // Files are named fork2_{forkpoint}_{prev_hash}_{first_hash}; anything
    // else (including names with an extension) is not ours.
    let mut fork_files: Vec<(i64, String)> = Vec::new();
    for entry in std::fs::read_dir(&forks_dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if !name.starts_with("fork2_") || name.contains('.') {
            continue;
        }
        match name.split('_').nth(1).and_then(|s| s.parse().ok()) {
            Some(forkpoint) => fork_files.push((forkpoint, name)),
            None => delete_fork_file(&forks_dir, &name, "malformed fork file name")?,
        }
    }
    // Ascending by forkpoint, so parents are always instantiated first.
    fork_files.sort();
    for (_, name) in fork_files {
        registry.instantiate_fork(&name)?;
    }

    registry.init_headers_file_for_best_chain()?;
    Ok(registry)
}

fn delete_fork_file(forks_dir: &Path, filename: &str, reason: &str) -> Result<()> {
    info!(target: "chain", "deleting chain {filename}: {reason}");
    std::fs::remove_file(forks_dir.join(filename))?;
    Ok(())
}

impl Registry {
    /// Loads one fork file, unlinking it on any inconsistency.
    fn instantiate_fork(&self, filename: &str) -> Result<()> {
        let forks_dir = self.cfg.forks_dir();
        let parts: Vec<&str> = filename.split('_').collect();
        if parts.len() != 4 {
            return delete_fork_file(&forks_dir, filename, "malformed fork file name");
        }
        let forkpoint: i64 = match parts[1].parse() {
            Ok(forkpoint) => forkpoint,
            Err(_) => return delete_fork_file(&forks_dir, filename, "malformed forkpoint"),
        };
        // The hashes are stored with leading zeros stripped.
        let prev_hash: H256 = match format!("{:0>64}", parts[2]).parse() {
            Ok(hash) => hash,
            Err(_) => return delete_fork_file(&forks_dir, filename, "malformed prev hash"),
        };
        let first_hash: H256 = match format!("{:0>64}", parts[3]).parse() {
            Ok(hash) => hash,
            Err(_) => return delete_fork_file(&forks_dir, filename, "malformed first hash"),
        };

        if forkpoint <= 0 || forkpoint <= self.cfg.net.max_checkpoint() {
            return delete_fork_file(&forks_dir, filename, "fork below max checkpoint");
        }

        let candidates: Vec<Arc<Blockchain>> = self.chains.lock().values().cloned().collect();
        let parent = match candidates
            .into_iter()
            .find(|chain| chain.check_hash(forkpoint - 1, &prev_hash))
        {
            Some(parent) => parent,
            None => return delete_fork_file(&forks_dir, filename, "cannot find parent for chain"),
        };

        let chain = Blockchain::new(
            self.cfg.clone(),
            self.chains.clone(),
            forkpoint,
            Some(parent.clone()),
            first_hash,
            Some(prev_hash),
        )?;

        // Consistency checks against the file content.
        let header = match chain.read_header(forkpoint).unwrap_or(None) {
            Some(header) => header,
            None => return delete_fork_file(&forks_dir, filename, "incorrect first hash for chain"),
        };
        if header.block_hash() != first_hash {
            return delete_fork_file(&forks_dir, filename, "incorrect first hash for chain");
        }
        if !parent.can_connect(&header, false, false) {
            return delete_fork_file(&forks_dir, filename, "cannot connect chain to parent");
        }

        self.chains.lock().insert(chain.get_id(), chain);
        Ok(())
    }

    /// Preallocates the best chain's file as a sparse region covering the
    /// whole checkpointed prefix, so chunks can land at their offsets in any
    /// order.
    pub fn init_headers_file_for_best_chain(&self) -> Result<()> {
        let best = self.get_best_chain();
        let length =
            DISK_HEADER_SIZE as u64 * CHUNK_SIZE as u64 * self.cfg.net.checkpoints.len() as u64;
        let file = HeaderFile::new(best.path(), self.cfg.headers_dir().to_path_buf());
        file.preallocate(length)?;
        best.update_size()
    }

    pub fn get_best_chain(&self) -> Arc<Blockchain> {
        best_chain(&self.chains, &self.cfg)
    }

    /// Snapshot of all live chains.
    pub fn chains(&self) -> Vec<Arc<Blockchain>> {
        self.chains.lock().values().cloned().collect()
    }

    pub fn get_chain(&self, id: &H256) -> Option<Arc<Blockchain>> {
        self.chains.lock().get(id).cloned()
    }

    /// Any chain that contains the header, or `None`.
    pub fn check_header(&self, header: &ExtendedHeader) -> Option<Arc<Blockchain>> {
        self.chains()
            .into_iter()
            .find(|chain| chain.check_header(header))
    }

    /// The chain whose tip directly links up with the header, or `None`.
    pub fn can_connect(&self, header: &ExtendedHeader) -> Option<Arc<Blockchain>> {
        self.chains()
            .into_iter()
            .find(|chain| chain.can_connect(header, true, false))
    }

    /// All chains that contain the given header, strongest chain first.
    pub fn get_chains_that_contain_header(
        &self,
        height: i64,
        header_hash: &H256,
    ) -> Result<Vec<Arc<Blockchain>>> {
        let mut matching: Vec<(Work, Arc<Blockchain>)> = Vec::new();
        for chain in self.chains() {
            if chain.check_hash(height, header_hash) {
                matching.push((chain.total_chainwork()?, chain));
            }
        }
        matching.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(matching.into_iter().map(|(_, chain)| chain).collect())
    }
}
