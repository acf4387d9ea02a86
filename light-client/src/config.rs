use std::path::{Path, PathBuf};

use chi_types::Params;

use crate::difficulty::TargetEngine;

/// Read-only configuration shared by all chains of one store: where the
/// header files live, the network parameters, and the difficulty engine.
pub struct Config {
    headers_dir: PathBuf,
    pub net: Params,
    pub engine: Box<dyn TargetEngine>,
}

impl Config {
    pub fn new(headers_dir: impl Into<PathBuf>, net: Params, engine: Box<dyn TargetEngine>) -> Self {
        Config {
            headers_dir: headers_dir.into(),
            net,
            engine,
        }
    }

    pub fn headers_dir(&self) -> &Path {
        &self.headers_dir
    }

    pub fn forks_dir(&self) -> PathBuf {
        self.headers_dir.join("forks")
    }
}
