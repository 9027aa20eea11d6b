// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Start-up configuration of an [AttestationService](crate::AttestationService),
//! read once from a JSON file.

use crate::source::{
    SimulatedSource, SourceError, TeeServerSource, TokenSource, DEFAULT_SOCKET_PATH,
    DEFAULT_TIMEOUT_SECS,
};
use crate::store::{self, Fingerprint, Policy, TrustedRootSet};
use crate::verifier::{ChainError, ChainSource, EmbeddedChain, StaticChain};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("reading {path}: {detail}")]
    Io { path: String, detail: String },
    #[error("Syntax error: {0}")]
    Syntax(String),
    #[error("Semantic error: {0}")]
    Sema(String),
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Fingerprints of the pinned root certificates
    #[serde(default)]
    pub trusted_roots: Vec<Fingerprint>,

    /// PEM files whose certificates are all pinned
    #[serde(default)]
    pub trusted_root_pems: Vec<PathBuf>,

    #[serde(default)]
    pub policy: Policy,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub chain: ChainConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum SourceConfig {
    /// The Confidential Space launcher
    #[serde(rename_all = "kebab-case")]
    Hardware {
        #[serde(default = "default_socket_path")]
        socket_path: PathBuf,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Simulated,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Hardware {
            socket_path: default_socket_path(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ChainConfig {
    /// The chain travels in the token's `x5c` header
    #[default]
    Embedded,
    /// A fixed chain read from a PEM bundle, leaf first
    #[serde(rename_all = "kebab-case")]
    Static { pem_path: PathBuf },
}

impl Config {
    pub fn load_json(j: &str) -> Result<Self, Error> {
        let c: Config = serde_json::from_str(j).map_err(|e| Error::Syntax(e.to_string()))?;

        c.policy.validate()?;

        if let SourceConfig::Hardware { timeout_secs: 0, .. } = c.source {
            return Err(Error::Sema("source timeout must be positive".to_string()));
        }

        Ok(c)
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::load_json(&read_to_string(path.as_ref())?)
    }

    /// All the pinned roots, from both fingerprints and PEM files.  At least
    /// one root is required.
    pub fn trusted_root_set(&self) -> Result<TrustedRootSet, Error> {
        let mut roots = TrustedRootSet::new(self.trusted_roots.iter().copied());

        for path in self.trusted_root_pems.iter() {
            let pem = fs::read(path).map_err(|e| io_error(path, e))?;

            roots = roots.union(&TrustedRootSet::from_pem(&pem)?);
        }

        if roots.is_empty() {
            return Err(Error::Sema("no trusted root configured".to_string()));
        }

        Ok(roots)
    }

    pub fn token_source(&self) -> Result<Box<dyn TokenSource>, Error> {
        match &self.source {
            SourceConfig::Hardware {
                socket_path,
                timeout_secs,
            } => Ok(Box::new(TeeServerSource::new(
                socket_path,
                Duration::from_secs(*timeout_secs),
            ))),
            SourceConfig::Simulated => {
                tracing::warn!("using the simulated attestation source");
                Ok(Box::new(SimulatedSource::new()?))
            }
        }
    }

    pub fn chain_source(&self) -> Result<Box<dyn ChainSource>, Error> {
        match &self.chain {
            ChainConfig::Embedded => Ok(Box::new(EmbeddedChain)),
            ChainConfig::Static { pem_path } => Ok(Box::new(StaticChain::load(pem_path)?)),
        }
    }
}

fn read_to_string(path: &Path) -> Result<String, Error> {
    fs::read_to_string(path).map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, e: std::io::Error) -> Error {
    Error::Io {
        path: path.display().to_string(),
        detail: e.to_string(),
    }
}
