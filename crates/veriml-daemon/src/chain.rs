// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

//! Authoritative credit ledger seam.
//!
//! The daemon never mints credits; purchases happen on an external ledger
//! and the daemon only observes cumulative totals. [`ChainLedger`] is the
//! injection point: production deployments wire a real backend, tests
//! inject fakes with failure injection, and the bundled
//! [`ConfigFileLedger`] serves local development from a JSON file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("ledger backend unavailable: {0}")]
    Unavailable(String),
    #[error("ledger state unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger state malformed")]
    Decode,
}

/// Read/write view of the external ledger, keyed by (model cid, user).
///
/// `credits_purchased` returns the cumulative total ever purchased, not a
/// balance; local spends are invisible to the ledger and are reconciled by
/// the caller against its own high-water mark.
#[tonic::async_trait]
pub trait ChainLedger: Send + Sync {
    async fn credits_purchased(
        &self,
        model_cid: &str,
        user_address: &str,
    ) -> Result<u64, ChainError>;

    async fn credential_issued(
        &self,
        model_cid: &str,
        user_address: &str,
    ) -> Result<bool, ChainError>;

    async fn record_credential_issued(
        &self,
        model_cid: &str,
        user_address: &str,
    ) -> Result<(), ChainError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ChainStateFile {
    /// Cumulative purchased credits per "cid:user" pair.
    purchases: BTreeMap<String, u64>,
    /// Pairs that already received their one-time credential.
    issued: BTreeSet<String>,
}

/// Development backend reading ledger state from a JSON file.
///
/// The file is re-read on every call so an operator can edit purchases
/// while the daemon runs. A missing file means an empty ledger.
#[derive(Debug, Clone)]
pub struct ConfigFileLedger {
    path: PathBuf,
}

impl ConfigFileLedger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn load(&self) -> Result<ChainStateFile, ChainError> {
        if !self.path.exists() {
            return Ok(ChainStateFile::default());
        }
        let bytes = std::fs::read(&self.path)?;
        serde_json::from_slice(&bytes).map_err(|_| ChainError::Decode)
    }

    fn save(&self, state: &ChainStateFile) -> Result<(), ChainError> {
        let payload = serde_json::to_vec_pretty(state).map_err(|_| ChainError::Decode)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

pub fn pair_key(model_cid: &str, user_address: &str) -> String {
    format!("{model_cid}:{user_address}")
}

#[tonic::async_trait]
impl ChainLedger for ConfigFileLedger {
    async fn credits_purchased(
        &self,
        model_cid: &str,
        user_address: &str,
    ) -> Result<u64, ChainError> {
        let state = self.load()?;
        Ok(state
            .purchases
            .get(&pair_key(model_cid, user_address))
            .copied()
            .unwrap_or(0))
    }

    async fn credential_issued(
        &self,
        model_cid: &str,
        user_address: &str,
    ) -> Result<bool, ChainError> {
        let state = self.load()?;
        Ok(state.issued.contains(&pair_key(model_cid, user_address)))
    }

    async fn record_credential_issued(
        &self,
        model_cid: &str,
        user_address: &str,
    ) -> Result<(), ChainError> {
        let mut state = self.load()?;
        state.issued.insert(pair_key(model_cid, user_address));
        self.save(&state)
    }
}
