// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

//! Durable daemon metadata: model records, issued credentials, cached
//! credit balances and the append-only usage log.
//!
//! All state lives in one JSON snapshot written atomically (tmp file,
//! fsync, rename, directory sync). A crash leaves either the old snapshot
//! or the new one, never a torn file.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const STATE_FILE_NAME: &str = "metadata.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store state malformed")]
    Decode,
    #[error("store state unencodable")]
    Encode,
    #[error("{0} already exists")]
    AlreadyExists(&'static str),
    #[error("system clock before unix epoch")]
    Clock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub cid: String,
    pub owner_address: String,
    pub price: u64,
    pub model_name: String,
    pub description: String,
    pub input_schema_json: String,
    pub file_type: String,
    pub original_filename: String,
    /// Hex AES-256 key for the artifact. Never leaves the daemon.
    pub key_hex: String,
    /// Hex base nonce baked into the artifact header.
    pub nonce_hex: String,
    pub created_at_unix: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Hex SHA-256 of the issued API key; the plaintext key is returned
    /// once at issuance and never stored.
    pub key_digest_hex: String,
    pub issued_at_unix: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CreditRecord {
    /// Locally spendable credits.
    pub remaining: u64,
    /// Cumulative purchased total observed at the last ledger sync. New
    /// purchases are credited as the delta above this high-water mark.
    pub fetch_at_sc: u64,
    /// Unix seconds of the last authoritative sync; 0 = never synced.
    #[serde(default)]
    pub last_synced_at_unix: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_address: String,
    pub used_at_unix: u64,
    pub credits_before: u64,
    pub credits_used: u64,
    pub note: String,
    pub model_hash_hex: String,
    pub input_hash_hex: String,
    pub output_hash_hex: String,
    pub signature_hex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StoreState {
    models: BTreeMap<String, ModelRecord>,
    /// Keyed by "cid:user".
    credentials: BTreeMap<String, CredentialRecord>,
    credits: BTreeMap<String, CreditRecord>,
    usage: BTreeMap<String, Vec<UsageRecord>>,
}

#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    state: StoreState,
}

impl MetadataStore {
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let path = root.join(STATE_FILE_NAME);
        let state = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice(&bytes).map_err(|_| StoreError::Decode)?
        } else {
            StoreState::default()
        };
        Ok(Self { path, state })
    }

    pub fn model(&self, cid: &str) -> Option<&ModelRecord> {
        self.state.models.get(cid)
    }

    pub fn insert_model(&mut self, record: ModelRecord) -> Result<(), StoreError> {
        if self.state.models.contains_key(&record.cid) {
            return Err(StoreError::AlreadyExists("model"));
        }
        self.state.models.insert(record.cid.clone(), record);
        self.persist()
    }

    pub fn credential(&self, pair: &str) -> Option<&CredentialRecord> {
        self.state.credentials.get(pair)
    }

    /// Persists a credential and the initial credit sync in one write, so
    /// a crash cannot leave a credential without its synced balance.
    pub fn insert_credential(
        &mut self,
        pair: &str,
        record: CredentialRecord,
        credit: CreditRecord,
    ) -> Result<(), StoreError> {
        if self.state.credentials.contains_key(pair) {
            return Err(StoreError::AlreadyExists("credential"));
        }
        self.state.credentials.insert(pair.to_string(), record);
        self.state.credits.insert(pair.to_string(), credit);
        self.persist()
    }

    pub fn credit(&self, pair: &str) -> CreditRecord {
        self.state.credits.get(pair).copied().unwrap_or_default()
    }

    /// In-memory only; made durable by the next [`commit_spend`] or
    /// credential write.
    pub fn stage_credit(&mut self, pair: &str, record: CreditRecord) {
        self.state.credits.insert(pair.to_string(), record);
    }

    pub fn usage(&self, pair: &str) -> &[UsageRecord] {
        self.state
            .usage
            .get(pair)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Appends a usage entry and persists the snapshot, including any
    /// staged credit balance. On failure the entry is removed again; the
    /// caller owns rolling back its staged balance.
    pub fn commit_spend(&mut self, pair: &str, entry: UsageRecord) -> Result<(), StoreError> {
        self.state
            .usage
            .entry(pair.to_string())
            .or_default()
            .push(entry);
        if let Err(err) = self.persist() {
            if let Some(entries) = self.state.usage.get_mut(pair) {
                entries.pop();
            }
            return Err(err);
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), StoreError> {
        let payload = serde_json::to_vec_pretty(&self.state).map_err(|_| StoreError::Encode)?;
        write_file_atomic_durable(&self.path, &payload)
    }
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> Result<(), StoreError> {
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

fn write_file_atomic_durable(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().ok_or(StoreError::Encode)?;
    let tmp = path.with_extension("tmp");
    let mut f = File::create(&tmp)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    std::fs::rename(&tmp, path)?;
    sync_directory(parent)?;
    Ok(())
}

pub fn unix_now() -> Result<u64, StoreError> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| StoreError::Clock)?
        .as_secs())
}
