// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

//! Content-addressed storage for encrypted model artifacts.
//!
//! Artifacts are stored and fetched by cid, the hex SHA-256 of the
//! ciphertext. Only ciphertext ever reaches a [`BlobStore`] backend, so a
//! compromised store yields nothing without the per-model key.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("artifact {0} not found")]
    NotFound(String),
    #[error("artifact {cid} content does not match its cid")]
    CidMismatch { cid: String },
    #[error("blob io: {0}")]
    Io(#[from] std::io::Error),
}

/// Hex SHA-256 of the ciphertext, the canonical content identifier.
pub fn cid_for(ciphertext: &[u8]) -> String {
    hex::encode(Sha256::digest(ciphertext))
}

#[tonic::async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `ciphertext` and returns its cid. Idempotent: storing the
    /// same bytes twice returns the same cid.
    async fn put(&self, ciphertext: &[u8]) -> Result<String, BlobError>;

    async fn get(&self, cid: &str) -> Result<Vec<u8>, BlobError>;
}

/// Filesystem backend: one file per artifact under `root`, named by cid.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, BlobError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, cid: &str) -> PathBuf {
        self.root.join(cid)
    }
}

#[tonic::async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, ciphertext: &[u8]) -> Result<String, BlobError> {
        let cid = cid_for(ciphertext);
        let path = self.path_for(&cid);
        if path.exists() {
            return Ok(cid);
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, ciphertext).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(cid)
    }

    async fn get(&self, cid: &str) -> Result<Vec<u8>, BlobError> {
        // Cids are hex digests; reject anything that could traverse paths.
        if cid.is_empty() || !cid.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(BlobError::NotFound(cid.to_string()));
        }
        let path = self.path_for(cid);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobError::NotFound(cid.to_string()))
            }
            Err(err) => return Err(BlobError::Io(err)),
        };
        if cid_for(&bytes) != cid {
            return Err(BlobError::CidMismatch {
                cid: cid.to_string(),
            });
        }
        Ok(bytes)
    }
}
