// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

//! Daemon key material: the secp256k1 attestation signing key and the
//! HMAC secret behind issued API credentials. Both are created on first
//! start under `<data>/keys/` with owner-only permissions and reused on
//! every subsequent start, so the signer address stays stable.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use k256::ecdsa::SigningKey;
use thiserror::Error;

const KEYS_DIR: &str = "keys";
const SIGNING_KEY_FILE: &str = "attestation_secp256k1";
const API_SECRET_FILE: &str = "api_hmac_secret";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key io: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored key material is invalid")]
    InvalidKey,
    #[error("os randomness unavailable")]
    Rng,
}

pub fn load_or_create_signing_key(root: &Path) -> Result<SigningKey, KeyError> {
    let path = keys_path(root, SIGNING_KEY_FILE)?;
    if path.exists() {
        let bytes = std::fs::read(&path)?;
        let secret: [u8; 32] = bytes.as_slice().try_into().map_err(|_| KeyError::InvalidKey)?;
        return SigningKey::from_bytes(&secret.into()).map_err(|_| KeyError::InvalidKey);
    }

    // A uniformly random 32-byte string can fall outside the curve order;
    // redraw until it parses.
    loop {
        let mut secret = [0u8; 32];
        getrandom::getrandom(&mut secret).map_err(|_| KeyError::Rng)?;
        if let Ok(key) = SigningKey::from_bytes(&secret.into()) {
            write_secret_file(&path, &secret)?;
            return Ok(key);
        }
    }
}

pub fn load_or_create_api_secret(root: &Path) -> Result<[u8; 32], KeyError> {
    let path = keys_path(root, API_SECRET_FILE)?;
    if path.exists() {
        let bytes = std::fs::read(&path)?;
        return bytes.as_slice().try_into().map_err(|_| KeyError::InvalidKey);
    }
    let mut secret = [0u8; 32];
    getrandom::getrandom(&mut secret).map_err(|_| KeyError::Rng)?;
    write_secret_file(&path, &secret)?;
    Ok(secret)
}

fn keys_path(root: &Path, file: &str) -> Result<PathBuf, KeyError> {
    let dir = root.join(KEYS_DIR);
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join(file))
}

fn write_secret_file(path: &Path, secret: &[u8; 32]) -> Result<(), KeyError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)?;
        f.write_all(secret)?;
        f.sync_all()?;
    }

    #[cfg(not(unix))]
    {
        let mut f = OpenOptions::new().write(true).create_new(true).open(path)?;
        f.write_all(secret)?;
        f.sync_all()?;
    }

    Ok(())
}
