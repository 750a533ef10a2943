// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

//! Attestation generation.
//!
//! Every served prediction is bound by three Keccak-256 digests (decrypted
//! model bytes, canonical input, raw output) folded into a single packed
//! commitment and signed with a recoverable secp256k1 signature. Anyone
//! holding the attestation can recover the signer address offline; no
//! daemon round-trip is required.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::{Hash32, SignerAddress};

/// Wire length of a recoverable signature: r || s || v.
pub const SIGNATURE_LEN: usize = 65;

#[derive(Debug, Error)]
pub enum AttestError {
    #[error("signing failed")]
    Signing,
}

/// Keccak-256 digest of `bytes`.
pub fn keccak256(bytes: &[u8]) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Packed commitment over the three digests, in fixed order:
/// `keccak256(model_hash || input_hash || output_hash)`.
///
/// The commitment is signed and verified as a raw prehash. Field order is a
/// wire contract; reordering it invalidates every issued attestation.
pub fn attestation_commitment(
    model_hash: &Hash32,
    input_hash: &Hash32,
    output_hash: &Hash32,
) -> Hash32 {
    let mut packed = [0u8; 96];
    packed[..32].copy_from_slice(model_hash);
    packed[32..64].copy_from_slice(input_hash);
    packed[64..].copy_from_slice(output_hash);
    keccak256(&packed)
}

/// Address bound to a secp256k1 public key: the trailing 20 bytes of the
/// Keccak-256 digest of the uncompressed point, sans the 0x04 prefix.
pub fn signer_address(key: &VerifyingKey) -> SignerAddress {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    address
}

/// A complete, self-contained proof that a specific model produced a
/// specific output for a specific input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    pub model_hash: Hash32,
    pub input_hash: Hash32,
    pub output_hash: Hash32,
    /// r || s || v, where v is the recovery id offset by 27.
    pub signature: [u8; SIGNATURE_LEN],
    pub signed_by: SignerAddress,
    pub timestamp_unix: u64,
}

impl Attestation {
    /// Signs the packed commitment over the three digests.
    pub fn over(
        key: &SigningKey,
        model_hash: Hash32,
        input_hash: Hash32,
        output_hash: Hash32,
        timestamp_unix: u64,
    ) -> Result<Self, AttestError> {
        let commitment = attestation_commitment(&model_hash, &input_hash, &output_hash);
        let (sig, recid) = key
            .sign_prehash_recoverable(&commitment)
            .map_err(|_| AttestError::Signing)?;
        Ok(Self {
            model_hash,
            input_hash,
            output_hash,
            signature: encode_signature(&sig, recid),
            signed_by: signer_address(key.verifying_key()),
            timestamp_unix,
        })
    }

    pub fn commitment(&self) -> Hash32 {
        attestation_commitment(&self.model_hash, &self.input_hash, &self.output_hash)
    }
}

fn encode_signature(sig: &Signature, recid: RecoveryId) -> [u8; SIGNATURE_LEN] {
    let mut out = [0u8; SIGNATURE_LEN];
    out[..64].copy_from_slice(&sig.to_bytes());
    out[64] = recid.to_byte() + 27;
    out
}
