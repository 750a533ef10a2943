// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

//! Offline attestation verification.
//!
//! Verification never contacts the daemon: the recoverable signature yields
//! the signer's public key directly from the commitment, and the caller
//! compares the derived address against the signer it trusts. Every failure
//! mode is a hard error; there is no partial acceptance.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use thiserror::Error;

use crate::attest::{attestation_commitment, signer_address, SIGNATURE_LEN};
use crate::{Hash32, SignerAddress};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("signature must be {SIGNATURE_LEN} bytes, got {0}")]
    BadSignatureLength(usize),
    #[error("recovery byte {0} is out of range")]
    BadRecoveryId(u8),
    #[error("signature is not a valid secp256k1 signature")]
    MalformedSignature,
    #[error("public key recovery failed")]
    RecoveryFailed,
    #[error("recovered signer does not match the expected signer")]
    SignerMismatch,
}

/// Recovers the signer address from an attestation's digests and signature.
///
/// Accepts both recovery byte conventions: raw (0 or 1) and offset-by-27
/// (27 or 28).
pub fn recover_signer(
    model_hash: &Hash32,
    input_hash: &Hash32,
    output_hash: &Hash32,
    signature: &[u8],
) -> Result<SignerAddress, VerifyError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(VerifyError::BadSignatureLength(signature.len()));
    }
    let v = signature[64];
    let recid_byte = if v >= 27 { v - 27 } else { v };
    let recid = RecoveryId::from_byte(recid_byte).ok_or(VerifyError::BadRecoveryId(v))?;
    let sig =
        Signature::from_slice(&signature[..64]).map_err(|_| VerifyError::MalformedSignature)?;

    let commitment = attestation_commitment(model_hash, input_hash, output_hash);
    let key = VerifyingKey::recover_from_prehash(&commitment, &sig, recid)
        .map_err(|_| VerifyError::RecoveryFailed)?;
    Ok(signer_address(&key))
}

/// Verifies an attestation against a trusted signer address.
///
/// Returns the recovered address on success so callers can display it.
pub fn verify(
    model_hash: &Hash32,
    input_hash: &Hash32,
    output_hash: &Hash32,
    signature: &[u8],
    expected_signer: &SignerAddress,
) -> Result<SignerAddress, VerifyError> {
    let recovered = recover_signer(model_hash, input_hash, output_hash, signature)?;
    if &recovered != expected_signer {
        return Err(VerifyError::SignerMismatch);
    }
    Ok(recovered)
}
