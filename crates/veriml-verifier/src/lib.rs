// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

//! Offline verification of prediction attestations.
//!
//! Takes the hex-encoded proof fields exactly as a daemon or usage log
//! emits them, recovers the signer from the recoverable signature and
//! compares it against a trusted address. No network, no daemon, no key
//! distribution: the signature itself carries the public key.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use thiserror::Error;

use veriml_core::attest::{keccak256, SIGNATURE_LEN};
use veriml_core::verify::{self, VerifyError};
use veriml_core::{Hash32, SignerAddress};

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("{field} is not valid hex")]
    BadHex { field: &'static str },
    #[error("{field} must be {expected} bytes, got {got}")]
    BadLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("prediction bytes do not match the attested output hash")]
    OutputMismatch,
    #[error(transparent)]
    Verify(#[from] VerifyError),
}

/// A proof as carried on the wire: three digests and the recoverable
/// signature over their packed commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofBundle {
    pub model_hash: Hash32,
    pub input_hash: Hash32,
    pub output_hash: Hash32,
    pub signature: [u8; SIGNATURE_LEN],
}

impl ProofBundle {
    /// Parses the hex fields of a usage log entry or API response.
    /// Accepts optional `0x` prefixes.
    pub fn from_hex(
        model_hash_hex: &str,
        input_hash_hex: &str,
        output_hash_hex: &str,
        signature_hex: &str,
    ) -> Result<Self, VerifierError> {
        Ok(Self {
            model_hash: decode_fixed(model_hash_hex, "model_hash")?,
            input_hash: decode_fixed(input_hash_hex, "input_hash")?,
            output_hash: decode_fixed(output_hash_hex, "output_hash")?,
            signature: decode_fixed(signature_hex, "signature")?,
        })
    }

    /// Recovers the signer address without comparing it to anything.
    pub fn recover_signer(&self) -> Result<SignerAddress, VerifierError> {
        Ok(verify::recover_signer(
            &self.model_hash,
            &self.input_hash,
            &self.output_hash,
            &self.signature,
        )?)
    }

    /// Verifies the proof against a trusted signer address and returns
    /// the recovered address on success.
    pub fn verify(&self, expected_signer: &SignerAddress) -> Result<SignerAddress, VerifierError> {
        Ok(verify::verify(
            &self.model_hash,
            &self.input_hash,
            &self.output_hash,
            &self.signature,
            expected_signer,
        )?)
    }

    /// Checks that `prediction` is the exact output the proof attests to.
    pub fn check_output_binding(&self, prediction: &[u8]) -> Result<(), VerifierError> {
        if keccak256(prediction) != self.output_hash {
            return Err(VerifierError::OutputMismatch);
        }
        Ok(())
    }
}

/// Parses a 20-byte signer address from hex, with or without `0x`.
pub fn parse_signer_address(raw: &str) -> Result<SignerAddress, VerifierError> {
    decode_fixed(raw, "signer_address")
}

fn decode_fixed<const N: usize>(raw: &str, field: &'static str) -> Result<[u8; N], VerifierError> {
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(raw).map_err(|_| VerifierError::BadHex { field })?;
    let got = bytes.len();
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| VerifierError::BadLength {
            field,
            expected: N,
            got,
        })
}
