// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

//! veriml-core
//!
//! Core invariants of the verifiable prediction pipeline:
//! - streaming AES-256-GCM artifact codec (per-model key, framed chunks)
//! - attestation generator: three-way Keccak-256 digest + recoverable
//!   secp256k1 signature binding model, input and output
//! - attestation verifier: offline signer recovery, no server dependency

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod artifact;
pub mod attest;
pub mod verify;

pub use crate::attest::{attestation_commitment, keccak256, Attestation};
pub use crate::verify::{recover_signer, verify};

pub type Hash32 = [u8; 32];
pub type SignerAddress = [u8; 20];
