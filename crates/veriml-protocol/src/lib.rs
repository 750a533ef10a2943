// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod pb {
    pub mod v1 {
        tonic::include_proto!("veriml.v1");
    }

    pub use v1::*;
}

/// Response metadata key carrying the machine-readable failure code.
pub const ERROR_METADATA_KEY: &str = "x-veriml-error";

/// Machine-readable failure codes attached to error statuses.
///
/// These strings are a wire contract shared with clients and SDKs.
/// Do not rename without a coordinated protocol version bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicErrorCode {
    InvalidInput,
    Unauthorized,
    InsufficientCredit,
    LedgerUnavailable,
    ArtifactError,
    ExecutionError,
    TimedOut,
    LedgerCommitError,
    NotFound,
    AlreadyExists,
    Internal,
}

impl PublicErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InsufficientCredit => "INSUFFICIENT_CREDIT",
            Self::LedgerUnavailable => "LEDGER_UNAVAILABLE",
            Self::ArtifactError => "ARTIFACT_ERROR",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::TimedOut => "TIMED_OUT",
            Self::LedgerCommitError => "LEDGER_COMMIT_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::Internal => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{pb, PublicErrorCode, ERROR_METADATA_KEY};

    #[test]
    fn pb_types_compile_and_default() {
        let req = pb::PredictRequest::default();
        assert!(req.model_cid.is_empty());
        let proof = pb::Attestation::default();
        assert!(proof.signature.is_empty());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(ERROR_METADATA_KEY, "x-veriml-error");
        assert_eq!(
            PublicErrorCode::InsufficientCredit.as_str(),
            "INSUFFICIENT_CREDIT"
        );
        assert_eq!(
            PublicErrorCode::LedgerCommitError.as_str(),
            "LEDGER_COMMIT_ERROR"
        );
    }
}
