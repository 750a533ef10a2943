// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

//! Service error taxonomy and the gRPC boundary mapping.
//!
//! Internal modules return typed errors; conversion to `tonic::Status`
//! happens once, here. Every status carries a machine-readable code in the
//! `x-veriml-error` response metadata so clients never parse messages.

use thiserror::Error;
use tonic::metadata::MetadataValue;
use tonic::{Code, Status};

use veriml_core::artifact::ArtifactError;
use veriml_protocol::{PublicErrorCode, ERROR_METADATA_KEY};

use crate::chain::ChainError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidInput(String),
    #[error("credential check failed")]
    Unauthorized,
    #[error("no credits remaining for this model")]
    InsufficientCredit,
    #[error("authoritative ledger unreachable")]
    LedgerUnavailable(#[source] ChainError),
    #[error("artifact error")]
    Artifact(#[from] ArtifactError),
    #[error("worker failed: {0}")]
    Execution(String),
    #[error("worker exceeded {0}s wall-clock limit")]
    TimedOut(u64),
    #[error("usage ledger commit failed")]
    LedgerCommit(#[source] StoreError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0} already exists")]
    AlreadyExists(&'static str),
    #[error("internal error")]
    Internal(String),
}

impl ServiceError {
    fn codes(&self) -> (Code, PublicErrorCode) {
        match self {
            Self::InvalidInput(_) => (Code::InvalidArgument, PublicErrorCode::InvalidInput),
            Self::Unauthorized => (Code::Unauthenticated, PublicErrorCode::Unauthorized),
            Self::InsufficientCredit => {
                (Code::ResourceExhausted, PublicErrorCode::InsufficientCredit)
            }
            Self::LedgerUnavailable(_) => (Code::Unavailable, PublicErrorCode::LedgerUnavailable),
            Self::Artifact(_) => (Code::Internal, PublicErrorCode::ArtifactError),
            Self::Execution(_) => (Code::Internal, PublicErrorCode::ExecutionError),
            Self::TimedOut(_) => (Code::DeadlineExceeded, PublicErrorCode::TimedOut),
            Self::LedgerCommit(_) => (Code::Internal, PublicErrorCode::LedgerCommitError),
            Self::NotFound(_) => (Code::NotFound, PublicErrorCode::NotFound),
            Self::AlreadyExists(_) => (Code::AlreadyExists, PublicErrorCode::AlreadyExists),
            Self::Internal(_) => (Code::Internal, PublicErrorCode::Internal),
        }
    }

    pub fn into_status(self) -> Status {
        let (grpc_code, public_code) = self.codes();
        // Internal details go to the log, not the wire.
        let message = match &self {
            Self::Internal(detail) => {
                tracing::error!(detail = %detail, "internal service error");
                "internal error".to_string()
            }
            Self::Artifact(err) => {
                tracing::error!(error = %err, "artifact error");
                "artifact error".to_string()
            }
            Self::LedgerCommit(err) => {
                tracing::error!(error = %err, "usage ledger commit failed");
                "usage ledger commit failed".to_string()
            }
            other => other.to_string(),
        };
        let mut status = Status::new(grpc_code, message);
        status.metadata_mut().insert(
            ERROR_METADATA_KEY,
            MetadataValue::from_static(public_code.as_str()),
        );
        status
    }
}

impl From<ServiceError> for Status {
    fn from(err: ServiceError) -> Self {
        err.into_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_carries_public_code_metadata() {
        let status: Status = ServiceError::InsufficientCredit.into();
        assert_eq!(status.code(), Code::ResourceExhausted);
        let code = status
            .metadata()
            .get(ERROR_METADATA_KEY)
            .expect("metadata present");
        assert_eq!(code.to_str().unwrap(), "INSUFFICIENT_CREDIT");
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let status: Status = ServiceError::Internal("secret path /x/y".to_string()).into();
        assert_eq!(status.message(), "internal error");
    }

    #[test]
    fn timeout_maps_to_deadline_exceeded() {
        let status: Status = ServiceError::TimedOut(30).into();
        assert_eq!(status.code(), Code::DeadlineExceeded);
        assert_eq!(
            status
                .metadata()
                .get(ERROR_METADATA_KEY)
                .unwrap()
                .to_str()
                .unwrap(),
            "TIMED_OUT"
        );
    }
}
