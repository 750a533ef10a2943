// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

//! The prediction service: gRPC surface and pipeline orchestration.
//!
//! `Predict` is the hot path and runs as a staged pipeline: validate,
//! authenticate, stage a credit spend, fetch and decrypt the artifact,
//! execute the worker, attest, then commit the spend together with the
//! usage entry in one atomic write. Any failure before the commit rolls
//! the staged spend back; a failed commit withholds the prediction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use k256::ecdsa::SigningKey;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tonic::{Request, Response, Status};

use veriml_core::artifact;
use veriml_core::attest::{keccak256, signer_address, Attestation};
use veriml_core::verify::recover_signer;
use veriml_core::SignerAddress;
use veriml_protocol::pb;

use pb::veriml_server::Veriml;

use crate::blob::{BlobError, BlobStore, FsBlobStore};
use crate::chain::{pair_key, ChainLedger, ConfigFileLedger};
use crate::config::DaemonConfig;
use crate::credits::{CreditLedger, SpendError};
use crate::error::ServiceError;
use crate::keys;
use crate::sandbox::{self, SandboxError};
use crate::store::{
    unix_now, CredentialRecord, CreditRecord, MetadataStore, ModelRecord, StoreError, UsageRecord,
};

struct ServiceState {
    config: DaemonConfig,
    scratch_dir: PathBuf,
    store: Arc<Mutex<MetadataStore>>,
    credits: CreditLedger,
    chain: Arc<dyn ChainLedger>,
    blobs: Arc<dyn BlobStore>,
    signing_key: SigningKey,
    signer: SignerAddress,
    api_secret: [u8; 32],
}

#[derive(Clone)]
pub struct PredictionService {
    state: Arc<ServiceState>,
}

impl PredictionService {
    pub fn build(data_dir: &str, config: DaemonConfig) -> Result<Self, ServiceError> {
        let root = PathBuf::from(data_dir);
        std::fs::create_dir_all(&root)
            .map_err(|err| ServiceError::Internal(format!("mkdir failed: {err}")))?;
        let chain = Arc::new(ConfigFileLedger::new(root.join("chain.json")));
        let blobs = Arc::new(
            FsBlobStore::open(root.join("artifacts"))
                .map_err(|err| ServiceError::Internal(format!("blob store init failed: {err}")))?,
        );
        Self::build_with(&root, config, chain, blobs)
    }

    /// Constructor with injectable ledger and blob backends.
    pub fn build_with(
        root: &Path,
        config: DaemonConfig,
        chain: Arc<dyn ChainLedger>,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Self, ServiceError> {
        std::fs::create_dir_all(root)
            .map_err(|err| ServiceError::Internal(format!("mkdir failed: {err}")))?;
        let scratch_dir = root.join("scratch");
        std::fs::create_dir_all(&scratch_dir)
            .map_err(|err| ServiceError::Internal(format!("mkdir failed: {err}")))?;

        let store = Arc::new(Mutex::new(
            MetadataStore::open(root)
                .map_err(|err| ServiceError::Internal(format!("store open failed: {err}")))?,
        ));
        let signing_key = keys::load_or_create_signing_key(root)
            .map_err(|err| ServiceError::Internal(format!("signing key init failed: {err}")))?;
        let api_secret = keys::load_or_create_api_secret(root)
            .map_err(|err| ServiceError::Internal(format!("api secret init failed: {err}")))?;
        let signer = signer_address(signing_key.verifying_key());
        let credits = CreditLedger::new(store.clone(), chain.clone());

        tracing::info!(signer = %hex::encode(signer), "prediction service ready");

        Ok(Self {
            state: Arc::new(ServiceState {
                config,
                scratch_dir,
                store,
                credits,
                chain,
                blobs,
                signing_key,
                signer,
                api_secret,
            }),
        })
    }

    /// Address all attestations from this daemon recover to.
    pub fn signer(&self) -> SignerAddress {
        self.state.signer
    }

    async fn run_pipeline(
        &self,
        model: &ModelRecord,
        canonical_input: &[u8],
    ) -> Result<(String, Attestation), ServiceError> {
        let state = &self.state;

        let ciphertext = state
            .blobs
            .get(&model.cid)
            .await
            .map_err(map_blob_error)?;
        let key = decode_fixed::<32>(&model.key_hex)
            .ok_or_else(|| ServiceError::Internal("model key record corrupt".to_string()))?;
        let nonce = decode_fixed::<12>(&model.nonce_hex)
            .ok_or_else(|| ServiceError::Internal("model nonce record corrupt".to_string()))?;
        let plaintext = artifact::decrypt(&ciphertext, &key, &nonce)?;

        let scratch = tempfile::Builder::new()
            .prefix("predict-")
            .tempdir_in(&state.scratch_dir)
            .map_err(|err| ServiceError::Internal(format!("scratch dir failed: {err}")))?;
        let model_path = scratch.path().join("model.bin");
        let input_path = scratch.path().join("input.json");
        tokio::fs::write(&model_path, &plaintext)
            .await
            .map_err(|err| ServiceError::Internal(format!("scratch write failed: {err}")))?;
        tokio::fs::write(&input_path, canonical_input)
            .await
            .map_err(|err| ServiceError::Internal(format!("scratch write failed: {err}")))?;

        let output = sandbox::run_worker(
            &state.config.worker_cmd,
            &model_path,
            &input_path,
            state.config.worker_timeout,
            state.config.max_output_bytes,
        )
        .await
        .map_err(map_sandbox_error)?;
        if !output.stderr_tail.is_empty() {
            tracing::debug!(stderr = %output.stderr_tail, "worker diagnostics");
        }

        let prediction = String::from_utf8(output.stdout)
            .map_err(|_| ServiceError::Execution("worker output is not utf-8".to_string()))?;
        let prediction = prediction.trim().to_string();
        serde_json::from_str::<serde_json::Value>(&prediction)
            .map_err(|_| ServiceError::Execution("worker output is not valid json".to_string()))?;

        let model_hash = keccak256(&plaintext);
        let input_hash = keccak256(canonical_input);
        let output_hash = keccak256(prediction.as_bytes());
        let timestamp = unix_now().map_err(|err| ServiceError::Internal(err.to_string()))?;
        let attestation = Attestation::over(
            &state.signing_key,
            model_hash,
            input_hash,
            output_hash,
            timestamp,
        )
        .map_err(|_| ServiceError::Internal("attestation signing failed".to_string()))?;

        Ok((prediction, attestation))
    }
}

#[tonic::async_trait]
impl Veriml for PredictionService {
    async fn health(
        &self,
        _request: Request<pb::HealthRequest>,
    ) -> Result<Response<pb::HealthResponse>, Status> {
        Ok(Response::new(pb::HealthResponse {
            status: "ok".to_string(),
        }))
    }

    async fn register_model(
        &self,
        request: Request<pb::RegisterModelRequest>,
    ) -> Result<Response<pb::RegisterModelResponse>, Status> {
        let req = request.into_inner();
        require_nonempty(&req.owner_address, "owner_address")?;
        require_nonempty(&req.model_name, "model_name")?;
        if req.model_bytes.is_empty() {
            return Err(ServiceError::InvalidInput("model_bytes is empty".to_string()).into());
        }
        if req.model_bytes.len() > self.state.config.max_model_bytes {
            return Err(ServiceError::InvalidInput(format!(
                "model exceeds {} bytes",
                self.state.config.max_model_bytes
            ))
            .into());
        }
        if !req.input_schema_json.is_empty() {
            serde_json::from_str::<serde_json::Value>(&req.input_schema_json).map_err(|_| {
                ServiceError::InvalidInput("input_schema_json is not valid json".to_string())
            })?;
        }

        let (key, nonce) = artifact::generate_key();
        let ciphertext = artifact::encrypt(&req.model_bytes, &key, &nonce)
            .map_err(ServiceError::Artifact)?;
        let cid = self
            .state
            .blobs
            .put(&ciphertext)
            .await
            .map_err(map_blob_error)?;
        let created_at_unix = unix_now().map_err(|err| ServiceError::Internal(err.to_string()))?;

        let record = ModelRecord {
            cid: cid.clone(),
            owner_address: req.owner_address,
            price: req.price,
            model_name: req.model_name,
            description: req.description,
            input_schema_json: req.input_schema_json,
            file_type: req.file_type,
            original_filename: req.original_filename,
            key_hex: hex::encode(key),
            nonce_hex: hex::encode(nonce),
            created_at_unix,
        };
        self.state
            .store
            .lock()
            .insert_model(record)
            .map_err(map_store_error)?;

        tracing::info!(cid = %cid, "registered model artifact");
        Ok(Response::new(pb::RegisterModelResponse { cid }))
    }

    async fn issue_credential(
        &self,
        request: Request<pb::IssueCredentialRequest>,
    ) -> Result<Response<pb::IssueCredentialResponse>, Status> {
        let req = request.into_inner();
        require_nonempty(&req.model_cid, "model_cid")?;
        require_nonempty(&req.user_address, "user_address")?;

        let pair = pair_key(&req.model_cid, &req.user_address);
        {
            let store = self.state.store.lock();
            if store.model(&req.model_cid).is_none() {
                return Err(ServiceError::NotFound("model").into());
            }
            if store.credential(&pair).is_some() {
                return Err(ServiceError::AlreadyExists("credential").into());
            }
        }
        let already_on_chain = self
            .state
            .chain
            .credential_issued(&req.model_cid, &req.user_address)
            .await
            .map_err(ServiceError::LedgerUnavailable)?;
        if already_on_chain {
            return Err(ServiceError::AlreadyExists("credential").into());
        }

        let observed = self
            .state
            .chain
            .credits_purchased(&req.model_cid, &req.user_address)
            .await
            .map_err(ServiceError::LedgerUnavailable)?;
        if observed == 0 {
            return Err(ServiceError::InsufficientCredit.into());
        }

        let api_key = derive_api_key(&self.state.api_secret, &pair);
        let issued_at_unix = unix_now().map_err(|err| ServiceError::Internal(err.to_string()))?;
        let credential = CredentialRecord {
            key_digest_hex: hex::encode(Sha256::digest(api_key.as_bytes())),
            issued_at_unix,
        };
        // Seed the cached balance from the first sync; the delta baseline
        // starts at the observed total.
        let prior = self.state.store.lock().credit(&pair);
        let newly_purchased = observed.saturating_sub(prior.fetch_at_sc);
        let credit = CreditRecord {
            remaining: prior.remaining.saturating_add(newly_purchased).min(observed),
            fetch_at_sc: observed,
            last_synced_at_unix: issued_at_unix,
        };
        self.state
            .store
            .lock()
            .insert_credential(&pair, credential, credit)
            .map_err(map_store_error)?;

        // The local record is authoritative for reissue prevention; the
        // ledger marker is advisory and may lag.
        if let Err(err) = self
            .state
            .chain
            .record_credential_issued(&req.model_cid, &req.user_address)
            .await
        {
            tracing::warn!(error = %err, pair = %pair, "ledger issuance marker not recorded");
        }

        tracing::info!(pair = %pair, credits_synced = credit.remaining, "issued credential");
        Ok(Response::new(pb::IssueCredentialResponse {
            api_key,
            credits_synced: credit.remaining,
        }))
    }

    async fn predict(
        &self,
        request: Request<pb::PredictRequest>,
    ) -> Result<Response<pb::PredictResponse>, Status> {
        let req = request.into_inner();
        require_nonempty(&req.model_cid, "model_cid")?;
        require_nonempty(&req.user_address, "user_address")?;
        require_nonempty(&req.api_key, "api_key")?;
        if req.input_json.len() > self.state.config.max_input_bytes {
            return Err(ServiceError::InvalidInput(format!(
                "input exceeds {} bytes",
                self.state.config.max_input_bytes
            ))
            .into());
        }
        let input_value: serde_json::Value = serde_json::from_str(&req.input_json)
            .map_err(|_| ServiceError::InvalidInput("input_json is not valid json".to_string()))?;
        let canonical_input = serde_json::to_vec(&input_value)
            .map_err(|_| ServiceError::InvalidInput("input_json not canonicalizable".to_string()))?;

        let pair = pair_key(&req.model_cid, &req.user_address);
        let (model, credential) = {
            let store = self.state.store.lock();
            let model = store
                .model(&req.model_cid)
                .cloned()
                .ok_or(ServiceError::NotFound("model"))?;
            let credential = store
                .credential(&pair)
                .cloned()
                .ok_or(ServiceError::Unauthorized)?;
            (model, credential)
        };

        let presented = hex::encode(Sha256::digest(req.api_key.as_bytes()));
        if !constant_time_eq(presented.as_bytes(), credential.key_digest_hex.as_bytes()) {
            return Err(ServiceError::Unauthorized.into());
        }

        let receipt = self
            .state
            .credits
            .begin_spend(
                &req.model_cid,
                &req.user_address,
                self.state.config.spend_per_prediction,
            )
            .await
            .map_err(|err| match err {
                SpendError::InsufficientCredit { .. } => ServiceError::InsufficientCredit,
                SpendError::Chain(err) => ServiceError::LedgerUnavailable(err),
            })?;

        let (prediction_json, attestation) =
            match self.run_pipeline(&model, &canonical_input).await {
                Ok(result) => result,
                Err(err) => {
                    self.state.credits.release(receipt);
                    return Err(err.into());
                }
            };

        let entry = UsageRecord {
            user_address: req.user_address.clone(),
            used_at_unix: attestation.timestamp_unix,
            credits_before: receipt.credits_before(),
            credits_used: receipt.amount(),
            note: "predict".to_string(),
            model_hash_hex: hex::encode(attestation.model_hash),
            input_hash_hex: hex::encode(attestation.input_hash),
            output_hash_hex: hex::encode(attestation.output_hash),
            signature_hex: hex::encode(attestation.signature),
        };
        let credits_remaining = self
            .state
            .credits
            .commit(receipt, entry)
            .map_err(ServiceError::LedgerCommit)?;

        tracing::info!(
            pair = %pair,
            credits_remaining,
            output_hash = %hex::encode(attestation.output_hash),
            "served attested prediction"
        );
        Ok(Response::new(pb::PredictResponse {
            prediction_json,
            proof: Some(attestation_to_pb(&attestation)),
            credits_remaining,
        }))
    }

    async fn get_usage(
        &self,
        request: Request<pb::GetUsageRequest>,
    ) -> Result<Response<pb::GetUsageResponse>, Status> {
        let req = request.into_inner();
        require_nonempty(&req.model_cid, "model_cid")?;
        require_nonempty(&req.user_address, "user_address")?;

        let pair = pair_key(&req.model_cid, &req.user_address);
        let store = self.state.store.lock();
        if store.model(&req.model_cid).is_none() {
            return Err(ServiceError::NotFound("model").into());
        }
        let entries = store
            .usage(&pair)
            .iter()
            .map(|record| pb::UsageEntry {
                user_address: record.user_address.clone(),
                used_at_unix: record.used_at_unix,
                credits_before: record.credits_before,
                credits_used: record.credits_used,
                note: record.note.clone(),
                model_hash_hex: record.model_hash_hex.clone(),
                input_hash_hex: record.input_hash_hex.clone(),
                output_hash_hex: record.output_hash_hex.clone(),
                signature_hex: record.signature_hex.clone(),
            })
            .collect();
        Ok(Response::new(pb::GetUsageResponse { entries }))
    }

    async fn verify_attestation(
        &self,
        request: Request<pb::VerifyAttestationRequest>,
    ) -> Result<Response<pb::VerifyAttestationResponse>, Status> {
        let req = request.into_inner();
        // Any malformed field means the proof cannot verify; never a status.
        let hashes = (
            parse_hash32(&req.model_hash),
            parse_hash32(&req.input_hash),
            parse_hash32(&req.output_hash),
        );
        let response = match hashes {
            (Some(model_hash), Some(input_hash), Some(output_hash)) => {
                match recover_signer(&model_hash, &input_hash, &output_hash, &req.signature) {
                    Ok(recovered) => pb::VerifyAttestationResponse {
                        valid: recovered == self.state.signer,
                        recovered_signer: recovered.to_vec(),
                    },
                    Err(_) => pb::VerifyAttestationResponse {
                        valid: false,
                        recovered_signer: Vec::new(),
                    },
                }
            }
            _ => pb::VerifyAttestationResponse {
                valid: false,
                recovered_signer: Vec::new(),
            },
        };
        Ok(Response::new(response))
    }
}

fn attestation_to_pb(att: &Attestation) -> pb::Attestation {
    pb::Attestation {
        model_hash: att.model_hash.to_vec(),
        input_hash: att.input_hash.to_vec(),
        output_hash: att.output_hash.to_vec(),
        signature: att.signature.to_vec(),
        signed_by: att.signed_by.to_vec(),
        timestamp_unix: att.timestamp_unix,
    }
}

fn require_nonempty(value: &str, field: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        return Err(ServiceError::InvalidInput(format!("{field} is required")));
    }
    Ok(())
}

fn parse_hash32(bytes: &[u8]) -> Option<[u8; 32]> {
    bytes.try_into().ok()
}

fn decode_fixed<const N: usize>(hex_str: &str) -> Option<[u8; N]> {
    let bytes = hex::decode(hex_str).ok()?;
    bytes.as_slice().try_into().ok()
}

/// API keys are derived, not stored: HMAC-SHA256 of the pair key under the
/// daemon secret, hex encoded. Only the SHA-256 digest of the derived key
/// is persisted.
fn derive_api_key(secret: &[u8; 32], pair: &str) -> String {
    hex::encode(hmac_sha256(secret, pair.as_bytes()))
}

fn hmac_sha256(secret: &[u8], message: &[u8]) -> [u8; 32] {
    const BLOCK_SIZE: usize = 64;
    let mut key_block = [0u8; BLOCK_SIZE];
    if secret.len() > BLOCK_SIZE {
        let digest = Sha256::digest(secret);
        key_block[..digest.len()].copy_from_slice(&digest);
    } else {
        key_block[..secret.len()].copy_from_slice(secret);
    }

    let mut o_key_pad = [0u8; BLOCK_SIZE];
    let mut i_key_pad = [0u8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        o_key_pad[i] = key_block[i] ^ 0x5c;
        i_key_pad[i] = key_block[i] ^ 0x36;
    }

    let mut inner = Sha256::new();
    inner.update(i_key_pad);
    inner.update(message);
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(o_key_pad);
    outer.update(inner_hash);
    outer.finalize().into()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (&x, &y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn map_blob_error(err: BlobError) -> ServiceError {
    match err {
        BlobError::NotFound(_) => ServiceError::NotFound("model artifact"),
        other => ServiceError::Internal(format!("blob store: {other}")),
    }
}

fn map_store_error(err: StoreError) -> ServiceError {
    match err {
        StoreError::AlreadyExists(what) => ServiceError::AlreadyExists(what),
        other => ServiceError::Internal(format!("metadata store: {other}")),
    }
}

fn map_sandbox_error(err: SandboxError) -> ServiceError {
    match err {
        SandboxError::TimedOut(secs) => ServiceError::TimedOut(secs),
        SandboxError::Failed { code, stderr_tail } => {
            ServiceError::Execution(format!("exit {code:?}: {stderr_tail}"))
        }
        SandboxError::OutputTooLarge(cap) => {
            ServiceError::Execution(format!("output exceeds {cap} bytes"))
        }
        other => ServiceError::Internal(format!("sandbox: {other}")),
    }
}
