#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tonic::{Request, Status};

use veriml_daemon::blob::FsBlobStore;
use veriml_daemon::chain::{pair_key, ChainError, ChainLedger};
use veriml_daemon::config::DaemonConfig;
use veriml_daemon::server::PredictionService;
use veriml_protocol::pb;
use veriml_protocol::pb::veriml_server::Veriml;
use veriml_protocol::ERROR_METADATA_KEY;

/// In-memory ledger fake with failure injection.
#[derive(Default)]
pub struct FakeChain {
    purchased: Mutex<HashMap<String, u64>>,
    issued: Mutex<HashSet<String>>,
    pub unavailable: AtomicBool,
}

impl FakeChain {
    pub fn set_purchased(&self, model_cid: &str, user_address: &str, total: u64) {
        self.purchased
            .lock()
            .unwrap()
            .insert(pair_key(model_cid, user_address), total);
    }
}

#[tonic::async_trait]
impl ChainLedger for FakeChain {
    async fn credits_purchased(
        &self,
        model_cid: &str,
        user_address: &str,
    ) -> Result<u64, ChainError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChainError::Unavailable("injected outage".to_string()));
        }
        Ok(self
            .purchased
            .lock()
            .unwrap()
            .get(&pair_key(model_cid, user_address))
            .copied()
            .unwrap_or(0))
    }

    async fn credential_issued(
        &self,
        model_cid: &str,
        user_address: &str,
    ) -> Result<bool, ChainError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChainError::Unavailable("injected outage".to_string()));
        }
        Ok(self
            .issued
            .lock()
            .unwrap()
            .contains(&pair_key(model_cid, user_address)))
    }

    async fn record_credential_issued(
        &self,
        model_cid: &str,
        user_address: &str,
    ) -> Result<(), ChainError> {
        self.issued
            .lock()
            .unwrap()
            .insert(pair_key(model_cid, user_address));
        Ok(())
    }
}

/// Builds a service whose worker is a shell one-liner. With `sh -c`, the
/// model path binds to `$0` and the input path to `$1`.
pub fn build_service(root: &Path, worker_script: &str, chain: Arc<FakeChain>) -> PredictionService {
    let config = DaemonConfig {
        worker_cmd: vec![
            "sh".to_string(),
            "-c".to_string(),
            worker_script.to_string(),
        ],
        worker_timeout: Duration::from_secs(5),
        ..DaemonConfig::default()
    };
    let blobs = Arc::new(FsBlobStore::open(root.join("artifacts")).unwrap());
    PredictionService::build_with(root, config, chain, blobs).unwrap()
}

pub async fn register_model(svc: &PredictionService, model_bytes: &[u8]) -> String {
    svc.register_model(Request::new(pb::RegisterModelRequest {
        owner_address: "0xowner".to_string(),
        price: 10,
        model_name: "iris".to_string(),
        description: "test classifier".to_string(),
        input_schema_json: "{}".to_string(),
        file_type: "pkl".to_string(),
        original_filename: "iris.pkl".to_string(),
        model_bytes: model_bytes.to_vec(),
    }))
    .await
    .expect("register model")
    .into_inner()
    .cid
}

pub async fn issue_credential(
    svc: &PredictionService,
    cid: &str,
    user: &str,
) -> pb::IssueCredentialResponse {
    svc.issue_credential(Request::new(pb::IssueCredentialRequest {
        model_cid: cid.to_string(),
        user_address: user.to_string(),
    }))
    .await
    .expect("issue credential")
    .into_inner()
}

pub fn predict_request(cid: &str, user: &str, api_key: &str, input: &str) -> Request<pb::PredictRequest> {
    Request::new(pb::PredictRequest {
        model_cid: cid.to_string(),
        user_address: user.to_string(),
        api_key: api_key.to_string(),
        input_json: input.to_string(),
    })
}

pub fn public_code(status: &Status) -> String {
    status
        .metadata()
        .get(ERROR_METADATA_KEY)
        .expect("public error code metadata")
        .to_str()
        .expect("ascii metadata")
        .to_string()
}
