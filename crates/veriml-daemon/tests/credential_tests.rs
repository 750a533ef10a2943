mod common;

use std::sync::Arc;

use common::{build_service, issue_credential, public_code, register_model, FakeChain};
use tempfile::tempdir;
use tonic::{Code, Request};
use veriml_protocol::pb;
use veriml_protocol::pb::veriml_server::Veriml;

const MODEL_BYTES: &[u8] = b"serialized-model-payload";
const WORKER: &str = "printf '{}'";
const USER: &str = "0xalice";

fn issue_req(cid: &str, user: &str) -> Request<pb::IssueCredentialRequest> {
    Request::new(pb::IssueCredentialRequest {
        model_cid: cid.to_string(),
        user_address: user.to_string(),
    })
}

#[tokio::test]
async fn issuance_requires_a_purchased_credit() {
    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::default());
    let svc = build_service(dir.path(), WORKER, chain.clone());

    let cid = register_model(&svc, MODEL_BYTES).await;
    let err = svc
        .issue_credential(issue_req(&cid, USER))
        .await
        .expect_err("no purchase, no credential");
    assert_eq!(err.code(), Code::ResourceExhausted);
    assert_eq!(public_code(&err), "INSUFFICIENT_CREDIT");
}

#[tokio::test]
async fn issuance_returns_key_and_synced_balance() {
    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::default());
    let svc = build_service(dir.path(), WORKER, chain.clone());

    let cid = register_model(&svc, MODEL_BYTES).await;
    chain.set_purchased(&cid, USER, 4);
    let issued = issue_credential(&svc, &cid, USER).await;

    assert_eq!(issued.api_key.len(), 64);
    assert!(issued.api_key.bytes().all(|b| b.is_ascii_hexdigit()));
    assert_eq!(issued.credits_synced, 4);
}

#[tokio::test]
async fn credential_is_issued_at_most_once() {
    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::default());
    let svc = build_service(dir.path(), WORKER, chain.clone());

    let cid = register_model(&svc, MODEL_BYTES).await;
    chain.set_purchased(&cid, USER, 1);
    let _ = issue_credential(&svc, &cid, USER).await;

    let err = svc
        .issue_credential(issue_req(&cid, USER))
        .await
        .expect_err("second issuance must fail");
    assert_eq!(err.code(), Code::AlreadyExists);
    assert_eq!(public_code(&err), "ALREADY_EXISTS");
}

#[tokio::test]
async fn issuance_survives_daemon_restart() {
    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::default());
    let cid;
    {
        let svc = build_service(dir.path(), WORKER, chain.clone());
        cid = register_model(&svc, MODEL_BYTES).await;
        chain.set_purchased(&cid, USER, 1);
        let _ = issue_credential(&svc, &cid, USER).await;
    }

    let svc = build_service(dir.path(), WORKER, chain.clone());
    let err = svc
        .issue_credential(issue_req(&cid, USER))
        .await
        .expect_err("reissue after restart must fail");
    assert_eq!(err.code(), Code::AlreadyExists);
}

#[tokio::test]
async fn distinct_users_get_distinct_keys() {
    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::default());
    let svc = build_service(dir.path(), WORKER, chain.clone());

    let cid = register_model(&svc, MODEL_BYTES).await;
    chain.set_purchased(&cid, "0xalice", 1);
    chain.set_purchased(&cid, "0xbob", 1);
    let alice = issue_credential(&svc, &cid, "0xalice").await;
    let bob = issue_credential(&svc, &cid, "0xbob").await;
    assert_ne!(alice.api_key, bob.api_key);
}

#[tokio::test]
async fn issuance_for_unknown_model_is_not_found() {
    let dir = tempdir().unwrap();
    let svc = build_service(dir.path(), WORKER, Arc::new(FakeChain::default()));

    let err = svc
        .issue_credential(issue_req("deadbeef", USER))
        .await
        .expect_err("unknown model");
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn ledger_outage_blocks_issuance() {
    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::default());
    let svc = build_service(dir.path(), WORKER, chain.clone());

    let cid = register_model(&svc, MODEL_BYTES).await;
    chain
        .unavailable
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let err = svc
        .issue_credential(issue_req(&cid, USER))
        .await
        .expect_err("outage must block issuance");
    assert_eq!(err.code(), Code::Unavailable);
    assert_eq!(public_code(&err), "LEDGER_UNAVAILABLE");
}

#[tokio::test]
async fn reregistering_the_same_model_yields_a_fresh_artifact() {
    let dir = tempdir().unwrap();
    let svc = build_service(dir.path(), WORKER, Arc::new(FakeChain::default()));

    // Every registration gets its own key and nonce, so identical model
    // bytes produce distinct ciphertexts and distinct cids.
    let first = register_model(&svc, MODEL_BYTES).await;
    let second = register_model(&svc, MODEL_BYTES).await;
    assert_ne!(first, second);
}

#[tokio::test]
async fn empty_model_bytes_are_rejected() {
    let dir = tempdir().unwrap();
    let svc = build_service(dir.path(), WORKER, Arc::new(FakeChain::default()));

    let err = svc
        .register_model(Request::new(pb::RegisterModelRequest {
            owner_address: "0xowner".to_string(),
            price: 10,
            model_name: "iris".to_string(),
            description: String::new(),
            input_schema_json: String::new(),
            file_type: "pkl".to_string(),
            original_filename: "iris.pkl".to_string(),
            model_bytes: Vec::new(),
        }))
        .await
        .expect_err("empty model must be rejected");
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(public_code(&err), "INVALID_INPUT");
}
