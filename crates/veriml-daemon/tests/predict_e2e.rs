mod common;

use std::sync::Arc;

use common::{build_service, issue_credential, predict_request, public_code, register_model, FakeChain};
use tempfile::tempdir;
use tonic::{Code, Request};
use veriml_core::attest::keccak256;
use veriml_core::verify::verify;
use veriml_protocol::pb;
use veriml_protocol::pb::veriml_server::Veriml;

const MODEL_BYTES: &[u8] = b"serialized-model-payload";
const WORKER_OK: &str = r#"cat "$0" "$1" >/dev/null; printf '{"label":"setosa","confidence":0.97}'"#;
const USER: &str = "0xalice";

#[tokio::test]
async fn predict_returns_output_with_verifiable_attestation() {
    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::default());
    let svc = build_service(dir.path(), WORKER_OK, chain.clone());

    let cid = register_model(&svc, MODEL_BYTES).await;
    chain.set_purchased(&cid, USER, 3);
    let issued = issue_credential(&svc, &cid, USER).await;
    assert_eq!(issued.credits_synced, 3);

    let input = r#"{"sepal_length": 5.1, "petal_width": 0.2}"#;
    let response = svc
        .predict(predict_request(&cid, USER, &issued.api_key, input))
        .await
        .expect("predict")
        .into_inner();

    assert_eq!(
        response.prediction_json,
        r#"{"label":"setosa","confidence":0.97}"#
    );
    assert_eq!(response.credits_remaining, 2);

    let proof = response.proof.expect("attestation present");
    assert_eq!(proof.model_hash, keccak256(MODEL_BYTES).to_vec());
    let canonical_input =
        serde_json::to_vec(&serde_json::from_str::<serde_json::Value>(input).unwrap()).unwrap();
    assert_eq!(proof.input_hash, keccak256(&canonical_input).to_vec());
    assert_eq!(
        proof.output_hash,
        keccak256(response.prediction_json.as_bytes()).to_vec()
    );
    assert_eq!(proof.signed_by, svc.signer().to_vec());

    // Offline verification against the daemon's signer address.
    let recovered = verify(
        &proof.model_hash.as_slice().try_into().unwrap(),
        &proof.input_hash.as_slice().try_into().unwrap(),
        &proof.output_hash.as_slice().try_into().unwrap(),
        &proof.signature,
        &svc.signer(),
    )
    .expect("attestation verifies");
    assert_eq!(recovered.to_vec(), proof.signed_by);
}

#[tokio::test]
async fn credits_exhaust_after_purchased_total() {
    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::default());
    let svc = build_service(dir.path(), WORKER_OK, chain.clone());

    let cid = register_model(&svc, MODEL_BYTES).await;
    chain.set_purchased(&cid, USER, 2);
    let issued = issue_credential(&svc, &cid, USER).await;

    for expected_remaining in [1u64, 0] {
        let response = svc
            .predict(predict_request(&cid, USER, &issued.api_key, "{\"x\":1}"))
            .await
            .expect("predict")
            .into_inner();
        assert_eq!(response.credits_remaining, expected_remaining);
    }

    let err = svc
        .predict(predict_request(&cid, USER, &issued.api_key, "{\"x\":1}"))
        .await
        .expect_err("third prediction must be denied");
    assert_eq!(err.code(), Code::ResourceExhausted);
    assert_eq!(public_code(&err), "INSUFFICIENT_CREDIT");
}

#[tokio::test]
async fn later_purchases_are_picked_up_lazily() {
    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::default());
    let svc = build_service(dir.path(), WORKER_OK, chain.clone());

    let cid = register_model(&svc, MODEL_BYTES).await;
    chain.set_purchased(&cid, USER, 1);
    let issued = issue_credential(&svc, &cid, USER).await;

    let first = svc
        .predict(predict_request(&cid, USER, &issued.api_key, "{}"))
        .await
        .expect("predict")
        .into_inner();
    assert_eq!(first.credits_remaining, 0);

    // Two more purchased on the ledger; the next spend resyncs and sees
    // only the delta, not the full total again.
    chain.set_purchased(&cid, USER, 3);
    let second = svc
        .predict(predict_request(&cid, USER, &issued.api_key, "{}"))
        .await
        .expect("predict after topup")
        .into_inner();
    assert_eq!(second.credits_remaining, 1);
}

#[tokio::test]
async fn wrong_api_key_is_unauthenticated() {
    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::default());
    let svc = build_service(dir.path(), WORKER_OK, chain.clone());

    let cid = register_model(&svc, MODEL_BYTES).await;
    chain.set_purchased(&cid, USER, 1);
    let _ = issue_credential(&svc, &cid, USER).await;

    let err = svc
        .predict(predict_request(&cid, USER, "0".repeat(64).as_str(), "{}"))
        .await
        .expect_err("wrong key must fail");
    assert_eq!(err.code(), Code::Unauthenticated);
    assert_eq!(public_code(&err), "UNAUTHORIZED");
}

#[tokio::test]
async fn unknown_model_is_not_found() {
    let dir = tempdir().unwrap();
    let svc = build_service(dir.path(), WORKER_OK, Arc::new(FakeChain::default()));

    let err = svc
        .predict(predict_request("deadbeef", USER, "key", "{}"))
        .await
        .expect_err("unknown model must fail");
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn malformed_input_json_is_rejected_before_spending() {
    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::default());
    let svc = build_service(dir.path(), WORKER_OK, chain.clone());

    let cid = register_model(&svc, MODEL_BYTES).await;
    chain.set_purchased(&cid, USER, 1);
    let issued = issue_credential(&svc, &cid, USER).await;

    let err = svc
        .predict(predict_request(&cid, USER, &issued.api_key, "not json"))
        .await
        .expect_err("malformed input must fail");
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(public_code(&err), "INVALID_INPUT");

    // The credit is still spendable.
    let response = svc
        .predict(predict_request(&cid, USER, &issued.api_key, "{}"))
        .await
        .expect("predict")
        .into_inner();
    assert_eq!(response.credits_remaining, 0);
}

#[tokio::test]
async fn usage_log_records_each_prediction() {
    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::default());
    let svc = build_service(dir.path(), WORKER_OK, chain.clone());

    let cid = register_model(&svc, MODEL_BYTES).await;
    chain.set_purchased(&cid, USER, 2);
    let issued = issue_credential(&svc, &cid, USER).await;

    let response = svc
        .predict(predict_request(&cid, USER, &issued.api_key, "{\"x\":1}"))
        .await
        .expect("predict")
        .into_inner();
    let proof = response.proof.expect("proof");

    let usage = svc
        .get_usage(Request::new(pb::GetUsageRequest {
            model_cid: cid.clone(),
            user_address: USER.to_string(),
        }))
        .await
        .expect("get usage")
        .into_inner();
    assert_eq!(usage.entries.len(), 1);
    let entry = &usage.entries[0];
    assert_eq!(entry.user_address, USER);
    assert_eq!(entry.credits_before, 2);
    assert_eq!(entry.credits_used, 1);
    assert_eq!(entry.note, "predict");
    assert_eq!(entry.signature_hex, hex::encode(&proof.signature));
    assert_eq!(entry.output_hash_hex, hex::encode(&proof.output_hash));
}

#[tokio::test]
async fn verify_attestation_rpc_accepts_own_proofs() {
    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::default());
    let svc = build_service(dir.path(), WORKER_OK, chain.clone());

    let cid = register_model(&svc, MODEL_BYTES).await;
    chain.set_purchased(&cid, USER, 1);
    let issued = issue_credential(&svc, &cid, USER).await;
    let proof = svc
        .predict(predict_request(&cid, USER, &issued.api_key, "{}"))
        .await
        .expect("predict")
        .into_inner()
        .proof
        .expect("proof");

    let verdict = svc
        .verify_attestation(Request::new(pb::VerifyAttestationRequest {
            model_hash: proof.model_hash.clone(),
            input_hash: proof.input_hash.clone(),
            output_hash: proof.output_hash.clone(),
            signature: proof.signature.clone(),
        }))
        .await
        .expect("verify rpc")
        .into_inner();
    assert!(verdict.valid);
    assert_eq!(verdict.recovered_signer, proof.signed_by);

    // A flipped output hash must not verify.
    let mut forged = proof.output_hash.clone();
    forged[0] ^= 0x01;
    let verdict = svc
        .verify_attestation(Request::new(pb::VerifyAttestationRequest {
            model_hash: proof.model_hash,
            input_hash: proof.input_hash,
            output_hash: forged,
            signature: proof.signature,
        }))
        .await
        .expect("verify rpc")
        .into_inner();
    assert!(!verdict.valid);
}

#[tokio::test]
async fn verify_attestation_maps_malformed_fields_to_invalid() {
    let dir = tempdir().unwrap();
    let svc = build_service(dir.path(), WORKER_OK, Arc::new(FakeChain::default()));

    // A wrong-length hash is an invalid proof, not a request error: the
    // RPC answers valid:false just as it does for a bad signature.
    let verdict = svc
        .verify_attestation(Request::new(pb::VerifyAttestationRequest {
            model_hash: vec![0u8; 31],
            input_hash: vec![0u8; 32],
            output_hash: vec![0u8; 32],
            signature: vec![0u8; 65],
        }))
        .await
        .expect("verify rpc")
        .into_inner();
    assert!(!verdict.valid);
    assert!(verdict.recovered_signer.is_empty());
}
