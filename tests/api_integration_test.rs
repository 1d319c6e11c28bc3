//! HTTP API against a live listener and the in-memory ledger

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use vault_disburser::guard::{epoch_day, UtcClock};
use vault_disburser::signer::{LocalSigner, SigningCoordinator};
use vault_disburser::test_utils::MockLedger;
use vault_disburser::types::VaultConfigAccount;
use vault_disburser::{
    api, DisbursementService, InstructionSchema, ServiceContext, ServiceOptions, VaultAddresses,
};

const LIMIT: u64 = 5_000;

struct Server {
    base: String,
    ledger: Arc<MockLedger>,
    signer: Pubkey,
    addresses: VaultAddresses,
    stop: Option<oneshot::Sender<()>>,
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn start() -> Server {
    let keypair = Keypair::new();
    let signer = keypair.pubkey();
    let ledger = Arc::new(MockLedger::new());
    let addresses = VaultAddresses::derive(&Pubkey::new_unique(), &Pubkey::new_unique()).unwrap();
    let today = epoch_day(chrono::Utc::now().timestamp());
    ledger.install_vault(
        &addresses,
        &InstructionSchema::builtin(),
        &VaultConfigAccount {
            admin: Some(Pubkey::new_unique()),
            bot_authority: signer,
            daily_limit: LIMIT,
            daily_disbursed: 0,
            last_reset_day: today,
        },
        1_000_000,
    );

    let ctx = Arc::new(ServiceContext::new(
        ledger.clone(),
        Arc::new(InstructionSchema::builtin()),
        addresses.clone(),
        Arc::new(SigningCoordinator::local(LocalSigner::new(keypair))),
    ));
    let options = ServiceOptions {
        poll_interval: Duration::from_millis(1),
        confirm_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let service = Arc::new(DisbursementService::with_clock(
        ctx,
        options,
        Arc::new(UtcClock),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(api::serve(listener, service, async {
        let _ = stopped.await;
    }));

    Server {
        base,
        ledger,
        signer,
        addresses,
        stop: Some(stop),
    }
}

#[tokio::test]
async fn test_health_reports_identity() {
    let server = start().await;

    let body: Value = reqwest::get(format!("{}/health", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["signerAddress"], server.signer.to_string());
    assert_eq!(body["programId"], server.addresses.program_id.to_string());
    assert_eq!(body["assetId"], server.addresses.asset.to_string());
}

#[tokio::test]
async fn test_disburse_success() {
    let server = start().await;
    let recipient = Pubkey::new_unique();

    let response = reqwest::Client::new()
        .post(format!("{}/disburse", server.base))
        .json(&json!({
            "recipientAddress": recipient.to_string(),
            "amount": 1_000,
            "requestId": "api-1",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["requestId"], "api-1");
    assert_eq!(body["holdingAccountCreated"], true);
    assert!(body["signature"].as_str().is_some_and(|s| !s.is_empty()));

    let account = server.addresses.holding_account(&recipient).unwrap();
    assert_eq!(server.ledger.token_balance(&account), Some(1_000));
}

#[tokio::test]
async fn test_invalid_recipient_is_bad_request() {
    let server = start().await;

    let response = reqwest::Client::new()
        .post(format!("{}/disburse", server.base))
        .json(&json!({
            "recipientAddress": "nope",
            "amount": 1,
            "requestId": "api-2",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["category"], "validation");
    assert!(server.ledger.calls().is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_json_bad_request() {
    let server = start().await;
    let recipient = Pubkey::new_unique().to_string();
    let client = reqwest::Client::new();

    for body in [
        json!({ "recipientAddress": recipient, "amount": -5, "requestId": "api-neg" }),
        json!({ "recipientAddress": recipient, "amount": 1.5, "requestId": "api-float" }),
        json!({ "recipientAddress": recipient, "requestId": "api-missing" }),
    ] {
        let response = client
            .post(format!("{}/disburse", server.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400, "body {body}");

        let reply: Value = response.json().await.unwrap();
        assert_eq!(reply["success"], false);
        assert_eq!(reply["category"], "validation");
        assert!(reply["error"].as_str().is_some_and(|e| !e.is_empty()));
    }

    let response = client
        .post(format!("{}/disburse", server.base))
        .header("content-type", "text/plain")
        .body("amount=1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let reply: Value = response.json().await.unwrap();
    assert_eq!(reply["success"], false);

    assert!(server.ledger.calls().is_empty());
}

#[tokio::test]
async fn test_over_limit_is_too_many_requests() {
    let server = start().await;

    let response = reqwest::Client::new()
        .post(format!("{}/disburse", server.base))
        .json(&json!({
            "recipientAddress": Pubkey::new_unique().to_string(),
            "amount": LIMIT + 1,
            "requestId": "api-3",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["category"], "rate_limit");
    assert!(server.ledger.submitted().is_empty());
}

#[tokio::test]
async fn test_metrics_endpoint_is_prometheus_text() {
    let server = start().await;

    let text = reqwest::get(format!("{}/metrics", server.base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(text.contains("disbursements_total"));
}
