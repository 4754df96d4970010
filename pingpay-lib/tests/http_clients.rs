//! Integration tests for the hosted wallet and custody HTTP clients.
//!
//! ```bash
//! cargo test -p pingpay-lib --features http-client --test http_clients
//! ```

#![cfg(feature = "http-client")]

use pingpay_lib::config::{CustodyConfig, WalletGatewayConfig};
use pingpay_lib::escrow::{EscrowRegistrationClient, HttpCustodyClient};
use pingpay_lib::transaction::CHARGE_METHOD;
use pingpay_lib::wallet::{HttpWalletGateway, WalletSigningGateway};
use pingpay_lib::{
    AccountId, Allowance, Amount, AuthorizationAction, PingPayError, ScopedKeyPair,
    SubscriptionId, TransactionId, UnsignedAuthorizationTransaction,
};
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn sample_tx() -> UnsignedAuthorizationTransaction {
    let merchant = AccountId::new("merchant.near").unwrap();
    UnsignedAuthorizationTransaction::new(
        AccountId::new("alice.near").unwrap(),
        merchant.clone(),
        AuthorizationAction::AddScopedKey {
            public_key: ScopedKeyPair::generate().public_key(),
            allowed_contract: merchant,
            allowed_methods: vec![CHARGE_METHOD.to_string()],
            allowance: Allowance::Limited(Amount::from_units(1200)),
        },
    )
}

fn custody(server: &MockServer) -> HttpCustodyClient {
    HttpCustodyClient::new(CustodyConfig::new(server.uri(), "custody-token")).unwrap()
}

// ============================================================================
// Hosted wallet
// ============================================================================

#[tokio::test]
async fn test_wallet_sends_allowance_as_string() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/transactions/sign"))
        .and(header("X-Api-Key", "wallet-key"))
        .and(body_partial_json(serde_json::json!({
            "transaction": {
                "action": {
                    "type": "AddScopedKey",
                    "allowance": "1200",
                    "allowed_methods": ["chargeSubscription"]
                }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "succeeded": true,
            "transaction_id": "ab12"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let gateway = HttpWalletGateway::new(
        WalletGatewayConfig::new(mock_server.uri()).with_api_key("wallet-key"),
    )
    .unwrap();
    let outcome = gateway.request_signature(sample_tx()).await.unwrap();

    assert!(outcome.succeeded);
    assert_eq!(outcome.transaction_id.unwrap().as_str(), "ab12");
}

#[tokio::test]
async fn test_wallet_cancel_is_an_outcome_not_an_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/transactions/sign"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "succeeded": false,
            "error_detail": "UserCancelled"
        })))
        .mount(&mock_server)
        .await;

    let gateway = HttpWalletGateway::new(WalletGatewayConfig::new(mock_server.uri())).unwrap();
    let outcome = gateway.request_signature(sample_tx()).await.unwrap();
    assert!(outcome.is_user_cancelled());
}

#[tokio::test]
async fn test_wallet_server_error_is_retryable_transport() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/transactions/sign"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&mock_server)
        .await;

    let gateway = HttpWalletGateway::new(WalletGatewayConfig::new(mock_server.uri())).unwrap();
    let err = gateway.request_signature(sample_tx()).await.unwrap_err();
    assert!(matches!(err, PingPayError::Transport(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_wallet_withdraws_outstanding_prompt() {
    let mock_server = MockServer::start().await;
    let tx_id = TransactionId::from_hash([3; 32]);

    Mock::given(method("POST"))
        .and(path(format!("/v1/transactions/{}/cancel", tx_id)))
        .and(header("X-Api-Key", "wallet-key"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&mock_server)
        .await;

    let gateway = HttpWalletGateway::new(
        WalletGatewayConfig::new(mock_server.uri()).with_api_key("wallet-key"),
    )
    .unwrap();
    gateway.cancel_signature(&tx_id).await.unwrap();
}

#[tokio::test]
async fn test_wallet_cancel_of_answered_prompt_is_not_an_error() {
    let mock_server = MockServer::start().await;
    let answered = TransactionId::from_hash([4; 32]);
    let refused = TransactionId::from_hash([5; 32]);

    Mock::given(method("POST"))
        .and(path(format!("/v1/transactions/{}/cancel", answered)))
        .respond_with(ResponseTemplate::new(409))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/transactions/{}/cancel", refused)))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let gateway = HttpWalletGateway::new(WalletGatewayConfig::new(mock_server.uri())).unwrap();
    gateway.cancel_signature(&answered).await.unwrap();
    let err = gateway.cancel_signature(&refused).await.unwrap_err();
    assert!(matches!(err, PingPayError::Auth(_)));
}

// ============================================================================
// Custody
// ============================================================================

#[tokio::test]
async fn test_register_then_deposit() {
    let mock_server = MockServer::start().await;
    let id = SubscriptionId::new("sub_abc").unwrap();
    let pair = ScopedKeyPair::generate();

    Mock::given(method("POST"))
        .and(path("/v1/subscriptions/sub_abc/keys"))
        .and(header("Authorization", "Bearer custody-token"))
        .and(body_partial_json(serde_json::json!({
            "public_key": pair.public_key().to_string(),
            "merchant_account": "merchant.near"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/subscriptions/sub_abc/escrow"))
        .and(header("Authorization", "Bearer custody-token"))
        .and(body_partial_json(serde_json::json!({
            "public_key": pair.public_key().to_string(),
            "private_key": pair.secret_key().expose_hex()
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "message": "stored"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = custody(&mock_server);
    let merchant = AccountId::new("merchant.near").unwrap();

    let registered = client
        .register_key(&id, &pair.public_key(), &merchant)
        .await
        .unwrap();
    assert!(registered.success);

    let deposited = client
        .deposit_private_key(&id, pair.secret_key(), &pair.public_key())
        .await
        .unwrap();
    assert!(deposited.success);
    assert_eq!(deposited.message.as_deref(), Some("stored"));
}

#[tokio::test]
async fn test_conflict_is_a_refusal() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/subscriptions/sub_abc/keys"))
        .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
            "success": false,
            "message": "plan no longer offered"
        })))
        .mount(&mock_server)
        .await;

    let ack = custody(&mock_server)
        .register_key(
            &SubscriptionId::new("sub_abc").unwrap(),
            &ScopedKeyPair::generate().public_key(),
            &AccountId::new("merchant.near").unwrap(),
        )
        .await
        .unwrap();
    assert!(!ack.success);
    assert_eq!(ack.message.as_deref(), Some("plan no longer offered"));
}

#[tokio::test]
async fn test_custody_status_mapping() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/subscriptions/sub_unauth/keys"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/subscriptions/sub_busy/keys"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/subscriptions/sub_down/keys"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let client = custody(&mock_server);
    let key = ScopedKeyPair::generate().public_key();
    let merchant = AccountId::new("merchant.near").unwrap();

    let err = client
        .register_key(&SubscriptionId::new("sub_unauth").unwrap(), &key, &merchant)
        .await
        .unwrap_err();
    assert!(matches!(err, PingPayError::Auth(_)));
    assert!(!err.is_retryable());

    let err = client
        .register_key(&SubscriptionId::new("sub_busy").unwrap(), &key, &merchant)
        .await
        .unwrap_err();
    assert!(matches!(err, PingPayError::RateLimited { .. }));

    let err = client
        .register_key(&SubscriptionId::new("sub_down").unwrap(), &key, &merchant)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_deposit_refuses_mismatched_key_locally() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let pair = ScopedKeyPair::generate();
    let other = ScopedKeyPair::generate();
    let err = custody(&mock_server)
        .deposit_private_key(
            &SubscriptionId::new("sub_abc").unwrap(),
            pair.secret_key(),
            &other.public_key(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PingPayError::InvalidData { .. }));
}
