//! Submission and Confirmation Tests
//!
//! Drives the public client API against the in-memory mock ledger: event
//! confirmation, semantic failures, timeouts, rejections and nonce handling.
//!
//! Run with: cargo test --test submission_test

use std::sync::Arc;
use std::time::Duration;

use bucket_core::{AccountId32, SignatureKind, SignedExtrinsic, TOKEN_PRECISION};
use bucket_node::chain::mock::{MockConnector, MockLedger, SubmissionPlan};
use bucket_node::chain::types::names;
use bucket_node::chain::{
    AccountIdentity, Call, ChainClient, ChainError, ConfirmationOutcome, ConfirmationRule,
    LedgerTransport, Operation, Session, SignOptions, SubmissionEngine, TxStatus,
};
use bucket_node::ChainSettings;
use parity_scale_codec::Encode;

/// Connect a client for a funded miner account
async fn funded_client(ledger: &MockLedger, seed: u8) -> ChainClient {
    let identity = AccountIdentity::from_seed([seed; 32]);
    ledger.fund_account(identity.account(), 0, 0).unwrap();
    client_for(ledger, identity).await
}

async fn client_for(ledger: &MockLedger, identity: AccountIdentity) -> ChainClient {
    let settings = ChainSettings {
        rpc_addrs: vec!["mock://node".to_string()],
        ..ChainSettings::default()
    };
    ChainClient::connect_with(
        Arc::new(MockConnector::new(ledger.clone())),
        &settings,
        identity,
    )
    .await
    .unwrap()
}

async fn engine_for(ledger: &MockLedger) -> Arc<SubmissionEngine> {
    let session = Session::connect(Arc::new(MockConnector::new(ledger.clone())), "mock://node")
        .await
        .unwrap();
    Arc::new(SubmissionEngine::new(Arc::new(session)))
}

fn registered_event(ledger: &MockLedger, acc: &AccountId32) -> Vec<u8> {
    let fields = (acc, 100 * TOKEN_PRECISION).encode();
    ledger
        .event_record(names::SMINER, names::REGISTERED, &fields)
        .unwrap()
}

/// A block carrying the expected event for the signer confirms the call
#[tokio::test]
async fn test_register_confirmed_by_matching_event() {
    let ledger = MockLedger::new();
    let client = funded_client(&ledger, 1).await;

    let event = registered_event(&ledger, client.account());
    ledger.plan_next(SubmissionPlan::Include {
        events: vec![event],
    });

    let outcome = client.register(None, "10.0.0.1:15001", 100).await.unwrap();
    let block = ledger.best_block();
    assert_eq!(outcome, ConfirmationOutcome::Confirmed(block));
    assert_eq!(client.block_height_at(block).await.unwrap(), Some(1));
}

/// Inclusion without the expected event is a semantic failure, not an error
#[tokio::test]
async fn test_register_semantic_failure() {
    let ledger = MockLedger::new();
    let client = funded_client(&ledger, 1).await;

    // Registered event for somebody else
    let event = registered_event(&ledger, &AccountId32([0xee; 32]));
    ledger.plan_next(SubmissionPlan::Include {
        events: vec![event],
    });

    let outcome = client.register(None, "10.0.0.1:15001", 100).await.unwrap();
    assert_eq!(
        outcome,
        ConfirmationOutcome::SemanticFailure(ledger.best_block())
    );
    assert!(!outcome.is_ambiguous());
    assert!(matches!(
        outcome.into_result(),
        Err(ChainError::SemanticFailure(_))
    ));
}

/// Applied through the simulated runtime, register writes the miner record
#[tokio::test]
async fn test_register_applied_end_to_end() {
    let ledger = MockLedger::new();
    let client = funded_client(&ledger, 2).await;
    let income = AccountId32([0x42; 32]);

    let outcome = client
        .register(Some(&income), "10.0.0.2:15001", 2_000)
        .await
        .unwrap();
    assert!(matches!(outcome, ConfirmationOutcome::Confirmed(_)));

    let miner = client.miner_info(client.account()).await.unwrap().unwrap();
    assert_eq!(miner.beneficiary, income);
    assert_eq!(miner.service_addr_str(), "10.0.0.2:15001");
    assert_eq!(miner.collaterals, 2_000 * TOKEN_PRECISION);

    // Second registration is included but emits no Registered event
    let again = client.register(None, "10.0.0.2:15001", 2_000).await.unwrap();
    assert!(matches!(again, ConfirmationOutcome::SemanticFailure(_)));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_unsubscribes_exactly_once() {
    let ledger = MockLedger::new();
    let client = funded_client(&ledger, 3).await;
    ledger.plan_next(SubmissionPlan::Never);

    let outcome = client.exit().await.unwrap();
    assert_eq!(outcome, ConfirmationOutcome::Timeout);
    assert!(outcome.is_ambiguous());
    assert_eq!(ledger.unsubscribe_count(), 1);
    assert_eq!(ledger.open_subscriptions(), 0);
}

#[tokio::test]
async fn test_subscription_error() {
    let ledger = MockLedger::new();
    let client = funded_client(&ledger, 4).await;
    ledger.plan_next(SubmissionPlan::SubscriptionFailure(
        "subscription dropped".to_string(),
    ));

    let outcome = client.withdraw().await.unwrap();
    assert_eq!(
        outcome,
        ConfirmationOutcome::SubscriptionError("subscription dropped".to_string())
    );
    assert_eq!(ledger.unsubscribe_count(), 1);
}

#[tokio::test]
async fn test_rejection_statuses_are_connection_errors() {
    let ledger = MockLedger::new();
    let client = funded_client(&ledger, 5).await;

    for status in [TxStatus::Invalid, TxStatus::Dropped] {
        ledger.plan_next(SubmissionPlan::Reject(status));
        let outcome = client.receive_rewards().await.unwrap();
        assert!(
            matches!(outcome, ConfirmationOutcome::ConnectionError(_)),
            "unexpected outcome {:?}",
            outcome
        );
    }
    assert_eq!(ledger.unsubscribe_count(), 2);
    assert_eq!(ledger.open_subscriptions(), 0);
}

#[tokio::test]
async fn test_submitted_nonce_matches_chain() {
    let ledger = MockLedger::new();
    let identity = AccountIdentity::from_seed([6u8; 32]);
    ledger.fund_account(identity.account(), 9, 0).unwrap();
    let client = client_for(&ledger, identity).await;

    client.update_address("10.0.0.6:15001").await.unwrap();
    client.update_address("10.0.0.6:15002").await.unwrap();

    let nonces: Vec<u32> = ledger.submitted().iter().map(|xt| xt.nonce).collect();
    assert_eq!(nonces, vec![9, 10]);
    assert_eq!(ledger.nonce_of(client.account()), Some(11));
}

#[tokio::test]
async fn test_errors_before_submission() {
    let ledger = MockLedger::new();

    // No on-chain account record
    let unknown = client_for(&ledger, AccountIdentity::from_seed([7u8; 32])).await;
    assert!(matches!(
        unknown.exit().await,
        Err(ChainError::UnknownAccount(_))
    ));

    // Read-only identity
    let watcher = client_for(&ledger, AccountIdentity::read_only(AccountId32([8u8; 32]))).await;
    assert!(matches!(watcher.exit().await, Err(ChainError::NotASigner)));

    // Call the runtime does not know
    let engine = engine_for(&ledger).await;
    let identity = AccountIdentity::from_seed([9u8; 32]);
    ledger.fund_account(identity.account(), 0, 0).unwrap();
    let op = Operation::new(
        Call::new(names::SMINER, "no_such_call"),
        ConfirmationRule::InclusionOnly,
    );
    assert!(matches!(
        engine.execute(&identity, op).await,
        Err(ChainError::UnsupportedOperation { .. })
    ));

    assert_eq!(ledger.submission_count(), 0);
}

/// Concurrent submissions from one account get consecutive nonces
#[tokio::test]
async fn test_same_account_concurrency() {
    let ledger = MockLedger::new();
    let engine = engine_for(&ledger).await;
    let identity = AccountIdentity::from_seed([10u8; 32]);
    ledger.fund_account(identity.account(), 0, 0).unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        ledger.plan_next(SubmissionPlan::include_without_events());
        let engine = engine.clone();
        let identity = identity.clone();
        handles.push(tokio::spawn(async move {
            let op = Operation::new(
                Call::new(names::SMINER, names::EXIT_MINER),
                ConfirmationRule::InclusionOnly,
            );
            engine.execute(&identity, op).await
        }));
    }

    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert!(matches!(outcome, ConfirmationOutcome::Confirmed(_)));
    }

    let mut nonces: Vec<u32> = ledger.submitted().iter().map(|xt| xt.nonce).collect();
    nonces.sort_unstable();
    assert_eq!(nonces, vec![0, 1, 2, 3]);
}

/// A call signed before another one landed is rejected by the node
#[tokio::test]
async fn test_stale_nonce_is_connection_error() {
    let ledger = MockLedger::new();
    let engine = engine_for(&ledger).await;
    let identity = AccountIdentity::from_seed([11u8; 32]);
    ledger.fund_account(identity.account(), 0, 0).unwrap();

    let call = Call::new(names::SMINER, names::EXIT_MINER);
    let options = SignOptions::default();
    let first = engine
        .builder()
        .build(&identity, call.clone(), &options)
        .await
        .unwrap();
    let second = engine
        .builder()
        .build(&identity, call, &options)
        .await
        .unwrap();
    assert_eq!(first.nonce(), second.nonce());

    let rule = ConfirmationRule::InclusionOnly;
    let timeout = Duration::from_secs(5);
    let outcome = engine.submit(first, &rule, timeout).await;
    assert!(matches!(outcome, ConfirmationOutcome::Confirmed(_)));

    match engine.submit(second, &rule, timeout).await {
        ConfirmationOutcome::ConnectionError(msg) => assert!(msg.contains("outdated")),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_claim_only_when_rewards_available() {
    let ledger = MockLedger::new();
    let client = funded_client(&ledger, 12).await;
    assert_eq!(client.claim_if_available().await.unwrap(), None);
    assert_eq!(ledger.submission_count(), 0);
}

/// Sr25519 signers pass the same pool checks as Ed25519 ones
#[tokio::test]
async fn test_sr25519_signer_end_to_end() {
    let ledger = MockLedger::new();
    let identity = AccountIdentity::from_secret_uri("//Alice").unwrap();
    ledger.fund_account(identity.account(), 0, 0).unwrap();
    let client = client_for(&ledger, identity).await;

    let outcome = client
        .register(None, "10.0.0.7:15001", 2_000)
        .await
        .unwrap();
    assert!(matches!(outcome, ConfirmationOutcome::Confirmed(_)));
    assert!(client.is_registered().await.unwrap());

    let submitted = ledger.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].kind, SignatureKind::Sr25519);
}

#[tokio::test]
async fn test_signature_kind_mismatch_rejected() {
    let ledger = MockLedger::new();
    let engine = engine_for(&ledger).await;
    let identity = AccountIdentity::from_secret_uri("//Bob").unwrap();
    ledger.fund_account(identity.account(), 0, 0).unwrap();

    let signed = engine
        .builder()
        .build(
            &identity,
            Call::new(names::SMINER, names::EXIT_MINER),
            &SignOptions::default(),
        )
        .await
        .unwrap();
    let mut xt = SignedExtrinsic::decode(&signed.into_extrinsic()).unwrap();
    xt.kind = SignatureKind::Ed25519;

    match ledger.submit_and_watch(xt.encode()).await {
        Err(ChainError::Connection(msg)) => assert!(msg.contains("bad signature")),
        other => panic!("unexpected result {:?}", other.map(|sub| sub.id)),
    }
}
