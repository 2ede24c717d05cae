//! Session and State Reader Tests
//!
//! Reconnect behavior, cached runtime facts and chain-state queries against
//! the in-memory mock ledger.
//!
//! Run with: cargo test --test session_test

use std::sync::Arc;

use bucket_core::{AccountId32, H256};
use bucket_node::chain::mock::{MockConnector, MockLedger};
use bucket_node::chain::types::{names, FillerInfo, RewardInfo};
use bucket_node::chain::{ChainError, Session, StateReader};
use parity_scale_codec::Encode;

fn addrs(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_reconnect_preserves_metadata() {
    let ledger = MockLedger::new();
    let connector = MockConnector::new(ledger.clone());
    let session = Session::connect(Arc::new(connector.clone()), "mock://a")
        .await
        .unwrap();
    let before = session.facts();

    session.reconnect("mock://a").await.unwrap();
    let after = session.facts();

    assert!(Arc::ptr_eq(&before.metadata, &after.metadata));
    assert_eq!(before.event_log_key, after.event_log_key);
    assert_eq!(after.genesis_hash, ledger.genesis_hash());
    assert_eq!(connector.connections().len(), 2);
}

#[tokio::test]
async fn test_reconnect_after_runtime_upgrade_refetches_metadata() {
    let ledger = MockLedger::new();
    let session = Session::connect(Arc::new(MockConnector::new(ledger.clone())), "mock://a")
        .await
        .unwrap();
    let before = session.facts();

    ledger.set_spec_version(before.runtime_version.spec_version + 1);
    session.reconnect("mock://a").await.unwrap();
    let after = session.facts();

    assert!(!Arc::ptr_eq(&before.metadata, &after.metadata));
    assert_eq!(
        after.runtime_version.spec_version,
        before.runtime_version.spec_version + 1
    );
}

#[tokio::test]
async fn test_reconnect_to_other_chain_is_config_error() {
    let ledger = MockLedger::new();
    let other = MockLedger::with_genesis(H256([9u8; 32]));
    let connector = MockConnector::new(ledger.clone()).route("mock://other", other);
    let session = Session::connect(Arc::new(connector), "mock://a")
        .await
        .unwrap();

    let err = session.reconnect("mock://other").await.unwrap_err();
    assert!(matches!(err, ChainError::Config(_)));

    // Current connection is kept
    assert_eq!(session.address(), "mock://a");
    assert_eq!(session.facts().genesis_hash, ledger.genesis_hash());
}

#[tokio::test]
async fn test_endpoint_fallback() {
    let ledger = MockLedger::new();
    let connector = MockConnector::new(ledger).refuse("mock://a");
    let session = Session::connect_any(Arc::new(connector.clone()), &addrs(&["mock://a", "mock://b"]))
        .await
        .unwrap();
    assert_eq!(session.address(), "mock://b");

    connector.set_refused("mock://a", false);
    connector.set_refused("mock://b", true);
    assert_eq!(session.reconnect_any().await.unwrap(), "mock://a");

    connector.set_refused("mock://a", true);
    assert!(matches!(
        session.reconnect_any().await,
        Err(ChainError::Connection(_))
    ));
}

#[tokio::test]
async fn test_state_round_trip() {
    let ledger = MockLedger::new();
    let session = Session::connect(Arc::new(MockConnector::new(ledger.clone())), "mock://a")
        .await
        .unwrap();
    let reader = StateReader::new(Arc::new(session));

    let miner = AccountId32([3u8; 32]);
    let reward = RewardInfo {
        total_reward: 50,
        total_rewards_currently_available: 20,
        total_not_receive: 30,
    };
    ledger
        .set_storage(names::SMINER, names::REWARD_MAP, &[miner.encode()], reward.encode())
        .unwrap();

    assert_eq!(reader.reward_info(&miner).await.unwrap(), Some(reward));
    assert_eq!(reader.reward_info(&AccountId32([4u8; 32])).await.unwrap(), None);

    let genesis = ledger.best_block();
    ledger.produce_block();
    assert_eq!(reader.block_height().await.unwrap(), 1);
    assert_eq!(reader.block_height_at(genesis).await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_composite_key_lookup() {
    let ledger = MockLedger::new();
    let session = Session::connect(Arc::new(MockConnector::new(ledger.clone())), "mock://a")
        .await
        .unwrap();
    let reader = StateReader::new(Arc::new(session));

    let miner = AccountId32([5u8; 32]);
    let filler_id = vec![0xab; 64];
    let filler = FillerInfo {
        filler_size: 8 * 1024 * 1024,
        index: 1,
        block_num: 10,
        segment_size: 1024,
        scan_size: 16,
        miner_address: miner,
        filler_id: filler_id.clone(),
        filler_hash: filler_id.clone(),
    };
    ledger
        .set_storage(
            names::FILE_BANK,
            names::FILLER_MAP,
            &[miner.encode(), filler_id.encode()],
            filler.encode(),
        )
        .unwrap();

    assert_eq!(reader.filler(&miner, &filler_id).await.unwrap(), Some(filler));

    // Same filler id under another miner is a different key
    assert_eq!(
        reader.filler(&AccountId32([6u8; 32]), &filler_id).await.unwrap(),
        None
    );
}
