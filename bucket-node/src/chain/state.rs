//! Chain state reader
//!
//! Lookups are described as (module, item, encoded keys). Key derivation uses
//! the session's metadata; a missing record is `Ok(None)`, never an error.

use std::sync::Arc;

use bucket_core::{storage_key, AccountId32, StorageKey, H256};
use parity_scale_codec::{Decode, Encode};
use tracing::trace;

use super::error::{ChainError, Result};
use super::session::Session;
use super::types::{
    names, AccountInfo, ChallengeInfo, FillerInfo, MinerInfo, RewardInfo, SchedulerInfo, SyncStatus,
};

/// Reads and decodes storage values through a [`Session`]
#[derive(Clone, Debug)]
pub struct StateReader {
    session: Arc<Session>,
}

impl StateReader {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Derive the storage key for `module.item` from encoded key arguments
    pub fn storage_key(&self, module: &str, item: &str, keys: &[Vec<u8>]) -> Result<StorageKey> {
        let metadata = self.session.metadata();
        Ok(storage_key(&metadata, module, item, keys)?)
    }

    /// Raw value under an already derived key
    pub async fn fetch_key(&self, key: &StorageKey, at: Option<H256>) -> Result<Option<Vec<u8>>> {
        trace!(key = %key, at = ?at, "Fetching storage");
        self.session.transport().storage(key, at).await
    }

    pub async fn fetch_raw(
        &self,
        module: &str,
        item: &str,
        keys: &[Vec<u8>],
        at: Option<H256>,
    ) -> Result<Option<Vec<u8>>> {
        let key = self.storage_key(module, item, keys)?;
        self.fetch_key(&key, at).await
    }

    /// Fetch and decode `module.item` at the latest block
    pub async fn fetch<T: Decode>(
        &self,
        module: &str,
        item: &str,
        keys: &[Vec<u8>],
    ) -> Result<Option<T>> {
        self.fetch_at(module, item, keys, None).await
    }

    pub async fn fetch_at<T: Decode>(
        &self,
        module: &str,
        item: &str,
        keys: &[Vec<u8>],
        at: Option<H256>,
    ) -> Result<Option<T>> {
        match self.fetch_raw(module, item, keys, at).await? {
            Some(bytes) => T::decode(&mut &bytes[..]).map(Some).map_err(|e| {
                ChainError::Decode(format!("{}.{}: {}", module, item, e))
            }),
            None => Ok(None),
        }
    }

    // =========================================================================
    // TYPED QUERIES
    // =========================================================================

    pub async fn account_info(&self, account: &AccountId32) -> Result<Option<AccountInfo>> {
        self.fetch(names::SYSTEM, names::SYSTEM_ACCOUNT, &[account.encode()])
            .await
    }

    /// Next transaction sequence number of `account`
    ///
    /// An account without an on-chain record is an [`ChainError::UnknownAccount`].
    pub async fn nonce(&self, account: &AccountId32) -> Result<u32> {
        self.account_info(account)
            .await?
            .map(|info| info.nonce)
            .ok_or_else(|| ChainError::UnknownAccount(account.to_string()))
    }

    pub async fn miner_info(&self, account: &AccountId32) -> Result<Option<MinerInfo>> {
        self.fetch(names::SMINER, names::MINER_ITEMS, &[account.encode()])
            .await
    }

    pub async fn reward_info(&self, account: &AccountId32) -> Result<Option<RewardInfo>> {
        self.fetch(names::SMINER, names::REWARD_MAP, &[account.encode()])
            .await
    }

    pub async fn schedulers(&self) -> Result<Option<Vec<SchedulerInfo>>> {
        self.fetch(names::FILE_MAP, names::SCHEDULER_INFO, &[]).await
    }

    pub async fn challenges(&self, peer_id: u64) -> Result<Option<Vec<ChallengeInfo>>> {
        self.fetch(names::SEGMENT_BOOK, names::CHALLENGE_MAP, &[peer_id.encode()])
            .await
    }

    pub async fn invalid_files(&self, peer_id: u64) -> Result<Option<Vec<Vec<u8>>>> {
        self.fetch(names::FILE_BANK, names::INVALID_FILE, &[peer_id.encode()])
            .await
    }

    /// Filler record under the composite key (miner, filler id)
    pub async fn filler(&self, miner: &AccountId32, filler_id: &[u8]) -> Result<Option<FillerInfo>> {
        self.fetch(
            names::FILE_BANK,
            names::FILLER_MAP,
            &[miner.encode(), filler_id.to_vec().encode()],
        )
        .await
    }

    /// Number of the best block
    pub async fn block_height(&self) -> Result<u64> {
        self.session
            .transport()
            .header(None)
            .await?
            .map(|h| h.number)
            .ok_or_else(|| ChainError::connection("node returned no best header"))
    }

    /// Number of block `hash`, if the node knows it
    pub async fn block_height_at(&self, hash: H256) -> Result<Option<u64>> {
        Ok(self
            .session
            .transport()
            .header(Some(hash))
            .await?
            .map(|h| h.number))
    }

    pub async fn sync_status(&self) -> Result<SyncStatus> {
        let health = self.session.transport().health().await?;
        Ok(SyncStatus {
            peers: health.peers,
            is_syncing: health.is_syncing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{MockConnector, MockLedger};

    async fn reader(ledger: &MockLedger) -> StateReader {
        let session = Session::connect(Arc::new(MockConnector::new(ledger.clone())), "mock://a")
            .await
            .unwrap();
        StateReader::new(Arc::new(session))
    }

    #[tokio::test]
    async fn test_absent_record_is_none() {
        let ledger = MockLedger::new();
        let reader = reader(&ledger).await;

        let who = AccountId32([8u8; 32]);
        assert_eq!(reader.account_info(&who).await.unwrap(), None);
        assert!(matches!(
            reader.nonce(&who).await,
            Err(ChainError::UnknownAccount(_))
        ));
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let ledger = MockLedger::new();
        let who = AccountId32([8u8; 32]);
        ledger.fund_account(&who, 7, 1_000).unwrap();
        let reader = reader(&ledger).await;

        let info = reader.account_info(&who).await.unwrap().unwrap();
        assert_eq!(info.nonce, 7);
        assert_eq!(info.data.free, 1_000);
        assert_eq!(reader.nonce(&who).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_undecodable_value_is_error() {
        let ledger = MockLedger::new();
        let who = AccountId32([8u8; 32]);
        ledger
            .set_storage(names::SYSTEM, names::SYSTEM_ACCOUNT, &[who.encode()], vec![1, 2])
            .unwrap();
        let reader = reader(&ledger).await;

        assert!(matches!(
            reader.account_info(&who).await,
            Err(ChainError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_item_and_arity() {
        let ledger = MockLedger::new();
        let reader = reader(&ledger).await;

        assert!(matches!(
            reader.storage_key("Sminer", "Nope", &[]),
            Err(ChainError::UnsupportedOperation { .. })
        ));
        assert!(matches!(
            reader.storage_key(names::FILE_BANK, names::FILLER_MAP, &[vec![0u8; 32]]),
            Err(ChainError::InvalidArguments(_))
        ));
    }
}
