//! Storage Miner Chain Client
//!
//! Main client for the miner to interact with the ledger.

use std::sync::Arc;
use std::time::Duration;

use bucket_core::{AccountId32, H256};
use tracing::{info, warn};

use super::boundary::guard;
use super::builder::{AccountIdentity, SignOptions};
use super::engine::{ConfirmationOutcome, SubmissionEngine};
use super::error::Result;
use super::proofs::ProofOps;
use super::registration::RegistrationOps;
use super::rewards::RewardsOps;
use super::session::Session;
use super::state::StateReader;
use super::transport::Connector;
use super::types::{
    AccountInfo, ChallengeInfo, FillerInfo, MinerInfo, ProofInfo, RewardInfo, SchedulerInfo,
    SyncStatus,
};
use super::ws::WsConnector;
use crate::config::ChainSettings;

/// Main chain client for the storage miner
///
/// Every public operation runs behind a panic boundary: faults inside the
/// client surface as [`ChainError::Connection`](super::ChainError::Connection).
#[derive(Debug)]
pub struct ChainClient {
    /// Shared ledger session
    session: Arc<Session>,

    /// Signing identity of this miner
    identity: AccountIdentity,

    state: StateReader,

    engine: Arc<SubmissionEngine>,

    /// Registration operations
    registration: RegistrationOps,

    /// Proof and file operations
    proofs: ProofOps,

    /// Reward operations
    rewards: RewardsOps,
}

impl ChainClient {
    /// Connect over WebSocket using the configured endpoints and key
    pub async fn connect(settings: &ChainSettings) -> Result<Self> {
        let connector = WsConnector::new(Duration::from_secs(settings.request_timeout_secs));
        let identity = Self::load_identity(settings)?;
        Self::connect_with(Arc::new(connector), settings, identity).await
    }

    /// Connect through an arbitrary connector with an explicit identity
    pub async fn connect_with(
        connector: Arc<dyn Connector>,
        settings: &ChainSettings,
        identity: AccountIdentity,
    ) -> Result<Self> {
        let session = Arc::new(Session::connect_any(connector, &settings.rpc_addrs).await?);
        let engine = SubmissionEngine::with_timeout(
            session.clone(),
            Duration::from_secs(settings.tx_timeout_secs),
        )
        .with_sign_options(SignOptions {
            era: settings.era,
            tip: settings.tip as u128,
        });

        Ok(Self::new(session, Arc::new(engine), identity))
    }

    pub fn new(session: Arc<Session>, engine: Arc<SubmissionEngine>, identity: AccountIdentity) -> Self {
        let state = StateReader::new(session.clone());

        info!(
            rpc = %session.address(),
            account = %identity.account(),
            signer = identity.is_signer(),
            "Miner chain client initialized"
        );

        Self {
            registration: RegistrationOps::new(engine.clone(), state.clone()),
            proofs: ProofOps::new(engine.clone(), state.clone()),
            rewards: RewardsOps::new(engine.clone(), state.clone()),
            session,
            identity,
            state,
            engine,
        }
    }

    /// Resolve the signing identity from configuration
    ///
    /// Precedence: hex seed (ed25519), secret URI (sr25519), keypair file
    /// (ed25519). Without any of them the client can only read state and an
    /// ephemeral identity is used.
    pub fn load_identity(settings: &ChainSettings) -> Result<AccountIdentity> {
        if let Some(seed) = &settings.signing_seed {
            return AccountIdentity::from_seed_hex(seed);
        }
        if let Some(uri) = &settings.secret_uri {
            return AccountIdentity::from_secret_uri(uri);
        }
        if let Some(path) = &settings.keypair_path {
            return AccountIdentity::from_keypair_file(path);
        }
        warn!("No signing key configured, using ephemeral identity");
        Ok(AccountIdentity::generate())
    }

    pub fn account(&self) -> &AccountId32 {
        self.identity.account()
    }

    pub fn identity(&self) -> &AccountIdentity {
        &self.identity
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn state(&self) -> &StateReader {
        &self.state
    }

    pub fn engine(&self) -> &Arc<SubmissionEngine> {
        &self.engine
    }

    // =========================================================================
    // SESSION
    // =========================================================================

    pub async fn health_check(&self) -> bool {
        self.session.health_check().await
    }

    /// Reconnect across the configured endpoints
    pub async fn reconnect(&self) -> Result<String> {
        guard("reconnect", self.session.reconnect_any()).await
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub async fn account_info(&self, account: &AccountId32) -> Result<Option<AccountInfo>> {
        guard("account_info", self.state.account_info(account)).await
    }

    pub async fn miner_info(&self, account: &AccountId32) -> Result<Option<MinerInfo>> {
        guard("miner_info", self.registration.miner_info(account)).await
    }

    pub async fn is_registered(&self) -> Result<bool> {
        guard("is_registered", self.registration.is_registered(self.account())).await
    }

    pub async fn reward_info(&self, account: &AccountId32) -> Result<RewardInfo> {
        guard("reward_info", self.rewards.reward_info(account)).await
    }

    pub async fn schedulers(&self) -> Result<Vec<SchedulerInfo>> {
        guard("schedulers", async {
            Ok(self.state.schedulers().await?.unwrap_or_default())
        })
        .await
    }

    pub async fn challenges(&self, peer_id: u64) -> Result<Vec<ChallengeInfo>> {
        guard("challenges", self.proofs.challenges(peer_id)).await
    }

    pub async fn invalid_files(&self, peer_id: u64) -> Result<Vec<Vec<u8>>> {
        guard("invalid_files", self.proofs.invalid_files(peer_id)).await
    }

    pub async fn filler(&self, miner: &AccountId32, filler_id: &[u8]) -> Result<Option<FillerInfo>> {
        guard("filler", self.proofs.filler(miner, filler_id)).await
    }

    pub async fn block_height(&self) -> Result<u64> {
        guard("block_height", self.state.block_height()).await
    }

    pub async fn block_height_at(&self, hash: H256) -> Result<Option<u64>> {
        guard("block_height_at", self.state.block_height_at(hash)).await
    }

    pub async fn sync_status(&self) -> Result<SyncStatus> {
        guard("sync_status", self.state.sync_status()).await
    }

    /// Raw storage value of `module.item` under SCALE-encoded keys
    pub async fn query_raw(&self, module: &str, item: &str, keys: &[Vec<u8>]) -> Result<Option<Vec<u8>>> {
        guard("query_raw", self.state.fetch_raw(module, item, keys, None)).await
    }

    // =========================================================================
    // REGISTRATION OPERATIONS
    // =========================================================================

    /// Register this miner; the beneficiary defaults to the miner account
    pub async fn register(
        &self,
        beneficiary: Option<&AccountId32>,
        service_addr: &str,
        pledge_tokens: u128,
    ) -> Result<ConfirmationOutcome> {
        let beneficiary = beneficiary.unwrap_or(self.identity.account());
        guard(
            "register",
            self.registration
                .register(&self.identity, beneficiary, service_addr, pledge_tokens),
        )
        .await
    }

    pub async fn increase_collateral(&self, tokens: u128) -> Result<ConfirmationOutcome> {
        guard(
            "increase_collateral",
            self.registration.increase_collateral(&self.identity, tokens),
        )
        .await
    }

    pub async fn exit(&self) -> Result<ConfirmationOutcome> {
        guard("exit", self.registration.exit(&self.identity)).await
    }

    pub async fn withdraw(&self) -> Result<ConfirmationOutcome> {
        guard("withdraw", self.registration.withdraw(&self.identity)).await
    }

    pub async fn update_address(&self, service_addr: &str) -> Result<ConfirmationOutcome> {
        guard(
            "update_address",
            self.registration.update_address(&self.identity, service_addr),
        )
        .await
    }

    pub async fn update_beneficiary(&self, beneficiary: &AccountId32) -> Result<ConfirmationOutcome> {
        guard(
            "update_beneficiary",
            self.registration.update_beneficiary(&self.identity, beneficiary),
        )
        .await
    }

    // =========================================================================
    // PROOF OPERATIONS
    // =========================================================================

    pub async fn submit_proofs(&self, proofs: Vec<ProofInfo>) -> Result<ConfirmationOutcome> {
        guard("submit_proofs", self.proofs.submit_proofs(&self.identity, proofs)).await
    }

    pub async fn clear_invalid_file(&self, file_id: &[u8]) -> Result<ConfirmationOutcome> {
        guard(
            "clear_invalid_file",
            self.proofs.clear_invalid_file(&self.identity, file_id),
        )
        .await
    }

    pub async fn clear_fillers(&self) -> Result<ConfirmationOutcome> {
        guard("clear_fillers", self.proofs.clear_fillers(&self.identity)).await
    }

    // =========================================================================
    // REWARD OPERATIONS
    // =========================================================================

    pub async fn receive_rewards(&self) -> Result<ConfirmationOutcome> {
        guard("receive_rewards", self.rewards.receive_rewards(&self.identity)).await
    }

    /// Claim rewards only if some are available
    pub async fn claim_if_available(&self) -> Result<Option<ConfirmationOutcome>> {
        if !guard(
            "has_claimable_rewards",
            self.rewards.has_claimable_rewards(self.identity.account()),
        )
        .await?
        {
            return Ok(None);
        }
        self.receive_rewards().await.map(Some)
    }
}
