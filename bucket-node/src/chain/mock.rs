//! In-memory ledger for integration testing.
//!
//! [`MockLedger`] implements [`LedgerTransport`] over a simulated chain so the
//! session, state reader, builder and engine can be exercised without a node.
//!
//! # Features
//!
//! - **Real metadata**: V14 metadata generated from the runtime's call, event
//!   and storage types, decoded by the client exactly as on a live node
//! - **Simulated runtime**: signed extrinsics are verified (signature, nonce)
//!   and the miner calls are applied to storage, emitting their events
//! - **Submission plans**: include with custom events, never include, fail the
//!   subscription, reject in the pool or fail the submit request
//! - **Counters**: submissions and unsubscribes for leak checks
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bucket_node::chain::mock::{MockConnector, MockLedger, SubmissionPlan};
//! use bucket_node::chain::Session;
//!
//! # async fn example() {
//! let ledger = MockLedger::new();
//! let session = Session::connect(Arc::new(MockConnector::new(ledger.clone())), "mock://a")
//!     .await
//!     .unwrap();
//! ledger.plan_next(SubmissionPlan::Never);
//! # }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bucket_core::events::{encode_log, encode_record};
use bucket_core::hashing::blake2_256;
use bucket_core::storage_key::item_prefix;
use bucket_core::{
    signing_payload, storage_key, AccountId32, Era, ExtrinsicParams, Metadata, Phase,
    SignatureKind, SignedExtrinsic, StorageKey, H256,
};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use frame_metadata::v14::{
    ExtrinsicMetadata, PalletCallMetadata, PalletEventMetadata, PalletMetadata,
    PalletStorageMetadata, RuntimeMetadataV14, StorageEntryMetadata, StorageEntryModifier,
    StorageEntryType, StorageHasher,
};
use frame_metadata::{RuntimeMetadata, RuntimeMetadataPrefixed, META_RESERVED};
use parity_scale_codec::{Decode, Encode};
use parking_lot::Mutex;
use scale_info::{meta_type, TypeInfo};
use tokio::sync::mpsc;
use tracing::debug;

use super::error::{ChainError, Result};
use super::keyring;
use super::transport::{
    Connector, Header, LedgerTransport, NodeHealth, RuntimeVersion, StatusSubscription, TxStatus,
};
use super::types::{
    names, AccountData, AccountInfo, ChallengeInfo, FillerInfo, MinerInfo, ProofInfo, RewardInfo,
    SchedulerInfo,
};

pub const SYSTEM_INDEX: u8 = 0;
pub const FILE_BANK_INDEX: u8 = 3;
pub const FILE_MAP_INDEX: u8 = 4;
pub const SMINER_INDEX: u8 = 5;
pub const SEGMENT_BOOK_INDEX: u8 = 6;

const MOCK_SPEC_VERSION: u32 = 100;
const MOCK_TX_VERSION: u32 = 1;
const MOCK_WEIGHT: u64 = 1_000_000;

// =============================================================================
// RUNTIME TYPES
// =============================================================================

#[derive(Encode, Decode, TypeInfo)]
#[allow(dead_code)]
enum SystemEvent {
    ExtrinsicSuccess { weight: u64 },
    ExtrinsicFailed { error: Vec<u8>, weight: u64 },
}

#[derive(Encode, Decode, TypeInfo)]
#[allow(non_camel_case_types)]
enum SminerCall {
    regnstk {
        beneficiary: AccountId32,
        ip: Vec<u8>,
        staking_val: u128,
    },
    increase_collateral {
        #[codec(compact)]
        collaterals: u128,
    },
    update_beneficiary {
        acc: AccountId32,
    },
    update_ip {
        ip: Vec<u8>,
    },
    exit_miner,
    withdraw,
    receive_reward,
}

#[derive(Encode, Decode, TypeInfo)]
#[allow(dead_code)]
enum SminerEvent {
    Registered { acc: AccountId32, staking_val: u128 },
    IncreaseCollateral { acc: AccountId32, balance: u128 },
    UpdateBeneficiary { acc: AccountId32, new: AccountId32 },
    UpdateIp { acc: AccountId32, old: Vec<u8>, new: Vec<u8> },
    MinerExit { acc: AccountId32 },
    Withdraw { acc: AccountId32 },
    Receive { acc: AccountId32, reward: u128 },
}

#[derive(Encode, Decode, TypeInfo)]
#[allow(non_camel_case_types)]
enum SegmentBookCall {
    submit_challenge_prove { prove_info: Vec<ProofInfo> },
}

#[derive(Encode, Decode, TypeInfo)]
enum SegmentBookEvent {
    ChallengeProof { miner: AccountId32, file_id: Vec<u8> },
}

#[derive(Encode, Decode, TypeInfo)]
#[allow(non_camel_case_types)]
enum FileBankCall {
    clear_invalid_file { file_hash: Vec<u8> },
    clear_all_filler,
}

#[derive(Encode, Decode, TypeInfo)]
#[allow(dead_code)]
enum FileBankEvent {
    ClearInvalidFile { acc: AccountId32, file_hash: Vec<u8> },
    ClearAllFiller { acc: AccountId32 },
}

fn plain<T: TypeInfo + 'static>(name: &'static str) -> StorageEntryMetadata {
    StorageEntryMetadata {
        name,
        modifier: StorageEntryModifier::Optional,
        ty: StorageEntryType::Plain(meta_type::<T>()),
        default: vec![],
        docs: vec![],
    }
}

fn map<K: TypeInfo + 'static, V: TypeInfo + 'static>(
    name: &'static str,
    hashers: Vec<StorageHasher>,
) -> StorageEntryMetadata {
    StorageEntryMetadata {
        name,
        modifier: StorageEntryModifier::Optional,
        ty: StorageEntryType::Map {
            hashers,
            key: meta_type::<K>(),
            value: meta_type::<V>(),
        },
        default: vec![],
        docs: vec![],
    }
}

fn pallet(
    name: &'static str,
    index: u8,
    entries: Vec<StorageEntryMetadata>,
    calls: Option<PalletCallMetadata>,
    event: Option<PalletEventMetadata>,
) -> PalletMetadata {
    PalletMetadata {
        name,
        storage: Some(PalletStorageMetadata {
            prefix: name,
            entries,
        }),
        calls,
        event,
        constants: vec![],
        error: None,
        index,
    }
}

/// SCALE-encoded V14 metadata of the simulated runtime
pub fn runtime_metadata() -> Vec<u8> {
    use StorageHasher::Blake2_128Concat;

    let pallets = vec![
        pallet(
            names::SYSTEM,
            SYSTEM_INDEX,
            vec![
                map::<AccountId32, AccountInfo>(names::SYSTEM_ACCOUNT, vec![Blake2_128Concat]),
                plain::<Vec<u8>>(names::SYSTEM_EVENTS),
            ],
            None,
            Some(PalletEventMetadata {
                ty: meta_type::<SystemEvent>(),
            }),
        ),
        pallet(
            names::FILE_BANK,
            FILE_BANK_INDEX,
            vec![
                map::<u64, Vec<Vec<u8>>>(names::INVALID_FILE, vec![Blake2_128Concat]),
                map::<(AccountId32, Vec<u8>), FillerInfo>(
                    names::FILLER_MAP,
                    vec![Blake2_128Concat, Blake2_128Concat],
                ),
            ],
            Some(PalletCallMetadata {
                ty: meta_type::<FileBankCall>(),
            }),
            Some(PalletEventMetadata {
                ty: meta_type::<FileBankEvent>(),
            }),
        ),
        pallet(
            names::FILE_MAP,
            FILE_MAP_INDEX,
            vec![plain::<Vec<SchedulerInfo>>(names::SCHEDULER_INFO)],
            None,
            None,
        ),
        pallet(
            names::SMINER,
            SMINER_INDEX,
            vec![
                map::<AccountId32, MinerInfo>(names::MINER_ITEMS, vec![Blake2_128Concat]),
                map::<AccountId32, RewardInfo>(names::REWARD_MAP, vec![Blake2_128Concat]),
            ],
            Some(PalletCallMetadata {
                ty: meta_type::<SminerCall>(),
            }),
            Some(PalletEventMetadata {
                ty: meta_type::<SminerEvent>(),
            }),
        ),
        pallet(
            names::SEGMENT_BOOK,
            SEGMENT_BOOK_INDEX,
            vec![map::<u64, Vec<ChallengeInfo>>(
                names::CHALLENGE_MAP,
                vec![Blake2_128Concat],
            )],
            Some(PalletCallMetadata {
                ty: meta_type::<SegmentBookCall>(),
            }),
            Some(PalletEventMetadata {
                ty: meta_type::<SegmentBookEvent>(),
            }),
        ),
    ];

    let extrinsic = ExtrinsicMetadata {
        ty: meta_type::<()>(),
        version: 4,
        signed_extensions: vec![],
    };
    let md = RuntimeMetadataV14::new(pallets, extrinsic, meta_type::<()>());
    RuntimeMetadataPrefixed(META_RESERVED, RuntimeMetadata::V14(md)).encode()
}

/// One event record as it appears in a block's event log
fn event_record<E: Encode>(pallet: u8, event: &E) -> Vec<u8> {
    let bytes = event.encode();
    encode_record(Phase::ApplyExtrinsic(1), pallet, bytes[0], &bytes[1..])
}

fn success_record() -> Vec<u8> {
    event_record(SYSTEM_INDEX, &SystemEvent::ExtrinsicSuccess { weight: MOCK_WEIGHT })
}

fn failed_record(reason: &str) -> Vec<u8> {
    event_record(
        SYSTEM_INDEX,
        &SystemEvent::ExtrinsicFailed {
            error: reason.as_bytes().to_vec(),
            weight: MOCK_WEIGHT,
        },
    )
}

// =============================================================================
// LEDGER STATE
// =============================================================================

/// What the ledger does with the next submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionPlan {
    /// Apply the call through the simulated runtime (default)
    Apply,
    /// Include in a new block carrying exactly these event records, without
    /// applying the call
    Include { events: Vec<Vec<u8>> },
    /// Accept into the pool but never include
    Never,
    /// Accept, then fail the status subscription
    SubscriptionFailure(String),
    /// Accept, then report this terminal pool status
    Reject(TxStatus),
    /// Fail the submit request itself
    SubmitError(String),
}

impl SubmissionPlan {
    /// Include with a bare `System.ExtrinsicSuccess` event
    pub fn include_without_events() -> Self {
        SubmissionPlan::Include {
            events: vec![success_record()],
        }
    }
}

#[derive(Debug, Clone)]
struct MockBlock {
    hash: H256,
    number: u64,
    parent_hash: H256,
    events: Vec<u8>,
}

struct Watcher {
    _statuses: mpsc::UnboundedSender<TxStatus>,
    _errors: mpsc::UnboundedSender<String>,
}

struct LedgerState {
    metadata_bytes: Vec<u8>,
    metadata: Option<Arc<Metadata>>,
    genesis_hash: H256,
    runtime_version: RuntimeVersion,
    storage: BTreeMap<Vec<u8>, Vec<u8>>,
    blocks: Vec<MockBlock>,
    healthy: bool,
    plans: VecDeque<SubmissionPlan>,
    watchers: HashMap<String, Watcher>,
    next_subscription: u64,
    next_peer_id: u64,
    submitted: Vec<SignedExtrinsic>,
    submission_count: usize,
    unsubscribe_count: usize,
}

/// Simulated ledger shared between connections
#[derive(Clone)]
pub struct MockLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self::with_genesis(H256(blake2_256(b"bucket mock ledger")))
    }

    /// A ledger for a different chain instance
    pub fn with_genesis(genesis_hash: H256) -> Self {
        let metadata_bytes = runtime_metadata();
        let metadata = Metadata::from_bytes(&metadata_bytes).ok().map(Arc::new);
        let genesis = MockBlock {
            hash: genesis_hash,
            number: 0,
            parent_hash: H256::default(),
            events: encode_log(&[]),
        };

        Self {
            state: Arc::new(Mutex::new(LedgerState {
                metadata_bytes,
                metadata,
                genesis_hash,
                runtime_version: RuntimeVersion {
                    spec_version: MOCK_SPEC_VERSION,
                    transaction_version: MOCK_TX_VERSION,
                },
                storage: BTreeMap::new(),
                blocks: vec![genesis],
                healthy: true,
                plans: VecDeque::new(),
                watchers: HashMap::new(),
                next_subscription: 1,
                next_peer_id: 1,
                submitted: Vec::new(),
                submission_count: 0,
                unsubscribe_count: 0,
            })),
        }
    }

    // -------------------------------------------------------------------------
    // Test controls
    // -------------------------------------------------------------------------

    pub fn genesis_hash(&self) -> H256 {
        self.state.lock().genesis_hash
    }

    pub fn runtime_version(&self) -> RuntimeVersion {
        self.state.lock().runtime_version
    }

    /// Simulate a runtime upgrade
    pub fn set_spec_version(&self, spec_version: u32) {
        self.state.lock().runtime_version.spec_version = spec_version;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().healthy = healthy;
    }

    /// Queue the behavior of a future submission
    pub fn plan_next(&self, plan: SubmissionPlan) {
        self.state.lock().plans.push_back(plan);
    }

    pub fn submission_count(&self) -> usize {
        self.state.lock().submission_count
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.state.lock().unsubscribe_count
    }

    /// Subscriptions not yet released
    pub fn open_subscriptions(&self) -> usize {
        self.state.lock().watchers.len()
    }

    /// Extrinsics that passed verification, in submission order
    pub fn submitted(&self) -> Vec<SignedExtrinsic> {
        self.state.lock().submitted.clone()
    }

    pub fn best_block(&self) -> H256 {
        let state = self.state.lock();
        state.best().hash
    }

    /// Append an empty block
    pub fn produce_block(&self) -> H256 {
        self.state.lock().push_block(vec![])
    }

    /// Raw event log of block `hash`
    pub fn events_at(&self, hash: H256) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state
            .blocks
            .iter()
            .find(|b| b.hash == hash)
            .map(|b| b.events.clone())
    }

    /// Encode an event record of the simulated runtime by name
    ///
    /// `fields` must be the SCALE encoding of the event's fields in order.
    pub fn event_record(&self, module: &str, event: &str, fields: &[u8]) -> Result<Vec<u8>> {
        let metadata = self.state.lock().metadata()?;
        let m = metadata.module(module)?;
        let e = m.event(event).ok_or_else(|| ChainError::UnsupportedOperation {
            module: module.to_string(),
            method: event.to_string(),
        })?;
        Ok(encode_record(Phase::ApplyExtrinsic(1), m.index, e.index, fields))
    }

    /// Write a raw storage value
    pub fn set_storage(&self, module: &str, item: &str, keys: &[Vec<u8>], value: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock();
        let key = state.key(module, item, keys)?;
        state.storage.insert(key.0, value);
        Ok(())
    }

    pub fn storage_value(&self, module: &str, item: &str, keys: &[Vec<u8>]) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock();
        let key = state.key(module, item, keys)?;
        Ok(state.storage.get(&key.0).cloned())
    }

    /// Create or overwrite the `System.Account` record of `who`
    pub fn fund_account(&self, who: &AccountId32, nonce: u32, free: u128) -> Result<()> {
        let info = AccountInfo {
            nonce,
            providers: 1,
            data: AccountData {
                free,
                ..Default::default()
            },
            ..Default::default()
        };
        self.set_storage(names::SYSTEM, names::SYSTEM_ACCOUNT, &[who.encode()], info.encode())
    }

    pub fn nonce_of(&self, who: &AccountId32) -> Option<u32> {
        let state = self.state.lock();
        state.account(who).ok().flatten().map(|info| info.nonce)
    }

    fn check_health(&self) -> Result<()> {
        if self.state.lock().healthy {
            Ok(())
        } else {
            Err(ChainError::connection("mock node unreachable"))
        }
    }
}

impl LedgerState {
    fn metadata(&self) -> Result<Arc<Metadata>> {
        self.metadata
            .clone()
            .ok_or_else(|| ChainError::Decode("mock runtime metadata unavailable".to_string()))
    }

    fn key(&self, module: &str, item: &str, keys: &[Vec<u8>]) -> Result<StorageKey> {
        let metadata = self.metadata()?;
        Ok(storage_key(&metadata, module, item, keys)?)
    }

    fn events_key(&self) -> Result<StorageKey> {
        self.key(names::SYSTEM, names::SYSTEM_EVENTS, &[])
    }

    fn best(&self) -> &MockBlock {
        // the genesis block is never removed
        &self.blocks[self.blocks.len() - 1]
    }

    fn push_block(&mut self, records: Vec<Vec<u8>>) -> H256 {
        let parent = self.best().clone();
        let number = parent.number + 1;
        let events = encode_log(&records);

        let mut seed = parent.hash.0.to_vec();
        seed.extend(number.encode());
        seed.extend(&events);
        let hash = H256(blake2_256(&seed));

        self.blocks.push(MockBlock {
            hash,
            number,
            parent_hash: parent.hash,
            events,
        });
        hash
    }

    fn get<T: Decode>(&self, module: &str, item: &str, keys: &[Vec<u8>]) -> Result<Option<T>> {
        let key = self.key(module, item, keys)?;
        match self.storage.get(&key.0) {
            Some(bytes) => Ok(Some(T::decode(&mut &bytes[..])?)),
            None => Ok(None),
        }
    }

    fn put<T: Encode>(&mut self, module: &str, item: &str, keys: &[Vec<u8>], value: &T) -> Result<()> {
        let key = self.key(module, item, keys)?;
        self.storage.insert(key.0, value.encode());
        Ok(())
    }

    fn remove(&mut self, module: &str, item: &str, keys: &[Vec<u8>]) -> Result<()> {
        let key = self.key(module, item, keys)?;
        self.storage.remove(&key.0);
        Ok(())
    }

    /// All raw values of a storage map, keyed by full storage key
    fn entries(&self, module: &str, item: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let metadata = self.metadata()?;
        let (m, entry) = metadata.storage_entry(module, item)?;
        let prefix = item_prefix(&m.storage_prefix, &entry.name);
        Ok(self
            .storage
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn account(&self, who: &AccountId32) -> Result<Option<AccountInfo>> {
        self.get(names::SYSTEM, names::SYSTEM_ACCOUNT, &[who.encode()])
    }

    fn checkpoint(&self, era: Era) -> Option<H256> {
        match era {
            Era::Immortal => Some(self.genesis_hash),
            Era::Mortal { .. } => {
                let birth = era.birth(self.best().number);
                self.blocks.get(birth as usize).map(|b| b.hash)
            }
        }
    }

    /// Verify signature and nonce the way the transaction pool does
    fn validate(&self, xt: &SignedExtrinsic) -> Result<AccountInfo> {
        let checkpoint = self
            .checkpoint(xt.era)
            .ok_or_else(|| ChainError::connection("rpc error 1010: Invalid Transaction: ancient birth block"))?;
        let params = ExtrinsicParams {
            era: xt.era,
            nonce: xt.nonce,
            tip: xt.tip,
            spec_version: self.runtime_version.spec_version,
            transaction_version: self.runtime_version.transaction_version,
            genesis_hash: self.genesis_hash,
            checkpoint,
        };
        let payload = signing_payload(&xt.call, &params);
        let valid = match xt.kind {
            SignatureKind::Ed25519 => VerifyingKey::from_bytes(xt.signer.as_bytes())
                .map(|key| key.verify(&payload, &Signature::from_bytes(&xt.signature)).is_ok())
                .unwrap_or(false),
            SignatureKind::Sr25519 => keyring::verify(&xt.signer.0, &payload, &xt.signature),
        };
        if !valid {
            return Err(ChainError::connection(
                "rpc error 1010: Invalid Transaction: Transaction has a bad signature",
            ));
        }

        let info = self.account(&xt.signer)?.ok_or_else(|| {
            ChainError::connection(
                "rpc error 1010: Invalid Transaction: Inability to pay some fees",
            )
        })?;
        if xt.nonce < info.nonce {
            return Err(ChainError::connection(
                "rpc error 1010: Invalid Transaction: Transaction is outdated",
            ));
        }
        Ok(info)
    }

    // -------------------------------------------------------------------------
    // Simulated runtime
    // -------------------------------------------------------------------------

    /// Apply a call, returning the block's event records
    fn dispatch(&mut self, signer: &AccountId32, call: &[u8]) -> Result<Vec<Vec<u8>>> {
        let (&pallet, mut args) = call
            .split_first()
            .ok_or_else(|| ChainError::Decode("empty call".to_string()))?;

        let events = match pallet {
            SMINER_INDEX => self.dispatch_sminer(signer, SminerCall::decode(&mut args)?)?,
            SEGMENT_BOOK_INDEX => {
                self.dispatch_segment_book(SegmentBookCall::decode(&mut args)?)?
            }
            FILE_BANK_INDEX => self.dispatch_file_bank(signer, FileBankCall::decode(&mut args)?)?,
            other => Err(format!("no calls in pallet {}", other)),
        };

        Ok(match events {
            Ok(mut records) => {
                records.push(success_record());
                records
            }
            Err(reason) => {
                debug!(reason = %reason, "Simulated call failed");
                vec![failed_record(&reason)]
            }
        })
    }

    fn miner(&self, who: &AccountId32) -> Result<Option<MinerInfo>> {
        self.get(names::SMINER, names::MINER_ITEMS, &[who.encode()])
    }

    fn dispatch_sminer(
        &mut self,
        signer: &AccountId32,
        call: SminerCall,
    ) -> Result<std::result::Result<Vec<Vec<u8>>, String>> {
        let acc = *signer;
        let existing = self.miner(signer)?;

        let event = match (call, existing) {
            (
                SminerCall::regnstk {
                    beneficiary,
                    ip,
                    staking_val,
                },
                None,
            ) => {
                let miner = MinerInfo {
                    peer_id: self.next_peer_id,
                    beneficiary,
                    service_addr: ip,
                    collaterals: staking_val,
                    earnings: 0,
                    locked: 0,
                    state: b"positive".to_vec(),
                    power: 0,
                    space: 0,
                    public_key: signer.0.to_vec(),
                };
                self.next_peer_id += 1;
                self.put(names::SMINER, names::MINER_ITEMS, &[acc.encode()], &miner)?;
                SminerEvent::Registered { acc, staking_val }
            }
            (SminerCall::regnstk { .. }, Some(_)) => {
                return Ok(Err("AlreadyRegistered".to_string()))
            }
            (SminerCall::receive_reward, _) => {
                let reward: Option<RewardInfo> =
                    self.get(names::SMINER, names::REWARD_MAP, &[acc.encode()])?;
                let Some(mut reward) = reward.filter(|r| r.total_rewards_currently_available > 0)
                else {
                    return Ok(Err("NoReward".to_string()));
                };
                let amount = reward.total_rewards_currently_available;
                reward.total_rewards_currently_available = 0;
                self.put(names::SMINER, names::REWARD_MAP, &[acc.encode()], &reward)?;
                SminerEvent::Receive {
                    acc,
                    reward: amount,
                }
            }
            (_, None) => return Ok(Err("NotMiner".to_string())),
            (SminerCall::increase_collateral { collaterals }, Some(mut miner)) => {
                miner.collaterals = miner.collaterals.saturating_add(collaterals);
                self.put(names::SMINER, names::MINER_ITEMS, &[acc.encode()], &miner)?;
                SminerEvent::IncreaseCollateral {
                    acc,
                    balance: miner.collaterals,
                }
            }
            (SminerCall::update_beneficiary { acc: new }, Some(mut miner)) => {
                miner.beneficiary = new;
                self.put(names::SMINER, names::MINER_ITEMS, &[acc.encode()], &miner)?;
                SminerEvent::UpdateBeneficiary { acc, new }
            }
            (SminerCall::update_ip { ip }, Some(mut miner)) => {
                let old = std::mem::replace(&mut miner.service_addr, ip.clone());
                self.put(names::SMINER, names::MINER_ITEMS, &[acc.encode()], &miner)?;
                SminerEvent::UpdateIp { acc, old, new: ip }
            }
            (SminerCall::exit_miner, Some(mut miner)) => {
                miner.state = b"exit".to_vec();
                self.put(names::SMINER, names::MINER_ITEMS, &[acc.encode()], &miner)?;
                SminerEvent::MinerExit { acc }
            }
            (SminerCall::withdraw, Some(miner)) => {
                if miner.state != b"exit" {
                    return Ok(Err("NotExisted".to_string()));
                }
                self.remove(names::SMINER, names::MINER_ITEMS, &[acc.encode()])?;
                SminerEvent::Withdraw { acc }
            }
        };

        Ok(Ok(vec![event_record(SMINER_INDEX, &event)]))
    }

    fn dispatch_segment_book(
        &mut self,
        call: SegmentBookCall,
    ) -> Result<std::result::Result<Vec<Vec<u8>>, String>> {
        let SegmentBookCall::submit_challenge_prove { prove_info } = call;
        let Some(first) = prove_info.first() else {
            return Ok(Err("EmptyProof".to_string()));
        };

        if let Some(miner) = self.miner(&first.miner_acc)? {
            self.remove(names::SEGMENT_BOOK, names::CHALLENGE_MAP, &[miner.peer_id.encode()])?;
        }
        let event = SegmentBookEvent::ChallengeProof {
            miner: first.miner_acc,
            file_id: first.file_id.clone(),
        };
        Ok(Ok(vec![event_record(SEGMENT_BOOK_INDEX, &event)]))
    }

    fn dispatch_file_bank(
        &mut self,
        signer: &AccountId32,
        call: FileBankCall,
    ) -> Result<std::result::Result<Vec<Vec<u8>>, String>> {
        let acc = *signer;
        let event = match call {
            FileBankCall::clear_invalid_file { file_hash } => {
                let mut cleared = false;
                for (key, value) in self.entries(names::FILE_BANK, names::INVALID_FILE)? {
                    let mut files = Vec::<Vec<u8>>::decode(&mut &value[..])?;
                    let before = files.len();
                    files.retain(|f| f != &file_hash);
                    if files.len() != before {
                        cleared = true;
                        self.storage.insert(key, files.encode());
                    }
                }
                if !cleared {
                    return Ok(Err("NonExistent".to_string()));
                }
                FileBankEvent::ClearInvalidFile { acc, file_hash }
            }
            FileBankCall::clear_all_filler => {
                for (key, value) in self.entries(names::FILE_BANK, names::FILLER_MAP)? {
                    let filler = FillerInfo::decode(&mut &value[..])?;
                    if filler.miner_address == acc {
                        self.storage.remove(&key);
                    }
                }
                FileBankEvent::ClearAllFiller { acc }
            }
        };
        Ok(Ok(vec![event_record(FILE_BANK_INDEX, &event)]))
    }
}

#[async_trait]
impl LedgerTransport for MockLedger {
    async fn metadata(&self) -> Result<Vec<u8>> {
        Ok(self.state.lock().metadata_bytes.clone())
    }

    async fn genesis_hash(&self) -> Result<H256> {
        Ok(self.genesis_hash())
    }

    async fn runtime_version(&self) -> Result<RuntimeVersion> {
        Ok(self.runtime_version())
    }

    async fn storage(&self, key: &StorageKey, at: Option<H256>) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock();
        let block = match at {
            Some(hash) => match state.blocks.iter().find(|b| b.hash == hash) {
                Some(block) => block,
                None => return Ok(None),
            },
            None => state.best(),
        };

        if *key == state.events_key()? {
            return Ok(Some(block.events.clone()));
        }
        Ok(state.storage.get(&key.0).cloned())
    }

    async fn block_hash(&self, number: Option<u64>) -> Result<Option<H256>> {
        let state = self.state.lock();
        Ok(match number {
            Some(n) => state.blocks.get(n as usize).map(|b| b.hash),
            None => Some(state.best().hash),
        })
    }

    async fn header(&self, hash: Option<H256>) -> Result<Option<Header>> {
        let state = self.state.lock();
        let block = match hash {
            Some(hash) => state.blocks.iter().find(|b| b.hash == hash),
            None => Some(state.best()),
        };
        Ok(block.map(|b| Header {
            number: b.number,
            parent_hash: b.parent_hash,
        }))
    }

    async fn health(&self) -> Result<NodeHealth> {
        self.check_health()?;
        Ok(NodeHealth {
            peers: 3,
            is_syncing: false,
            should_have_peers: true,
        })
    }

    async fn submit_and_watch(&self, extrinsic: Vec<u8>) -> Result<StatusSubscription> {
        let mut state = self.state.lock();
        state.submission_count += 1;

        let plan = state.plans.pop_front().unwrap_or(SubmissionPlan::Apply);
        if let SubmissionPlan::SubmitError(msg) = &plan {
            return Err(ChainError::connection(msg.clone()));
        }

        let xt = SignedExtrinsic::decode(&extrinsic)
            .map_err(|e| ChainError::connection(format!("rpc error 1002: Verification Error: {}", e)))?;
        let info = state.validate(&xt)?;
        state.submitted.push(xt.clone());

        let (status_tx, statuses) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();
        let id = format!("mock-sub-{}", state.next_subscription);
        state.next_subscription += 1;

        let _ = status_tx.send(TxStatus::Ready);
        if xt.nonce > info.nonce {
            // waits in the future queue for a gap that is never filled
            let _ = status_tx.send(TxStatus::Future);
        } else {
            let records = match plan {
                SubmissionPlan::Apply => Some(state.dispatch(&xt.signer, &xt.call)?),
                SubmissionPlan::Include { events } => Some(events),
                SubmissionPlan::SubscriptionFailure(msg) => {
                    let _ = error_tx.send(msg);
                    None
                }
                SubmissionPlan::Reject(status) => {
                    let _ = status_tx.send(status);
                    None
                }
                SubmissionPlan::Never | SubmissionPlan::SubmitError(_) => None,
            };

            if let Some(records) = records {
                let updated = AccountInfo {
                    nonce: info.nonce + 1,
                    ..info
                };
                state.put(names::SYSTEM, names::SYSTEM_ACCOUNT, &[xt.signer.encode()], &updated)?;
                let block = state.push_block(records);
                let _ = status_tx.send(TxStatus::InBlock(block));
            }
        }

        debug!(subscription = %id, nonce = xt.nonce, "Mock extrinsic accepted");
        state.watchers.insert(
            id.clone(),
            Watcher {
                _statuses: status_tx,
                _errors: error_tx,
            },
        );

        Ok(StatusSubscription {
            id,
            statuses,
            errors,
        })
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.unsubscribe_count += 1;
        state.watchers.remove(subscription_id);
        Ok(())
    }
}

impl std::fmt::Debug for MockLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockLedger")
            .field("genesis", &state.genesis_hash)
            .field("height", &state.best().number)
            .finish()
    }
}

// =============================================================================
// CONNECTOR
// =============================================================================

/// Connects addresses to mock ledgers
///
/// Every address reaches the default ledger unless routed elsewhere or
/// refused.
#[derive(Clone)]
pub struct MockConnector {
    default: MockLedger,
    routes: Arc<Mutex<HashMap<String, MockLedger>>>,
    refused: Arc<Mutex<HashSet<String>>>,
    connects: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    pub fn new(ledger: MockLedger) -> Self {
        Self {
            default: ledger,
            routes: Arc::new(Mutex::new(HashMap::new())),
            refused: Arc::new(Mutex::new(HashSet::new())),
            connects: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn refuse(self, address: &str) -> Self {
        self.set_refused(address, true);
        self
    }

    pub fn route(self, address: &str, ledger: MockLedger) -> Self {
        self.routes.lock().insert(address.to_string(), ledger);
        self
    }

    pub fn set_refused(&self, address: &str, refused: bool) {
        let mut set = self.refused.lock();
        if refused {
            set.insert(address.to_string());
        } else {
            set.remove(address);
        }
    }

    /// Addresses successfully connected to, in order
    pub fn connections(&self) -> Vec<String> {
        self.connects.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn LedgerTransport>> {
        if self.refused.lock().contains(address) {
            return Err(ChainError::connection(format!(
                "connection refused: {}",
                address
            )));
        }
        let ledger = self
            .routes
            .lock()
            .get(address)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        self.connects.lock().push(address.to_string());
        Ok(Arc::new(ledger))
    }
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnector")
            .field("routes", &self.routes.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucket_core::{decode_events, Value};

    #[test]
    fn test_runtime_metadata_decodes() {
        let md = Metadata::from_bytes(&runtime_metadata()).unwrap();

        let (m, call) = md.call(names::SMINER, names::REGISTER).unwrap();
        assert_eq!(m.index, SMINER_INDEX);
        assert_eq!(call.args.len(), 3);

        let (_, filler) = md.storage_entry(names::FILE_BANK, names::FILLER_MAP).unwrap();
        assert_eq!(filler.arity(), 2);

        let (_, events) = md.storage_entry(names::SYSTEM, names::SYSTEM_EVENTS).unwrap();
        assert_eq!(events.arity(), 0);
    }

    #[test]
    fn test_event_records_decode_by_name() {
        let ledger = MockLedger::new();
        let md = Metadata::from_bytes(&runtime_metadata()).unwrap();
        let acc = AccountId32([4u8; 32]);

        let record = ledger
            .event_record(names::SMINER, names::REGISTERED, &(acc, 5u128).encode())
            .unwrap();
        let log = encode_log(&[record, success_record()]);

        let decoded = decode_events(&md, &log);
        assert!(decoded.is_complete());
        assert_eq!(decoded.records.len(), 2);
        assert!(decoded.records[0].is(names::SMINER, names::REGISTERED));
        assert_eq!(decoded.records[0].field("acc"), Some(&Value::AccountId(acc)));
        assert!(decoded.records[1].is(names::SYSTEM, names::EXTRINSIC_SUCCESS));
    }

    #[tokio::test]
    async fn test_blocks_and_headers() {
        let ledger = MockLedger::new();
        assert_eq!(ledger.block_hash(Some(0)).await.unwrap(), Some(ledger.genesis_hash()));

        let b1 = ledger.produce_block();
        let header = ledger.header(None).await.unwrap().unwrap();
        assert_eq!(header.number, 1);
        assert_eq!(header.parent_hash, ledger.genesis_hash());
        assert_eq!(ledger.block_hash(None).await.unwrap(), Some(b1));
        assert_eq!(ledger.header(Some(H256([9u8; 32]))).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_garbage_extrinsic_rejected() {
        let ledger = MockLedger::new();
        let err = ledger.submit_and_watch(vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, ChainError::Connection(_)));
        assert_eq!(ledger.open_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let connector = MockConnector::new(MockLedger::new()).refuse("mock://down");
        assert!(connector.connect("mock://down").await.is_err());
        assert!(connector.connect("mock://up").await.is_ok());
        assert_eq!(connector.connections(), vec!["mock://up".to_string()]);
    }
}
