//! Chain State Types for the Storage Miner
//!
//! SCALE layouts of the records the miner reads from chain state and of the
//! arguments it submits.

use bucket_core::AccountId32;
use parity_scale_codec::{Decode, Encode};
use scale_info::TypeInfo;
use serde::Serialize;

/// Module, storage item, call and event names
pub mod names {
    pub const SYSTEM: &str = "System";
    pub const SYSTEM_ACCOUNT: &str = "Account";
    pub const SYSTEM_EVENTS: &str = "Events";
    pub const EXTRINSIC_SUCCESS: &str = "ExtrinsicSuccess";
    pub const EXTRINSIC_FAILED: &str = "ExtrinsicFailed";

    pub const SMINER: &str = "Sminer";
    pub const MINER_ITEMS: &str = "MinerItems";
    pub const REWARD_MAP: &str = "RewardMap";
    pub const REGISTER: &str = "regnstk";
    pub const INCREASE_COLLATERAL: &str = "increase_collateral";
    pub const EXIT_MINER: &str = "exit_miner";
    pub const WITHDRAW: &str = "withdraw";
    pub const UPDATE_IP: &str = "update_ip";
    pub const UPDATE_BENEFICIARY: &str = "update_beneficiary";
    pub const RECEIVE_REWARD: &str = "receive_reward";
    pub const REGISTERED: &str = "Registered";
    pub const RECEIVE: &str = "Receive";

    pub const FILE_MAP: &str = "FileMap";
    pub const SCHEDULER_INFO: &str = "SchedulerInfo";

    pub const SEGMENT_BOOK: &str = "SegmentBook";
    pub const CHALLENGE_MAP: &str = "ChallengeMap";
    pub const SUBMIT_PROVE: &str = "submit_challenge_prove";
    pub const CHALLENGE_PROOF: &str = "ChallengeProof";

    pub const FILE_BANK: &str = "FileBank";
    pub const INVALID_FILE: &str = "InvalidFile";
    pub const FILLER_MAP: &str = "FillerMap";
    pub const CLEAR_INVALID_FILE: &str = "clear_invalid_file";
    pub const CLEAR_ALL_FILLER: &str = "clear_all_filler";
    pub const CLEAR_INVALID_FILE_EVENT: &str = "ClearInvalidFile";
}

/// Default time to wait for inclusion (seconds)
pub const DEFAULT_TX_TIMEOUT_SECS: u64 = 30;

/// Balance portion of `System.Account`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode, TypeInfo, Serialize)]
pub struct AccountData {
    pub free: u128,
    pub reserved: u128,
    pub frozen: u128,
    pub flags: u128,
}

/// `System.Account` record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode, TypeInfo, Serialize)]
pub struct AccountInfo {
    /// Number of transactions the account has sent
    pub nonce: u32,
    pub consumers: u32,
    pub providers: u32,
    pub sufficients: u32,
    pub data: AccountData,
}

/// `Sminer.MinerItems` record
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, TypeInfo)]
pub struct MinerInfo {
    pub peer_id: u64,
    pub beneficiary: AccountId32,
    pub service_addr: Vec<u8>,
    pub collaterals: u128,
    pub earnings: u128,
    pub locked: u128,
    /// Lifecycle state as text, e.g. `positive`, `frozen`, `exit`
    pub state: Vec<u8>,
    pub power: u128,
    pub space: u128,
    pub public_key: Vec<u8>,
}

impl MinerInfo {
    pub fn state_str(&self) -> String {
        String::from_utf8_lossy(&self.state).into_owned()
    }

    pub fn service_addr_str(&self) -> String {
        String::from_utf8_lossy(&self.service_addr).into_owned()
    }
}

/// `Sminer.RewardMap` record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode, TypeInfo, Serialize)]
pub struct RewardInfo {
    pub total_reward: u128,
    pub total_rewards_currently_available: u128,
    pub total_not_receive: u128,
}

/// Entry of the `FileMap.SchedulerInfo` list
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, TypeInfo)]
pub struct SchedulerInfo {
    pub ip: Vec<u8>,
    pub stash_user: AccountId32,
    pub controller_user: AccountId32,
}

/// Challenge issued to a miner (`SegmentBook.ChallengeMap`)
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, TypeInfo)]
pub struct ChallengeInfo {
    pub file_size: u64,
    pub segment_size: u32,
    pub file_type: u8,
    pub block_list: Vec<u32>,
    pub file_id: Vec<u8>,
    pub shard_id: Vec<u8>,
    pub random: Vec<Vec<u8>>,
}

/// Answer to one challenge
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, TypeInfo)]
pub struct ProofInfo {
    pub file_id: Vec<u8>,
    pub miner_acc: AccountId32,
    pub challenge_info: ChallengeInfo,
    pub mu: Vec<Vec<u8>>,
    pub sigma: Vec<u8>,
}

/// Filler file record (`FileBank.FillerMap`)
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, TypeInfo)]
pub struct FillerInfo {
    pub filler_size: u64,
    pub index: u32,
    pub block_num: u32,
    pub segment_size: u32,
    pub scan_size: u32,
    pub miner_address: AccountId32,
    pub filler_id: Vec<u8>,
    pub filler_hash: Vec<u8>,
}

/// Node sync status derived from `system_health`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub peers: u64,
    pub is_syncing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_info_layout() {
        let info = AccountInfo {
            nonce: 3,
            providers: 1,
            data: AccountData {
                free: 10,
                ..Default::default()
            },
            ..Default::default()
        };
        let encoded = info.encode();
        assert_eq!(encoded.len(), 4 * 4 + 16 * 4);
        assert_eq!(&encoded[..4], &3u32.to_le_bytes());
        assert_eq!(AccountInfo::decode(&mut &encoded[..]).unwrap(), info);
    }

    #[test]
    fn test_miner_info_text_fields() {
        let miner = MinerInfo {
            peer_id: 1,
            beneficiary: AccountId32([0u8; 32]),
            service_addr: b"10.0.0.1:15001".to_vec(),
            collaterals: 0,
            earnings: 0,
            locked: 0,
            state: b"positive".to_vec(),
            power: 0,
            space: 0,
            public_key: vec![],
        };
        assert_eq!(miner.state_str(), "positive");
        assert_eq!(miner.service_addr_str(), "10.0.0.1:15001");
    }
}
