//! Proof and file maintenance operations
//!
//! Challenge proof submission plus cleanup of invalid files and fillers.

use std::sync::Arc;

use bucket_core::{AccountId32, Value};
use tracing::{debug, info};

use super::builder::{AccountIdentity, Call};
use super::engine::{
    ConfirmationOutcome, ConfirmationRule, EventExpectation, Operation, SubmissionEngine,
};
use super::error::{ChainError, Result};
use super::state::StateReader;
use super::types::{names, ChallengeInfo, FillerInfo, ProofInfo};

#[derive(Debug, Clone)]
pub struct ProofOps {
    engine: Arc<SubmissionEngine>,
    state: StateReader,
}

impl ProofOps {
    pub fn new(engine: Arc<SubmissionEngine>, state: StateReader) -> Self {
        Self { engine, state }
    }

    /// Challenges currently open for the miner with `peer_id`
    pub async fn challenges(&self, peer_id: u64) -> Result<Vec<ChallengeInfo>> {
        Ok(self.state.challenges(peer_id).await?.unwrap_or_default())
    }

    /// Ids of files the chain marked invalid for the miner with `peer_id`
    pub async fn invalid_files(&self, peer_id: u64) -> Result<Vec<Vec<u8>>> {
        Ok(self.state.invalid_files(peer_id).await?.unwrap_or_default())
    }

    pub async fn filler(&self, miner: &AccountId32, filler_id: &[u8]) -> Result<Option<FillerInfo>> {
        self.state.filler(miner, filler_id).await
    }

    /// Submit proofs for open challenges
    ///
    /// Confirmed by `SegmentBook.ChallengeProof` naming the miner of the
    /// first proof.
    pub async fn submit_proofs(
        &self,
        owner: &AccountIdentity,
        proofs: Vec<ProofInfo>,
    ) -> Result<ConfirmationOutcome> {
        let miner = match proofs.first() {
            Some(first) => first.miner_acc,
            None => {
                return Err(ChainError::InvalidArguments(
                    "no proofs to submit".to_string(),
                ))
            }
        };
        info!(owner = %owner.account(), miner = %miner, count = proofs.len(), "Submitting proofs");

        let call = Call::new(names::SEGMENT_BOOK, names::SUBMIT_PROVE).arg(&proofs);
        let rule = ConfirmationRule::Event(
            EventExpectation::new(names::SEGMENT_BOOK, names::CHALLENGE_PROOF)
                .where_field("miner", Value::AccountId(miner)),
        );
        self.engine.execute(owner, Operation::new(call, rule)).await
    }

    /// Acknowledge that an invalid file was dropped locally
    pub async fn clear_invalid_file(
        &self,
        owner: &AccountIdentity,
        file_id: &[u8],
    ) -> Result<ConfirmationOutcome> {
        debug!(owner = %owner.account(), file_id = %hex::encode(file_id), "Clearing invalid file");

        let call = Call::new(names::FILE_BANK, names::CLEAR_INVALID_FILE).arg(&file_id.to_vec());
        let rule = ConfirmationRule::Event(
            EventExpectation::new(names::FILE_BANK, names::CLEAR_INVALID_FILE_EVENT)
                .where_field("acc", Value::AccountId(*owner.account())),
        );
        self.engine.execute(owner, Operation::new(call, rule)).await
    }

    /// Drop every filler recorded for the signer
    pub async fn clear_fillers(&self, owner: &AccountIdentity) -> Result<ConfirmationOutcome> {
        info!(owner = %owner.account(), "Clearing all fillers");
        let call = Call::new(names::FILE_BANK, names::CLEAR_ALL_FILLER);
        self.engine
            .execute(owner, Operation::new(call, ConfirmationRule::InclusionOnly))
            .await
    }
}
