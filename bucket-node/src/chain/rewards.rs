//! Reward Operations
//!
//! Reward queries and claiming accumulated rewards.

use std::sync::Arc;

use bucket_core::{AccountId32, Value, TOKEN_PRECISION};
use tracing::info;

use super::builder::{AccountIdentity, Call};
use super::engine::{
    ConfirmationOutcome, ConfirmationRule, EventExpectation, Operation, SubmissionEngine,
};
use super::error::Result;
use super::state::StateReader;
use super::types::{names, RewardInfo};

/// Reward claiming operations for storage miners
#[derive(Debug, Clone)]
pub struct RewardsOps {
    engine: Arc<SubmissionEngine>,
    state: StateReader,
}

impl RewardsOps {
    pub fn new(engine: Arc<SubmissionEngine>, state: StateReader) -> Self {
        Self { engine, state }
    }

    /// Reward record of `account`; zeroes when the chain has none
    pub async fn reward_info(&self, account: &AccountId32) -> Result<RewardInfo> {
        Ok(self.state.reward_info(account).await?.unwrap_or_default())
    }

    /// Rewards available to claim now, in chain units
    pub async fn claimable(&self, account: &AccountId32) -> Result<u128> {
        Ok(self
            .reward_info(account)
            .await?
            .total_rewards_currently_available)
    }

    pub async fn has_claimable_rewards(&self, account: &AccountId32) -> Result<bool> {
        Ok(self.claimable(account).await? > 0)
    }

    /// Claim currently available rewards
    ///
    /// Confirmed by `Sminer.Receive` for the signer.
    pub async fn receive_rewards(&self, owner: &AccountIdentity) -> Result<ConfirmationOutcome> {
        info!(owner = %owner.account(), "Claiming rewards");

        let call = Call::new(names::SMINER, names::RECEIVE_REWARD);
        let rule = ConfirmationRule::Event(
            EventExpectation::new(names::SMINER, names::RECEIVE)
                .where_field("acc", Value::AccountId(*owner.account())),
        );
        let outcome = self.engine.execute(owner, Operation::new(call, rule)).await?;

        if let ConfirmationOutcome::Confirmed(block) = &outcome {
            info!(owner = %owner.account(), block = %block, "Rewards claimed");
        }
        Ok(outcome)
    }
}

/// Format chain units as whole tokens with fractional digits
pub fn format_tokens(units: u128) -> String {
    let whole = units / TOKEN_PRECISION;
    let frac = units % TOKEN_PRECISION;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:012}", frac);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}
