//! Miner Registration Operations
//!
//! Registration, collateral changes, exit and withdrawal, and updates to the
//! miner's service address and beneficiary.

use std::sync::Arc;

use bucket_core::{tokens_to_units, AccountId32, Value};
use parity_scale_codec::Compact;
use tracing::info;

use super::builder::{AccountIdentity, Call};
use super::engine::{
    ConfirmationOutcome, ConfirmationRule, EventExpectation, Operation, SubmissionEngine,
};
use super::error::{ChainError, Result};
use super::state::StateReader;
use super::types::{names, MinerInfo};

/// Registration operations for storage miners
#[derive(Debug, Clone)]
pub struct RegistrationOps {
    engine: Arc<SubmissionEngine>,
    state: StateReader,
}

impl RegistrationOps {
    pub fn new(engine: Arc<SubmissionEngine>, state: StateReader) -> Self {
        Self { engine, state }
    }

    /// Check if `account` has a miner record
    pub async fn is_registered(&self, account: &AccountId32) -> Result<bool> {
        Ok(self.state.miner_info(account).await?.is_some())
    }

    pub async fn miner_info(&self, account: &AccountId32) -> Result<Option<MinerInfo>> {
        self.state.miner_info(account).await
    }

    /// Register `owner` as a storage miner
    ///
    /// `pledge_tokens` is in whole tokens. Confirmed only when the block
    /// carries `Sminer.Registered` for the signer; a duplicate registration is
    /// included without it and reported as a semantic failure.
    pub async fn register(
        &self,
        owner: &AccountIdentity,
        beneficiary: &AccountId32,
        service_addr: &str,
        pledge_tokens: u128,
    ) -> Result<ConfirmationOutcome> {
        if service_addr.is_empty() {
            return Err(ChainError::InvalidArguments(
                "service address is empty".to_string(),
            ));
        }

        info!(
            owner = %owner.account(),
            beneficiary = %beneficiary,
            service_addr = %service_addr,
            pledge_tokens,
            "Registering storage miner"
        );

        let call = Call::new(names::SMINER, names::REGISTER)
            .arg(beneficiary)
            .arg(&service_addr.as_bytes().to_vec())
            .arg(&tokens_to_units(pledge_tokens));
        let rule = ConfirmationRule::Event(
            EventExpectation::new(names::SMINER, names::REGISTERED)
                .where_field("acc", Value::AccountId(*owner.account())),
        );

        self.engine.execute(owner, Operation::new(call, rule)).await
    }

    /// Add `tokens` whole tokens of collateral
    pub async fn increase_collateral(
        &self,
        owner: &AccountIdentity,
        tokens: u128,
    ) -> Result<ConfirmationOutcome> {
        if tokens == 0 {
            return Err(ChainError::InvalidArguments(
                "collateral increase must be positive".to_string(),
            ));
        }
        info!(owner = %owner.account(), tokens, "Increasing collateral");

        let call = Call::new(names::SMINER, names::INCREASE_COLLATERAL)
            .arg(&Compact(tokens_to_units(tokens)));
        self.inclusion_only(owner, call).await
    }

    /// Announce the miner is leaving
    pub async fn exit(&self, owner: &AccountIdentity) -> Result<ConfirmationOutcome> {
        info!(owner = %owner.account(), "Exiting storage miner");
        self.inclusion_only(owner, Call::new(names::SMINER, names::EXIT_MINER))
            .await
    }

    /// Withdraw collateral after exit
    pub async fn withdraw(&self, owner: &AccountIdentity) -> Result<ConfirmationOutcome> {
        info!(owner = %owner.account(), "Withdrawing collateral");
        self.inclusion_only(owner, Call::new(names::SMINER, names::WITHDRAW))
            .await
    }

    /// Change the address the miner serves storage on
    pub async fn update_address(
        &self,
        owner: &AccountIdentity,
        service_addr: &str,
    ) -> Result<ConfirmationOutcome> {
        if service_addr.is_empty() {
            return Err(ChainError::InvalidArguments(
                "service address is empty".to_string(),
            ));
        }
        info!(owner = %owner.account(), service_addr = %service_addr, "Updating service address");

        let call = Call::new(names::SMINER, names::UPDATE_IP).arg(&service_addr.as_bytes().to_vec());
        self.inclusion_only(owner, call).await
    }

    /// Change the account that receives rewards
    pub async fn update_beneficiary(
        &self,
        owner: &AccountIdentity,
        beneficiary: &AccountId32,
    ) -> Result<ConfirmationOutcome> {
        info!(owner = %owner.account(), beneficiary = %beneficiary, "Updating beneficiary");

        let call = Call::new(names::SMINER, names::UPDATE_BENEFICIARY).arg(beneficiary);
        self.inclusion_only(owner, call).await
    }

    async fn inclusion_only(
        &self,
        owner: &AccountIdentity,
        call: Call,
    ) -> Result<ConfirmationOutcome> {
        self.engine
            .execute(owner, Operation::new(call, ConfirmationRule::InclusionOnly))
            .await
    }
}
