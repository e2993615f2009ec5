//! Rewards page: balance, claim, and the claim history folded from events.

use std::sync::Arc;

use ethers::abi::Token;
use ethers::types::U256;
use ethers::utils::keccak256;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;

use super::{field, Amount, FormSlot, PageContext, Submission};
use crate::contracts::{ContractBinding, EventSpec};
use crate::errors::{DappError, Result};
use crate::form::FieldSpec;
use crate::notify::Notification;
use crate::operation::FlowMessages;
use crate::reconcile::{ClaimRecord, RewardsLedger, REWARD_SYMBOL};

pub const CLAIM_FIELDS: &[FieldSpec] = &[FieldSpec::optional("deviceId", "device1")];

const CLAIM: FlowMessages = FlowMessages {
    pending: "Claiming rewards...",
    success: "Rewards claimed successfully!",
    failure: "Transaction failed",
    error: "Failed to claim rewards",
    error_hint: "Please try again",
};

#[derive(Debug, Clone, Serialize)]
pub struct RewardsSummary {
    pub symbol: &'static str,
    pub available: Amount,
    pub claimed: Amount,
    pub total: Amount,
    pub history: Vec<ClaimRecord>,
}

pub struct RewardsPage {
    ctx: PageContext,
    rewards: ContractBinding,
    claim: FormSlot,
    ledger: Arc<RwLock<RewardsLedger>>,
}

impl RewardsPage {
    pub fn new(ctx: PageContext, rewards: ContractBinding) -> Self {
        // A disconnected page never matches a claim, so the zero address is inert.
        let account = ctx.wallet_context().address.unwrap_or_default();
        Self {
            claim: FormSlot::new(&ctx, CLAIM_FIELDS, CLAIM),
            ledger: Arc::new(RwLock::new(RewardsLedger::new(account))),
            ctx,
            rewards,
        }
    }

    pub async fn balance(&self) -> Result<U256> {
        let account = self.ctx.account()?;
        self.ctx
            .read(&self.rewards, "getUserBalance", vec![Token::Address(account)])
            .await?
            .into_iter()
            .next()
            .and_then(Token::into_uint)
            .ok_or_else(|| DappError::Abi("Expected a uint256 balance".to_string()))
    }

    pub async fn summary(&self) -> Result<RewardsSummary> {
        let available = self.balance().await?;
        let ledger = self.ledger.read().await;
        let claimed = ledger.claimed_total;
        Ok(RewardsSummary {
            symbol: REWARD_SYMBOL,
            available: available.into(),
            claimed: claimed.into(),
            total: available.saturating_add(claimed).into(),
            history: ledger.history.iter().cloned().collect(),
        })
    }

    /// Claim rewards for a device. A zero balance stops the attempt before
    /// anything is dispatched. The balance may change between the read and
    /// the claim; the contract has the final say.
    pub async fn claim_rewards<'a, I>(&self, inputs: I) -> Submission
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        match self.balance().await {
            Ok(balance) if balance.is_zero() => {
                return self
                    .claim
                    .reject(
                        DappError::Validation("No rewards available to claim".to_string()),
                        Notification::error("No rewards available to claim"),
                    )
                    .await;
            }
            Ok(_) => {}
            Err(DappError::NotConnected) => {
                return self
                    .claim
                    .reject(DappError::NotConnected, Notification::error("Please connect your wallet"))
                    .await;
            }
            Err(e) => {
                warn!("Error fetching balance: {}", e);
                return self
                    .claim
                    .reject(
                        e,
                        Notification::error("Error fetching balance")
                            .with_description("Please try again later"),
                    )
                    .await;
            }
        }

        let rewards = &self.rewards;
        self.claim
            .submit(inputs, |values| async move {
                let device = keccak256(field(&values, "deviceId").as_bytes());
                rewards.call("claimRewards", vec![Token::FixedBytes(device.to_vec())])
            })
            .await
    }

    pub fn event_specs(&self) -> Result<Vec<EventSpec>> {
        Ok(vec![self.rewards.event("RewardsClaimed")?])
    }

    pub fn ledger(&self) -> Arc<RwLock<RewardsLedger>> {
        self.ledger.clone()
    }
}
