//! Derived state folded from chain events.
//!
//! Derived state is a cache over the contracts and never authoritative.
//! Events are applied strictly in delivery order. Nothing here deduplicates:
//! a log delivered twice is folded twice.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use ethers::utils::{format_units, to_checksum};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::notify::{Notification, Notifier};
use crate::subscriber::{ChainEvent, Subscription};

/// Reward token decimals.
pub const REWARD_DECIMALS: u32 = 6;
pub const REWARD_SYMBOL: &str = "IDC";

/// Claims kept in the rewards history.
const CLAIM_HISTORY_LEN: usize = 5;

/// Resolutions kept in the admin feed.
const RESOLVED_HISTORY_LEN: usize = 50;

pub trait DerivedState: Send + Sync {
    /// Apply one event, returning the notification it produces, if any.
    fn apply(&mut self, event: &ChainEvent) -> Option<Notification>;
}

/// Fold `events` into `state` in order.
pub fn fold<S, I>(state: &mut S, events: I) -> Vec<Notification>
where
    S: DerivedState + ?Sized,
    I: IntoIterator<Item = ChainEvent>,
{
    events
        .into_iter()
        .filter_map(|event| state.apply(&event))
        .collect()
}

/// Run the fold loop for `subscription` until it ends.
pub fn spawn_reconciler<S>(
    mut subscription: Subscription,
    state: Arc<RwLock<S>>,
    notifier: Arc<dyn Notifier>,
) -> JoinHandle<()>
where
    S: DerivedState + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            debug!("Reconciling {} from block {}", event.name, event.block_number);
            let notification = state.write().await.apply(&event);
            if let Some(notification) = notification {
                notifier.notify(notification);
            }
        }
        info!("Reconciler stopped");
    })
}

/// Format a raw reward amount with the token's decimals.
pub fn format_reward(amount: U256) -> String {
    format_units(amount, REWARD_DECIMALS).unwrap_or_else(|_| amount.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimRecord {
    pub amount: U256,
    pub block_number: u64,
    pub observed_at: DateTime<Utc>,
}

/// Rewards claimed by one account, as seen through `RewardsClaimed` events.
#[derive(Debug, Clone, Serialize)]
pub struct RewardsLedger {
    pub account: Address,
    pub claimed_total: U256,
    /// Newest first.
    pub history: VecDeque<ClaimRecord>,
}

impl RewardsLedger {
    pub fn new(account: Address) -> Self {
        Self {
            account,
            claimed_total: U256::zero(),
            history: VecDeque::with_capacity(CLAIM_HISTORY_LEN),
        }
    }
}

impl DerivedState for RewardsLedger {
    fn apply(&mut self, event: &ChainEvent) -> Option<Notification> {
        if event.name != "RewardsClaimed" {
            return None;
        }
        let operator = event.address_arg(0)?;
        let amount = event.uint_arg(1)?;
        if operator != self.account {
            return None;
        }

        self.claimed_total = self.claimed_total.saturating_add(amount);
        self.history.push_front(ClaimRecord {
            amount,
            block_number: event.block_number,
            observed_at: Utc::now(),
        });
        self.history.truncate(CLAIM_HISTORY_LEN);

        Some(Notification::success(format!(
            "Claimed {} {} for {}",
            format_reward(amount),
            REWARD_SYMBOL,
            to_checksum(&operator, None)
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDispute {
    pub device_hash: H256,
    pub record_index: U256,
    pub final_validity: bool,
    pub block_number: u64,
}

/// Admin page feed: role changes are announced, resolutions are recorded
/// newest first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdminFeed {
    pub resolved_disputes: VecDeque<ResolvedDispute>,
}

impl DerivedState for AdminFeed {
    fn apply(&mut self, event: &ChainEvent) -> Option<Notification> {
        match event.name.as_str() {
            "AdminAdded" => {
                let admin = event.address_arg(0)?;
                Some(
                    Notification::success("New Admin Added")
                        .with_description(format!("Address: {}", to_checksum(&admin, None))),
                )
            }
            "AdminRemoved" => {
                let admin = event.address_arg(0)?;
                Some(
                    Notification::warning("Admin Removed")
                        .with_description(format!("Address: {}", to_checksum(&admin, None))),
                )
            }
            "DisputeResolved" => {
                let resolved = ResolvedDispute {
                    device_hash: event.bytes32_arg(0)?,
                    record_index: event.uint_arg(1)?,
                    final_validity: event.bool_arg(2)?,
                    block_number: event.block_number,
                };
                let description = format!(
                    "Device: {:?}, Index: {}, Validity: {}",
                    resolved.device_hash, resolved.record_index, resolved.final_validity
                );
                self.resolved_disputes.push_front(resolved);
                self.resolved_disputes.truncate(RESOLVED_HISTORY_LEN);
                Some(Notification::success("Dispute Resolved").with_description(description))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ContractBinding;
    use crate::notify::{NoticeLevel, NotificationLog};
    use crate::subscriber::EventSubscriber;
    use crate::test_utils::{encode_log, MockChain, TEST_ACCOUNT};
    use ethers::abi::Token;
    use std::time::Duration;

    fn claim(operator: Address, amount: u64, block: u64) -> ChainEvent {
        ChainEvent {
            name: "RewardsClaimed".to_string(),
            address: Address::repeat_byte(0x22),
            args: vec![Token::Address(operator), Token::Uint(U256::from(amount))],
            block_number: block,
            tx_hash: None,
            log_index: None,
        }
    }

    fn admin_event(name: &str, admin: Address) -> ChainEvent {
        ChainEvent {
            name: name.to_string(),
            address: Address::repeat_byte(0x33),
            args: vec![Token::Address(admin)],
            block_number: 1,
            tx_hash: None,
            log_index: None,
        }
    }

    #[test]
    fn test_fold_order_matches_delivery() {
        let e1 = claim(TEST_ACCOUNT, 1_000_000, 1);
        let e2 = claim(TEST_ACCOUNT, 2_000_000, 2);

        let mut folded = RewardsLedger::new(TEST_ACCOUNT);
        fold(&mut folded, vec![e1.clone(), e2.clone()]);

        let mut stepwise = RewardsLedger::new(TEST_ACCOUNT);
        stepwise.apply(&e1);
        stepwise.apply(&e2);

        assert_eq!(folded.claimed_total, stepwise.claimed_total);
        let blocks: Vec<_> = folded.history.iter().map(|c| c.block_number).collect();
        assert_eq!(blocks, vec![2, 1]);
    }

    #[test]
    fn test_claims_by_other_accounts_ignored() {
        let mut ledger = RewardsLedger::new(TEST_ACCOUNT);
        let notes = fold(&mut ledger, vec![claim(Address::repeat_byte(0x01), 500, 1)]);
        assert!(notes.is_empty());
        assert!(ledger.claimed_total.is_zero());
        assert!(ledger.history.is_empty());
    }

    #[test]
    fn test_duplicate_delivery_is_double_counted() {
        let mut ledger = RewardsLedger::new(TEST_ACCOUNT);
        let event = claim(TEST_ACCOUNT, 1_000_000, 3);
        fold(&mut ledger, vec![event.clone(), event]);
        assert_eq!(ledger.claimed_total, U256::from(2_000_000u64));
    }

    #[test]
    fn test_history_keeps_last_five() {
        let mut ledger = RewardsLedger::new(TEST_ACCOUNT);
        fold(&mut ledger, (1..=7).map(|b| claim(TEST_ACCOUNT, 1, b)));
        let blocks: Vec<_> = ledger.history.iter().map(|c| c.block_number).collect();
        assert_eq!(blocks, vec![7, 6, 5, 4, 3]);
        assert_eq!(ledger.claimed_total, U256::from(7u64));
    }

    #[test]
    fn test_claim_notification_text() {
        let mut ledger = RewardsLedger::new(TEST_ACCOUNT);
        let note = ledger.apply(&claim(TEST_ACCOUNT, 1_500_000, 1)).unwrap();
        assert!(note.title.starts_with("Claimed 1.500000 IDC for 0x"));
    }

    #[test]
    fn test_admin_added_only_notifies() {
        let mut feed = AdminFeed::default();
        let admin = Address::repeat_byte(0xaa);
        let note = feed.apply(&admin_event("AdminAdded", admin)).unwrap();

        assert_eq!(note.title, "New Admin Added");
        assert_eq!(note.level, NoticeLevel::Success);
        assert_eq!(
            note.description.as_deref(),
            Some(format!("Address: {}", to_checksum(&admin, None)).as_str())
        );
        assert!(feed.resolved_disputes.is_empty());
    }

    #[test]
    fn test_admin_removed_is_warning() {
        let mut feed = AdminFeed::default();
        let note = feed
            .apply(&admin_event("AdminRemoved", Address::repeat_byte(0x01)))
            .unwrap();
        assert_eq!(note.level, NoticeLevel::Warning);
        assert_eq!(note.title, "Admin Removed");
    }

    fn dispute_resolved(hash: H256, index: u64, block: u64) -> ChainEvent {
        ChainEvent {
            name: "DisputeResolved".to_string(),
            address: Address::repeat_byte(0x44),
            args: vec![
                Token::FixedBytes(hash.as_bytes().to_vec()),
                Token::Uint(U256::from(index)),
                Token::Bool(true),
            ],
            block_number: block,
            tx_hash: None,
            log_index: None,
        }
    }

    #[test]
    fn test_dispute_resolved_is_recorded() {
        let mut feed = AdminFeed::default();
        let hash = H256::repeat_byte(0x42);
        let event = dispute_resolved(hash, 3, 9);
        let note = feed.apply(&event).unwrap();
        assert_eq!(note.title, "Dispute Resolved");
        assert!(note.description.unwrap().contains("Index: 3, Validity: true"));
        assert_eq!(feed.resolved_disputes.len(), 1);
        assert_eq!(feed.resolved_disputes[0].device_hash, hash);
    }

    #[test]
    fn test_resolved_disputes_are_capped_newest_first() {
        let mut feed = AdminFeed::default();
        let events = (0..RESOLVED_HISTORY_LEN as u64 + 5)
            .map(|i| dispute_resolved(H256::from_low_u64_be(i), i, i));
        let notes = fold(&mut feed, events);

        assert_eq!(notes.len(), RESOLVED_HISTORY_LEN + 5);
        assert_eq!(feed.resolved_disputes.len(), RESOLVED_HISTORY_LEN);
        let newest = RESOLVED_HISTORY_LEN as u64 + 4;
        assert_eq!(feed.resolved_disputes[0].record_index, U256::from(newest));
        assert_eq!(
            feed.resolved_disputes.back().map(|d| d.block_number),
            Some(5)
        );
    }

    #[tokio::test]
    async fn test_reconciler_folds_subscription() {
        let chain = MockChain::connected();
        let spec = ContractBinding::access_manager(Address::repeat_byte(0x33))
            .unwrap()
            .event("AdminAdded")
            .unwrap();
        let subscriber = EventSubscriber::new(chain.clone(), Duration::from_millis(5));
        let sub = subscriber.subscribe(vec![spec.clone()]).await.unwrap();
        let token = sub.cancel_token();

        let feed = Arc::new(RwLock::new(AdminFeed::default()));
        let log = Arc::new(NotificationLog::default());
        let handle = spawn_reconciler(sub, feed.clone(), log.clone());

        chain.push_log(encode_log(&spec, vec![Token::Address(Address::repeat_byte(0xaa))], 1, 0));
        for _ in 0..200 {
            if !log.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(log.recent()[0].title, "New Admin Added");
        token.cancel();
        handle.await.unwrap();
    }
}
