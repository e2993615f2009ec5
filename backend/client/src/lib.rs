//! IoT device ledger client.
//!
//! Talks to the AccessManager, DeviceRegistry, OracleIntegration and
//! TokenRewards contracts through a node-held wallet:
//! 1. Validates form input and dispatches contract calls
//! 2. Waits for receipts and resets or keeps the form accordingly
//! 3. Subscribes to contract events and folds them into page state
//! 4. Stores device metadata on IPFS via web3.storage

pub mod config;
pub mod contracts;
pub mod dispatcher;
pub mod errors;
pub mod form;
pub mod notify;
pub mod operation;
pub mod pages;
pub mod receipt;
pub mod reconcile;
pub mod rpc;
pub mod storage;
pub mod subscriber;
pub mod wallet;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::Config;
pub use errors::{DappError, Result};
pub use notify::{NoticeLevel, Notification, NotificationLog, Notifier};
pub use operation::{OperationStatus, Outcome, TxFlow};
pub use pages::{AdminPage, DataPage, DevicesPage, PageContext, RewardsPage, Submission};
pub use subscriber::{ChainEvent, EventSubscriber, Subscription};
pub use wallet::{ChainReader, RpcWallet, Wallet, WalletContext};
