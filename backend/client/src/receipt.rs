//! Receipt waiting.

use std::sync::Arc;
use std::time::Duration;

use ethers::types::{TransactionReceipt, H256, U64};
use tracing::{debug, info, warn};

use crate::errors::{DappError, Result};
use crate::wallet::ChainReader;

/// `status == 1`. Pre-Byzantium receipts carry no status and count as failed.
pub fn is_success(receipt: &TransactionReceipt) -> bool {
    receipt.status == Some(U64::one())
}

#[derive(Clone)]
pub struct ReceiptWaiter {
    chain: Arc<dyn ChainReader>,
    poll_interval: Duration,
}

impl ReceiptWaiter {
    pub fn new(chain: Arc<dyn ChainReader>, poll_interval: Duration) -> Self {
        Self {
            chain,
            poll_interval,
        }
    }

    /// Suspend until `tx_hash` is mined and return its receipt.
    ///
    /// There is no timeout here: an unresponsive node keeps the caller
    /// waiting. Any error from the node ends the wait as `Network`.
    pub async fn wait(&self, tx_hash: H256) -> Result<TransactionReceipt> {
        loop {
            match self.chain.receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    info!(
                        "Transaction {:?} mined with status {:?}",
                        tx_hash, receipt.status
                    );
                    return Ok(receipt);
                }
                Ok(None) => {
                    debug!("Transaction {:?} still pending", tx_hash);
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(DappError::Network(msg)) => {
                    warn!("Receipt wait for {:?} failed: {}", tx_hash, msg);
                    return Err(DappError::Network(msg));
                }
                Err(e) => {
                    warn!("Receipt wait for {:?} failed: {}", tx_hash, e);
                    return Err(DappError::Network(e.to_string()));
                }
            }
        }
    }
}
