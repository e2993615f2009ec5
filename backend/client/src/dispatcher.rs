//! Transaction dispatch.
//!
//! Simulates a call descriptor against the latest state, then asks the
//! wallet to sign and broadcast it.

use std::sync::Arc;

use ethers::types::H256;
use tracing::{info, warn};

use crate::contracts::ContractCall;
use crate::errors::Result;
use crate::wallet::Wallet;

#[derive(Clone)]
pub struct Dispatcher {
    wallet: Arc<dyn Wallet>,
}

impl Dispatcher {
    pub fn new(wallet: Arc<dyn Wallet>) -> Self {
        Self { wallet }
    }

    /// Submit a write call and return its transaction hash.
    ///
    /// # Errors
    /// - `SimulationReverted` if the call would revert on-chain
    /// - `UserRejected` if the wallet declines to sign
    /// - `InsufficientFunds` if the account cannot pay for gas
    /// - `Network` on transport failure
    ///
    /// Nothing is retried; the caller re-submits.
    pub async fn dispatch(&self, call: &ContractCall) -> Result<H256> {
        info!(
            "Simulating {}.{} at {:?}",
            call.contract,
            call.function_name(),
            call.address
        );
        if let Err(e) = self.wallet.simulate(call).await {
            warn!("Simulation of {} failed: {}", call.function_name(), e);
            return Err(e);
        }

        let tx_hash = self.wallet.send(call).await?;
        info!("Submitted {} as {:?}", call.function_name(), tx_hash);
        Ok(tx_hash)
    }
}
