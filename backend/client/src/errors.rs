//! Error types for the IoT ledger client.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DappError>;

#[derive(Error, Debug)]
pub enum DappError {
    /// A required form field was empty. Raised before anything is dispatched.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("User rejected the request: {0}")]
    UserRejected(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The call would revert on-chain.
    #[error("Simulation reverted: {0}")]
    SimulationReverted(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Wallet not connected")]
    NotConnected,

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}

impl From<ethers::abi::Error> for DappError {
    fn from(err: ethers::abi::Error) -> Self {
        DappError::Abi(err.to_string())
    }
}

impl DappError {
    /// Short machine-readable label, used in API responses and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            DappError::Validation(_) => "validation",
            DappError::UserRejected(_) => "user_rejected",
            DappError::InsufficientFunds(_) => "insufficient_funds",
            DappError::SimulationReverted(_) => "simulation_reverted",
            DappError::Network(_) => "network",
            DappError::Storage(_) => "storage",
            DappError::Config(_) => "config",
            DappError::NotConnected => "not_connected",
            DappError::Abi(_) => "abi",
            DappError::Rpc(_) => "rpc",
        }
    }
}
