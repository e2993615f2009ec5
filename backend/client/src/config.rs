//! Configuration management for the ledger client.
//!
//! Loads all settings from environment variables.

use std::time::Duration;

use ethers::types::Address;

use crate::errors::{DappError, Result};

pub const DEFAULT_ACCESS_MANAGER: &str = "0x18C792C368279C490042E85fb4DCC2FB650CE44e";
pub const DEFAULT_DEVICE_REGISTRY: &str = "0xE851a734e8f310951e6d27C3B087FE939E371Fbd";
pub const DEFAULT_ORACLE_INTEGRATION: &str = "0x48C20882E61Ca563E064376480D886870d1d695e";
pub const DEFAULT_TOKEN_REWARDS: &str = "0xca276186Eb9f3a58FCdfc4adA247Cbe8d935778a";

#[derive(Debug, Clone)]
pub struct Config {
    /// JSON-RPC endpoint of the node holding the unlocked wallet account
    pub rpc_url: String,

    /// Account to act as. Falls back to the node's first account when unset.
    pub wallet_address: Option<String>,

    /// Expected chain id; connection is refused on mismatch when set
    pub chain_id: Option<u64>,

    pub access_manager: String,
    pub device_registry: String,
    pub oracle_integration: String,
    pub token_rewards: String,

    /// web3.storage API token. Storage calls fail when missing.
    pub web3_storage_token: Option<String>,

    /// web3.storage upload API base URL
    pub storage_api_url: String,

    /// IPFS gateway used to retrieve stored payloads
    pub ipfs_gateway: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Receipt and event polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `RPC_URL` (defaults to a local node)
    /// - `WALLET_ADDRESS`, `CHAIN_ID`
    /// - `ACCESS_MANAGER_ADDRESS`, `DEVICE_REGISTRY_ADDRESS`,
    ///   `ORACLE_INTEGRATION_ADDRESS`, `TOKEN_REWARDS_ADDRESS`
    /// - `WEB3_STORAGE_TOKEN`, `STORAGE_API_URL`, `IPFS_GATEWAY`
    /// - `TIMEOUT_SECS` (defaults to 30), `POLL_INTERVAL_MS` (defaults to 4000)
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            rpc_url: env_var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string()),

            wallet_address: env_var("WALLET_ADDRESS").ok(),

            chain_id: env_var("CHAIN_ID")
                .ok()
                .map(|v| v.parse())
                .transpose()
                .map_err(|_| DappError::Config("Invalid CHAIN_ID".to_string()))?,

            access_manager: env_var("ACCESS_MANAGER_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_ACCESS_MANAGER.to_string()),

            device_registry: env_var("DEVICE_REGISTRY_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_DEVICE_REGISTRY.to_string()),

            oracle_integration: env_var("ORACLE_INTEGRATION_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_ORACLE_INTEGRATION.to_string()),

            token_rewards: env_var("TOKEN_REWARDS_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_TOKEN_REWARDS.to_string()),

            web3_storage_token: env_var("WEB3_STORAGE_TOKEN").ok(),

            storage_api_url: env_var("STORAGE_API_URL")
                .unwrap_or_else(|_| "https://api.web3.storage".to_string()),

            ipfs_gateway: env_var("IPFS_GATEWAY").unwrap_or_else(|_| "https://w3s.link".to_string()),

            timeout_secs: env_var("TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| DappError::Config("Invalid TIMEOUT_SECS".to_string()))?,

            poll_interval_ms: env_var("POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .map_err(|_| DappError::Config("Invalid POLL_INTERVAL_MS".to_string()))?,
        })
    }

    /// Validate that all configuration is well-formed.
    pub fn validate(&self) -> Result<()> {
        for (key, url) in [
            ("RPC_URL", &self.rpc_url),
            ("STORAGE_API_URL", &self.storage_api_url),
            ("IPFS_GATEWAY", &self.ipfs_gateway),
        ] {
            if !url.starts_with("http") {
                return Err(DappError::Config(format!(
                    "{key} must be a valid HTTP(S) URL"
                )));
            }
        }

        for (key, addr) in [
            ("ACCESS_MANAGER_ADDRESS", &self.access_manager),
            ("DEVICE_REGISTRY_ADDRESS", &self.device_registry),
            ("ORACLE_INTEGRATION_ADDRESS", &self.oracle_integration),
            ("TOKEN_REWARDS_ADDRESS", &self.token_rewards),
        ] {
            parse_address(key, addr)?;
        }

        if let Some(wallet) = &self.wallet_address {
            parse_address("WALLET_ADDRESS", wallet)?;
        }

        if self.poll_interval_ms == 0 {
            return Err(DappError::Config(
                "POLL_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Parse a `0x`-prefixed 20-byte hex address, naming the setting on failure.
pub fn parse_address(key: &str, value: &str) -> Result<Address> {
    if !value.starts_with("0x") || value.len() != 42 {
        return Err(DappError::Config(format!(
            "{key} must be a 0x-prefixed 20-byte hex address"
        )));
    }
    value
        .parse::<Address>()
        .map_err(|e| DappError::Config(format!("{key} is not a valid address: {e}")))
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| DappError::Config(format!("Missing environment variable: {key}")))
}

#[cfg(test)]
pub(crate) fn mock_config() -> Config {
    Config {
        rpc_url: "http://127.0.0.1:8545".to_string(),
        wallet_address: None,
        chain_id: None,
        access_manager: DEFAULT_ACCESS_MANAGER.to_string(),
        device_registry: DEFAULT_DEVICE_REGISTRY.to_string(),
        oracle_integration: DEFAULT_ORACLE_INTEGRATION.to_string(),
        token_rewards: DEFAULT_TOKEN_REWARDS.to_string(),
        web3_storage_token: Some("token".to_string()),
        storage_api_url: "https://api.web3.storage".to_string(),
        ipfs_gateway: "https://w3s.link".to_string(),
        timeout_secs: 30,
        poll_interval_ms: 4000,
    }
}
