//! Contract bindings: address + ABI fragment + function/event name.
//!
//! That triple is the only parameterization surface for every operation
//! this client performs.

use ethers::abi::{parse_abi, Abi, Event, Function, Token};
use ethers::types::{Address, Bytes, H256};
use ethers::utils::keccak256;

use crate::config::{parse_address, Config};
use crate::errors::{DappError, Result};

pub const ACCESS_MANAGER_ABI: &[&str] = &[
    "function isAdmin(address account) view returns (bool)",
    "function hasRole(bytes32 role, address account) view returns (bool)",
    "function addAdmin(address account)",
    "function removeAdmin(address account)",
    "event AdminAdded(address indexed account)",
    "event AdminRemoved(address indexed account)",
];

pub const DEVICE_REGISTRY_ABI: &[&str] = &[
    "function registerDevice(bytes32 deviceHash, string ipfsCid, bytes signature)",
    "function getDevicesByOwnerPaginated(address owner, uint256 offset, uint256 limit) view returns ((bytes32,uint8,uint256,uint256,string)[])",
];

pub const ORACLE_INTEGRATION_ABI: &[&str] = &[
    "function submitData(string deviceId, string dataValue, uint256 timestamp)",
    "function getPendingDisputes() view returns ((bytes32,uint256,bool,bool)[])",
    "function setOracleAddress(address oracle)",
    "function resetOracleConfig(address oracle, bytes32 jobId, uint256 fee)",
    "function setDataFeedId(bytes32 feedId)",
    "function resolveDispute(bytes32 deviceHash, uint256 recordIndex, bool finalValidity)",
    "event DisputeResolved(bytes32 indexed deviceHash, uint256 recordIndex, bool finalValidity)",
];

pub const TOKEN_REWARDS_ABI: &[&str] = &[
    "function getUserBalance(address user) view returns (uint256)",
    "function claimRewards(bytes32 deviceHash)",
    "event RewardsClaimed(address indexed operator, uint256 amount)",
];

/// Role id checked by the admin access probe.
pub fn global_admin_role() -> H256 {
    H256::from(keccak256(b"GLOBAL_ADMIN"))
}

/// On-chain device key: keccak256 of the metadata CID string.
pub fn device_hash(cid: &str) -> H256 {
    H256::from(keccak256(cid.as_bytes()))
}

/// UTF-8 bytes right-padded to 32 bytes, as used for job and feed ids.
pub fn bytes32_from_str(value: &str) -> Result<[u8; 32]> {
    let bytes = value.as_bytes();
    if bytes.len() > 32 {
        return Err(DappError::Abi(format!(
            "'{value}' is longer than 32 bytes"
        )));
    }
    let mut out = [0u8; 32];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

/// A deployed contract the client talks to.
#[derive(Debug, Clone)]
pub struct ContractBinding {
    pub name: &'static str,
    pub address: Address,
    abi: Abi,
}

impl ContractBinding {
    pub fn new(name: &'static str, address: Address, fragments: &[&str]) -> Result<Self> {
        let abi = parse_abi(fragments)
            .map_err(|e| DappError::Abi(format!("Invalid {name} ABI: {e}")))?;
        Ok(Self { name, address, abi })
    }

    pub fn access_manager(address: Address) -> Result<Self> {
        Self::new("AccessManager", address, ACCESS_MANAGER_ABI)
    }

    pub fn device_registry(address: Address) -> Result<Self> {
        Self::new("DeviceRegistry", address, DEVICE_REGISTRY_ABI)
    }

    pub fn oracle_integration(address: Address) -> Result<Self> {
        Self::new("OracleIntegration", address, ORACLE_INTEGRATION_ABI)
    }

    pub fn token_rewards(address: Address) -> Result<Self> {
        Self::new("TokenRewards", address, TOKEN_REWARDS_ABI)
    }

    /// Build a fully-formed call descriptor. Fails when the arguments do not
    /// match the function's declared inputs.
    pub fn call(&self, function: &str, args: Vec<Token>) -> Result<ContractCall> {
        let function = self
            .abi
            .function(function)
            .map_err(|e| DappError::Abi(format!("{}: {e}", self.name)))?
            .clone();
        let data = function.encode_input(&args)?;
        Ok(ContractCall {
            contract: self.name,
            address: self.address,
            function,
            args,
            data: Bytes::from(data),
        })
    }

    pub fn event(&self, name: &str) -> Result<EventSpec> {
        let event = self
            .abi
            .event(name)
            .map_err(|e| DappError::Abi(format!("{}: {e}", self.name)))?
            .clone();
        Ok(EventSpec {
            address: self.address,
            event,
        })
    }
}

/// Call descriptor handed to the dispatcher or used for reads.
#[derive(Debug, Clone)]
pub struct ContractCall {
    pub contract: &'static str,
    pub address: Address,
    pub function: Function,
    pub args: Vec<Token>,
    pub data: Bytes,
}

impl ContractCall {
    pub fn function_name(&self) -> &str {
        &self.function.name
    }

    pub fn decode_output(&self, output: &[u8]) -> Result<Vec<Token>> {
        Ok(self.function.decode_output(output)?)
    }
}

/// An event type on a specific contract.
#[derive(Debug, Clone)]
pub struct EventSpec {
    pub address: Address,
    pub event: Event,
}

impl EventSpec {
    pub fn topic0(&self) -> H256 {
        self.event.signature()
    }
}

/// The four deployed contracts, bound from configuration.
#[derive(Debug, Clone)]
pub struct ContractSet {
    pub access_manager: ContractBinding,
    pub device_registry: ContractBinding,
    pub oracle_integration: ContractBinding,
    pub token_rewards: ContractBinding,
}

impl ContractSet {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            access_manager: ContractBinding::access_manager(parse_address(
                "ACCESS_MANAGER_ADDRESS",
                &config.access_manager,
            )?)?,
            device_registry: ContractBinding::device_registry(parse_address(
                "DEVICE_REGISTRY_ADDRESS",
                &config.device_registry,
            )?)?,
            oracle_integration: ContractBinding::oracle_integration(parse_address(
                "ORACLE_INTEGRATION_ADDRESS",
                &config.oracle_integration,
            )?)?,
            token_rewards: ContractBinding::token_rewards(parse_address(
                "TOKEN_REWARDS_ADDRESS",
                &config.token_rewards,
            )?)?,
        })
    }
}
