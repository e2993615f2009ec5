//! Wallet and chain seams.
//!
//! The connected account and chain are read once at startup into a
//! [`WalletContext`] and handed explicitly to every page. Nothing in this
//! crate mutates it.

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Filter, Log, TransactionReceipt, TransactionRequest, H256};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{parse_address, Config};
use crate::contracts::ContractCall;
use crate::errors::{DappError, Result};
use crate::rpc::RpcClient;

/// Read-only view of the wallet connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WalletContext {
    pub address: Option<Address>,
    pub chain_id: u64,
}

impl WalletContext {
    pub fn connected(address: Address, chain_id: u64) -> Self {
        Self {
            address: Some(address),
            chain_id,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.address.is_some()
    }

    pub fn require_address(&self) -> Result<Address> {
        self.address.ok_or(DappError::NotConnected)
    }
}

/// Signing and call surface of the connected wallet.
#[async_trait]
pub trait Wallet: Send + Sync {
    fn context(&self) -> WalletContext;

    /// Dry-run a write call. Fails with `SimulationReverted` if it would revert.
    async fn simulate(&self, call: &ContractCall) -> Result<()>;

    /// Ask the wallet to sign and broadcast. Returns the transaction hash.
    async fn send(&self, call: &ContractCall) -> Result<H256>;

    /// Execute a view call and decode its outputs.
    async fn read(&self, call: &ContractCall) -> Result<Vec<Token>>;
}

/// Read access to mined state: receipts, head and logs.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>>;

    async fn block_number(&self) -> Result<u64>;

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>>;
}

/// Wallet backed by a node account, signed by the node (`eth_sendTransaction`).
pub struct RpcWallet {
    rpc: RpcClient,
    context: WalletContext,
}

impl RpcWallet {
    /// Connect to the node and resolve the acting account and chain id.
    pub async fn connect(config: &Config) -> Result<Self> {
        let rpc = RpcClient::new(&config.rpc_url, config.timeout())?;

        let chain_id = rpc.chain_id().await?;
        if let Some(expected) = config.chain_id {
            if expected != chain_id {
                return Err(DappError::Config(format!(
                    "Connected to chain {chain_id}, expected {expected}"
                )));
            }
        }

        let address = match &config.wallet_address {
            Some(addr) => Some(parse_address("WALLET_ADDRESS", addr)?),
            None => rpc.accounts().await?.into_iter().next(),
        };

        let context = WalletContext { address, chain_id };
        match address {
            Some(addr) => info!("Wallet connected: {:?} on chain {}", addr, chain_id),
            None => info!("No wallet account available on chain {}", chain_id),
        }

        Ok(Self { rpc, context })
    }

    fn tx_request(&self, call: &ContractCall) -> TypedTransaction {
        let mut tx = TransactionRequest::new()
            .to(call.address)
            .data(call.data.clone());
        if let Some(from) = self.context.address {
            tx = tx.from(from);
        }
        tx.into()
    }
}

#[async_trait]
impl Wallet for RpcWallet {
    fn context(&self) -> WalletContext {
        self.context
    }

    async fn simulate(&self, call: &ContractCall) -> Result<()> {
        self.context.require_address()?;
        self.rpc.call(&self.tx_request(call)).await?;
        debug!(
            contract = call.contract,
            function = call.function_name(),
            "Simulation passed"
        );
        Ok(())
    }

    async fn send(&self, call: &ContractCall) -> Result<H256> {
        self.context.require_address()?;
        self.rpc.send_transaction(self.tx_request(call)).await
    }

    async fn read(&self, call: &ContractCall) -> Result<Vec<Token>> {
        let output = self.rpc.call(&self.tx_request(call)).await?;
        call.decode_output(&output)
    }
}

#[async_trait]
impl ChainReader for RpcWallet {
    async fn receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        self.rpc.transaction_receipt(tx_hash).await
    }

    async fn block_number(&self) -> Result<u64> {
        self.rpc.block_number().await
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        self.rpc.logs(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::mock_config;
    use crate::contracts::ContractBinding;
    use ethers::types::U256;
    use mockito::Matcher;
    use serde_json::json;

    const ACCOUNT: &str = "0x00000000000000000000000000000000000000aa";

    async fn node_with_account() -> mockito::ServerGuard {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_chainId"})))
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x7a69"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_accounts"})))
            .with_body(format!(r#"{{"jsonrpc":"2.0","id":2,"result":["{ACCOUNT}"]}}"#))
            .create_async()
            .await;
        server
    }

    #[test]
    fn test_disconnected_context() {
        let ctx = WalletContext {
            address: None,
            chain_id: 1,
        };
        assert!(!ctx.is_connected());
        assert!(matches!(ctx.require_address(), Err(DappError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_uses_first_account() {
        let server = node_with_account().await;
        let mut config = mock_config();
        config.rpc_url = server.url();

        let wallet = RpcWallet::connect(&config).await.unwrap();
        let ctx = wallet.context();
        assert_eq!(ctx.chain_id, 31337);
        assert_eq!(ctx.address, Some(ACCOUNT.parse().unwrap()));
    }

    #[tokio::test]
    async fn test_connect_rejects_wrong_chain() {
        let server = node_with_account().await;
        let mut config = mock_config();
        config.rpc_url = server.url();
        config.chain_id = Some(1);

        let result = RpcWallet::connect(&config).await;
        assert!(matches!(result, Err(DappError::Config(_))));
    }

    #[tokio::test]
    async fn test_read_decodes_output() {
        let mut server = node_with_account().await;
        let balance = ethers::abi::encode(&[Token::Uint(U256::from(42u64))]);
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_call"})))
            .with_body(format!(
                r#"{{"jsonrpc":"2.0","id":3,"result":"0x{}"}}"#,
                hex::encode(balance)
            ))
            .create_async()
            .await;

        let mut config = mock_config();
        config.rpc_url = server.url();
        let wallet = RpcWallet::connect(&config).await.unwrap();

        let rewards = ContractBinding::token_rewards(Address::repeat_byte(0x22)).unwrap();
        let call = rewards
            .call("getUserBalance", vec![Token::Address(Address::repeat_byte(0xaa))])
            .unwrap();
        let tokens = wallet.read(&call).await.unwrap();
        assert_eq!(tokens, vec![Token::Uint(U256::from(42u64))]);
    }

    #[tokio::test]
    async fn test_send_uses_node_account() {
        let mut server = node_with_account().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_gasPrice"})))
            .with_body(r#"{"jsonrpc":"2.0","id":3,"result":"0x3b9aca00"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_estimateGas"})))
            .with_body(r#"{"jsonrpc":"2.0","id":4,"result":"0x5208"}"#)
            .create_async()
            .await;
        let hash = H256::repeat_byte(0x5e);
        let sent = server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({"method": "eth_sendTransaction"})),
                Matcher::Regex(format!(r#""from":"{ACCOUNT}""#)),
            ]))
            .with_body(format!(r#"{{"jsonrpc":"2.0","id":5,"result":"{hash:?}"}}"#))
            .create_async()
            .await;

        let mut config = mock_config();
        config.rpc_url = server.url();
        let wallet = RpcWallet::connect(&config).await.unwrap();

        let rewards = ContractBinding::token_rewards(Address::repeat_byte(0x22)).unwrap();
        let call = rewards
            .call("claimRewards", vec![Token::FixedBytes(vec![0x42; 32])])
            .unwrap();
        assert_eq!(wallet.send(&call).await.unwrap(), hash);
        sent.assert_async().await;
    }
}
