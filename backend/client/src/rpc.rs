//! Node access over an ethers HTTP provider.
//!
//! Wraps `Provider<Http>` with the configured request timeout and maps
//! provider errors onto the client's error taxonomy.

use std::future::Future;
use std::time::Duration;

use ethers::abi::{self, ParamType, Token};
use ethers::providers::{Http, JsonRpcError, Middleware, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Filter, Log, TransactionReceipt, H256};
use tracing::debug;

use crate::errors::{DappError, Result};

/// Selector of the `Error(string)` revert payload.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

pub struct RpcClient {
    provider: Provider<Http>,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let provider = Provider::<Http>::try_from(url)
            .map_err(|e| DappError::Config(format!("Invalid RPC_URL {url}: {e}")))?;
        Ok(Self { provider, timeout })
    }

    /// Run one provider request under the configured timeout.
    async fn timed<T, F>(&self, method: &str, request: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result.map_err(|e| {
                debug!(method, error = %e, "Provider request failed");
                map_provider_error(e)
            }),
            Err(_) => Err(DappError::Network(format!(
                "{method} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let id = self.timed("eth_chainId", self.provider.get_chainid()).await?;
        Ok(id.low_u64())
    }

    pub async fn accounts(&self) -> Result<Vec<Address>> {
        self.timed("eth_accounts", self.provider.get_accounts()).await
    }

    pub async fn block_number(&self) -> Result<u64> {
        let number = self
            .timed("eth_blockNumber", self.provider.get_block_number())
            .await?;
        Ok(number.as_u64())
    }

    /// `eth_call` against the latest block.
    pub async fn call(&self, tx: &TypedTransaction) -> Result<Bytes> {
        self.timed("eth_call", self.provider.call(tx, None)).await
    }

    /// Broadcast through the node's unlocked account. Gas is filled by the provider.
    pub async fn send_transaction(&self, tx: TypedTransaction) -> Result<H256> {
        self.timed("eth_sendTransaction", async {
            let pending = self.provider.send_transaction(tx, None).await?;
            Ok::<_, ProviderError>(pending.tx_hash())
        })
        .await
    }

    /// Returns `None` while the transaction is still pending.
    pub async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        self.timed(
            "eth_getTransactionReceipt",
            self.provider.get_transaction_receipt(hash),
        )
        .await
    }

    pub async fn logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        self.timed("eth_getLogs", self.provider.get_logs(filter)).await
    }
}

/// Map a provider failure: node error objects are classified, malformed
/// responses are `Rpc`, anything else is transport.
pub fn map_provider_error(err: ProviderError) -> DappError {
    if let Some(response) = err.as_error_response() {
        return classify_rpc_error(response);
    }
    if err.as_serde_error().is_some() {
        return DappError::Rpc(err.to_string());
    }
    DappError::Network(err.to_string())
}

/// Map a JSON-RPC error object onto the error taxonomy.
///
/// Wallet rejections use EIP-1193 code 4001; reverts use code 3 (geth) or
/// carry "revert" in the message (hardhat, anvil).
pub fn classify_rpc_error(error: &JsonRpcError) -> DappError {
    let message = error.message.clone();
    let lower = message.to_lowercase();

    if error.code == 4001 || lower.contains("user rejected") || lower.contains("user denied") {
        return DappError::UserRejected(message);
    }

    if lower.contains("insufficient funds") {
        return DappError::InsufficientFunds(message);
    }

    if error.code == 3 || lower.contains("revert") {
        let reason = error
            .data
            .as_ref()
            .and_then(|d| d.as_str())
            .and_then(decode_revert_reason)
            .unwrap_or(message);
        return DappError::SimulationReverted(reason);
    }

    DappError::Rpc(format!("{message} (code: {})", error.code))
}

/// Decode an `Error(string)` revert payload into its reason string.
pub fn decode_revert_reason(data: &str) -> Option<String> {
    let bytes = hex::decode(data.trim_start_matches("0x")).ok()?;
    if bytes.len() < 4 || bytes[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    match abi::decode(&[ParamType::String], &bytes[4..]).ok()?.pop()? {
        Token::String(reason) => Some(reason),
        _ => None,
    }
}
