//! In-memory chain and wallet for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, Filter, Log, TransactionReceipt, ValueOrArray, H256, U64};

use crate::contracts::{ContractBinding, ContractCall, EventSpec};
use crate::errors::{DappError, Result};
use crate::storage::ContentStore;
use crate::wallet::{ChainReader, Wallet, WalletContext};

pub const TEST_ACCOUNT: Address = Address::repeat_byte(0xaa);
pub const TEST_CHAIN_ID: u64 = 31337;

/// A TokenRewards binding at a fixed address.
pub fn test_binding() -> ContractBinding {
    ContractBinding::token_rewards(Address::repeat_byte(0x22)).expect("valid ABI")
}

#[derive(Default)]
struct Inner {
    next_tx: u64,
    receipt_status: u64,
    simulated: Vec<String>,
    sent: Vec<ContractCall>,
    receipts: HashMap<H256, TransactionReceipt>,
    pending_polls: usize,
    receipt_polls: usize,
    reads: HashMap<String, Vec<Token>>,
    logs: Vec<Log>,
    head: u64,
    simulation_error: Option<DappError>,
    send_error: Option<DappError>,
    receipt_error: Option<DappError>,
    read_error: Option<DappError>,
    log_errors: VecDeque<DappError>,
}

/// Scripted chain implementing both [`Wallet`] and [`ChainReader`].
///
/// Sent transactions are mined immediately with the configured receipt
/// status (default `1`). Error injections fire once.
pub struct MockChain {
    context: WalletContext,
    inner: Mutex<Inner>,
}

impl MockChain {
    pub fn new(context: WalletContext) -> Arc<Self> {
        Arc::new(Self {
            context,
            inner: Mutex::new(Inner {
                receipt_status: 1,
                ..Default::default()
            }),
        })
    }

    pub fn connected() -> Arc<Self> {
        Self::new(WalletContext::connected(TEST_ACCOUNT, TEST_CHAIN_ID))
    }

    pub fn disconnected() -> Arc<Self> {
        Self::new(WalletContext {
            address: None,
            chain_id: TEST_CHAIN_ID,
        })
    }

    pub fn hash_token() -> Token {
        Token::FixedBytes(H256::repeat_byte(0x42).as_bytes().to_vec())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("mock chain lock poisoned")
    }

    pub fn set_receipt_status(&self, status: u64) {
        self.lock().receipt_status = status;
    }

    pub fn mine(&self, hash: H256, status: u64) {
        let mut inner = self.lock();
        let block = inner.head;
        inner.receipts.insert(hash, receipt(hash, block, status));
    }

    /// Number of polls that see the receipt as pending before it shows up.
    pub fn set_pending_polls(&self, polls: usize) {
        self.lock().pending_polls = polls;
    }

    pub fn receipt_polls(&self) -> usize {
        self.lock().receipt_polls
    }

    pub fn set_read(&self, function: &str, output: Vec<Token>) {
        self.lock().reads.insert(function.to_string(), output);
    }

    pub fn set_head(&self, block: u64) {
        self.lock().head = block;
    }

    pub fn push_log(&self, log: Log) {
        let mut inner = self.lock();
        if let Some(block) = log.block_number {
            inner.head = inner.head.max(block.as_u64());
        }
        inner.logs.push(log);
    }

    pub fn fail_simulation(&self, err: DappError) {
        self.lock().simulation_error = Some(err);
    }

    pub fn fail_send(&self, err: DappError) {
        self.lock().send_error = Some(err);
    }

    pub fn fail_receipts(&self, err: DappError) {
        self.lock().receipt_error = Some(err);
    }

    pub fn fail_read(&self, err: DappError) {
        self.lock().read_error = Some(err);
    }

    pub fn fail_logs(&self, err: DappError) {
        self.lock().log_errors.push_back(err);
    }

    /// Names of the functions that reached the wallet for signing.
    pub fn sent_calls(&self) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .map(|c| c.function_name().to_string())
            .collect()
    }

    pub fn sent(&self) -> Vec<ContractCall> {
        self.lock().sent.clone()
    }

    pub fn simulated_calls(&self) -> Vec<String> {
        self.lock().simulated.clone()
    }

    pub fn last_tx_hash(&self) -> Option<H256> {
        let inner = self.lock();
        (inner.next_tx > 0).then(|| H256::from_low_u64_be(inner.next_tx))
    }
}

fn receipt(hash: H256, block: u64, status: u64) -> TransactionReceipt {
    TransactionReceipt {
        transaction_hash: hash,
        block_number: Some(U64::from(block)),
        status: Some(U64::from(status)),
        ..Default::default()
    }
}

/// Address, topic0 and block range matching, as a node applies a filter.
fn filter_matches(filter: &Filter, log: &Log) -> bool {
    let block = log.block_number.map(|b| b.as_u64()).unwrap_or_default();
    let from = filter.get_from_block().map(|b| b.as_u64()).unwrap_or_default();
    let to = filter.get_to_block().map(|b| b.as_u64()).unwrap_or(u64::MAX);
    let address = match &filter.address {
        Some(ValueOrArray::Value(address)) => *address == log.address,
        Some(ValueOrArray::Array(addresses)) => addresses.contains(&log.address),
        None => true,
    };
    let topic0 = match &filter.topics[0] {
        Some(ValueOrArray::Value(Some(topic))) => log.topics.first() == Some(topic),
        _ => true,
    };
    address && topic0 && block >= from && block <= to
}

/// Encode `args` as a log of `spec`'s event, splitting indexed params into topics.
pub fn encode_log(spec: &EventSpec, args: Vec<Token>, block: u64, log_index: u64) -> Log {
    let mut topics = vec![spec.topic0()];
    let mut data = Vec::new();
    for (param, token) in spec.event.inputs.iter().zip(args) {
        if param.indexed {
            topics.push(H256::from_slice(&abi::encode(&[token])));
        } else {
            data.push(token);
        }
    }
    Log {
        address: spec.address,
        topics,
        data: Bytes::from(abi::encode(&data)),
        block_number: Some(U64::from(block)),
        transaction_hash: Some(H256::from_low_u64_be(block * 1000 + log_index)),
        log_index: Some(log_index.into()),
        ..Default::default()
    }
}

#[async_trait]
impl Wallet for MockChain {
    fn context(&self) -> WalletContext {
        self.context
    }

    async fn simulate(&self, call: &ContractCall) -> Result<()> {
        self.context.require_address()?;
        let mut inner = self.lock();
        inner.simulated.push(call.function_name().to_string());
        match inner.simulation_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn send(&self, call: &ContractCall) -> Result<H256> {
        self.context.require_address()?;
        let mut inner = self.lock();
        if let Some(err) = inner.send_error.take() {
            return Err(err);
        }
        inner.next_tx += 1;
        inner.head += 1;
        let hash = H256::from_low_u64_be(inner.next_tx);
        let (block, status) = (inner.head, inner.receipt_status);
        inner.receipts.insert(hash, receipt(hash, block, status));
        inner.sent.push(call.clone());
        Ok(hash)
    }

    async fn read(&self, call: &ContractCall) -> Result<Vec<Token>> {
        let mut inner = self.lock();
        if let Some(err) = inner.read_error.take() {
            return Err(err);
        }
        inner
            .reads
            .get(call.function_name())
            .cloned()
            .ok_or_else(|| DappError::Rpc(format!("no scripted output for {}", call.function_name())))
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        let mut inner = self.lock();
        inner.receipt_polls += 1;
        if let Some(err) = inner.receipt_error.take() {
            return Err(err);
        }
        if inner.pending_polls > 0 {
            inner.pending_polls -= 1;
            return Ok(None);
        }
        Ok(inner.receipts.get(&tx_hash).cloned())
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.lock().head)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        let mut inner = self.lock();
        if let Some(err) = inner.log_errors.pop_front() {
            return Err(err);
        }
        Ok(inner
            .logs
            .iter()
            .filter(|log| filter_matches(filter, log))
            .cloned()
            .collect())
    }
}

/// In-memory content store returning scripted CIDs.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, (String, serde_json::Value)>>,
    next_cids: Mutex<VecDeque<String>>,
    fail_next: Mutex<Option<DappError>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_cid(cid: &str) -> Arc<Self> {
        let store = Self::new();
        store.push_cid(cid);
        store
    }

    pub fn push_cid(&self, cid: &str) {
        self.next_cids
            .lock()
            .expect("store lock poisoned")
            .push_back(cid.to_string());
    }

    pub fn fail_next(&self, err: DappError) {
        *self.fail_next.lock().expect("store lock poisoned") = Some(err);
    }

    /// File name and payload stored under `cid`.
    pub fn object(&self, cid: &str) -> Option<(String, serde_json::Value)> {
        self.objects
            .lock()
            .expect("store lock poisoned")
            .get(cid)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn store(&self, name: &str, payload: &serde_json::Value) -> Result<String> {
        if let Some(err) = self.fail_next.lock().expect("store lock poisoned").take() {
            return Err(err);
        }
        let mut objects = self.objects.lock().expect("store lock poisoned");
        let cid = self
            .next_cids
            .lock()
            .expect("store lock poisoned")
            .pop_front()
            .unwrap_or_else(|| format!("bafymemory{}", objects.len()));
        objects.insert(cid.clone(), (name.to_string(), payload.clone()));
        Ok(cid)
    }

    async fn retrieve(&self, cid: &str) -> Result<serde_json::Value> {
        self.objects
            .lock()
            .expect("store lock poisoned")
            .get(cid)
            .map(|(_, payload)| payload.clone())
            .ok_or_else(|| DappError::Storage(format!("CID {cid} not found")))
    }
}
