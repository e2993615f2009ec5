//! On-chain event subscription.
//!
//! Each (contract, event) pair gets a watcher task that polls for new logs
//! and decodes them positionally. All watchers of one subscription feed a
//! single channel, consumed by one fold loop (see `reconcile`).

use std::sync::Arc;
use std::time::Duration;

use ethers::abi::{RawLog, Token};
use ethers::types::{Address, Filter, Log, H256};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::contracts::EventSpec;
use crate::errors::{DappError, Result};
use crate::wallet::ChainReader;

const CHANNEL_SIZE: usize = 256;

/// A decoded contract event. Never mutated after decoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainEvent {
    pub name: String,
    pub address: Address,
    /// Arguments in the order of the event's declared signature.
    #[serde(serialize_with = "serialize_args")]
    pub args: Vec<Token>,
    pub block_number: u64,
    pub tx_hash: Option<H256>,
    pub log_index: Option<u64>,
}

fn serialize_args<S: serde::Serializer>(
    args: &[Token],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(args.iter().map(|t| t.to_string()))
}

impl ChainEvent {
    pub fn arg(&self, index: usize) -> Option<&Token> {
        self.args.get(index)
    }

    pub fn address_arg(&self, index: usize) -> Option<Address> {
        self.arg(index).cloned().and_then(Token::into_address)
    }

    pub fn uint_arg(&self, index: usize) -> Option<ethers::types::U256> {
        self.arg(index).cloned().and_then(Token::into_uint)
    }

    pub fn bool_arg(&self, index: usize) -> Option<bool> {
        self.arg(index).cloned().and_then(Token::into_bool)
    }

    pub fn bytes32_arg(&self, index: usize) -> Option<H256> {
        match self.arg(index)? {
            Token::FixedBytes(bytes) if bytes.len() == 32 => Some(H256::from_slice(bytes)),
            _ => None,
        }
    }
}

/// Decode a raw log against an event signature.
pub fn decode_log(spec: &EventSpec, log: &Log) -> Result<ChainEvent> {
    let parsed = spec.event.parse_log(RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    })?;

    Ok(ChainEvent {
        name: spec.event.name.clone(),
        address: log.address,
        args: parsed.params.into_iter().map(|p| p.value).collect(),
        block_number: log.block_number.map(|b| b.as_u64()).unwrap_or_default(),
        tx_hash: log.transaction_hash,
        log_index: log.log_index.map(|i| i.low_u64()),
    })
}

pub struct EventSubscriber {
    chain: Arc<dyn ChainReader>,
    poll_interval: Duration,
}

impl EventSubscriber {
    pub fn new(chain: Arc<dyn ChainReader>, poll_interval: Duration) -> Self {
        Self {
            chain,
            poll_interval,
        }
    }

    /// Start watching `specs` from the current head onward.
    pub async fn subscribe(&self, specs: Vec<EventSpec>) -> Result<Subscription> {
        let head = self.chain.block_number().await?;
        self.subscribe_from(specs, head + 1).await
    }

    /// Start watching `specs` from `from_block` onward.
    pub async fn subscribe_from(&self, specs: Vec<EventSpec>, from_block: u64) -> Result<Subscription> {
        if specs.is_empty() {
            return Err(DappError::Config("Subscription needs at least one event".to_string()));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(specs.len());

        for spec in specs {
            info!(
                "Watching {} on {:?} from block {}",
                spec.event.name, spec.address, from_block
            );
            let watcher = Watcher {
                chain: self.chain.clone(),
                spec,
                cursor: from_block,
                poll_interval: self.poll_interval,
                tx: tx.clone(),
                cancel: cancel.clone(),
            };
            handles.push(tokio::spawn(watcher.run()));
        }

        Ok(Subscription {
            rx,
            cancel,
            handles,
        })
    }
}

struct Watcher {
    chain: Arc<dyn ChainReader>,
    spec: EventSpec,
    cursor: u64,
    poll_interval: Duration,
    tx: mpsc::Sender<ChainEvent>,
    cancel: CancellationToken,
}

impl Watcher {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            match self.poll().await {
                Ok(true) => {}
                Ok(false) => break,
                // The same block range is retried on the next tick.
                Err(e) => warn!("Polling {} logs failed: {}", self.spec.event.name, e),
            }
        }
        debug!("Watcher for {} stopped", self.spec.event.name);
    }

    /// Fetch and forward new logs. Returns `false` once the consumer is gone.
    async fn poll(&mut self) -> Result<bool> {
        let head = self.chain.block_number().await?;
        if head < self.cursor {
            return Ok(true);
        }

        let filter = Filter::new()
            .address(self.spec.address)
            .topic0(self.spec.topic0())
            .from_block(self.cursor)
            .to_block(head);
        let logs = self.chain.logs(&filter).await?;
        if !logs.is_empty() {
            debug!(
                "{} {} log(s) in blocks {}..={}",
                logs.len(),
                self.spec.event.name,
                self.cursor,
                head
            );
        }

        for log in &logs {
            match decode_log(&self.spec, log) {
                Ok(event) => {
                    if self.tx.send(event).await.is_err() {
                        return Ok(false);
                    }
                }
                Err(e) => warn!("Skipping undecodable {} log: {}", self.spec.event.name, e),
            }
        }

        self.cursor = head + 1;
        Ok(true)
    }
}

/// Live subscription. Dropping it stops every watcher.
pub struct Subscription {
    rx: mpsc::Receiver<ChainEvent>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Subscription {
    /// Next event in delivery order; `None` after unsubscribe.
    pub async fn next(&mut self) -> Option<ChainEvent> {
        tokio::select! {
            event = self.rx.recv() => event,
            _ = self.cancel.cancelled() => None,
        }
    }

    /// Token that stops this subscription when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ContractBinding;
    use crate::test_utils::{encode_log, MockChain};
    use ethers::types::U256;

    fn rewards_claimed() -> EventSpec {
        ContractBinding::token_rewards(Address::repeat_byte(0x22))
            .unwrap()
            .event("RewardsClaimed")
            .unwrap()
    }

    fn admin_added() -> EventSpec {
        ContractBinding::access_manager(Address::repeat_byte(0x33))
            .unwrap()
            .event("AdminAdded")
            .unwrap()
    }

    #[test]
    fn test_decode_positional_args() {
        let spec = rewards_claimed();
        let operator = Address::repeat_byte(0xaa);
        let log = encode_log(
            &spec,
            vec![Token::Address(operator), Token::Uint(U256::from(2_500_000u64))],
            7,
            0,
        );

        let event = decode_log(&spec, &log).unwrap();
        assert_eq!(event.name, "RewardsClaimed");
        assert_eq!(event.address_arg(0), Some(operator));
        assert_eq!(event.uint_arg(1), Some(U256::from(2_500_000u64)));
        assert_eq!(event.block_number, 7);
    }

    #[test]
    fn test_decode_wrong_signature_fails() {
        let log = encode_log(
            &admin_added(),
            vec![Token::Address(Address::repeat_byte(0xaa))],
            1,
            0,
        );
        assert!(decode_log(&rewards_claimed(), &log).is_err());
    }

    #[tokio::test]
    async fn test_delivers_in_order_without_dedup() {
        let chain = MockChain::connected();
        chain.set_head(10);
        let spec = rewards_claimed();
        let subscriber = EventSubscriber::new(chain.clone(), Duration::from_millis(5));
        let mut sub = subscriber.subscribe(vec![spec.clone()]).await.unwrap();

        let amounts = [1u64, 2, 2];
        for (i, amount) in amounts.iter().enumerate() {
            let mut log = encode_log(
                &spec,
                vec![Token::Address(Address::repeat_byte(0xaa)), Token::Uint(U256::from(*amount))],
                11,
                i as u64,
            );
            // Same log delivered twice by the transport.
            if i == 2 {
                log.log_index = Some(1u64.into());
                log.transaction_hash = Some(H256::from_low_u64_be(11_001));
            }
            chain.push_log(log);
        }

        let mut seen = Vec::new();
        for _ in 0..amounts.len() {
            let event = sub.next().await.unwrap();
            seen.push(event.uint_arg(1).unwrap().as_u64());
        }
        assert_eq!(seen, vec![1, 2, 2]);
        sub.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_ignores_history_before_subscribe() {
        let chain = MockChain::connected();
        let spec = admin_added();
        chain.push_log(encode_log(&spec, vec![Token::Address(Address::repeat_byte(0x01))], 5, 0));

        let subscriber = EventSubscriber::new(chain.clone(), Duration::from_millis(5));
        let mut sub = subscriber.subscribe(vec![spec.clone()]).await.unwrap();
        chain.push_log(encode_log(&spec, vec![Token::Address(Address::repeat_byte(0x02))], 6, 0));

        let event = sub.next().await.unwrap();
        assert_eq!(event.address_arg(0), Some(Address::repeat_byte(0x02)));
    }

    #[tokio::test]
    async fn test_transport_error_retries_same_range() {
        let chain = MockChain::connected();
        chain.set_head(1);
        chain.fail_logs(DappError::Network("timeout".into()));
        let spec = admin_added();
        let subscriber = EventSubscriber::new(chain.clone(), Duration::from_millis(5));
        let mut sub = subscriber.subscribe(vec![spec.clone()]).await.unwrap();
        chain.push_log(encode_log(&spec, vec![Token::Address(Address::repeat_byte(0x0b))], 2, 0));

        let event = sub.next().await.unwrap();
        assert_eq!(event.address_arg(0), Some(Address::repeat_byte(0x0b)));
    }

    #[tokio::test]
    async fn test_unsubscribe_ends_stream() {
        let chain = MockChain::connected();
        let subscriber = EventSubscriber::new(chain.clone(), Duration::from_millis(5));
        let sub = subscriber.subscribe(vec![admin_added()]).await.unwrap();
        let token = sub.cancel_token();
        drop(sub);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_empty_subscription_rejected() {
        let chain = MockChain::connected();
        let subscriber = EventSubscriber::new(chain, Duration::from_millis(5));
        assert!(subscriber.subscribe(vec![]).await.is_err());
    }
}
