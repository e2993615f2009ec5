//! Page-level services: one per dashboard page, each composing forms,
//! reads and event feeds over the shared wallet context.

pub mod admin;
pub mod data;
pub mod devices;
pub mod rewards;

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ethers::abi::Token;
use ethers::types::{Address, H256, U256};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::contracts::{ContractBinding, ContractCall};
use crate::dispatcher::Dispatcher;
use crate::errors::{DappError, Result};
use crate::form::{FieldSpec, FormState, FormValues};
use crate::notify::{Notification, Notifier};
use crate::operation::{FlowMessages, Outcome, TxFlow};
use crate::receipt::ReceiptWaiter;
use crate::wallet::{ChainReader, Wallet, WalletContext};

pub use admin::AdminPage;
pub use data::DataPage;
pub use devices::DevicesPage;
pub use rewards::RewardsPage;

/// Shared handles every page is built from.
#[derive(Clone)]
pub struct PageContext {
    pub wallet: Arc<dyn Wallet>,
    pub chain: Arc<dyn ChainReader>,
    pub notifier: Arc<dyn Notifier>,
    pub poll_interval: Duration,
}

impl PageContext {
    pub fn new(
        wallet: Arc<dyn Wallet>,
        chain: Arc<dyn ChainReader>,
        notifier: Arc<dyn Notifier>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            wallet,
            chain,
            notifier,
            poll_interval,
        }
    }

    pub fn wallet_context(&self) -> WalletContext {
        self.wallet.context()
    }

    /// The connected account, or `NotConnected`.
    pub fn account(&self) -> Result<Address> {
        self.wallet.context().require_address()
    }

    /// Encode and run a view call, returning its decoded outputs.
    pub async fn read(
        &self,
        binding: &ContractBinding,
        function: &str,
        args: Vec<Token>,
    ) -> Result<Vec<Token>> {
        let call = binding.call(function, args)?;
        self.wallet.read(&call).await
    }

    fn flow(&self) -> TxFlow {
        TxFlow::new(
            Dispatcher::new(self.wallet.clone()),
            ReceiptWaiter::new(self.chain.clone(), self.poll_interval),
            self.notifier.clone(),
        )
    }
}

/// Result of one form submission plus the form's remaining fields.
#[derive(Debug)]
pub struct Submission {
    pub outcome: Outcome,
    pub form: FormState,
}

/// A form, its lock and the flow that submits it.
///
/// The lock is held for the whole attempt, so one form never has two
/// operations in flight. Different forms never contend.
pub struct FormSlot {
    wallet: Arc<dyn Wallet>,
    form: Mutex<FormState>,
    flow: TxFlow,
    messages: FlowMessages,
}

impl FormSlot {
    pub fn new(ctx: &PageContext, fields: &'static [FieldSpec], messages: FlowMessages) -> Self {
        Self {
            wallet: ctx.wallet.clone(),
            form: Mutex::new(FormState::new(fields)),
            flow: ctx.flow(),
            messages,
        }
    }

    pub fn flow(&self) -> &TxFlow {
        &self.flow
    }

    pub async fn snapshot(&self) -> FormState {
        self.form.lock().await.clone()
    }

    /// Apply `inputs` to the form and run one attempt through its flow.
    pub async fn submit<'a, I, F, Fut>(&self, inputs: I, build: F) -> Submission
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
        F: FnOnce(FormValues) -> Fut,
        Fut: Future<Output = Result<ContractCall>>,
    {
        let mut form = self.form.lock().await;

        if let Err(e) = self.wallet.context().require_address() {
            let outcome = self
                .flow
                .reject(e, Notification::error("Please connect your wallet"));
            return Submission {
                outcome,
                form: form.clone(),
            };
        }

        if let Err(e) = form.fill(inputs) {
            let notification = Notification::error("Invalid form input").with_description(e.to_string());
            let outcome = self.flow.reject(e, notification);
            return Submission {
                outcome,
                form: form.clone(),
            };
        }

        let outcome = self.flow.submit(&mut form, &self.messages, build).await;
        Submission {
            outcome,
            form: form.clone(),
        }
    }

    /// End an attempt without dispatching, e.g. after a failed precondition read.
    pub async fn reject(&self, error: DappError, notification: Notification) -> Submission {
        let form = self.form.lock().await;
        Submission {
            outcome: self.flow.reject(error, notification),
            form: form.clone(),
        }
    }
}

/// Field value lookup for call builders. Validation already ran, so a
/// missing entry is the field's empty string.
pub(crate) fn field<'a>(values: &'a FormValues, name: &str) -> &'a str {
    values.get(name).map(|v| v.trim()).unwrap_or("")
}

pub(crate) fn parse_address(name: &str, value: &str) -> Result<Address> {
    Address::from_str(value).map_err(|e| DappError::Abi(format!("Invalid {name} '{value}': {e}")))
}

pub(crate) fn parse_uint(name: &str, value: &str) -> Result<U256> {
    U256::from_dec_str(value).map_err(|e| DappError::Abi(format!("Invalid {name} '{value}': {e}")))
}

pub(crate) fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(DappError::Abi(format!("Invalid {name} '{value}': expected true or false"))),
    }
}

pub(crate) fn parse_h256(name: &str, value: &str) -> Result<H256> {
    H256::from_str(value).map_err(|e| DappError::Abi(format!("Invalid {name} '{value}': {e}")))
}

/// Reward amount split into raw units and display string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Amount {
    pub raw: U256,
    pub display: String,
}

impl From<U256> for Amount {
    fn from(raw: U256) -> Self {
        Self {
            raw,
            display: crate::reconcile::format_reward(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationLog;
    use crate::test_utils::{test_binding, MockChain};

    const FIELDS: &[FieldSpec] = &[FieldSpec::required("deviceId")];

    const MESSAGES: FlowMessages = FlowMessages {
        pending: "Claiming rewards...",
        success: "Rewards claimed successfully!",
        failure: "Transaction failed",
        error: "Failed to claim rewards",
        error_hint: "Please try again",
    };

    fn context(chain: &Arc<MockChain>, log: &Arc<NotificationLog>) -> PageContext {
        PageContext::new(chain.clone(), chain.clone(), log.clone(), Duration::from_millis(1))
    }

    async fn claim(_: FormValues) -> Result<ContractCall> {
        test_binding().call("claimRewards", vec![MockChain::hash_token()])
    }

    #[tokio::test]
    async fn test_disconnected_wallet_never_dispatches() {
        let chain = MockChain::disconnected();
        let log = Arc::new(NotificationLog::default());
        let slot = FormSlot::new(&context(&chain, &log), FIELDS, MESSAGES);

        let submission = slot.submit([("deviceId", "device1")], claim).await;

        assert!(matches!(submission.outcome.error, Some(DappError::NotConnected)));
        assert!(chain.sent_calls().is_empty());
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_field_is_rejected() {
        let chain = MockChain::connected();
        let log = Arc::new(NotificationLog::default());
        let slot = FormSlot::new(&context(&chain, &log), FIELDS, MESSAGES);

        let submission = slot.submit([("deviceName", "x")], claim).await;

        assert!(matches!(submission.outcome.error, Some(DappError::Validation(_))));
        assert!(chain.simulated_calls().is_empty());
        assert!(submission.form.is_pristine());
    }

    #[tokio::test]
    async fn test_forms_do_not_share_state() {
        let chain = MockChain::connected();
        chain.set_receipt_status(0);
        let log = Arc::new(NotificationLog::default());
        let ctx = context(&chain, &log);
        let a = FormSlot::new(&ctx, FIELDS, MESSAGES);
        let b = FormSlot::new(&ctx, FIELDS, MESSAGES);

        a.submit([("deviceId", "device1")], claim).await;

        assert_eq!(a.snapshot().await.get("deviceId"), "device1");
        assert!(b.snapshot().await.is_pristine());
    }

    #[test]
    fn test_field_parsers() {
        assert_eq!(parse_uint("fee", "100").unwrap(), U256::from(100u64));
        assert!(parse_uint("fee", "1e5").is_err());
        assert!(parse_bool("validity", "TRUE").unwrap());
        assert!(parse_bool("validity", "yes").is_err());
        assert!(parse_address("address", "0xnothex").is_err());
        assert_eq!(
            parse_address("address", "0x00000000000000000000000000000000000000aa").unwrap(),
            Address::from_low_u64_be(0xaa)
        );
        assert!(parse_h256("deviceHash", "0x42").is_err());
    }
}
