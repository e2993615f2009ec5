//! Submission lifecycle: form -> dispatch -> receipt -> reconcile the form.
//!
//! ```text
//! idle -> submitting -> waiting -> confirmed | failed -> idle
//! ```

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ethers::abi::Token;
use ethers::types::{TransactionReceipt, H256};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::contracts::ContractCall;
use crate::dispatcher::Dispatcher;
use crate::errors::{DappError, Result};
use crate::form::{FormState, FormValues};
use crate::notify::{Notification, Notifier};
use crate::receipt::{is_success, ReceiptWaiter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Idle,
    Submitting,
    Waiting,
    Confirmed,
    Failed,
}

/// A submission in flight. Owned by the form that created it.
#[derive(Debug, Clone, Serialize)]
pub struct PendingOperation {
    pub function: String,
    #[serde(serialize_with = "serialize_tokens")]
    pub args: Vec<Token>,
    pub submitted_at: DateTime<Utc>,
    pub status: OperationStatus,
    pub tx_hash: Option<H256>,
}

fn serialize_tokens<S: serde::Serializer>(
    tokens: &[Token],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(tokens.iter().map(|t| t.to_string()))
}

/// Toast texts for one kind of submission.
#[derive(Debug, Clone, Copy)]
pub struct FlowMessages {
    pub pending: &'static str,
    pub success: &'static str,
    pub failure: &'static str,
    pub error: &'static str,
    pub error_hint: &'static str,
}

/// Result of one submission attempt.
#[derive(Debug)]
pub struct Outcome {
    /// `None` when the attempt stopped before a call was built.
    pub operation: Option<PendingOperation>,
    pub receipt: Option<TransactionReceipt>,
    pub error: Option<DappError>,
    /// Toasts emitted during this attempt, in order.
    pub notifications: Vec<Notification>,
}

impl Outcome {
    pub fn status(&self) -> OperationStatus {
        self.operation
            .as_ref()
            .map(|op| op.status)
            .unwrap_or(OperationStatus::Failed)
    }

    pub fn is_confirmed(&self) -> bool {
        self.status() == OperationStatus::Confirmed
    }

    fn rejected(error: DappError, notifications: Vec<Notification>) -> Self {
        Self {
            operation: None,
            receipt: None,
            error: Some(error),
            notifications,
        }
    }
}

/// Lifecycle of a single form's submissions.
///
/// Each form gets its own flow so its status channel reflects only its own
/// operation; flows share the dispatcher, waiter and notifier.
pub struct TxFlow {
    dispatcher: Dispatcher,
    waiter: ReceiptWaiter,
    notifier: Arc<dyn Notifier>,
    status: watch::Sender<OperationStatus>,
}

impl TxFlow {
    pub fn new(dispatcher: Dispatcher, waiter: ReceiptWaiter, notifier: Arc<dyn Notifier>) -> Self {
        let (status, _) = watch::channel(OperationStatus::Idle);
        Self {
            dispatcher,
            waiter,
            notifier,
            status,
        }
    }

    pub fn status(&self) -> OperationStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<OperationStatus> {
        self.status.subscribe()
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Stop an attempt before validation with a single error toast.
    pub fn reject(&self, error: DappError, notification: Notification) -> Outcome {
        let mut notes = Vec::with_capacity(1);
        self.emit(&mut notes, notification);
        Outcome::rejected(error, notes)
    }

    /// Run one submission attempt for `form`.
    ///
    /// `build` turns the validated field values into a call descriptor and
    /// may do async work of its own (e.g. uploading metadata). Exactly one
    /// success or error notification is emitted per call. The form is reset
    /// only when the receipt reports success.
    pub async fn submit<F, Fut>(
        &self,
        form: &mut FormState,
        messages: &FlowMessages,
        build: F,
    ) -> Outcome
    where
        F: FnOnce(FormValues) -> Fut,
        Fut: Future<Output = Result<ContractCall>>,
    {
        let mut notes = Vec::new();

        if let Err(e) = form.validate() {
            let notification = match &e {
                DappError::Validation(detail) => {
                    Notification::error("Please fill in all fields").with_description(detail.clone())
                }
                other => Notification::error(other.to_string()),
            };
            self.emit(&mut notes, notification);
            return Outcome::rejected(e, notes);
        }

        let call = match build(form.values()).await {
            Ok(call) => call,
            Err(e) => {
                error!("Error preparing submission: {}", e);
                self.emit(
                    &mut notes,
                    Notification::error(messages.error).with_description(messages.error_hint),
                );
                return Outcome::rejected(e, notes);
            }
        };

        let mut op = PendingOperation {
            function: call.function_name().to_string(),
            args: call.args.clone(),
            submitted_at: Utc::now(),
            status: OperationStatus::Submitting,
            tx_hash: None,
        };
        self.transition(&mut op, OperationStatus::Submitting);

        let tx_hash = match self.dispatcher.dispatch(&call).await {
            Ok(hash) => hash,
            Err(e) => return self.fail(op, e, messages, notes),
        };
        op.tx_hash = Some(tx_hash);
        self.emit(&mut notes, Notification::info(messages.pending));
        self.transition(&mut op, OperationStatus::Waiting);

        let receipt = match self.waiter.wait(tx_hash).await {
            Ok(receipt) => receipt,
            Err(e) => return self.fail(op, e, messages, notes),
        };

        if is_success(&receipt) {
            form.reset();
            self.emit(&mut notes, Notification::success(messages.success));
            self.transition(&mut op, OperationStatus::Confirmed);
            info!("{} confirmed in {:?}", op.function, tx_hash);
        } else {
            warn!("{} reverted in {:?}", op.function, tx_hash);
            self.emit(&mut notes, Notification::error(messages.failure));
            self.transition(&mut op, OperationStatus::Failed);
        }
        self.status.send_replace(OperationStatus::Idle);

        Outcome {
            operation: Some(op),
            receipt: Some(receipt),
            error: None,
            notifications: notes,
        }
    }

    fn fail(
        &self,
        mut op: PendingOperation,
        err: DappError,
        messages: &FlowMessages,
        mut notes: Vec<Notification>,
    ) -> Outcome {
        error!("Error submitting {}: {}", op.function, err);
        let description = match &err {
            DappError::UserRejected(_) => "Request rejected in wallet".to_string(),
            DappError::SimulationReverted(reason) => format!("Transaction would revert: {reason}"),
            DappError::InsufficientFunds(_) => "Insufficient funds for gas".to_string(),
            _ => messages.error_hint.to_string(),
        };
        self.emit(
            &mut notes,
            Notification::error(messages.error).with_description(description),
        );
        self.transition(&mut op, OperationStatus::Failed);
        self.status.send_replace(OperationStatus::Idle);
        Outcome {
            operation: Some(op),
            receipt: None,
            error: Some(err),
            notifications: notes,
        }
    }

    fn emit(&self, notes: &mut Vec<Notification>, notification: Notification) {
        notes.push(notification.clone());
        self.notifier.notify(notification);
    }

    fn transition(&self, op: &mut PendingOperation, status: OperationStatus) {
        op.status = status;
        self.status.send_replace(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::form::FieldSpec;
    use crate::notify::{NoticeLevel, NotificationLog};
    use crate::test_utils::{test_binding, MockChain};

    const FIELDS: &[FieldSpec] = &[FieldSpec::required("deviceId")];

    const MESSAGES: FlowMessages = FlowMessages {
        pending: "Claiming rewards...",
        success: "Rewards claimed successfully!",
        failure: "Transaction failed",
        error: "Failed to claim rewards",
        error_hint: "Please try again",
    };

    fn flow(chain: &Arc<MockChain>, log: &Arc<NotificationLog>) -> TxFlow {
        TxFlow::new(
            Dispatcher::new(chain.clone()),
            ReceiptWaiter::new(chain.clone(), Duration::from_millis(1)),
            log.clone(),
        )
    }

    fn filled_form() -> FormState {
        let mut form = FormState::new(FIELDS);
        form.set("deviceId", "device1").unwrap();
        form
    }

    fn build(_: FormValues) -> impl Future<Output = Result<ContractCall>> {
        async { test_binding().call("claimRewards", vec![MockChain::hash_token()]) }
    }

    fn terminal_count(log: &NotificationLog) -> usize {
        log.recent().iter().filter(|n| n.is_terminal()).count()
    }

    #[tokio::test]
    async fn test_success_resets_form() {
        let chain = MockChain::connected();
        let log = Arc::new(NotificationLog::default());
        let flow = flow(&chain, &log);
        let mut form = filled_form();

        let outcome = flow.submit(&mut form, &MESSAGES, build).await;

        assert!(outcome.is_confirmed());
        assert!(form.is_pristine());
        assert_eq!(terminal_count(&log), 1);
        let titles: Vec<_> = outcome.notifications.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["Claiming rewards...", "Rewards claimed successfully!"]);
        let last = log.recent().pop().unwrap();
        assert_eq!(last.level, NoticeLevel::Success);
        assert_eq!(last.title, "Rewards claimed successfully!");
        assert_eq!(flow.status(), OperationStatus::Idle);
    }

    #[tokio::test]
    async fn test_failed_receipt_keeps_fields() {
        let chain = MockChain::connected();
        chain.set_receipt_status(0);
        let log = Arc::new(NotificationLog::default());
        let flow = flow(&chain, &log);
        let mut form = filled_form();

        let outcome = flow.submit(&mut form, &MESSAGES, build).await;

        assert_eq!(outcome.status(), OperationStatus::Failed);
        assert!(outcome.error.is_none());
        assert_eq!(form.get("deviceId"), "device1");
        assert_eq!(terminal_count(&log), 1);
        assert_eq!(log.recent().pop().unwrap().title, "Transaction failed");
    }

    #[tokio::test]
    async fn test_validation_never_dispatches() {
        let chain = MockChain::connected();
        let log = Arc::new(NotificationLog::default());
        let flow = flow(&chain, &log);
        let mut form = FormState::new(FIELDS);

        let outcome = flow.submit(&mut form, &MESSAGES, build).await;

        assert!(matches!(outcome.error, Some(DappError::Validation(_))));
        assert!(outcome.operation.is_none());
        assert!(chain.simulated_calls().is_empty());
        assert!(chain.sent_calls().is_empty());
        assert_eq!(terminal_count(&log), 1);
    }

    #[tokio::test]
    async fn test_build_error_never_dispatches() {
        let chain = MockChain::connected();
        let log = Arc::new(NotificationLog::default());
        let flow = flow(&chain, &log);
        let mut form = filled_form();

        let outcome = flow
            .submit(&mut form, &MESSAGES, |_| async {
                Err(DappError::Storage("upload failed".into()))
            })
            .await;

        assert!(matches!(outcome.error, Some(DappError::Storage(_))));
        assert!(chain.sent_calls().is_empty());
        assert_eq!(form.get("deviceId"), "device1");
        assert_eq!(terminal_count(&log), 1);
    }

    #[tokio::test]
    async fn test_rejection_is_one_error_toast() {
        let chain = MockChain::connected();
        chain.fail_send(DappError::UserRejected("denied".into()));
        let log = Arc::new(NotificationLog::default());
        let flow = flow(&chain, &log);
        let mut form = filled_form();

        let outcome = flow.submit(&mut form, &MESSAGES, build).await;

        assert_eq!(outcome.status(), OperationStatus::Failed);
        assert!(matches!(outcome.error, Some(DappError::UserRejected(_))));
        assert_eq!(form.get("deviceId"), "device1");
        assert_eq!(log.len(), 1);
        let toast = log.recent().pop().unwrap();
        assert_eq!(toast.level, NoticeLevel::Error);
        assert_eq!(toast.description.as_deref(), Some("Request rejected in wallet"));
    }

    #[tokio::test]
    async fn test_receipt_wait_failure_marks_failed() {
        let chain = MockChain::connected();
        chain.fail_receipts(DappError::Network("disconnected".into()));
        let log = Arc::new(NotificationLog::default());
        let flow = flow(&chain, &log);
        let mut form = filled_form();

        let outcome = flow.submit(&mut form, &MESSAGES, build).await;

        assert_eq!(outcome.status(), OperationStatus::Failed);
        assert!(outcome.operation.unwrap().tx_hash.is_some());
        assert!(matches!(outcome.error, Some(DappError::Network(_))));
        assert_eq!(terminal_count(&log), 1);
    }

    #[tokio::test]
    async fn test_status_returns_to_idle() {
        let chain = MockChain::connected();
        chain.set_pending_polls(2);
        let log = Arc::new(NotificationLog::default());
        let flow = flow(&chain, &log);
        let mut rx = flow.subscribe_status();
        let mut form = filled_form();

        let seen = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let status = *rx.borrow_and_update();
                seen.push(status);
                if status == OperationStatus::Idle {
                    break;
                }
            }
            seen
        });

        flow.submit(&mut form, &MESSAGES, build).await;
        let seen = seen.await.unwrap();
        assert_eq!(seen.last(), Some(&OperationStatus::Idle));
        assert_eq!(flow.status(), OperationStatus::Idle);
    }
}
