//! Data page: submit device readings to the oracle contract.

use chrono::Utc;
use ethers::abi::Token;
use ethers::types::U256;

use super::admin::{decode_requests, VerificationRequest};
use super::{field, FormSlot, PageContext, Submission};
use crate::contracts::ContractBinding;
use crate::errors::Result;
use crate::form::FieldSpec;
use crate::operation::FlowMessages;

pub const SUBMIT_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("deviceId"),
    FieldSpec::required("dataValue"),
];

const SUBMIT: FlowMessages = FlowMessages {
    pending: "Submitting data...",
    success: "Data submitted successfully",
    failure: "Failed to submit data",
    error: "Failed to submit data",
    error_hint: "Please try again",
};

pub struct DataPage {
    ctx: PageContext,
    oracle: ContractBinding,
    submit: FormSlot,
}

impl DataPage {
    pub fn new(ctx: PageContext, oracle: ContractBinding) -> Self {
        Self {
            submit: FormSlot::new(&ctx, SUBMIT_FIELDS, SUBMIT),
            ctx,
            oracle,
        }
    }

    /// Record a reading on-chain, stamped with the current time in millis.
    pub async fn submit_data<'a, I>(&self, inputs: I) -> Submission
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let oracle = &self.oracle;
        self.submit
            .submit(inputs, |values| async move {
                let timestamp = U256::from(Utc::now().timestamp_millis().max(0) as u64);
                oracle.call(
                    "submitData",
                    vec![
                        Token::String(field(&values, "deviceId").to_string()),
                        Token::String(field(&values, "dataValue").to_string()),
                        Token::Uint(timestamp),
                    ],
                )
            })
            .await
    }

    pub async fn pending_requests(&self) -> Result<Vec<VerificationRequest>> {
        self.ctx.account()?;
        let output = self.ctx.read(&self.oracle, "getPendingDisputes", vec![]).await?;
        Ok(decode_requests(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DappError;
    use crate::notify::NotificationLog;
    use crate::test_utils::MockChain;
    use ethers::types::Address;
    use std::sync::Arc;
    use std::time::Duration;

    fn page(chain: &Arc<MockChain>, log: &Arc<NotificationLog>) -> DataPage {
        let ctx = PageContext::new(chain.clone(), chain.clone(), log.clone(), Duration::from_millis(1));
        DataPage::new(
            ctx,
            ContractBinding::oracle_integration(Address::repeat_byte(0x44)).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_submit_reading() {
        let chain = MockChain::connected();
        let log = Arc::new(NotificationLog::default());
        let before = Utc::now().timestamp_millis() as u64;

        let submission = page(&chain, &log)
            .submit_data([("deviceId", "sensor-1"), ("dataValue", "21.5")])
            .await;

        assert!(submission.outcome.is_confirmed());
        assert!(submission.form.is_pristine());
        let args = &chain.sent()[0].args;
        assert_eq!(args[0], Token::String("sensor-1".into()));
        assert_eq!(args[1], Token::String("21.5".into()));
        let stamp = args[2].clone().into_uint().unwrap().as_u64();
        assert!(stamp >= before);
        assert_eq!(log.recent().pop().unwrap().title, "Data submitted successfully");
    }

    #[tokio::test]
    async fn test_missing_value_never_dispatches() {
        let chain = MockChain::connected();
        let log = Arc::new(NotificationLog::default());

        let submission = page(&chain, &log).submit_data([("deviceId", "sensor-1")]).await;

        assert!(matches!(submission.outcome.error, Some(DappError::Validation(_))));
        assert!(chain.simulated_calls().is_empty());
        assert_eq!(submission.form.get("deviceId"), "sensor-1");
    }

    #[tokio::test]
    async fn test_simulation_revert_is_surfaced() {
        let chain = MockChain::connected();
        chain.fail_simulation(DappError::SimulationReverted("Device not registered".into()));
        let log = Arc::new(NotificationLog::default());

        let submission = page(&chain, &log)
            .submit_data([("deviceId", "ghost"), ("dataValue", "1")])
            .await;

        assert!(matches!(submission.outcome.error, Some(DappError::SimulationReverted(_))));
        assert!(chain.sent_calls().is_empty());
        let toast = log.recent().pop().unwrap();
        assert_eq!(
            toast.description.as_deref(),
            Some("Transaction would revert: Device not registered")
        );
    }
}
