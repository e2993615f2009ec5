//! Admin page: role management, oracle configuration, dispute resolution.

use std::sync::Arc;

use ethers::abi::Token;
use ethers::types::{H256, U256};
use serde::Serialize;
use tokio::sync::RwLock;

use super::{field, parse_address, parse_bool, parse_h256, parse_uint, FormSlot, PageContext, Submission};
use crate::contracts::{bytes32_from_str, global_admin_role, ContractBinding, EventSpec};
use crate::errors::{DappError, Result};
use crate::form::FieldSpec;
use crate::operation::FlowMessages;
use crate::reconcile::AdminFeed;

pub const ADMIN_FIELDS: &[FieldSpec] = &[FieldSpec::required("address")];

pub const RESET_ORACLE_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("oracleAddress"),
    FieldSpec::required("jobId"),
    FieldSpec::required("fee"),
];

pub const DATA_FEED_FIELDS: &[FieldSpec] = &[FieldSpec::required("feedId")];

pub const RESOLVE_DISPUTE_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("deviceHash"),
    FieldSpec::required("recordIndex"),
    FieldSpec::optional("finalValidity", "false"),
];

const ADD_ADMIN: FlowMessages = FlowMessages {
    pending: "Adding new admin...",
    success: "Successfully added new admin",
    failure: "Failed to add admin",
    error: "Error adding admin",
    error_hint: "Please check the address and try again",
};

const REMOVE_ADMIN: FlowMessages = FlowMessages {
    pending: "Removing admin...",
    success: "Successfully removed admin",
    failure: "Failed to remove admin",
    error: "Error removing admin",
    error_hint: "Please check the address and try again",
};

const SET_ORACLE: FlowMessages = FlowMessages {
    pending: "Setting oracle address...",
    success: "Successfully set oracle address",
    failure: "Failed to set oracle address",
    error: "Error setting oracle address",
    error_hint: "Please check the address and try again",
};

const RESET_ORACLE: FlowMessages = FlowMessages {
    pending: "Resetting oracle config...",
    success: "Successfully reset oracle config",
    failure: "Failed to reset oracle config",
    error: "Error resetting oracle config",
    error_hint: "Please check inputs and try again",
};

const SET_DATA_FEED: FlowMessages = FlowMessages {
    pending: "Setting data feed ID...",
    success: "Successfully set data feed ID",
    failure: "Failed to set data feed ID",
    error: "Error setting data feed ID",
    error_hint: "Please try again",
};

const RESOLVE_DISPUTE: FlowMessages = FlowMessages {
    pending: "Resolving dispute...",
    success: "Dispute resolved successfully",
    failure: "Failed to resolve dispute",
    error: "Error resolving dispute",
    error_hint: "Please check inputs and try again",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAccess {
    pub is_admin: bool,
    pub has_global_admin_role: bool,
}

impl AdminAccess {
    /// Admin forms are offered when either check passes.
    pub fn granted(&self) -> bool {
        self.is_admin || self.has_global_admin_role
    }
}

/// A data record awaiting dispute resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    pub device_hash: H256,
    pub timestamp: U256,
    pub resolved: bool,
    pub result: bool,
}

/// Decode `(bytes32,uint256,bool,bool)[]`, skipping malformed entries.
pub(crate) fn decode_requests(tokens: Vec<Token>) -> Vec<VerificationRequest> {
    let Some(Token::Array(items)) = tokens.into_iter().next() else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Token::Tuple(fields) => match fields.as_slice() {
                [Token::FixedBytes(hash), Token::Uint(timestamp), Token::Bool(resolved), Token::Bool(result)]
                    if hash.len() == 32 =>
                {
                    Some(VerificationRequest {
                        device_hash: H256::from_slice(hash),
                        timestamp: *timestamp,
                        resolved: *resolved,
                        result: *result,
                    })
                }
                _ => None,
            },
            _ => None,
        })
        .collect()
}

pub struct AdminPage {
    ctx: PageContext,
    access_manager: ContractBinding,
    oracle: ContractBinding,
    add_admin: FormSlot,
    remove_admin: FormSlot,
    set_oracle: FormSlot,
    reset_oracle: FormSlot,
    set_data_feed: FormSlot,
    resolve_dispute: FormSlot,
    feed: Arc<RwLock<AdminFeed>>,
}

impl AdminPage {
    pub fn new(ctx: PageContext, access_manager: ContractBinding, oracle: ContractBinding) -> Self {
        Self {
            add_admin: FormSlot::new(&ctx, ADMIN_FIELDS, ADD_ADMIN),
            remove_admin: FormSlot::new(&ctx, ADMIN_FIELDS, REMOVE_ADMIN),
            set_oracle: FormSlot::new(&ctx, ADMIN_FIELDS, SET_ORACLE),
            reset_oracle: FormSlot::new(&ctx, RESET_ORACLE_FIELDS, RESET_ORACLE),
            set_data_feed: FormSlot::new(&ctx, DATA_FEED_FIELDS, SET_DATA_FEED),
            resolve_dispute: FormSlot::new(&ctx, RESOLVE_DISPUTE_FIELDS, RESOLVE_DISPUTE),
            feed: Arc::new(RwLock::new(AdminFeed::default())),
            ctx,
            access_manager,
            oracle,
        }
    }

    pub async fn access(&self) -> Result<AdminAccess> {
        let account = self.ctx.account()?;
        let is_admin = self
            .ctx
            .read(&self.access_manager, "isAdmin", vec![Token::Address(account)])
            .await?;
        let has_role = self
            .ctx
            .read(
                &self.access_manager,
                "hasRole",
                vec![
                    Token::FixedBytes(global_admin_role().as_bytes().to_vec()),
                    Token::Address(account),
                ],
            )
            .await?;

        Ok(AdminAccess {
            is_admin: first_bool(is_admin)?,
            has_global_admin_role: first_bool(has_role)?,
        })
    }

    pub async fn pending_disputes(&self) -> Result<Vec<VerificationRequest>> {
        self.ctx.account()?;
        let output = self.ctx.read(&self.oracle, "getPendingDisputes", vec![]).await?;
        Ok(decode_requests(output))
    }

    /// Events this page folds into its feed.
    pub fn event_specs(&self) -> Result<Vec<EventSpec>> {
        Ok(vec![
            self.access_manager.event("AdminAdded")?,
            self.access_manager.event("AdminRemoved")?,
            self.oracle.event("DisputeResolved")?,
        ])
    }

    pub fn feed(&self) -> Arc<RwLock<AdminFeed>> {
        self.feed.clone()
    }

    pub async fn add_admin<'a, I>(&self, inputs: I) -> Submission
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let binding = &self.access_manager;
        self.add_admin
            .submit(inputs, |values| async move {
                let account = parse_address("address", field(&values, "address"))?;
                binding.call("addAdmin", vec![Token::Address(account)])
            })
            .await
    }

    pub async fn remove_admin<'a, I>(&self, inputs: I) -> Submission
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let binding = &self.access_manager;
        self.remove_admin
            .submit(inputs, |values| async move {
                let account = parse_address("address", field(&values, "address"))?;
                binding.call("removeAdmin", vec![Token::Address(account)])
            })
            .await
    }

    pub async fn set_oracle_address<'a, I>(&self, inputs: I) -> Submission
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let binding = &self.oracle;
        self.set_oracle
            .submit(inputs, |values| async move {
                let oracle = parse_address("address", field(&values, "address"))?;
                binding.call("setOracleAddress", vec![Token::Address(oracle)])
            })
            .await
    }

    pub async fn reset_oracle_config<'a, I>(&self, inputs: I) -> Submission
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let binding = &self.oracle;
        self.reset_oracle
            .submit(inputs, |values| async move {
                let oracle = parse_address("oracleAddress", field(&values, "oracleAddress"))?;
                let job_id = bytes32_from_str(field(&values, "jobId"))?;
                let fee = parse_uint("fee", field(&values, "fee"))?;
                binding.call(
                    "resetOracleConfig",
                    vec![
                        Token::Address(oracle),
                        Token::FixedBytes(job_id.to_vec()),
                        Token::Uint(fee),
                    ],
                )
            })
            .await
    }

    pub async fn set_data_feed_id<'a, I>(&self, inputs: I) -> Submission
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let binding = &self.oracle;
        self.set_data_feed
            .submit(inputs, |values| async move {
                let feed_id = bytes32_from_str(field(&values, "feedId"))?;
                binding.call("setDataFeedId", vec![Token::FixedBytes(feed_id.to_vec())])
            })
            .await
    }

    pub async fn resolve_dispute<'a, I>(&self, inputs: I) -> Submission
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let binding = &self.oracle;
        self.resolve_dispute
            .submit(inputs, |values| async move {
                let device_hash = parse_h256("deviceHash", field(&values, "deviceHash"))?;
                let index = parse_uint("recordIndex", field(&values, "recordIndex"))?;
                let validity = match field(&values, "finalValidity") {
                    "" => false,
                    value => parse_bool("finalValidity", value)?,
                };
                binding.call(
                    "resolveDispute",
                    vec![
                        Token::FixedBytes(device_hash.as_bytes().to_vec()),
                        Token::Uint(index),
                        Token::Bool(validity),
                    ],
                )
            })
            .await
    }
}

fn first_bool(tokens: Vec<Token>) -> Result<bool> {
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_bool)
        .ok_or_else(|| DappError::Abi("Expected a bool output".to_string()))
}
