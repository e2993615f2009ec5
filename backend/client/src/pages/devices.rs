//! Devices page: register devices and list the ones the wallet owns.

use std::sync::Arc;

use ethers::abi::Token;
use ethers::types::{H256, U256};
use ethers::utils::to_checksum;
use serde::Serialize;
use tracing::debug;

use super::{field, FormSlot, PageContext, Submission};
use crate::contracts::{device_hash, ContractBinding};
use crate::errors::Result;
use crate::form::FieldSpec;
use crate::operation::FlowMessages;
use crate::storage::{retrieve_device_metadata, store_device_metadata, ContentStore, DeviceMetadata};

pub const REGISTER_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("name"),
    FieldSpec::required("type"),
    FieldSpec::required("location"),
];

/// Devices fetched per listing.
pub const PAGE_SIZE: u64 = 10;

const REGISTER: FlowMessages = FlowMessages {
    pending: "Registering device...",
    success: "Device registered successfully!",
    failure: "Failed to register device",
    error: "Failed to register device",
    error_hint: "Please try again.",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceStatus {
    Inactive,
    Active,
    Suspended,
    Retired,
}

impl TryFrom<u8> for DeviceStatus {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            0 => Ok(DeviceStatus::Inactive),
            1 => Ok(DeviceStatus::Active),
            2 => Ok(DeviceStatus::Suspended),
            3 => Ok(DeviceStatus::Retired),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_hash: H256,
    pub status: DeviceStatus,
    pub registration_date: U256,
    pub last_updated: U256,
    pub ipfs_cid: String,
}

fn decode_device(token: Token) -> Option<Device> {
    let Token::Tuple(fields) = token else {
        return None;
    };
    match fields.as_slice() {
        [Token::FixedBytes(hash), Token::Uint(status), Token::Uint(registered), Token::Uint(updated), Token::String(cid)]
            if hash.len() == 32 =>
        {
            if *status > U256::from(u8::MAX) {
                return None;
            }
            let status = u8::try_from(status.low_u32()).ok()?;
            Some(Device {
                device_hash: H256::from_slice(hash),
                status: DeviceStatus::try_from(status).ok()?,
                registration_date: *registered,
                last_updated: *updated,
                ipfs_cid: cid.clone(),
            })
        }
        _ => None,
    }
}

pub struct DevicesPage {
    ctx: PageContext,
    registry: ContractBinding,
    store: Arc<dyn ContentStore>,
    register: FormSlot,
}

impl DevicesPage {
    pub fn new(ctx: PageContext, registry: ContractBinding, store: Arc<dyn ContentStore>) -> Self {
        Self {
            register: FormSlot::new(&ctx, REGISTER_FIELDS, REGISTER),
            ctx,
            registry,
            store,
        }
    }

    /// Store the device metadata off-chain, then register its CID hash.
    pub async fn register_device<'a, I>(&self, inputs: I) -> Submission
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let registry = &self.registry;
        let store = self.store.as_ref();
        let ctx = &self.ctx;
        self.register
            .submit(inputs, |values| async move {
                let owner = to_checksum(&ctx.account()?, None);
                let metadata = DeviceMetadata::new(
                    field(&values, "name"),
                    field(&values, "type"),
                    field(&values, "location"),
                    &owner,
                );
                let cid = store_device_metadata(store, &metadata).await?;
                registry.call(
                    "registerDevice",
                    vec![
                        Token::FixedBytes(device_hash(&cid).as_bytes().to_vec()),
                        Token::String(cid),
                        Token::Bytes(Vec::new()),
                    ],
                )
            })
            .await
    }

    /// First page of devices owned by the connected account.
    pub async fn devices(&self) -> Result<Vec<Device>> {
        let owner = self.ctx.account()?;
        let output = self
            .ctx
            .read(
                &self.registry,
                "getDevicesByOwnerPaginated",
                vec![
                    Token::Address(owner),
                    Token::Uint(U256::zero()),
                    Token::Uint(U256::from(PAGE_SIZE)),
                ],
            )
            .await?;

        let Some(Token::Array(items)) = output.into_iter().next() else {
            return Ok(Vec::new());
        };
        let total = items.len();
        let devices: Vec<_> = items.into_iter().filter_map(decode_device).collect();
        if devices.len() < total {
            debug!("Skipped {} undecodable device entries", total - devices.len());
        }
        Ok(devices)
    }

    pub async fn metadata(&self, cid: &str) -> Result<DeviceMetadata> {
        retrieve_device_metadata(self.store.as_ref(), cid).await
    }
}
