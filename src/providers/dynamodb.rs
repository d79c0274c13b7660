// SPDX-FileCopyrightText: 2025 Abe Kohandel <abe@kodebooth.com>
// SPDX-License-Identifier: MIT

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use aws_sdk_dynamodb::{
    Client,
    error::SdkError,
    operation::put_item::PutItemError,
    types::{AttributeValue, ReturnValue},
};
use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_dynamo::{aws_sdk_dynamodb_1::from_item, to_item};
use tracing::debug;
use uuid::Uuid;

use crate::{error::LockError, providers::Store};

/// [DynamoDB](aws_sdk_dynamodb) backed [Store].
///
/// The table needs a string partition key named
/// [DynamodbStore::KEY_ATTRIBUTE]. Expiry is enforced by the store itself
/// through [DynamodbStore::EXPIRES_ATTRIBUTE]; pointing the table's native TTL
/// at [DynamodbStore::TTL_ATTRIBUTE] lets DynamoDB clean up abandoned records.
#[derive(Builder, Debug, Clone)]
pub struct DynamodbStore {
    client: Arc<Client>,
    table_name: String,
}

impl DynamodbStore {
    pub const KEY_ATTRIBUTE: &'static str = "lock_key";
    pub const TOKEN_ATTRIBUTE: &'static str = "token";
    /// Expiry in milliseconds since the unix epoch.
    pub const EXPIRES_ATTRIBUTE: &'static str = "expires_at";
    /// Expiry in seconds since the unix epoch, for DynamoDB TTL.
    pub const TTL_ATTRIBUTE: &'static str = "ttl";

    fn key(key: &str) -> AttributeValue {
        AttributeValue::S(key.to_string())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct LockItem {
    #[serde(rename = "lock_key")]
    key: String,
    token: Uuid,
    expires_at: u64,
    ttl: u64,
}

impl LockItem {
    fn is_live(&self, now: u64) -> bool {
        now < self.expires_at
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn now_millis() -> u64 {
    millis(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default(),
    )
}

/// Expiry of a record created at `now` ms, pinned to `u64::MAX` for huge TTLs.
fn expires_at(now: u64, ttl: Duration) -> u64 {
    now.saturating_add(millis(ttl))
}

impl Store for DynamodbStore {
    async fn create_if_absent(
        &self,
        key: &str,
        token: Uuid,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let now = now_millis();
        let expires_at = expires_at(now, ttl);
        let lock = LockItem {
            key: key.to_string(),
            token,
            expires_at,
            ttl: expires_at.div_ceil(1000),
        };

        let item = to_item(&lock).map_err(LockError::store)?;
        self.client
            .put_item()
            .table_name(self.table_name.clone())
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(#key) OR #expires <= :now")
            .expression_attribute_names("#key", Self::KEY_ATTRIBUTE)
            .expression_attribute_names("#expires", Self::EXPIRES_ATTRIBUTE)
            .expression_attribute_values(":now", AttributeValue::N(now.to_string()))
            .send()
            .await
            .map(|_| true)
            .or_else(|sdk_error| match &sdk_error {
                SdkError::ServiceError(e) => match e.err() {
                    PutItemError::ConditionalCheckFailedException(_) => {
                        debug!(key, "Lock record already held");
                        Ok(false)
                    }
                    _ => Err(LockError::store(sdk_error)),
                },
                _ => Err(LockError::store(sdk_error)),
            })
    }

    async fn read(&self, key: &str) -> Result<Option<Uuid>, LockError> {
        let output = self
            .client
            .get_item()
            .table_name(self.table_name.clone())
            .key(Self::KEY_ATTRIBUTE, Self::key(key))
            .consistent_read(true)
            .send()
            .await
            .map_err(LockError::store)?;

        let Some(item) = output.item() else {
            return Ok(None);
        };
        let item: LockItem = from_item(item.clone()).map_err(LockError::store)?;

        Ok(item.is_live(now_millis()).then_some(item.token))
    }

    async fn delete(&self, key: &str) -> Result<bool, LockError> {
        let output = self
            .client
            .delete_item()
            .table_name(self.table_name.clone())
            .key(Self::KEY_ATTRIBUTE, Self::key(key))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(LockError::store)?;

        let Some(old) = output.attributes() else {
            return Ok(false);
        };
        let old: LockItem = from_item(old.clone()).map_err(LockError::store)?;

        Ok(old.is_live(now_millis()))
    }
}
