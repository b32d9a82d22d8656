//! Store and endpoint traits consumed by the sync layer.
//!
//! Every method returns a [`StoreError`] already classified at the store
//! boundary; the sync layer never inspects transport details.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{
    BankAccount, DebitOrder, EntityId, FreezeReceipt, FreezeRequest, FrozenItem, FrozenItemId,
    ReroutePlan, SettingKey, Subscription, UserId,
};

/// Remote store owning the canonical user settings.
#[async_trait]
pub trait RemoteSettingsStore: Send + Sync {
    /// Returns `Ok(None)` when the store holds no value for `key`.
    async fn get_setting(
        &self,
        user_id: UserId,
        key: &SettingKey,
    ) -> Result<Option<Value>, StoreError>;

    /// Replaces the value of `key`. Identical payloads must be accepted
    /// idempotently.
    async fn update_setting(
        &self,
        user_id: UserId,
        key: &SettingKey,
        value: &Value,
    ) -> Result<(), StoreError>;
}

/// Remote store owning the entities behind the protection toggles.
///
/// Setters take the explicit target value so a retried call is idempotent.
#[async_trait]
pub trait ProtectionStore: Send + Sync {
    async fn list_bank_accounts(&self, user_id: UserId) -> Result<Vec<BankAccount>, StoreError>;

    async fn set_account_frozen(
        &self,
        user_id: UserId,
        account_id: &EntityId,
        frozen: bool,
    ) -> Result<(), StoreError>;

    async fn list_debit_orders(&self, user_id: UserId) -> Result<Vec<DebitOrder>, StoreError>;

    async fn set_debit_order_paused(
        &self,
        user_id: UserId,
        order_id: &EntityId,
        paused: bool,
    ) -> Result<(), StoreError>;

    async fn list_subscriptions(&self, user_id: UserId) -> Result<Vec<Subscription>, StoreError>;

    async fn set_subscription_opted_out(
        &self,
        user_id: UserId,
        subscription_id: &EntityId,
        opted_out: bool,
    ) -> Result<(), StoreError>;

    /// Latest reroute plan of the user, if one exists.
    async fn get_reroute_plan(&self, user_id: UserId) -> Result<Option<ReroutePlan>, StoreError>;

    async fn set_reroute_account(
        &self,
        user_id: UserId,
        plan_id: Uuid,
        account_id: &EntityId,
        enabled: bool,
    ) -> Result<(), StoreError>;
}

/// Per-device key/value storage used as the fallback copy.
#[async_trait]
pub trait LocalDurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Removes all `keys`; missing keys are ignored.
    async fn remove(&self, keys: &[String]) -> Result<(), StoreError>;
}

/// Backend endpoints recording leak/transaction freezes.
#[async_trait]
pub trait FreezeEndpoints: Send + Sync {
    async fn freeze(&self, request: &FreezeRequest) -> Result<FreezeReceipt, StoreError>;

    async fn unfreeze(&self, frozen_item_id: FrozenItemId) -> Result<(), StoreError>;

    /// Items currently frozen for the authenticated user.
    async fn list_frozen(&self) -> Result<Vec<FrozenItem>, StoreError>;
}
