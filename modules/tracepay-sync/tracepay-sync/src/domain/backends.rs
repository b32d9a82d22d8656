//! Toggle backends for the protection controls.

use std::sync::Arc;

use async_trait::async_trait;
use tracepay_sync_sdk::{
    EntityId, FreezeEndpoints, FreezeRequest, FrozenItem, ProtectionStore, ReverseHandle,
    StoreError, UserId,
};
use tracing::warn;
use uuid::Uuid;

use super::toggle::{ToggleBackend, ToggleKind};

/// Which id a freeze request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeTarget {
    Leak,
    Transaction,
}

/// Freezes leaks or transactions through the freeze endpoints.
///
/// Freezing returns a frozen item id; unfreezing needs it back.
pub struct FreezeBackend {
    endpoints: Arc<dyn FreezeEndpoints>,
    target: FreezeTarget,
    reason: String,
}

impl FreezeBackend {
    #[must_use]
    pub fn leaks(endpoints: Arc<dyn FreezeEndpoints>, reason: impl Into<String>) -> Self {
        Self {
            endpoints,
            target: FreezeTarget::Leak,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn transactions(
        endpoints: Arc<dyn FreezeEndpoints>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            endpoints,
            target: FreezeTarget::Transaction,
            reason: reason.into(),
        }
    }

    /// Entities of this backend's kind that `items` show as frozen, with the
    /// handle to unfreeze each.
    #[must_use]
    pub fn frozen_entities(&self, items: &[FrozenItem]) -> Vec<(EntityId, ReverseHandle)> {
        items
            .iter()
            .filter(|item| item.status == "frozen")
            .filter_map(|item| {
                let id = match self.target {
                    FreezeTarget::Leak => item.leak_id.as_deref(),
                    FreezeTarget::Transaction => item.transaction_id.as_deref(),
                }?;
                Some((EntityId::from(id), ReverseHandle::FrozenItem(item.id)))
            })
            .collect()
    }
}

#[async_trait]
impl ToggleBackend for FreezeBackend {
    fn kind(&self) -> ToggleKind {
        match self.target {
            FreezeTarget::Leak => ToggleKind::LeakFreeze,
            FreezeTarget::Transaction => ToggleKind::TransactionFreeze,
        }
    }

    fn requires_confirmation(&self, target: bool) -> bool {
        target
    }

    fn requires_reverse_handle(&self, target: bool) -> bool {
        !target
    }

    async fn apply(
        &self,
        entity_id: &EntityId,
        target: bool,
        handle: Option<ReverseHandle>,
    ) -> Result<Option<ReverseHandle>, StoreError> {
        if !target {
            let handle = handle.ok_or_else(|| {
                StoreError::validation(format!("no frozen item recorded for '{entity_id}'"))
            })?;
            self.endpoints.unfreeze(handle.frozen_item_id()).await?;
            return Ok(None);
        }

        let request = match self.target {
            FreezeTarget::Leak => FreezeRequest::leak(entity_id.as_str(), &self.reason),
            FreezeTarget::Transaction => {
                FreezeRequest::transaction(entity_id.as_str(), &self.reason)
            }
        };
        let receipt = self.endpoints.freeze(&request).await?;
        if receipt.frozen_item_id.is_none() {
            warn!(%entity_id, status = %receipt.status, "freeze accepted without a frozen item id");
        }
        Ok(receipt.frozen_item_id.map(ReverseHandle::FrozenItem))
    }
}

/// Entity families owned by the protection store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionTarget {
    AccountFreeze,
    DebitOrderPause,
    SubscriptionOptOut,
    Reroute { plan_id: Uuid },
}

/// Idempotent setters of the protection store.
pub struct ProtectionBackend {
    store: Arc<dyn ProtectionStore>,
    user_id: UserId,
    target: ProtectionTarget,
}

impl ProtectionBackend {
    #[must_use]
    pub fn new(
        store: Arc<dyn ProtectionStore>,
        user_id: UserId,
        target: ProtectionTarget,
    ) -> Self {
        Self {
            store,
            user_id,
            target,
        }
    }
}

#[async_trait]
impl ToggleBackend for ProtectionBackend {
    fn kind(&self) -> ToggleKind {
        match self.target {
            ProtectionTarget::AccountFreeze => ToggleKind::AccountFreeze,
            ProtectionTarget::DebitOrderPause => ToggleKind::DebitOrderPause,
            ProtectionTarget::SubscriptionOptOut => ToggleKind::SubscriptionOptOut,
            ProtectionTarget::Reroute { .. } => ToggleKind::Reroute,
        }
    }

    fn requires_confirmation(&self, target: bool) -> bool {
        // Rerouting moves salary in both directions.
        matches!(self.target, ProtectionTarget::Reroute { .. }) || target
    }

    async fn apply(
        &self,
        entity_id: &EntityId,
        target: bool,
        _handle: Option<ReverseHandle>,
    ) -> Result<Option<ReverseHandle>, StoreError> {
        match self.target {
            ProtectionTarget::AccountFreeze => {
                self.store
                    .set_account_frozen(self.user_id, entity_id, target)
                    .await?;
            }
            ProtectionTarget::DebitOrderPause => {
                self.store
                    .set_debit_order_paused(self.user_id, entity_id, target)
                    .await?;
            }
            ProtectionTarget::SubscriptionOptOut => {
                self.store
                    .set_subscription_opted_out(self.user_id, entity_id, target)
                    .await?;
            }
            ProtectionTarget::Reroute { plan_id } => {
                self.store
                    .set_reroute_account(self.user_id, plan_id, entity_id, target)
                    .await?;
            }
        }
        Ok(None)
    }
}
