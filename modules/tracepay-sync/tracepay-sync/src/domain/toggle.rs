//! Optimistic toggle controller.
//!
//! Each controller drives one namespace of binary controls (accounts, debit
//! orders, leaks...). A transition goes idle -> pending -> idle: the entity
//! is marked pending while the backend mutation runs, then either commits the
//! target value or rolls back to the value it had before. At most one
//! mutation per entity is in flight.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracepay_sync_sdk::{EntityId, OperationId, ReverseHandle, StoreError, ToggleState};
use tracing::{debug, info, warn};

use super::error::ToggleError;

/// Namespace of a toggle controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToggleKind {
    LeakFreeze,
    TransactionFreeze,
    AccountFreeze,
    DebitOrderPause,
    SubscriptionOptOut,
    Reroute,
}

impl ToggleKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LeakFreeze => "leak_freeze",
            Self::TransactionFreeze => "transaction_freeze",
            Self::AccountFreeze => "account_freeze",
            Self::DebitOrderPause => "debit_order_pause",
            Self::SubscriptionOptOut => "subscription_opt_out",
            Self::Reroute => "reroute",
        }
    }
}

impl fmt::Display for ToggleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend mutation behind one toggle namespace.
#[async_trait]
pub trait ToggleBackend: Send + Sync {
    fn kind(&self) -> ToggleKind;

    /// Whether moving to `target` must be confirmed by the user first.
    fn requires_confirmation(&self, target: bool) -> bool;

    /// Whether moving to `target` reverses an earlier mutation and needs the
    /// handle that mutation returned.
    fn requires_reverse_handle(&self, _target: bool) -> bool {
        false
    }

    /// Performs the mutation. Returns the handle needed to reverse it, if the
    /// backend issues one.
    ///
    /// # Errors
    ///
    /// Returns the classified store failure; the controller rolls back.
    async fn apply(
        &self,
        entity_id: &EntityId,
        target: bool,
        handle: Option<ReverseHandle>,
    ) -> Result<Option<ReverseHandle>, StoreError>;
}

/// What the user is asked to confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub kind: ToggleKind,
    pub entity_id: EntityId,
    pub target: bool,
}

/// Asks the user to confirm a transition, e.g. through a modal dialog.
#[async_trait]
pub trait Confirm: Send + Sync {
    /// Returns `true` to proceed; `false` leaves the entity untouched.
    async fn confirm(&self, request: &ConfirmationRequest) -> bool;
}

/// Confirms every transition; for callers that already asked the user.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreConfirmed;

#[async_trait]
impl Confirm for PreConfirmed {
    async fn confirm(&self, _request: &ConfirmationRequest) -> bool {
        true
    }
}

/// Result of a toggle request that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The backend accepted the transition.
    Applied(ToggleState),
    /// The entity already had the requested value; nothing was sent.
    Unchanged(ToggleState),
    /// The user declined the confirmation.
    Declined(ToggleState),
}

impl ToggleOutcome {
    #[must_use]
    pub fn state(&self) -> &ToggleState {
        match self {
            Self::Applied(state) | Self::Unchanged(state) | Self::Declined(state) => state,
        }
    }
}

struct EntityRecord {
    state: ToggleState,
    reverse_handle: Option<ReverseHandle>,
}

/// Owns the toggle states of one namespace.
pub struct ToggleController {
    backend: Arc<dyn ToggleBackend>,
    entities: Mutex<HashMap<EntityId, EntityRecord>>,
    next_operation: AtomicU64,
    mutation_timeout: Duration,
}

/// Decision taken under the lock before a mutation starts.
enum Gate {
    Proceed,
    AtTarget(ToggleState),
}

/// Bookkeeping of a mutation in flight.
struct Started {
    operation_id: OperationId,
    previous: bool,
    handle: Option<ReverseHandle>,
}

enum Begin {
    Started(Started),
    AtTarget(ToggleState),
}

/// Rolls a pending mutation back when the `toggle` future is dropped before
/// the outcome is recorded.
struct PendingGuard<'a> {
    controller: &'a ToggleController,
    id: &'a EntityId,
    operation_id: OperationId,
    previous: bool,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller
                .rollback(self.id, self.operation_id, self.previous);
            debug!(operation_id = %self.operation_id, "toggle cancelled, rolled back");
        }
    }
}

impl ToggleController {
    #[must_use]
    pub fn new(backend: Arc<dyn ToggleBackend>, mutation_timeout: Duration) -> Self {
        Self {
            backend,
            entities: Mutex::new(HashMap::new()),
            next_operation: AtomicU64::new(1),
            mutation_timeout,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ToggleKind {
        self.backend.kind()
    }

    /// Registers `id` with its server-side value. An idle entity takes the
    /// new value; a pending one is left alone.
    pub fn register(&self, id: EntityId, enabled: bool) {
        let mut entities = self.entities.lock();
        let record = entities.entry(id.clone()).or_insert_with(|| EntityRecord {
            state: ToggleState::idle(id, enabled),
            reverse_handle: None,
        });
        if !record.state.is_pending() {
            record.state.enabled = enabled;
        }
    }

    /// Registers `id` as enabled together with the handle needed to reverse
    /// it, e.g. after reloading the frozen items of a user.
    pub fn register_with_handle(&self, id: EntityId, handle: ReverseHandle) {
        let mut entities = self.entities.lock();
        let record = entities.entry(id.clone()).or_insert_with(|| EntityRecord {
            state: ToggleState::idle(id, true),
            reverse_handle: None,
        });
        if !record.state.is_pending() {
            record.state.enabled = true;
            record.reverse_handle = Some(handle);
        }
    }

    /// Replaces the registered set with `listing`. Entities missing from the
    /// listing are dropped unless a mutation on them is still in flight.
    pub fn seed(&self, listing: impl IntoIterator<Item = (EntityId, bool)>) {
        let listing: HashMap<EntityId, bool> = listing.into_iter().collect();
        let mut entities = self.entities.lock();
        entities.retain(|id, record| record.state.is_pending() || listing.contains_key(id));
        for (id, enabled) in listing {
            let record = entities.entry(id.clone()).or_insert_with(|| EntityRecord {
                state: ToggleState::idle(id, enabled),
                reverse_handle: None,
            });
            if !record.state.is_pending() {
                record.state.enabled = enabled;
            }
        }
        debug!(kind = %self.backend.kind(), count = entities.len(), "toggle states seeded");
    }

    /// Forgets `id`. A mutation still in flight for it completes without
    /// touching any state.
    pub fn remove(&self, id: &EntityId) {
        if self.entities.lock().remove(id).is_some() {
            debug!(kind = %self.backend.kind(), entity_id = %id, "toggle state removed");
        }
    }

    #[must_use]
    pub fn state(&self, id: &EntityId) -> Option<ToggleState> {
        self.entities.lock().get(id).map(|record| record.state.clone())
    }

    /// All states, ordered by entity id.
    #[must_use]
    pub fn states(&self) -> Vec<ToggleState> {
        let mut states: Vec<ToggleState> = self
            .entities
            .lock()
            .values()
            .map(|record| record.state.clone())
            .collect();
        states.sort_by(|a, b| a.id.cmp(&b.id));
        states
    }

    #[must_use]
    pub fn reverse_handle(&self, id: &EntityId) -> Option<ReverseHandle> {
        self.entities.lock().get(id).and_then(|record| record.reverse_handle)
    }

    /// Moves `id` to `target`.
    ///
    /// Asks `confirm` first when the backend requires it, marks the entity
    /// pending, runs the mutation under the configured timeout, then commits
    /// or rolls back.
    ///
    /// # Errors
    ///
    /// - `UnknownEntity` if `id` is not registered
    /// - `AlreadyPending` if a mutation on `id` is in flight
    /// - `MissingReverseHandle` if the reversal handle is unknown
    /// - `Unauthorized`, `Failed` or `TimedOut` if the mutation failed; the
    ///   entity is back at its previous value
    #[tracing::instrument(skip_all, fields(kind = %self.backend.kind(), entity_id = %id, target))]
    pub async fn toggle(
        &self,
        id: &EntityId,
        target: bool,
        confirm: &dyn Confirm,
    ) -> Result<ToggleOutcome, ToggleError> {
        if let Gate::AtTarget(state) = self.gate(id, target)? {
            return Ok(ToggleOutcome::Unchanged(state));
        }

        if self.backend.requires_confirmation(target) {
            let request = ConfirmationRequest {
                kind: self.backend.kind(),
                entity_id: id.clone(),
                target,
            };
            if !confirm.confirm(&request).await {
                debug!("confirmation declined");
                let state = self
                    .state(id)
                    .ok_or_else(|| ToggleError::UnknownEntity { id: id.clone() })?;
                return Ok(ToggleOutcome::Declined(state));
            }
        }

        let Started {
            operation_id,
            previous,
            handle,
        } = match self.begin(id, target)? {
            Begin::Started(started) => started,
            Begin::AtTarget(state) => return Ok(ToggleOutcome::Unchanged(state)),
        };
        debug!(%operation_id, "mutation started");
        let pending = PendingGuard {
            controller: self,
            id,
            operation_id,
            previous,
            armed: true,
        };

        let mutation = self.backend.apply(id, target, handle);
        let result = match tokio::time::timeout(self.mutation_timeout, mutation).await {
            Ok(result) => result.map_err(ToggleError::from),
            Err(_) => Err(ToggleError::TimedOut {
                after: self.mutation_timeout,
            }),
        };

        pending.disarm();
        match result {
            Ok(new_handle) => {
                let state = self.commit(id, operation_id, target, new_handle);
                info!(%operation_id, "toggle applied");
                Ok(ToggleOutcome::Applied(state))
            }
            Err(error) => {
                self.rollback(id, operation_id, previous);
                warn!(%operation_id, %error, "toggle failed, rolled back");
                Err(error)
            }
        }
    }

    /// Checks whether a transition of `id` to `target` may start.
    fn gate(&self, id: &EntityId, target: bool) -> Result<Gate, ToggleError> {
        let entities = self.entities.lock();
        let record = entities
            .get(id)
            .ok_or_else(|| ToggleError::UnknownEntity { id: id.clone() })?;
        self.check(id, record, target)
    }

    fn check(
        &self,
        id: &EntityId,
        record: &EntityRecord,
        target: bool,
    ) -> Result<Gate, ToggleError> {
        if let Some(operation_id) = record.state.pending_operation_id {
            return Err(ToggleError::AlreadyPending {
                id: id.clone(),
                operation_id,
            });
        }
        if record.state.enabled == target {
            return Ok(Gate::AtTarget(record.state.clone()));
        }
        if self.backend.requires_reverse_handle(target) && record.reverse_handle.is_none() {
            return Err(ToggleError::MissingReverseHandle { id: id.clone() });
        }
        Ok(Gate::Proceed)
    }

    /// Marks `id` pending. Re-checks the gate since confirmation may have
    /// taken a while.
    fn begin(&self, id: &EntityId, target: bool) -> Result<Begin, ToggleError> {
        let mut entities = self.entities.lock();
        let record = entities
            .get_mut(id)
            .ok_or_else(|| ToggleError::UnknownEntity { id: id.clone() })?;
        if let Gate::AtTarget(state) = self.check(id, record, target)? {
            return Ok(Begin::AtTarget(state));
        }

        let operation_id = OperationId(self.next_operation.fetch_add(1, Ordering::Relaxed));
        let previous = record.state.enabled;
        record.state.enabled = target;
        record.state.pending_operation_id = Some(operation_id);
        let handle = if self.backend.requires_reverse_handle(target) {
            record.reverse_handle
        } else {
            None
        };
        Ok(Begin::Started(Started {
            operation_id,
            previous,
            handle,
        }))
    }

    fn commit(
        &self,
        id: &EntityId,
        operation_id: OperationId,
        target: bool,
        new_handle: Option<ReverseHandle>,
    ) -> ToggleState {
        let mut entities = self.entities.lock();
        let Some(record) = entities.get_mut(id) else {
            debug!(%operation_id, "entity removed while pending");
            return ToggleState::idle(id.clone(), target);
        };
        if record.state.pending_operation_id != Some(operation_id) {
            return record.state.clone();
        }
        record.state.enabled = target;
        record.state.pending_operation_id = None;
        if self.backend.requires_reverse_handle(target) {
            record.reverse_handle = None;
        }
        if new_handle.is_some() {
            record.reverse_handle = new_handle;
        }
        record.state.clone()
    }

    fn rollback(&self, id: &EntityId, operation_id: OperationId, previous: bool) {
        let mut entities = self.entities.lock();
        if let Some(record) = entities.get_mut(id)
            && record.state.pending_operation_id == Some(operation_id)
        {
            record.state.enabled = previous;
            record.state.pending_operation_id = None;
        }
    }
}
