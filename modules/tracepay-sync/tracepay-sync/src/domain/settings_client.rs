//! Remote-first settings client with a local durable fallback.
//!
//! Reads try the remote store first and write the result through to the
//! local store; when the remote store fails the local copy is used, then the
//! built-in default. Writes update the in-memory view immediately and
//! persist in the background: remote first, local on remote failure.
//!
//! Writes to one key are ordered by a per-key generation counter. A newer
//! write supersedes older ones: an older write that has not started its I/O
//! skips it, and the outcome of an older write never touches the view.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracepay_sync_sdk::{
    LocalDurableStore, RemoteSettingsStore, Setting, SettingEntry, SettingKey, SettingSource,
    StoreError, UserId, keys,
};

use crate::config::TracepaySyncConfig;

pub struct SettingsClientConfig {
    pub local_key_prefix: String,
    pub remote_read_timeout: Duration,
    pub remote_write_timeout: Duration,
    pub event_capacity: usize,
}

impl Default for SettingsClientConfig {
    fn default() -> Self {
        Self::from(&TracepaySyncConfig::default())
    }
}

impl From<&TracepaySyncConfig> for SettingsClientConfig {
    fn from(config: &TracepaySyncConfig) -> Self {
        Self {
            local_key_prefix: config.local_key_prefix.clone(),
            remote_read_timeout: config.remote_read_timeout,
            remote_write_timeout: config.remote_write_timeout,
            event_capacity: config.event_capacity.max(1),
        }
    }
}

/// How a write ended up being persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Accepted by the remote store; the local copy was refreshed.
    Remote,
    /// Remote store failed; the value is kept in the local store only.
    LocalFallback,
    /// A newer write to the same key was issued; this result was discarded.
    Superseded,
    /// Neither store accepted the value. It survives in memory until restart.
    Unpersisted,
}

/// Notifications about degraded persistence, for UI badges or telemetry.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    RemoteReadFailed { key: SettingKey, error: StoreError },
    RemoteWriteFailed { key: SettingKey, error: StoreError },
    LocalWriteFailed { key: SettingKey, error: StoreError },
}

/// Write ordering state of one key.
#[derive(Default)]
struct KeySlot {
    /// Serializes store I/O for the key.
    io: Mutex<()>,
    /// Generation of the most recently issued write.
    issued: AtomicU64,
    /// Highest generation whose persistence has finished.
    settled: AtomicU64,
}

impl KeySlot {
    fn is_current(&self, generation: u64) -> bool {
        self.issued.load(Ordering::SeqCst) == generation
    }

    fn has_pending_write(&self) -> bool {
        self.issued.load(Ordering::SeqCst) > self.settled.load(Ordering::SeqCst)
    }
}

/// One staged write. Its generation counts as settled once the ticket is
/// dropped, whether persistence finished or the write future was abandoned.
struct WriteTicket {
    key: SettingKey,
    raw: Value,
    generation: u64,
    slot: Arc<KeySlot>,
}

impl Drop for WriteTicket {
    fn drop(&mut self) {
        self.slot.settled.fetch_max(self.generation, Ordering::SeqCst);
    }
}

/// Settings client of one signed-in user.
pub struct SettingsClient {
    user_id: UserId,
    remote: Arc<dyn RemoteSettingsStore>,
    local: Arc<dyn LocalDurableStore>,
    config: SettingsClientConfig,
    view: RwLock<HashMap<SettingKey, SettingEntry<Value>>>,
    slots: DashMap<SettingKey, Arc<KeySlot>>,
    events: broadcast::Sender<SyncEvent>,
}

impl SettingsClient {
    #[must_use]
    pub fn new(
        user_id: UserId,
        remote: Arc<dyn RemoteSettingsStore>,
        local: Arc<dyn LocalDurableStore>,
        config: SettingsClientConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            user_id,
            remote,
            local,
            config,
            view: RwLock::new(HashMap::new()),
            slots: DashMap::new(),
            events,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Subscribes to persistence events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Resolves the value of `S`: remote, then local, then the default.
    ///
    /// A remote value is written through to the local store. Never fails;
    /// store failures are logged and reported on the event channel.
    #[tracing::instrument(skip_all, fields(key = S::KEY))]
    pub async fn read<S: Setting>(&self) -> SettingEntry<S::Value> {
        let key = S::key();

        match self.fetch_remote(&key).await {
            Ok(Some(raw)) => match S::Value::deserialize(&raw) {
                Ok(value) => {
                    if !self.has_pending_write(&key) {
                        self.write_through(&key, &raw).await;
                    }
                    let entry = SettingEntry {
                        key,
                        value: raw,
                        source: SettingSource::Remote,
                        last_synced_at: Some(OffsetDateTime::now_utc()),
                    };
                    self.publish(entry.clone());
                    return entry.map(|_| value);
                }
                Err(e) => {
                    let error = StoreError::from(e);
                    warn!(%error, "remote value has unexpected shape, ignoring it");
                    self.emit(SyncEvent::RemoteReadFailed { key, error });
                }
            },
            Ok(None) => debug!("remote store has no value"),
            Err(error) => {
                warn!(%error, "remote read failed, falling back to local copy");
                self.emit(SyncEvent::RemoteReadFailed { key, error });
            }
        }

        self.read_fallback::<S>().await
    }

    async fn fetch_remote(&self, key: &SettingKey) -> Result<Option<Value>, StoreError> {
        let limit = self.config.remote_read_timeout;
        tokio::time::timeout(limit, self.remote.get_setting(self.user_id, key))
            .await
            .unwrap_or_else(|_| {
                Err(StoreError::unavailable(format!(
                    "remote read timed out after {}",
                    humantime::format_duration(limit)
                )))
            })
    }

    async fn write_through(&self, key: &SettingKey, raw: &Value) {
        if let Err(error) = self.local.set(&self.local_key(key), raw.to_string()).await {
            warn!(%key, %error, "failed to refresh local copy");
            self.emit(SyncEvent::LocalWriteFailed {
                key: key.clone(),
                error,
            });
        }
    }

    async fn read_fallback<S: Setting>(&self) -> SettingEntry<S::Value> {
        let key = S::key();

        let stored = match self.local.get(&self.local_key(&key)).await {
            Ok(stored) => stored,
            Err(error) => {
                warn!(%error, "local read failed");
                None
            }
        };

        if let Some(text) = stored {
            let decoded = serde_json::from_str::<Value>(&text).and_then(|raw| {
                let value = S::Value::deserialize(&raw)?;
                Ok((raw, value))
            });
            match decoded {
                Ok((raw, value)) => {
                    let entry = SettingEntry {
                        key,
                        value: raw,
                        source: SettingSource::Local,
                        last_synced_at: None,
                    };
                    self.publish(entry.clone());
                    return entry.map(|_| value);
                }
                Err(e) => warn!(error = %e, "discarding undecodable local copy"),
            }
        }

        let value = S::default_value();
        match serde_json::to_value(&value) {
            Ok(raw) => self.publish(SettingEntry {
                key: key.clone(),
                value: raw,
                source: SettingSource::Default,
                last_synced_at: None,
            }),
            Err(e) => error!(error = %e, "default value is not serializable"),
        }
        SettingEntry {
            key,
            value,
            source: SettingSource::Default,
            last_synced_at: None,
        }
    }

    fn has_pending_write(&self, key: &SettingKey) -> bool {
        self.slots
            .get(key)
            .is_some_and(|slot| slot.has_pending_write())
    }

    /// Stores `entry` in the view unless a write to its key is in flight.
    fn publish(&self, entry: SettingEntry<Value>) {
        let mut view = self.view.write();
        if self.has_pending_write(&entry.key) {
            debug!(key = %entry.key, "write pending, keeping optimistic value");
            return;
        }
        view.insert(entry.key.clone(), entry);
    }

    /// Reads every known setting concurrently to warm the view.
    #[tracing::instrument(skip_all, fields(user_id = %self.user_id))]
    pub async fn load_all(&self) {
        tokio::join!(
            self.read::<keys::Language>(),
            self.read::<keys::IncludeMomoData>(),
            self.read::<keys::AirtimeLimit>(),
            self.read::<keys::FreezeSettings>(),
            self.read::<keys::ReroutePlan>(),
        );
        info!(loaded = self.view.read().len(), "settings loaded");
    }

    /// Sets `S` to `value`.
    ///
    /// The view is updated before this returns, so [`current`](Self::current)
    /// observes `value` immediately. The returned future performs the
    /// persistence. Dropping it before completion abandons the write: the
    /// key stops counting as pending and the next [`read`](Self::read)
    /// replaces the value with what the stores hold. Use
    /// [`spawn_write`](Self::spawn_write) to persist independently of the
    /// caller.
    pub fn write<S: Setting>(
        &self,
        value: &S::Value,
    ) -> impl Future<Output = WriteOutcome> + Send + '_ {
        let staged = self.stage::<S>(value);
        self.finish(staged)
    }

    /// Like [`write`](Self::write) but persists on a spawned task.
    #[must_use = "dropping the handle detaches the write"]
    pub fn spawn_write<S: Setting>(
        self: &Arc<Self>,
        value: &S::Value,
    ) -> JoinHandle<WriteOutcome> {
        let staged = self.stage::<S>(value);
        let client = Arc::clone(self);
        tokio::spawn(async move { client.finish(staged).await })
    }

    /// Applies the optimistic view update and hands out a generation.
    fn stage<S: Setting>(&self, value: &S::Value) -> Result<WriteTicket, StoreError> {
        let key = S::key();
        let raw = serde_json::to_value(value)?;

        let slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());
        let mut view = self.view.write();
        let generation = slot.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let last_synced_at = view.get(&key).and_then(|e| e.last_synced_at);
        view.insert(
            key.clone(),
            SettingEntry {
                key: key.clone(),
                value: raw.clone(),
                source: SettingSource::Local,
                last_synced_at,
            },
        );
        drop(view);

        debug!(%key, generation, "setting staged");
        Ok(WriteTicket {
            key,
            raw,
            generation,
            slot,
        })
    }

    async fn finish(&self, staged: Result<WriteTicket, StoreError>) -> WriteOutcome {
        match staged {
            Ok(ticket) => self.persist(ticket).await,
            Err(error) => {
                error!(%error, "setting value is not serializable");
                WriteOutcome::Unpersisted
            }
        }
    }

    #[tracing::instrument(skip_all, fields(key = %ticket.key, generation = ticket.generation))]
    async fn persist(&self, ticket: WriteTicket) -> WriteOutcome {
        let io = ticket.slot.io.lock().await;
        let outcome = if ticket.slot.is_current(ticket.generation) {
            self.persist_current(&ticket.key, &ticket.raw, ticket.generation, &ticket.slot)
                .await
        } else {
            debug!("superseded before persisting");
            WriteOutcome::Superseded
        };
        drop(io);
        outcome
    }

    async fn persist_current(
        &self,
        key: &SettingKey,
        raw: &Value,
        generation: u64,
        slot: &KeySlot,
    ) -> WriteOutcome {
        let limit = self.config.remote_write_timeout;
        let update = self.remote.update_setting(self.user_id, key, raw);
        let remote = tokio::time::timeout(limit, update)
            .await
            .unwrap_or_else(|_| {
                Err(StoreError::unavailable(format!(
                    "remote write timed out after {}",
                    humantime::format_duration(limit)
                )))
            });

        if !slot.is_current(generation) {
            debug!("superseded while persisting");
            return WriteOutcome::Superseded;
        }

        let local_key = self.local_key(key);
        match remote {
            Ok(()) => {
                self.write_through(key, raw).await;
                self.mark_synced(key, generation, slot);
                debug!("setting persisted remotely");
                WriteOutcome::Remote
            }
            Err(error) => {
                warn!(%error, "remote write failed, keeping value on device");
                self.emit(SyncEvent::RemoteWriteFailed {
                    key: key.clone(),
                    error,
                });
                match self.local.set(&local_key, raw.to_string()).await {
                    Ok(()) => WriteOutcome::LocalFallback,
                    Err(error) => {
                        error!(%error, "local write failed, value kept in memory only");
                        self.emit(SyncEvent::LocalWriteFailed {
                            key: key.clone(),
                            error,
                        });
                        WriteOutcome::Unpersisted
                    }
                }
            }
        }
    }

    fn mark_synced(&self, key: &SettingKey, generation: u64, slot: &KeySlot) {
        let mut view = self.view.write();
        if !slot.is_current(generation) {
            return;
        }
        if let Some(entry) = view.get_mut(key) {
            entry.source = SettingSource::Remote;
            entry.last_synced_at = Some(OffsetDateTime::now_utc());
        }
    }

    /// Entry currently held in memory for `S`, if any.
    #[must_use]
    pub fn entry<S: Setting>(&self) -> Option<SettingEntry<S::Value>> {
        let view = self.view.read();
        let entry = view.get(&S::key())?;
        match S::Value::deserialize(&entry.value) {
            Ok(value) => Some(entry.clone().map(|_| value)),
            Err(e) => {
                warn!(key = S::KEY, error = %e, "held value has unexpected shape");
                None
            }
        }
    }

    /// Value currently held in memory for `S`, or its default.
    #[must_use]
    pub fn current<S: Setting>(&self) -> S::Value {
        self.entry::<S>()
            .map_or_else(S::default_value, |entry| entry.value)
    }

    /// Forgets everything held for this user: the view, write ordering, and
    /// the local copies of every known setting. Writes still in flight are
    /// superseded.
    #[tracing::instrument(skip_all, fields(user_id = %self.user_id))]
    pub async fn reset(&self) {
        let mut local_keys: Vec<String> = keys::ALL
            .iter()
            .map(|key| self.local_key(&SettingKey::from_static(key)))
            .collect();
        {
            let mut view = self.view.write();
            for slot in self.slots.iter() {
                slot.issued.fetch_add(1, Ordering::SeqCst);
            }
            for key in view.keys() {
                let local_key = self.local_key(key);
                if !local_keys.contains(&local_key) {
                    local_keys.push(local_key);
                }
            }
            view.clear();
        }
        self.slots.clear();

        if let Err(error) = self.local.remove(&local_keys).await {
            warn!(%error, "failed to clear local settings");
        }
        info!("settings reset");
    }

    fn local_key(&self, key: &SettingKey) -> String {
        format!("{}{}:{}", self.config.local_key_prefix, self.user_id, key)
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        self.events.send(event).ok();
    }
}
