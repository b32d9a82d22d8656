//! Sync layer of the mobile app.
//!
//! Keeps the app's view of user settings, protection toggles and dashboard
//! data consistent with the remote stores:
//! - [`SettingsClient`]: remote-first settings with a local durable fallback
//! - [`ToggleController`]: optimistic toggles with confirmation and rollback
//! - [`TtlCache`]: single-flight read-through cache for dashboard reads
//! - [`Session`]: per-user wiring of the above
//!
//! Store contracts and models live in `tracepay-sync-sdk`.

#![forbid(unsafe_code)]

pub mod config;
pub mod domain;
pub mod infra;


pub use config::{BackendConfig, CacheConfig, ConfigError, TracepaySyncConfig};
pub use domain::backends::{FreezeBackend, FreezeTarget, ProtectionBackend, ProtectionTarget};
pub use domain::cache::{CacheEntry, TtlCache};
pub use domain::error::{CacheError, ToggleError};
pub use domain::session::{Session, SessionDeps};
pub use domain::settings_client::{SettingsClient, SettingsClientConfig, SyncEvent, WriteOutcome};
pub use domain::toggle::{
    Confirm, ConfirmationRequest, PreConfirmed, ToggleBackend, ToggleController, ToggleKind,
    ToggleOutcome,
};
pub use infra::local_store::{FileLocalStore, MemoryLocalStore};
pub use infra::rest_freeze::{RestClientError, RestFreezeClient};
