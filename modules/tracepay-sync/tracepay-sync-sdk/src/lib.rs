//! Sync SDK
//!
//! This crate provides the public contract of the sync layer:
//! - Store traits consumed by the sync layer (`RemoteSettingsStore`,
//!   `ProtectionStore`, `LocalDurableStore`, `FreezeEndpoints`)
//! - Typed setting keys (`Setting` and the markers in [`keys`])
//! - Model types (`SettingEntry`, `ToggleState`, `FrozenItem`, ...)
//! - Error type (`StoreError`)
//!
//! Host applications implement the store traits against their backends and
//! hand them to the `tracepay-sync` session:
//! ```ignore
//! let session = Session::init(user_id, deps, &config).await;
//! let language = session.settings().current::<keys::Language>();
//! ```

#![forbid(unsafe_code)]

pub mod api;
pub mod errors;
pub mod keys;
pub mod models;

pub use api::{FreezeEndpoints, LocalDurableStore, ProtectionStore, RemoteSettingsStore};
pub use errors::StoreError;
pub use keys::Setting;
pub use models::{
    AccountKind, BankAccount, DebitOrder, EntityId, FreezeReceipt, FreezeRequest, FreezeSettings,
    FrozenItem, FrozenItemId, Language, OperationId, ReroutePlan, ReverseHandle, SettingEntry,
    SettingKey, SettingSource, Subscription, ToggleState, UserId,
};
