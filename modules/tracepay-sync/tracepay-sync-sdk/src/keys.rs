//! Typed setting keys.
//!
//! Every logical setting is a zero-sized marker implementing [`Setting`].
//! The marker fixes the storage key, the value type, and the value used when
//! neither store holds one.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::models::{self, SettingKey};

/// A logical setting with a typed value.
pub trait Setting: Send + Sync + 'static {
    type Value: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Storage key shared by the remote and local stores.
    const KEY: &'static str;

    /// Value used when neither store holds one.
    fn default_value() -> Self::Value;

    #[must_use]
    fn key() -> SettingKey {
        SettingKey::from_static(Self::KEY)
    }
}

pub struct Language;

impl Setting for Language {
    type Value = models::Language;
    const KEY: &'static str = "language";

    fn default_value() -> Self::Value {
        models::Language::En
    }
}

/// Whether mobile-money transactions are included in the analysis.
pub struct IncludeMomoData;

impl Setting for IncludeMomoData {
    type Value = bool;
    const KEY: &'static str = "includeMomoData";

    fn default_value() -> Self::Value {
        true
    }
}

/// Monthly airtime spend limit, in rand.
pub struct AirtimeLimit;

impl Setting for AirtimeLimit {
    type Value = u32;
    const KEY: &'static str = "airtimeLimit";

    fn default_value() -> Self::Value {
        300
    }
}

pub struct FreezeSettings;

impl Setting for FreezeSettings {
    type Value = models::FreezeSettings;
    const KEY: &'static str = "freezeSettings";

    fn default_value() -> Self::Value {
        models::FreezeSettings::default()
    }
}

pub struct ReroutePlan;

impl Setting for ReroutePlan {
    type Value = models::ReroutePlan;
    const KEY: &'static str = "reroutePlan";

    fn default_value() -> Self::Value {
        models::ReroutePlan::default()
    }
}

/// Keys of every setting shipped with the SDK.
pub const ALL: [&str; 5] = [
    Language::KEY,
    IncludeMomoData::KEY,
    AirtimeLimit::KEY,
    FreezeSettings::KEY,
    ReroutePlan::KEY,
];
