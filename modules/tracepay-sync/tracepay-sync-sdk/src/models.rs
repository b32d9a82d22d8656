//! Public models for the sync layer.
//!
//! These are transport-agnostic data structures shared between the sync
//! layer, the stores it consumes, and the presentation layer.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Identifier of the signed-in user owning the settings.
pub type UserId = Uuid;

/// Identifies one logical setting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingKey(Cow<'static, str>);

impl SettingKey {
    #[must_use]
    pub const fn from_static(key: &'static str) -> Self {
        Self(Cow::Borrowed(key))
    }

    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(Cow::Owned(key.into()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the currently held value of a setting came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingSource {
    Remote,
    Local,
    Default,
}

/// A setting value together with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingEntry<V> {
    pub key: SettingKey,
    pub value: V,
    pub source: SettingSource,
    /// Time of the last successful remote round trip for this key.
    pub last_synced_at: Option<OffsetDateTime>,
}

impl<V> SettingEntry<V> {
    /// Converts the value while keeping key and provenance.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> SettingEntry<U> {
        SettingEntry {
            key: self.key,
            value: f(self.value),
            source: self.source,
            last_synced_at: self.last_synced_at,
        }
    }
}

/// Identifier of an entity driven by a toggle (account, debit order, leak...).
///
/// Each toggle namespace has its own id space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of one in-flight toggle mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// UI-facing state of one binary control.
///
/// `pending_operation_id` is `Some` only while a mutation is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleState {
    pub id: EntityId,
    pub enabled: bool,
    pub pending_operation_id: Option<OperationId>,
}

impl ToggleState {
    #[must_use]
    pub fn idle(id: EntityId, enabled: bool) -> Self {
        Self {
            id,
            enabled,
            pending_operation_id: None,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending_operation_id.is_some()
    }
}

/// Server-assigned identifier of a frozen item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrozenItemId(pub i64);

impl fmt::Display for FrozenItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier returned by a mutation that is required to reverse it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverseHandle {
    FrozenItem(FrozenItemId),
}

impl ReverseHandle {
    #[must_use]
    pub fn frozen_item_id(self) -> FrozenItemId {
        match self {
            Self::FrozenItem(id) => id,
        }
    }
}

/// App display language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Xh,
    Zu,
    Af,
    St,
    Tn,
    Nso,
    Ts,
    Ve,
    Nr,
    Ss,
}

impl Language {
    pub const ALL: [Language; 11] = [
        Self::En,
        Self::Xh,
        Self::Zu,
        Self::Af,
        Self::St,
        Self::Tn,
        Self::Nso,
        Self::Ts,
        Self::Ve,
        Self::Nr,
        Self::Ss,
    ];

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Xh => "xh",
            Self::Zu => "zu",
            Self::Af => "af",
            Self::St => "st",
            Self::Tn => "tn",
            Self::Nso => "nso",
            Self::Ts => "ts",
            Self::Ve => "ve",
            Self::Nr => "nr",
            Self::Ss => "ss",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|lang| lang.code() == s)
            .ok_or_else(|| format!("unsupported language code '{s}'"))
    }
}

/// Global protection switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct FreezeSettings {
    pub pause_debit_orders: bool,
    pub block_fee_accounts: bool,
    pub set_airtime_limit: bool,
    pub cancel_subscriptions: bool,
}

/// Plan id used until the remote store assigns one.
pub const DEFAULT_REROUTE_PLAN_ID: Uuid =
    Uuid::from_u128(0x3333_3333_3333_3333_3333_3333_3333_3333);

/// Proposed salary split: per income account, whether routing is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReroutePlan {
    pub plan_id: Uuid,
    pub accounts: BTreeMap<String, bool>,
    pub is_applied: bool,
}

impl Default for ReroutePlan {
    fn default() -> Self {
        Self {
            plan_id: DEFAULT_REROUTE_PLAN_ID,
            accounts: ["1", "2", "3"]
                .into_iter()
                .map(|id| (id.to_owned(), false))
                .collect(),
            is_applied: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Current,
    Savings,
    Wallet,
}

/// A linked bank account or wallet that can be frozen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankAccount {
    pub id: EntityId,
    pub bank: String,
    pub name: String,
    pub kind: AccountKind,
    pub is_frozen: bool,
}

/// A recurring debit order that can be paused.
#[derive(Debug, Clone, PartialEq)]
pub struct DebitOrder {
    pub id: EntityId,
    pub posted_date: time::Date,
    pub description: String,
    pub reference: String,
    pub amount: f64,
    pub is_paused: bool,
}

/// A paid subscription the user can opt out of.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: EntityId,
    pub name: String,
    pub amount: f64,
    pub is_opted_out: bool,
}

/// Body of a freeze request. At least one target id should be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreezeRequest {
    pub leak_id: Option<String>,
    pub transaction_id: Option<String>,
    pub consent_id: Option<String>,
    pub reason: String,
}

impl FreezeRequest {
    #[must_use]
    pub fn leak(leak_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            leak_id: Some(leak_id.into()),
            transaction_id: None,
            consent_id: None,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn transaction(transaction_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            leak_id: None,
            transaction_id: Some(transaction_id.into()),
            consent_id: None,
            reason: reason.into(),
        }
    }
}

/// Result of a freeze call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FreezeReceipt {
    pub status: String,
    pub message: String,
    #[serde(default)]
    pub frozen_item_id: Option<FrozenItemId>,
}

/// An item currently frozen on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FrozenItem {
    pub id: FrozenItemId,
    pub leak_id: Option<String>,
    pub transaction_id: Option<String>,
    pub consent_id: Option<String>,
    pub reason: String,
    pub frozen_at: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_codes_round_trip_through_from_str() {
        for lang in Language::ALL {
            assert_eq!(lang.code().parse::<Language>().unwrap(), lang);
        }
        assert!("fr".parse::<Language>().is_err());
    }

    #[test]
    fn language_serializes_as_code() {
        assert_eq!(serde_json::to_string(&Language::Nso).unwrap(), "\"nso\"");
        assert!(serde_json::from_str::<Language>("\"klingon\"").is_err());
    }

    #[test]
    fn default_reroute_plan_has_all_accounts_disabled() {
        let plan = ReroutePlan::default();
        assert_eq!(plan.plan_id.to_string(), "33333333-3333-3333-3333-333333333333");
        assert_eq!(plan.accounts.len(), 3);
        assert!(plan.accounts.values().all(|enabled| !enabled));
        assert!(!plan.is_applied);
    }

    #[test]
    fn freeze_receipt_tolerates_missing_item_id() {
        let receipt: FreezeReceipt =
            serde_json::from_str(r#"{"status":"ok","message":"done"}"#).unwrap();
        assert_eq!(receipt.frozen_item_id, None);
    }

    #[test]
    fn toggle_state_idle_is_not_pending() {
        let state = ToggleState::idle(EntityId::from("capitec-main"), true);
        assert!(state.enabled);
        assert!(!state.is_pending());
    }
}
