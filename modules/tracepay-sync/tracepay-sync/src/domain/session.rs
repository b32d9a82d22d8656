//! Per-user wiring of the settings client and the protection toggles.

use std::sync::Arc;

use tracepay_sync_sdk::{
    EntityId, FreezeEndpoints, LocalDurableStore, ProtectionStore, RemoteSettingsStore, StoreError,
    UserId, keys,
};
use tracing::{info, warn};

use super::backends::{FreezeBackend, ProtectionBackend, ProtectionTarget};
use super::settings_client::{SettingsClient, SettingsClientConfig};
use super::toggle::ToggleController;
use crate::config::TracepaySyncConfig;

/// Stores a session is built from.
#[derive(Clone)]
pub struct SessionDeps {
    pub remote_settings: Arc<dyn RemoteSettingsStore>,
    pub protection: Arc<dyn ProtectionStore>,
    pub freeze: Arc<dyn FreezeEndpoints>,
    pub local: Arc<dyn LocalDurableStore>,
}

/// State owned for one signed-in user, from sign-in to sign-out.
pub struct Session {
    user_id: UserId,
    deps: SessionDeps,
    settings: Arc<SettingsClient>,
    leak_freeze: Arc<FreezeBackend>,
    transaction_freeze: Arc<FreezeBackend>,
    leaks: ToggleController,
    transactions: ToggleController,
    accounts: ToggleController,
    debit_orders: ToggleController,
    subscriptions: ToggleController,
    reroute: ToggleController,
}

impl Session {
    /// Loads every setting and seeds the toggles from the stores' listings.
    ///
    /// Listing failures are logged and leave the affected controller empty;
    /// [`refresh_entities`](Self::refresh_entities) can be retried later.
    #[tracing::instrument(skip_all, fields(%user_id))]
    pub async fn init(user_id: UserId, deps: SessionDeps, config: &TracepaySyncConfig) -> Self {
        let settings = Arc::new(SettingsClient::new(
            user_id,
            Arc::clone(&deps.remote_settings),
            Arc::clone(&deps.local),
            SettingsClientConfig::from(config),
        ));
        settings.load_all().await;

        let plan = match deps.protection.get_reroute_plan(user_id).await {
            Ok(Some(plan)) => plan,
            Ok(None) => settings.current::<keys::ReroutePlan>(),
            Err(error) => {
                warn!(%error, "failed to load reroute plan, using stored plan");
                settings.current::<keys::ReroutePlan>()
            }
        };

        let timeout = config.mutation_timeout;
        let reason = config.backend.freeze_reason.as_str();
        let leak_freeze = Arc::new(FreezeBackend::leaks(Arc::clone(&deps.freeze), reason));
        let transaction_freeze = Arc::new(FreezeBackend::transactions(
            Arc::clone(&deps.freeze),
            reason,
        ));
        let protection = |target| {
            ToggleController::new(
                Arc::new(ProtectionBackend::new(
                    Arc::clone(&deps.protection),
                    user_id,
                    target,
                )),
                timeout,
            )
        };

        let session = Self {
            user_id,
            leaks: ToggleController::new(leak_freeze.clone(), timeout),
            transactions: ToggleController::new(transaction_freeze.clone(), timeout),
            accounts: protection(ProtectionTarget::AccountFreeze),
            debit_orders: protection(ProtectionTarget::DebitOrderPause),
            subscriptions: protection(ProtectionTarget::SubscriptionOptOut),
            reroute: protection(ProtectionTarget::Reroute {
                plan_id: plan.plan_id,
            }),
            leak_freeze,
            transaction_freeze,
            settings,
            deps,
        };

        session
            .reroute
            .seed(plan.accounts.into_iter().map(|(id, on)| (EntityId::from(id), on)));
        session.refresh_entities().await;
        info!("session ready");
        session
    }

    /// Re-lists accounts, debit orders, subscriptions and frozen items and
    /// reseeds the matching controllers. Entities with a mutation in flight
    /// keep their optimistic state.
    pub async fn refresh_entities(&self) {
        let (accounts, debit_orders, subscriptions, frozen) = tokio::join!(
            self.deps.protection.list_bank_accounts(self.user_id),
            self.deps.protection.list_debit_orders(self.user_id),
            self.deps.protection.list_subscriptions(self.user_id),
            self.deps.freeze.list_frozen(),
        );

        match accounts {
            Ok(accounts) => self
                .accounts
                .seed(accounts.into_iter().map(|a| (a.id, a.is_frozen))),
            Err(error) => log_listing_failure("bank accounts", &error),
        }
        match debit_orders {
            Ok(orders) => self
                .debit_orders
                .seed(orders.into_iter().map(|o| (o.id, o.is_paused))),
            Err(error) => log_listing_failure("debit orders", &error),
        }
        match subscriptions {
            Ok(subscriptions) => self
                .subscriptions
                .seed(subscriptions.into_iter().map(|s| (s.id, s.is_opted_out))),
            Err(error) => log_listing_failure("subscriptions", &error),
        }
        match frozen {
            Ok(items) => {
                for (id, handle) in self.leak_freeze.frozen_entities(&items) {
                    self.leaks.register_with_handle(id, handle);
                }
                for (id, handle) in self.transaction_freeze.frozen_entities(&items) {
                    self.transactions.register_with_handle(id, handle);
                }
            }
            Err(error) => log_listing_failure("frozen items", &error),
        }
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn settings(&self) -> &SettingsClient {
        &self.settings
    }

    /// Shared handle for [`SettingsClient::spawn_write`].
    #[must_use]
    pub fn settings_handle(&self) -> Arc<SettingsClient> {
        Arc::clone(&self.settings)
    }

    #[must_use]
    pub fn leaks(&self) -> &ToggleController {
        &self.leaks
    }

    #[must_use]
    pub fn transactions(&self) -> &ToggleController {
        &self.transactions
    }

    #[must_use]
    pub fn accounts(&self) -> &ToggleController {
        &self.accounts
    }

    #[must_use]
    pub fn debit_orders(&self) -> &ToggleController {
        &self.debit_orders
    }

    #[must_use]
    pub fn subscriptions(&self) -> &ToggleController {
        &self.subscriptions
    }

    #[must_use]
    pub fn reroute(&self) -> &ToggleController {
        &self.reroute
    }

    /// Ends the session: in-flight setting writes are superseded and the
    /// user's local copies are removed.
    #[tracing::instrument(skip_all, fields(user_id = %self.user_id))]
    pub async fn teardown(self) {
        self.settings.reset().await;
        info!("session closed");
    }
}

fn log_listing_failure(what: &str, error: &StoreError) {
    warn!(what, %error, "listing failed, keeping previous toggle states");
}
