//! Subscription store — owns subscription records, their lifecycle state
//! machine (active / paused / cancelled), and the failed-payment sub-records
//! attached to them.
//!
//! Every mutating operation is async and serialized per subscription id
//! through a lock table, so concurrent calls against the same subscription
//! (a retry racing a cancel, say) never interleave mid-mutation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use pocketpay_core::error::{PocketError, PocketResult};
use pocketpay_core::types::BillingCycle;

use crate::cycle::next_due_date;
use crate::payment_methods::PaymentMethodDirectory;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Subscription lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Which alert rules a subscription opts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSettings {
    pub spending_threshold: bool,
    pub upcoming_payment: bool,
    pub auto_renewal: bool,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            spending_threshold: true,
            upcoming_payment: true,
            auto_renewal: true,
        }
    }
}

/// A due payment that did not clear. Owned exclusively by its subscription;
/// removed on a successful retry, kept for audit after escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedPayment {
    pub id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub attempted_at: DateTime<Utc>,
    pub reason: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: DateTime<Utc>,
}

/// A recurring subscription tracked by the wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub service_name: String,
    pub amount: Decimal,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub next_payment_date: DateTime<Utc>,
    pub status: SubscriptionStatus,
    pub auto_renew: bool,
    pub total_paid: Decimal,
    pub payments_count: u32,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub spending_alert_threshold: Option<Decimal>,
    pub alert_settings: AlertSettings,
    pub payment_method_id: Option<Uuid>,
    pub failed_payments: Vec<FailedPayment>,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Book a cleared payment: bump counters and, while the subscription is
    /// still active, roll the due date forward from `now`. A paused or
    /// cancelled subscription keeps its due date: the payment settles an
    /// owed amount, it does not schedule the next charge.
    pub(crate) fn book_successful_payment(&mut self, now: DateTime<Utc>) {
        self.payments_count += 1;
        self.total_paid += self.amount;
        self.last_payment_date = Some(now);
        if self.status == SubscriptionStatus::Active {
            self.next_payment_date = next_due_date(now, self.billing_cycle);
        }
        self.updated_at = now;
    }

    pub fn failed_payment(&self, failed_payment_id: Uuid) -> Option<&FailedPayment> {
        self.failed_payments.iter().find(|fp| fp.id == failed_payment_id)
    }
}

/// Validated input for creating a subscription. Optional fields fall back
/// to the defaults the wallet UI shows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    pub service_name: String,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    pub billing_cycle: BillingCycle,
    #[serde(default)]
    pub spending_alert_threshold: Option<Decimal>,
    #[serde(default)]
    pub alert_settings: Option<AlertSettings>,
    #[serde(default)]
    pub payment_method_id: Option<Uuid>,
}

impl NewSubscription {
    pub fn new(
        service_name: impl Into<String>,
        amount: Decimal,
        billing_cycle: BillingCycle,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            amount,
            currency: None,
            billing_cycle,
            spending_alert_threshold: None,
            alert_settings: None,
            payment_method_id: None,
        }
    }

    /// Single validation entry point; every create goes through here.
    fn validate(&self) -> PocketResult<()> {
        if self.service_name.trim().is_empty() {
            return Err(PocketError::Validation(
                "service_name must not be empty".into(),
            ));
        }
        if self.amount <= Decimal::ZERO {
            return Err(PocketError::Validation(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        if let Some(threshold) = self.spending_alert_threshold {
            if threshold <= Decimal::ZERO {
                return Err(PocketError::Validation(format!(
                    "spending_alert_threshold must be positive, got {threshold}"
                )));
            }
        }
        if let Some(currency) = &self.currency {
            if currency.trim().is_empty() {
                return Err(PocketError::Validation("currency must not be empty".into()));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// In-memory subscription store backed by `DashMap`, with a per-id lock
/// table serializing mutations.
pub struct SubscriptionStore {
    subscriptions: DashMap<Uuid, Subscription>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    directory: Option<Arc<dyn PaymentMethodDirectory>>,
}

impl Default for SubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
            locks: DashMap::new(),
            directory: None,
        }
    }

    /// Attach the payment-method directory used to validate funding sources.
    pub fn with_directory(mut self, directory: Arc<dyn PaymentMethodDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_default().clone()
    }

    /// Run `f` against the subscription under its per-id lock. The closure
    /// sees the record exclusively; its mutation is all-or-nothing from the
    /// point of view of other callers.
    pub(crate) async fn with_subscription<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Subscription) -> PocketResult<R>,
    ) -> PocketResult<R> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let mut entry = self
            .subscriptions
            .get_mut(&id)
            .ok_or_else(|| PocketError::NotFound(format!("subscription {id} not found")))?;
        f(entry.value_mut())
    }

    /// Create an active subscription with its first due date derived from
    /// the billing cycle. A supplied payment-method id must resolve through
    /// the directory.
    pub async fn create(&self, spec: NewSubscription) -> PocketResult<Subscription> {
        spec.validate()?;

        if let Some(pm_id) = spec.payment_method_id {
            let directory = self.directory.as_ref().ok_or_else(|| {
                PocketError::Validation(
                    "payment_method_id supplied but no payment-method directory is configured"
                        .into(),
                )
            })?;
            if directory.resolve(pm_id).is_none() {
                return Err(PocketError::Validation(format!(
                    "payment method {pm_id} could not be resolved"
                )));
            }
        }

        let now = Utc::now();
        let subscription = Subscription {
            id: Uuid::new_v4(),
            service_name: spec.service_name,
            amount: spec.amount,
            currency: spec.currency.unwrap_or_else(|| "USD".into()),
            billing_cycle: spec.billing_cycle,
            next_payment_date: next_due_date(now, spec.billing_cycle),
            status: SubscriptionStatus::Active,
            auto_renew: true,
            total_paid: Decimal::ZERO,
            payments_count: 0,
            last_payment_date: None,
            spending_alert_threshold: spec.spending_alert_threshold,
            alert_settings: spec.alert_settings.unwrap_or_default(),
            payment_method_id: spec.payment_method_id,
            failed_payments: Vec::new(),
            cancellation_reason: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };

        info!(
            subscription_id = %subscription.id,
            service = %subscription.service_name,
            cycle = %subscription.billing_cycle,
            "Subscription created"
        );
        self.subscriptions.insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    /// Clone of the subscription with the given id.
    pub fn get(&self, id: Uuid) -> PocketResult<Subscription> {
        self.subscriptions
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| PocketError::NotFound(format!("subscription {id} not found")))
    }

    /// All subscriptions, most recently created first.
    pub fn list(&self) -> Vec<Subscription> {
        let mut all: Vec<_> = self
            .subscriptions
            .iter()
            .map(|e| e.value().clone())
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Pause an active subscription. Pausing freezes `next_payment_date`
    /// and switches off auto-renew.
    pub async fn pause(&self, id: Uuid) -> PocketResult<Subscription> {
        self.with_subscription(id, |sub| {
            if sub.status != SubscriptionStatus::Active {
                return Err(PocketError::InvalidState(format!(
                    "cannot pause subscription in '{}' state; only active subscriptions can be paused",
                    sub.status.as_str()
                )));
            }
            sub.status = SubscriptionStatus::Paused;
            sub.auto_renew = false;
            sub.updated_at = Utc::now();
            info!(subscription_id = %sub.id, "Subscription paused");
            Ok(sub.clone())
        })
        .await
    }

    /// Resume a paused subscription. The due date is recomputed from now —
    /// the paused interval is never charged retroactively.
    pub async fn resume(&self, id: Uuid) -> PocketResult<Subscription> {
        self.with_subscription(id, |sub| {
            if sub.status != SubscriptionStatus::Paused {
                return Err(PocketError::InvalidState(format!(
                    "cannot resume subscription in '{}' state; only paused subscriptions can be resumed",
                    sub.status.as_str()
                )));
            }
            let now = Utc::now();
            sub.status = SubscriptionStatus::Active;
            sub.auto_renew = true;
            sub.next_payment_date = next_due_date(now, sub.billing_cycle);
            sub.updated_at = now;
            info!(subscription_id = %sub.id, "Subscription resumed");
            Ok(sub.clone())
        })
        .await
    }

    /// Cancel a subscription. Legal from active or paused; cancelling an
    /// already-cancelled subscription is a no-op success so UI retries stay
    /// cheap. Cancellation is terminal for billing but the record remains.
    pub async fn cancel(&self, id: Uuid, reason: impl Into<String>) -> PocketResult<Subscription> {
        let reason = reason.into();
        self.with_subscription(id, |sub| {
            if sub.status == SubscriptionStatus::Cancelled {
                return Ok(sub.clone());
            }
            let now = Utc::now();
            sub.status = SubscriptionStatus::Cancelled;
            sub.auto_renew = false;
            sub.cancellation_reason = Some(reason);
            sub.cancelled_at = Some(now);
            sub.updated_at = now;
            info!(subscription_id = %sub.id, "Subscription cancelled");
            Ok(sub.clone())
        })
        .await
    }

    /// Permanently remove a non-active subscription and its failed-payment
    /// records.
    pub async fn delete(&self, id: Uuid) -> PocketResult<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let status = self
            .subscriptions
            .get(&id)
            .map(|e| e.value().status)
            .ok_or_else(|| PocketError::NotFound(format!("subscription {id} not found")))?;
        if status == SubscriptionStatus::Active {
            return Err(PocketError::InvalidState(
                "cannot delete an active subscription; pause or cancel it first".into(),
            ));
        }

        self.subscriptions.remove(&id);
        self.locks.remove(&id);
        info!(subscription_id = %id, "Subscription deleted");
        Ok(())
    }

    /// Book a cleared billing attempt: bump `payments_count`, add the
    /// amount to `total_paid`, and roll the due date forward.
    pub async fn record_successful_billing(&self, id: Uuid) -> PocketResult<Subscription> {
        self.with_subscription(id, |sub| {
            sub.book_successful_payment(Utc::now());
            info!(
                subscription_id = %sub.id,
                payments = sub.payments_count,
                total_paid = %sub.total_paid,
                "Billing recorded"
            );
            Ok(sub.clone())
        })
        .await
    }

    /// Point the subscription at a different funding source. The id must
    /// resolve through the payment-method directory.
    pub async fn update_payment_method(
        &self,
        id: Uuid,
        payment_method_id: Uuid,
    ) -> PocketResult<Subscription> {
        let directory = self.directory.as_ref().ok_or_else(|| {
            PocketError::Validation("no payment-method directory is configured".into())
        })?;
        if directory.resolve(payment_method_id).is_none() {
            return Err(PocketError::NotFound(format!(
                "payment method {payment_method_id} not found"
            )));
        }

        self.with_subscription(id, |sub| {
            sub.payment_method_id = Some(payment_method_id);
            sub.updated_at = Utc::now();
            Ok(sub.clone())
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment_methods::InMemoryPaymentMethodDirectory;
    use rust_decimal_macros::dec;

    fn spec() -> NewSubscription {
        NewSubscription::new("Streamly", dec!(9.99), BillingCycle::Monthly)
    }

    #[tokio::test]
    async fn test_create_defaults() {
        let store = SubscriptionStore::new();
        let before = Utc::now();
        let sub = store.create(spec()).await.unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(sub.auto_renew);
        assert_eq!(sub.currency, "USD");
        assert_eq!(sub.total_paid, Decimal::ZERO);
        assert_eq!(sub.payments_count, 0);
        assert!(sub.next_payment_date > before);
        assert!(sub.alert_settings.spending_threshold);
        assert_eq!(store.list().len(), 1);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let store = SubscriptionStore::new();

        let err = store
            .create(NewSubscription::new("  ", dec!(9.99), BillingCycle::Monthly))
            .await
            .unwrap_err();
        assert!(matches!(err, PocketError::Validation(_)));
        assert!(err.to_string().contains("service_name"));

        let err = store
            .create(NewSubscription::new("Streamly", dec!(0), BillingCycle::Monthly))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("amount"));

        let mut bad_threshold = spec();
        bad_threshold.spending_alert_threshold = Some(dec!(-5));
        let err = store.create(bad_threshold).await.unwrap_err();
        assert!(err.to_string().contains("spending_alert_threshold"));
    }

    #[tokio::test]
    async fn test_create_resolves_payment_method() {
        let directory = Arc::new(InMemoryPaymentMethodDirectory::new());
        let card = directory.register("card", Some("4242".into()), None, true);
        let store = SubscriptionStore::new().with_directory(directory);

        let mut known = spec();
        known.payment_method_id = Some(card.id);
        let sub = store.create(known).await.unwrap();
        assert_eq!(sub.payment_method_id, Some(card.id));

        let mut unknown = spec();
        unknown.payment_method_id = Some(Uuid::new_v4());
        let err = store.create(unknown).await.unwrap_err();
        assert!(matches!(err, PocketError::Validation(_)));
    }

    #[tokio::test]
    async fn test_pause_resume_transitions() {
        let store = SubscriptionStore::new();
        let sub = store.create(spec()).await.unwrap();

        let paused = store.pause(sub.id).await.unwrap();
        assert_eq!(paused.status, SubscriptionStatus::Paused);
        assert!(!paused.auto_renew);
        // Paused freezes the due date.
        assert_eq!(paused.next_payment_date, sub.next_payment_date);

        // Double pause is an invalid transition.
        let err = store.pause(sub.id).await.unwrap_err();
        assert!(matches!(err, PocketError::InvalidState(_)));
        assert!(err.to_string().contains("paused"));

        let resumed = store.resume(sub.id).await.unwrap();
        assert_eq!(resumed.status, SubscriptionStatus::Active);
        assert!(resumed.auto_renew);
        assert!(resumed.next_payment_date > Utc::now());

        // Resuming an active subscription is invalid.
        assert!(store.resume(sub.id).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let store = SubscriptionStore::new();
        let sub = store.create(spec()).await.unwrap();

        let cancelled = store.cancel(sub.id, "too expensive").await.unwrap();
        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
        assert!(!cancelled.auto_renew);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("too expensive"));
        let first_cancelled_at = cancelled.cancelled_at;

        // Second cancel succeeds without changing anything.
        let again = store.cancel(sub.id, "changed my mind").await.unwrap();
        assert_eq!(again.cancellation_reason.as_deref(), Some("too expensive"));
        assert_eq!(again.cancelled_at, first_cancelled_at);

        // Cancelled subscriptions cannot be paused or resumed.
        assert!(store.pause(sub.id).await.is_err());
        assert!(store.resume(sub.id).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_from_paused() {
        let store = SubscriptionStore::new();
        let sub = store.create(spec()).await.unwrap();
        store.pause(sub.id).await.unwrap();

        let cancelled = store.cancel(sub.id, "cleanup").await.unwrap();
        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_delete_requires_non_active() {
        let store = SubscriptionStore::new();
        let sub = store.create(spec()).await.unwrap();

        let err = store.delete(sub.id).await.unwrap_err();
        assert!(matches!(err, PocketError::InvalidState(_)));

        store.cancel(sub.id, "done").await.unwrap();
        store.delete(sub.id).await.unwrap();
        assert!(matches!(store.get(sub.id), Err(PocketError::NotFound(_))));

        // Deleting again reports not-found.
        assert!(matches!(
            store.delete(sub.id).await,
            Err(PocketError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_record_successful_billing() {
        let store = SubscriptionStore::new();
        let sub = store.create(spec()).await.unwrap();

        let updated = store.record_successful_billing(sub.id).await.unwrap();
        assert_eq!(updated.payments_count, 1);
        assert_eq!(updated.total_paid, dec!(9.99));
        assert!(updated.last_payment_date.is_some());
        assert!(updated.next_payment_date > Utc::now());

        let updated = store.record_successful_billing(sub.id).await.unwrap();
        assert_eq!(updated.payments_count, 2);
        assert_eq!(updated.total_paid, dec!(19.98));
    }

    #[tokio::test]
    async fn test_update_payment_method() {
        let directory = Arc::new(InMemoryPaymentMethodDirectory::new());
        let card = directory.register("card", Some("1234".into()), None, false);
        let store = SubscriptionStore::new().with_directory(directory);
        let sub = store.create(spec()).await.unwrap();

        let updated = store.update_payment_method(sub.id, card.id).await.unwrap();
        assert_eq!(updated.payment_method_id, Some(card.id));

        let err = store
            .update_payment_method(sub.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, PocketError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_billing_is_serialized() {
        let store = Arc::new(SubscriptionStore::new());
        let sub = store.create(spec()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            let id = sub.id;
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    store.record_successful_billing(id).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let final_state = store.get(sub.id).unwrap();
        assert_eq!(final_state.payments_count, 100);
        assert_eq!(final_state.total_paid, dec!(9.99) * Decimal::from(100));
    }
}
