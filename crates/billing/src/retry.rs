//! Failed-payment retry scheduler — drives a failed payment through retry
//! attempts with linear backoff and escalates into a subscription pause
//! when attempts run out.
//!
//! "Processing" a retry is a simulated outcome behind the [`RetryOutcomes`]
//! seam; there is no gateway call. `next_retry_at` is advisory data for an
//! external scheduler, not a live timer.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use pocketpay_core::config::BillingConfig;
use pocketpay_core::error::{PocketError, PocketResult};
use pocketpay_core::event_bus::{noop_sink, BillingEventSink};
use pocketpay_core::types::BillingEvent;

use crate::subscriptions::{FailedPayment, Subscription, SubscriptionStatus, SubscriptionStore};

// ---------------------------------------------------------------------------
// Outcome strategy
// ---------------------------------------------------------------------------

/// Decides whether a simulated retry attempt clears. Injected so tests can
/// force either branch deterministically.
pub trait RetryOutcomes: Send + Sync {
    fn attempt_succeeds(&self) -> bool;
}

/// Production strategy: succeeds with the configured probability.
pub struct RandomOutcomes {
    success_rate: f64,
}

impl RandomOutcomes {
    pub fn new(success_rate: f64) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
        }
    }
}

impl RetryOutcomes for RandomOutcomes {
    fn attempt_succeeds(&self) -> bool {
        rand::thread_rng().gen_bool(self.success_rate)
    }
}

/// Test strategy: every attempt resolves the same way.
pub struct FixedOutcomes(pub bool);

impl RetryOutcomes for FixedOutcomes {
    fn attempt_succeeds(&self) -> bool {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// How a retry call resolved. A failed attempt is a normal return, not an
/// error — callers render these directly.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum RetryDisposition {
    /// The payment cleared; the failed-payment record is gone.
    Recovered { subscription: Subscription },
    /// The attempt failed; another attempt is scheduled.
    Rescheduled {
        retry_count: u32,
        max_retries: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// Attempts ran out; the subscription is paused and the record kept
    /// for audit.
    Exhausted { retry_count: u32 },
}

/// Drives failed payments through the retry state machine. Both the alert
/// surface and the subscription surface delegate here; the retry logic
/// lives in exactly one place.
pub struct PaymentRetryScheduler {
    store: Arc<SubscriptionStore>,
    outcomes: Arc<dyn RetryOutcomes>,
    sink: Arc<dyn BillingEventSink>,
    config: BillingConfig,
}

impl PaymentRetryScheduler {
    pub fn new(store: Arc<SubscriptionStore>, config: BillingConfig) -> Self {
        let outcomes = Arc::new(RandomOutcomes::new(config.retry_success_rate));
        Self {
            store,
            outcomes,
            sink: noop_sink(),
            config,
        }
    }

    /// Replace the outcome strategy (tests force success or failure).
    pub fn with_outcomes(mut self, outcomes: Arc<dyn RetryOutcomes>) -> Self {
        self.outcomes = outcomes;
        self
    }

    /// Attach a sink for billing lifecycle events.
    pub fn with_event_sink(mut self, sink: Arc<dyn BillingEventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Open a failed-payment record against an active subscription and
    /// schedule the first retry one base-delay out.
    pub async fn record_failure(
        &self,
        subscription_id: Uuid,
        reason: impl Into<String>,
    ) -> PocketResult<FailedPayment> {
        let reason = reason.into();
        let base_delay = Duration::hours(self.config.retry_base_delay_hours);
        let max_retries = self.config.max_retries;

        let (failed, event) = self
            .store
            .with_subscription(subscription_id, |sub| {
                if sub.status != SubscriptionStatus::Active {
                    return Err(PocketError::InvalidState(format!(
                        "cannot record a payment failure for subscription in '{}' state; only active subscriptions have due payments",
                        sub.status.as_str()
                    )));
                }
                let now = Utc::now();
                let failed = FailedPayment {
                    id: Uuid::new_v4(),
                    amount: sub.amount,
                    currency: sub.currency.clone(),
                    attempted_at: now,
                    reason: reason.clone(),
                    retry_count: 0,
                    max_retries,
                    next_retry_at: now + base_delay,
                };
                sub.failed_payments.push(failed.clone());
                sub.updated_at = now;
                let event = BillingEvent::PaymentFailed {
                    subscription_id: sub.id,
                    failed_payment_id: failed.id,
                    service_name: sub.service_name.clone(),
                    amount: failed.amount,
                    currency: failed.currency.clone(),
                    reason: reason.clone(),
                    next_retry_at: failed.next_retry_at,
                };
                Ok((failed, event))
            })
            .await?;

        warn!(
            subscription_id = %subscription_id,
            failed_payment_id = %failed.id,
            reason = %failed.reason,
            "Payment failure recorded"
        );
        self.sink.publish(event);
        Ok(failed)
    }

    /// Attempt a retry for the given failed payment. Every call yields a
    /// [`RetryDisposition`] or a structured error; retries are never
    /// silently dropped.
    pub async fn retry(
        &self,
        subscription_id: Uuid,
        failed_payment_id: Uuid,
    ) -> PocketResult<RetryDisposition> {
        let succeeded = self.outcomes.attempt_succeeds();
        let base_delay_hours = self.config.retry_base_delay_hours;

        let (disposition, event) = self
            .store
            .with_subscription(subscription_id, |sub| {
                let now = Utc::now();
                let service_name = sub.service_name.clone();

                let position = sub
                    .failed_payments
                    .iter()
                    .position(|fp| fp.id == failed_payment_id)
                    .ok_or_else(|| {
                        PocketError::NotFound(format!(
                            "no failed payment {failed_payment_id} on subscription {subscription_id}"
                        ))
                    })?;

                if sub.failed_payments[position].retry_count
                    >= sub.failed_payments[position].max_retries
                {
                    return Err(PocketError::InvalidState(format!(
                        "failed payment {failed_payment_id} has exhausted its {} retries",
                        sub.failed_payments[position].max_retries
                    )));
                }

                if succeeded {
                    let failed = sub.failed_payments.remove(position);
                    sub.book_successful_payment(now);
                    let event = BillingEvent::PaymentSucceeded {
                        subscription_id: sub.id,
                        service_name,
                        amount: failed.amount,
                        currency: failed.currency,
                    };
                    return Ok((
                        RetryDisposition::Recovered {
                            subscription: sub.clone(),
                        },
                        event,
                    ));
                }

                let failed = &mut sub.failed_payments[position];
                failed.retry_count += 1;
                let retry_count = failed.retry_count;
                let max_retries = failed.max_retries;
                let amount = failed.amount;
                let currency = failed.currency.clone();

                if retry_count >= max_retries {
                    // Escalation: the record stays for audit, the
                    // subscription stops billing. Cancelled is terminal,
                    // so only an active subscription is paused here.
                    if sub.status == SubscriptionStatus::Active {
                        sub.status = SubscriptionStatus::Paused;
                        sub.auto_renew = false;
                    }
                    sub.updated_at = now;
                    let event = BillingEvent::RetriesExhausted {
                        subscription_id: sub.id,
                        failed_payment_id,
                        service_name,
                        amount,
                        currency,
                        retry_count,
                    };
                    Ok((RetryDisposition::Exhausted { retry_count }, event))
                } else {
                    // Linear backoff: attempt k reschedules k base-delays out.
                    let next_retry_at =
                        now + Duration::hours(base_delay_hours * i64::from(retry_count));
                    failed.next_retry_at = next_retry_at;
                    sub.updated_at = now;
                    let event = BillingEvent::RetryRescheduled {
                        subscription_id: sub.id,
                        failed_payment_id,
                        service_name,
                        retry_count,
                        max_retries,
                        next_retry_at,
                    };
                    Ok((
                        RetryDisposition::Rescheduled {
                            retry_count,
                            max_retries,
                            next_retry_at,
                        },
                        event,
                    ))
                }
            })
            .await?;

        match &disposition {
            RetryDisposition::Recovered { .. } => {
                info!(subscription_id = %subscription_id, failed_payment_id = %failed_payment_id, "Retry cleared");
            }
            RetryDisposition::Rescheduled { retry_count, next_retry_at, .. } => {
                info!(
                    subscription_id = %subscription_id,
                    retry_count,
                    next_retry_at = %next_retry_at,
                    "Retry failed, rescheduled"
                );
            }
            RetryDisposition::Exhausted { retry_count } => {
                warn!(
                    subscription_id = %subscription_id,
                    retry_count,
                    "Retries exhausted, subscription paused"
                );
            }
        }
        self.sink.publish(event);
        Ok(disposition)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pocketpay_core::event_bus::capture_sink;
    use pocketpay_core::types::{BillingCycle, BillingEventKind};
    use crate::subscriptions::NewSubscription;
    use rust_decimal_macros::dec;

    async fn store_with_subscription() -> (Arc<SubscriptionStore>, Subscription) {
        let store = Arc::new(SubscriptionStore::new());
        let sub = store
            .create(NewSubscription::new("Streamly", dec!(9.99), BillingCycle::Monthly))
            .await
            .unwrap();
        (store, sub)
    }

    fn scheduler(
        store: Arc<SubscriptionStore>,
        succeed: bool,
    ) -> (PaymentRetryScheduler, Arc<pocketpay_core::event_bus::CaptureSink>) {
        let sink = capture_sink();
        let scheduler = PaymentRetryScheduler::new(store, BillingConfig::default())
            .with_outcomes(Arc::new(FixedOutcomes(succeed)))
            .with_event_sink(sink.clone());
        (scheduler, sink)
    }

    #[tokio::test]
    async fn test_record_failure() {
        let (store, sub) = store_with_subscription().await;
        let (scheduler, sink) = scheduler(Arc::clone(&store), true);

        let before = Utc::now();
        let failed = scheduler.record_failure(sub.id, "card declined").await.unwrap();

        assert_eq!(failed.retry_count, 0);
        assert_eq!(failed.max_retries, 3);
        assert_eq!(failed.amount, dec!(9.99));
        assert!(failed.next_retry_at >= before + Duration::hours(24));
        assert!(failed.next_retry_at <= Utc::now() + Duration::hours(24));

        let stored = store.get(sub.id).unwrap();
        assert_eq!(stored.failed_payments.len(), 1);
        assert_eq!(sink.count_kind(BillingEventKind::PaymentFailed), 1);
    }

    #[tokio::test]
    async fn test_record_failure_requires_active() {
        let (store, sub) = store_with_subscription().await;
        let (scheduler, _sink) = scheduler(Arc::clone(&store), true);

        store.pause(sub.id).await.unwrap();
        let err = scheduler.record_failure(sub.id, "card declined").await.unwrap_err();
        assert!(matches!(err, PocketError::InvalidState(_)));

        let err = scheduler
            .record_failure(Uuid::new_v4(), "card declined")
            .await
            .unwrap_err();
        assert!(matches!(err, PocketError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_retry_success_clears_record_and_bills() {
        let (store, sub) = store_with_subscription().await;
        let (scheduler, sink) = scheduler(Arc::clone(&store), true);

        let failed = scheduler.record_failure(sub.id, "card declined").await.unwrap();
        let disposition = scheduler.retry(sub.id, failed.id).await.unwrap();

        let RetryDisposition::Recovered { subscription } = disposition else {
            panic!("expected recovery");
        };
        assert_eq!(subscription.total_paid, dec!(9.99));
        assert_eq!(subscription.payments_count, 1);
        assert!(subscription.failed_payments.is_empty());
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert_eq!(sink.count_kind(BillingEventKind::PaymentSucceeded), 1);
    }

    #[tokio::test]
    async fn test_retry_failure_linear_backoff() {
        let (store, sub) = store_with_subscription().await;
        let (scheduler, sink) = scheduler(Arc::clone(&store), false);

        let failed = scheduler.record_failure(sub.id, "card declined").await.unwrap();

        let before = Utc::now();
        let first = scheduler.retry(sub.id, failed.id).await.unwrap();
        let RetryDisposition::Rescheduled { retry_count, next_retry_at, .. } = first else {
            panic!("expected reschedule");
        };
        assert_eq!(retry_count, 1);
        assert!(next_retry_at >= before + Duration::hours(24));

        let before = Utc::now();
        let second = scheduler.retry(sub.id, failed.id).await.unwrap();
        let RetryDisposition::Rescheduled { retry_count, next_retry_at, .. } = second else {
            panic!("expected reschedule");
        };
        assert_eq!(retry_count, 2);
        assert!(next_retry_at >= before + Duration::hours(48));
        assert_eq!(sink.count_kind(BillingEventKind::RetryRescheduled), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_pauses_subscription() {
        let (store, sub) = store_with_subscription().await;
        let (scheduler, sink) = scheduler(Arc::clone(&store), false);

        let failed = scheduler.record_failure(sub.id, "card declined").await.unwrap();
        scheduler.retry(sub.id, failed.id).await.unwrap();
        scheduler.retry(sub.id, failed.id).await.unwrap();

        let third = scheduler.retry(sub.id, failed.id).await.unwrap();
        assert!(matches!(third, RetryDisposition::Exhausted { retry_count: 3 }));

        let stored = store.get(sub.id).unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Paused);
        assert!(!stored.auto_renew);
        // Record stays for audit; counter never exceeds the cap.
        assert_eq!(stored.failed_payments.len(), 1);
        assert_eq!(stored.failed_payments[0].retry_count, 3);
        assert_eq!(sink.count_kind(BillingEventKind::RetriesExhausted), 1);

        // A further retry is an illegal-state call, not a silent drop.
        let err = scheduler.retry(sub.id, failed.id).await.unwrap_err();
        assert!(matches!(err, PocketError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_exhaustion_on_cancelled_subscription_stays_cancelled() {
        let (store, sub) = store_with_subscription().await;
        let (scheduler, sink) = scheduler(Arc::clone(&store), false);

        let failed = scheduler.record_failure(sub.id, "card declined").await.unwrap();
        store.cancel(sub.id, "changed my mind").await.unwrap();

        // An external scheduler may still fire the remaining retries.
        scheduler.retry(sub.id, failed.id).await.unwrap();
        scheduler.retry(sub.id, failed.id).await.unwrap();
        let third = scheduler.retry(sub.id, failed.id).await.unwrap();
        assert!(matches!(third, RetryDisposition::Exhausted { retry_count: 3 }));

        // Cancellation is terminal; exhaustion must not resurrect the
        // subscription into paused.
        let stored = store.get(sub.id).unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Cancelled);
        assert_eq!(stored.failed_payments.len(), 1);
        assert_eq!(sink.count_kind(BillingEventKind::RetriesExhausted), 1);
    }

    #[tokio::test]
    async fn test_recovery_on_cancelled_subscription_keeps_due_date() {
        let (store, sub) = store_with_subscription().await;
        let (scheduler, _sink) = scheduler(Arc::clone(&store), true);

        let failed = scheduler.record_failure(sub.id, "card declined").await.unwrap();
        let cancelled = store.cancel(sub.id, "changed my mind").await.unwrap();

        // Settling a pre-cancellation debt books the amount but must not
        // schedule another charge.
        let disposition = scheduler.retry(sub.id, failed.id).await.unwrap();
        let RetryDisposition::Recovered { subscription } = disposition else {
            panic!("expected recovery");
        };
        assert_eq!(subscription.status, SubscriptionStatus::Cancelled);
        assert_eq!(subscription.total_paid, dec!(9.99));
        assert_eq!(subscription.payments_count, 1);
        assert_eq!(subscription.next_payment_date, cancelled.next_payment_date);
        assert!(subscription.failed_payments.is_empty());
    }

    #[tokio::test]
    async fn test_retry_unknown_ids() {
        let (store, sub) = store_with_subscription().await;
        let (scheduler, _sink) = scheduler(Arc::clone(&store), true);

        let err = scheduler.retry(sub.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PocketError::NotFound(_)));

        let err = scheduler
            .retry(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, PocketError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_random_outcomes_respect_bounds() {
        let always = RandomOutcomes::new(1.0);
        let never = RandomOutcomes::new(0.0);
        for _ in 0..20 {
            assert!(always.attempt_succeeds());
            assert!(!never.attempt_succeeds());
        }
        // Out-of-range rates are clamped rather than panicking gen_bool.
        let clamped = RandomOutcomes::new(1.7);
        assert!(clamped.attempt_succeeds());
    }
}
