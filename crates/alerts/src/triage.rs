//! Alert triage engine — creates, ranks, and mutates alert records, and
//! consumes billing events to keep failed-payment alerts current.
//!
//! The engine is the production [`BillingEventSink`]: wire it into the
//! retry scheduler and every payment failure, reschedule, escalation, and
//! recovery is reflected in the alert set automatically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use pocketpay_core::config::AlertConfig;
use pocketpay_core::error::{PocketError, PocketResult};
use pocketpay_core::event_bus::BillingEventSink;
use pocketpay_core::types::{AlertSeverity, AlertType, BillingEvent};

use pocketpay_billing::{PaymentRetryScheduler, RetryDisposition};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A user-facing alert record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub subscription_id: Option<Uuid>,
    pub failed_payment_id: Option<Uuid>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub retry_count: Option<u32>,
    pub max_retries: Option<u32>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Insertion order, final tie-break for the triage sort.
    #[serde(skip)]
    seq: u64,
}

impl Alert {
    /// Whether the alert is currently snoozed (the engine keeps snoozed
    /// alerts in `list()`; `visible()` filters on this).
    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snoozed_until.is_some_and(|until| until > now)
    }
}

/// Input for creating an alert. Type, title, and message are required;
/// severity defaults to medium, everything else is optional linkage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub severity: Option<AlertSeverity>,
    #[serde(default)]
    pub subscription_id: Option<Uuid>,
    #[serde(default)]
    pub failed_payment_id: Option<Uuid>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub location: Option<String>,
}

impl NewAlert {
    pub fn new(
        alert_type: AlertType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            title: title.into(),
            message: message.into(),
            severity: None,
            subscription_id: None,
            failed_payment_id: None,
            amount: None,
            currency: None,
            retry_count: None,
            max_retries: None,
            location: None,
        }
    }

    pub fn severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn subscription(mut self, subscription_id: Uuid) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    pub fn amount(mut self, amount: Decimal, currency: impl Into<String>) -> Self {
        self.amount = Some(amount);
        self.currency = Some(currency.into());
        self
    }

    fn validate(&self) -> PocketResult<()> {
        if self.title.trim().is_empty() {
            return Err(PocketError::Validation("title must not be empty".into()));
        }
        if self.message.trim().is_empty() {
            return Err(PocketError::Validation("message must not be empty".into()));
        }
        Ok(())
    }
}

/// Read-only portfolio projection over the alert set.
#[derive(Debug, Clone, Serialize)]
pub struct AlertAnalytics {
    pub total: usize,
    pub unread: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub by_type: HashMap<AlertType, usize>,
    pub failed_payment_count: usize,
    pub failed_payment_total: Decimal,
    pub failed_payment_average: Decimal,
    pub upcoming_payment_count: usize,
    pub spending_threshold_count: usize,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// In-memory alert triage engine backed by `DashMap`.
pub struct AlertTriageEngine {
    alerts: DashMap<Uuid, Alert>,
    seq: AtomicU64,
    config: AlertConfig,
}

impl Default for AlertTriageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertTriageEngine {
    pub fn new() -> Self {
        Self::with_config(AlertConfig::default())
    }

    pub fn with_config(config: AlertConfig) -> Self {
        Self {
            alerts: DashMap::new(),
            seq: AtomicU64::new(0),
            config,
        }
    }

    /// Validate and store a new alert.
    pub async fn create(&self, spec: NewAlert) -> PocketResult<Alert> {
        spec.validate()?;
        Ok(self.insert(spec))
    }

    /// Store an alert spec without external validation. Internal producers
    /// (the event sink, the spending monitor) build well-formed specs.
    pub(crate) fn insert(&self, spec: NewAlert) -> Alert {
        let now = Utc::now();
        let alert = Alert {
            id: Uuid::new_v4(),
            alert_type: spec.alert_type,
            severity: spec.severity.unwrap_or(AlertSeverity::Medium),
            title: spec.title,
            message: spec.message,
            is_read: false,
            snoozed_until: None,
            subscription_id: spec.subscription_id,
            failed_payment_id: spec.failed_payment_id,
            amount: spec.amount,
            currency: spec.currency,
            retry_count: spec.retry_count,
            max_retries: spec.max_retries,
            location: spec.location,
            created_at: now,
            updated_at: now,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        info!(
            alert_id = %alert.id,
            alert_type = ?alert.alert_type,
            severity = ?alert.severity,
            "Alert created"
        );
        self.alerts.insert(alert.id, alert.clone());
        alert
    }

    pub fn get(&self, id: Uuid) -> PocketResult<Alert> {
        self.alerts
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| PocketError::NotFound(format!("alert {id} not found")))
    }

    /// All alerts, severity descending, then most recent first. This exact
    /// ordering is load-bearing for the notification surface.
    pub fn list(&self) -> Vec<Alert> {
        let mut all: Vec<_> = self.alerts.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.created_at.cmp(&a.created_at))
                .then(b.seq.cmp(&a.seq))
        });
        all
    }

    /// `list()` minus currently-snoozed alerts, for surfaces that want
    /// snooze enforced centrally rather than filtering themselves.
    pub fn visible(&self) -> Vec<Alert> {
        let now = Utc::now();
        self.list()
            .into_iter()
            .filter(|a| !a.is_snoozed(now))
            .collect()
    }

    pub async fn mark_read(&self, id: Uuid) -> PocketResult<Alert> {
        let mut entry = self
            .alerts
            .get_mut(&id)
            .ok_or_else(|| PocketError::NotFound(format!("alert {id} not found")))?;
        entry.is_read = true;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    /// Mark every current alert read; returns how many changed.
    pub async fn mark_all_read(&self) -> usize {
        let now = Utc::now();
        let mut changed = 0;
        for mut entry in self.alerts.iter_mut() {
            if !entry.is_read {
                entry.is_read = true;
                entry.updated_at = now;
                changed += 1;
            }
        }
        changed
    }

    /// Snooze an alert for `hours` (engine default when `None`). Snoozed
    /// alerts stay in `list()`; see [`AlertTriageEngine::visible`].
    pub async fn snooze(&self, id: Uuid, hours: Option<i64>) -> PocketResult<Alert> {
        let hours = hours.unwrap_or(self.config.default_snooze_hours);
        if hours <= 0 {
            return Err(PocketError::Validation(format!(
                "snooze hours must be positive, got {hours}"
            )));
        }
        let mut entry = self
            .alerts
            .get_mut(&id)
            .ok_or_else(|| PocketError::NotFound(format!("alert {id} not found")))?;
        let now = Utc::now();
        entry.snoozed_until = Some(now + Duration::hours(hours));
        entry.updated_at = now;
        info!(alert_id = %id, hours, "Alert snoozed");
        Ok(entry.clone())
    }

    /// Permanently remove an alert. Not reversible.
    pub async fn dismiss(&self, id: Uuid) -> PocketResult<()> {
        self.alerts
            .remove(&id)
            .ok_or_else(|| PocketError::NotFound(format!("alert {id} not found")))?;
        info!(alert_id = %id, "Alert dismissed");
        Ok(())
    }

    /// Clear the entire alert set; returns the count removed. Never
    /// partially fails — an empty set succeeds trivially with 0.
    pub async fn dismiss_all(&self) -> usize {
        let ids: Vec<Uuid> = self.alerts.iter().map(|e| *e.key()).collect();
        let mut removed = 0;
        for id in ids {
            if self.alerts.remove(&id).is_some() {
                removed += 1;
            }
        }
        info!(removed, "All alerts dismissed");
        removed
    }

    /// Delegate a failed-payment alert's retry action to the scheduler.
    ///
    /// Alert upkeep (message refresh, escalation, removal on recovery)
    /// flows through the scheduler's event sink — in production wiring this
    /// engine is that sink — so this method only resolves the linkage and
    /// returns the disposition for the caller to render.
    pub async fn retry_failed_payment(
        &self,
        alert_id: Uuid,
        scheduler: &PaymentRetryScheduler,
    ) -> PocketResult<RetryDisposition> {
        let alert = self.get(alert_id)?;
        if alert.alert_type != AlertType::FailedPayment {
            return Err(PocketError::InvalidState(format!(
                "alert {alert_id} is {:?}, retry is only available on failed-payment alerts",
                alert.alert_type
            )));
        }
        let subscription_id = alert.subscription_id.ok_or_else(|| {
            PocketError::InvalidState(format!("alert {alert_id} has no linked subscription"))
        })?;
        let failed_payment_id = alert.failed_payment_id.ok_or_else(|| {
            PocketError::InvalidState(format!("alert {alert_id} has no linked failed payment"))
        })?;

        scheduler.retry(subscription_id, failed_payment_id).await
    }

    /// Whether any alert of this type currently references the
    /// subscription. The spending monitor uses this to avoid stacking
    /// duplicates across scans.
    pub fn has_alert_for(&self, subscription_id: Uuid, alert_type: AlertType) -> bool {
        self.alerts.iter().any(|e| {
            e.alert_type == alert_type && e.subscription_id == Some(subscription_id)
        })
    }

    /// Counts and aggregates over the current alert set. Read-only.
    pub fn analytics(&self) -> AlertAnalytics {
        let alerts: Vec<_> = self.alerts.iter().map(|e| e.value().clone()).collect();

        let mut by_type: HashMap<AlertType, usize> = HashMap::new();
        let (mut high, mut medium, mut low, mut unread) = (0, 0, 0, 0);
        let mut failed_payment_count = 0;
        let mut failed_payment_total = Decimal::ZERO;

        for alert in &alerts {
            *by_type.entry(alert.alert_type).or_insert(0) += 1;
            match alert.severity {
                AlertSeverity::High => high += 1,
                AlertSeverity::Medium => medium += 1,
                AlertSeverity::Low => low += 1,
            }
            if !alert.is_read {
                unread += 1;
            }
            if alert.alert_type == AlertType::FailedPayment {
                failed_payment_count += 1;
                failed_payment_total += alert.amount.unwrap_or(Decimal::ZERO);
            }
        }

        let failed_payment_average = if failed_payment_count > 0 {
            failed_payment_total / Decimal::from(failed_payment_count)
        } else {
            Decimal::ZERO
        };

        AlertAnalytics {
            total: alerts.len(),
            unread,
            high,
            medium,
            low,
            upcoming_payment_count: by_type
                .get(&AlertType::UpcomingPayment)
                .copied()
                .unwrap_or(0),
            spending_threshold_count: by_type
                .get(&AlertType::SpendingThreshold)
                .copied()
                .unwrap_or(0),
            by_type,
            failed_payment_count,
            failed_payment_total,
            failed_payment_average,
        }
    }

    fn linked_alert_id(&self, failed_payment_id: Uuid) -> Option<Uuid> {
        self.alerts
            .iter()
            .find(|e| e.failed_payment_id == Some(failed_payment_id))
            .map(|e| e.id)
    }
}

// ---------------------------------------------------------------------------
// Billing event sink
// ---------------------------------------------------------------------------

impl BillingEventSink for AlertTriageEngine {
    fn publish(&self, event: BillingEvent) {
        match event {
            BillingEvent::PaymentFailed {
                subscription_id,
                failed_payment_id,
                service_name,
                amount,
                currency,
                reason,
                next_retry_at,
            } => {
                let mut spec = NewAlert::new(
                    AlertType::FailedPayment,
                    format!("Payment failed: {service_name}"),
                    format!(
                        "Your {service_name} payment of {currency} {amount} failed ({reason}). \
                         We'll retry on {}.",
                        next_retry_at.format("%Y-%m-%d")
                    ),
                )
                .severity(AlertSeverity::High)
                .subscription(subscription_id)
                .amount(amount, currency);
                spec.failed_payment_id = Some(failed_payment_id);
                spec.retry_count = Some(0);
                self.insert(spec);
            }
            BillingEvent::RetryRescheduled {
                subscription_id,
                failed_payment_id,
                service_name,
                retry_count,
                max_retries,
                next_retry_at,
            } => {
                let message = format!(
                    "Retry {retry_count} of {max_retries} for {service_name} failed. \
                     Next attempt on {}.",
                    next_retry_at.format("%Y-%m-%d")
                );
                if let Some(id) = self.linked_alert_id(failed_payment_id) {
                    if let Some(mut entry) = self.alerts.get_mut(&id) {
                        // Severity only escalates, never downgrades.
                        entry.severity = entry.severity.max(AlertSeverity::High);
                        entry.message = message;
                        entry.retry_count = Some(retry_count);
                        entry.max_retries = Some(max_retries);
                        entry.updated_at = Utc::now();
                    }
                } else {
                    // Alert was dismissed in the meantime; re-materialize it.
                    let mut spec = NewAlert::new(
                        AlertType::FailedPayment,
                        format!("Payment failed: {service_name}"),
                        message,
                    )
                    .severity(AlertSeverity::High)
                    .subscription(subscription_id);
                    spec.failed_payment_id = Some(failed_payment_id);
                    spec.retry_count = Some(retry_count);
                    spec.max_retries = Some(max_retries);
                    self.insert(spec);
                }
            }
            BillingEvent::RetriesExhausted {
                subscription_id,
                failed_payment_id,
                service_name,
                amount,
                currency,
                retry_count,
            } => {
                let message = format!(
                    "{service_name}: max retries reached after {retry_count} attempts. \
                     Billing has stopped; update your payment method to resume."
                );
                if let Some(id) = self.linked_alert_id(failed_payment_id) {
                    if let Some(mut entry) = self.alerts.get_mut(&id) {
                        entry.severity = AlertSeverity::High;
                        entry.message = message;
                        entry.retry_count = Some(retry_count);
                        // Resurface even if the user had read the earlier state.
                        entry.is_read = false;
                        entry.updated_at = Utc::now();
                    }
                } else {
                    let mut spec = NewAlert::new(
                        AlertType::FailedPayment,
                        format!("Payment retries exhausted: {service_name}"),
                        message,
                    )
                    .severity(AlertSeverity::High)
                    .subscription(subscription_id)
                    .amount(amount, currency);
                    spec.failed_payment_id = Some(failed_payment_id);
                    spec.retry_count = Some(retry_count);
                    self.insert(spec);
                }
            }
            BillingEvent::PaymentSucceeded {
                subscription_id,
                service_name,
                amount,
                currency,
            } => {
                // The failure is resolved; drop its alert(s).
                let stale: Vec<Uuid> = self
                    .alerts
                    .iter()
                    .filter(|e| {
                        e.alert_type == AlertType::FailedPayment
                            && e.subscription_id == Some(subscription_id)
                    })
                    .map(|e| e.id)
                    .collect();
                for id in stale {
                    self.alerts.remove(&id);
                }

                let spec = NewAlert::new(
                    AlertType::PaymentSuccess,
                    format!("Payment processed: {service_name}"),
                    format!("Your {service_name} payment of {currency} {amount} went through."),
                )
                .severity(AlertSeverity::Low)
                .subscription(subscription_id)
                .amount(amount, currency);
                self.insert(spec);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
