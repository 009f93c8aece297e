//! Spending threshold monitor — derives monthly-equivalent spend per
//! subscription and raises threshold, upcoming-payment, and auto-renewal
//! alerts. Read-only over subscription state; only a producer of alerts.

use chrono::{Duration, Utc};
use tracing::debug;

use pocketpay_core::config::AlertConfig;
use pocketpay_core::types::{AlertSeverity, AlertType};

use pocketpay_billing::cycle::monthly_equivalent;
use pocketpay_billing::{Subscription, SubscriptionStatus, SubscriptionStore};

use crate::triage::{AlertTriageEngine, NewAlert};

/// Periodic scanner over the subscription portfolio. A scan is re-runnable:
/// subscriptions that already carry a live alert of a given type are
/// skipped, so repeated scans don't stack duplicates.
pub struct SpendingThresholdMonitor {
    config: AlertConfig,
}

impl Default for SpendingThresholdMonitor {
    fn default() -> Self {
        Self::new(AlertConfig::default())
    }
}

impl SpendingThresholdMonitor {
    pub fn new(config: AlertConfig) -> Self {
        Self { config }
    }

    /// Scan active subscriptions and raise alerts; returns how many alerts
    /// were created.
    pub fn scan(&self, store: &SubscriptionStore, alerts: &AlertTriageEngine) -> usize {
        let mut created = 0;
        for subscription in store.list() {
            if subscription.status != SubscriptionStatus::Active {
                continue;
            }
            created += self.check_spending_threshold(&subscription, alerts);
            created += self.check_upcoming_payment(&subscription, alerts);
            created += self.check_auto_renewal(&subscription, alerts);
        }
        debug!(created, "Monitor scan complete");
        created
    }

    fn check_spending_threshold(
        &self,
        subscription: &Subscription,
        alerts: &AlertTriageEngine,
    ) -> usize {
        if !subscription.alert_settings.spending_threshold {
            return 0;
        }
        let Some(threshold) = subscription.spending_alert_threshold else {
            return 0;
        };
        if alerts.has_alert_for(subscription.id, AlertType::SpendingThreshold) {
            return 0;
        }

        let monthly = monthly_equivalent(subscription.amount, subscription.billing_cycle);
        if monthly < threshold {
            return 0;
        }
        let severity = if monthly >= threshold * self.config.threshold_high_multiplier {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        };

        let spec = NewAlert::new(
            AlertType::SpendingThreshold,
            format!("Spending alert: {}", subscription.service_name),
            format!(
                "{} costs {} {} per month, at or above your {} {} alert threshold.",
                subscription.service_name,
                subscription.currency,
                monthly.round_dp(2),
                subscription.currency,
                threshold
            ),
        )
        .severity(severity)
        .subscription(subscription.id)
        .amount(monthly.round_dp(2), subscription.currency.clone());
        alerts.insert(spec);
        1
    }

    fn check_upcoming_payment(
        &self,
        subscription: &Subscription,
        alerts: &AlertTriageEngine,
    ) -> usize {
        if !subscription.alert_settings.upcoming_payment {
            return 0;
        }
        if alerts.has_alert_for(subscription.id, AlertType::UpcomingPayment) {
            return 0;
        }

        let now = Utc::now();
        let until_due = subscription.next_payment_date - now;
        if until_due > Duration::days(self.config.upcoming_window_days) {
            return 0;
        }
        let severity = if until_due <= Duration::days(self.config.upcoming_urgent_days) {
            AlertSeverity::High
        } else {
            AlertSeverity::Low
        };

        let spec = NewAlert::new(
            AlertType::UpcomingPayment,
            format!("Upcoming payment: {}", subscription.service_name),
            format!(
                "{} will charge {} {} on {}.",
                subscription.service_name,
                subscription.currency,
                subscription.amount,
                subscription.next_payment_date.format("%Y-%m-%d")
            ),
        )
        .severity(severity)
        .subscription(subscription.id)
        .amount(subscription.amount, subscription.currency.clone());
        alerts.insert(spec);
        1
    }

    fn check_auto_renewal(
        &self,
        subscription: &Subscription,
        alerts: &AlertTriageEngine,
    ) -> usize {
        if !subscription.alert_settings.auto_renewal || !subscription.auto_renew {
            return 0;
        }
        if alerts.has_alert_for(subscription.id, AlertType::AutoRenewal) {
            return 0;
        }
        let until_renewal = subscription.next_payment_date - Utc::now();
        if until_renewal > Duration::days(self.config.renewal_window_days) {
            return 0;
        }

        let spec = NewAlert::new(
            AlertType::AutoRenewal,
            format!("Auto-renewal reminder: {}", subscription.service_name),
            format!(
                "{} renews automatically on {}. Cancel before then if you no longer need it.",
                subscription.service_name,
                subscription.next_payment_date.format("%Y-%m-%d")
            ),
        )
        .severity(AlertSeverity::Low)
        .subscription(subscription.id);
        alerts.insert(spec);
        1
    }
}
