//! Domain enums and event payloads shared by the billing and alert crates.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PocketError, PocketResult};

/// Recurrence unit governing when a subscription is next due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }

    /// Parse a user-supplied cycle label. Unknown labels are a validation
    /// failure, not a panic — the UI forwards free-form strings here.
    pub fn parse(s: &str) -> PocketResult<Self> {
        match s {
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" => Ok(Self::Yearly),
            other => Err(PocketError::Validation(format!(
                "unknown billing cycle '{other}' (expected weekly, monthly, quarterly, or yearly)"
            ))),
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity. `Ord` is load-bearing: triage ordering sorts on it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

/// Category of a triaged alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    FailedPayment,
    UpcomingPayment,
    SpendingThreshold,
    PaymentSuccess,
    AutoRenewal,
    FraudDetected,
    SecurityAlert,
    VelocityAlert,
    DisputeUpdate,
    TransactionLimit,
}

/// Discriminant for [`BillingEvent`], used by sinks that count by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEventKind {
    PaymentFailed,
    RetryRescheduled,
    RetriesExhausted,
    PaymentSucceeded,
}

/// Event emitted by the billing engines and consumed by the alert triage
/// engine (and any other registered sink).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BillingEvent {
    /// A due payment did not clear; a failed-payment record was opened.
    PaymentFailed {
        subscription_id: Uuid,
        failed_payment_id: Uuid,
        service_name: String,
        amount: Decimal,
        currency: String,
        reason: String,
        next_retry_at: DateTime<Utc>,
    },
    /// A retry attempt failed and the next attempt was scheduled.
    RetryRescheduled {
        subscription_id: Uuid,
        failed_payment_id: Uuid,
        service_name: String,
        retry_count: u32,
        max_retries: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// All retry attempts were consumed; the subscription was paused.
    RetriesExhausted {
        subscription_id: Uuid,
        failed_payment_id: Uuid,
        service_name: String,
        amount: Decimal,
        currency: String,
        retry_count: u32,
    },
    /// A payment (initial or retried) cleared.
    PaymentSucceeded {
        subscription_id: Uuid,
        service_name: String,
        amount: Decimal,
        currency: String,
    },
}

impl BillingEvent {
    pub fn kind(&self) -> BillingEventKind {
        match self {
            Self::PaymentFailed { .. } => BillingEventKind::PaymentFailed,
            Self::RetryRescheduled { .. } => BillingEventKind::RetryRescheduled,
            Self::RetriesExhausted { .. } => BillingEventKind::RetriesExhausted,
            Self::PaymentSucceeded { .. } => BillingEventKind::PaymentSucceeded,
        }
    }

    /// The subscription this event concerns.
    pub fn subscription_id(&self) -> Uuid {
        match self {
            Self::PaymentFailed { subscription_id, .. }
            | Self::RetryRescheduled { subscription_id, .. }
            | Self::RetriesExhausted { subscription_id, .. }
            | Self::PaymentSucceeded { subscription_id, .. } => *subscription_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_parse_roundtrip() {
        for cycle in [
            BillingCycle::Weekly,
            BillingCycle::Monthly,
            BillingCycle::Quarterly,
            BillingCycle::Yearly,
        ] {
            assert_eq!(BillingCycle::parse(cycle.as_str()).unwrap(), cycle);
        }
    }

    #[test]
    fn test_cycle_parse_unknown() {
        let err = BillingCycle::parse("fortnightly").unwrap_err();
        assert!(matches!(err, PocketError::Validation(_)));
        assert!(err.to_string().contains("fortnightly"));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::High > AlertSeverity::Medium);
        assert!(AlertSeverity::Medium > AlertSeverity::Low);
    }
}
