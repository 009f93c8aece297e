use rust_decimal::Decimal;
use serde::Deserialize;

/// Root engine configuration. Loaded from environment variables with the
/// prefix `POCKETPAY__`; every field has a default so an empty environment
/// yields the reference behavior.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
}

/// Retry scheduling knobs for the payment retry state machine.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Attempts allowed per failed payment before escalation pauses the
    /// subscription.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Probability that a simulated retry clears, in `[0, 1]`.
    #[serde(default = "default_retry_success_rate")]
    pub retry_success_rate: f64,
    /// Base delay for the linear backoff: attempt `k` reschedules
    /// `base * k` hours out; the initial failure schedules `base` hours out.
    #[serde(default = "default_retry_base_delay_hours")]
    pub retry_base_delay_hours: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_success_rate: default_retry_success_rate(),
            retry_base_delay_hours: default_retry_base_delay_hours(),
        }
    }
}

/// Alert generation knobs for triage and the spending monitor.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Snooze duration applied when the caller doesn't specify one.
    #[serde(default = "default_snooze_hours")]
    pub default_snooze_hours: i64,
    /// Upcoming-payment alerts fire within this many days of the due date.
    #[serde(default = "default_upcoming_window_days")]
    pub upcoming_window_days: i64,
    /// Within this many days the upcoming-payment alert is high severity.
    #[serde(default = "default_upcoming_urgent_days")]
    pub upcoming_urgent_days: i64,
    /// Auto-renewal reminders fire within this many days of renewal.
    #[serde(default = "default_renewal_window_days")]
    pub renewal_window_days: i64,
    /// Spending-threshold alerts escalate to high severity once the
    /// monthly-equivalent spend reaches `threshold * multiplier`.
    #[serde(default = "default_threshold_high_multiplier")]
    pub threshold_high_multiplier: Decimal,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            default_snooze_hours: default_snooze_hours(),
            upcoming_window_days: default_upcoming_window_days(),
            upcoming_urgent_days: default_upcoming_urgent_days(),
            renewal_window_days: default_renewal_window_days(),
            threshold_high_multiplier: default_threshold_high_multiplier(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_success_rate() -> f64 {
    0.75
}

fn default_retry_base_delay_hours() -> i64 {
    24
}

fn default_snooze_hours() -> i64 {
    24
}

fn default_upcoming_window_days() -> i64 {
    7
}

fn default_upcoming_urgent_days() -> i64 {
    3
}

fn default_renewal_window_days() -> i64 {
    30
}

fn default_threshold_high_multiplier() -> Decimal {
    Decimal::new(15, 1) // 1.5
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("POCKETPAY")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.billing.max_retries, 3);
        assert_eq!(config.billing.retry_base_delay_hours, 24);
        assert!(config.billing.retry_success_rate > 0.0);
        assert_eq!(config.alerts.default_snooze_hours, 24);
        assert_eq!(config.alerts.upcoming_window_days, 7);
        assert_eq!(config.alerts.upcoming_urgent_days, 3);
        assert_eq!(config.alerts.renewal_window_days, 30);
        assert_eq!(config.alerts.threshold_high_multiplier, dec!(1.5));
    }

    #[test]
    fn test_load_from_empty_env() {
        let config = AppConfig::load().expect("defaults should deserialize");
        assert_eq!(config.billing.max_retries, 3);
    }
}
