//! Alert triage for PocketPay — generation, severity ranking, read/snooze/
//! dismiss handling, portfolio analytics, and the spending/upcoming-payment
//! monitor that feeds the notification surface.

pub mod monitor;
pub mod triage;

pub use monitor::SpendingThresholdMonitor;
pub use triage::{Alert, AlertAnalytics, AlertTriageEngine, NewAlert};
