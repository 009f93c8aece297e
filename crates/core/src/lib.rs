//! Shared kernel for the PocketPay billing and alert engines — error
//! taxonomy, configuration, domain enums, and the billing event bus.

pub mod config;
pub mod error;
pub mod event_bus;
pub mod types;

pub use config::AppConfig;
pub use error::{PocketError, PocketResult};
