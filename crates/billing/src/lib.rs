//! Recurring billing engine for PocketPay — billing-cycle math, the
//! subscription store and its lifecycle state machine, the failed-payment
//! retry scheduler, and the payment-method directory seam.

pub mod cycle;
pub mod payment_methods;
pub mod retry;
pub mod subscriptions;

pub use payment_methods::{InMemoryPaymentMethodDirectory, PaymentMethod, PaymentMethodDirectory};
pub use retry::{FixedOutcomes, PaymentRetryScheduler, RandomOutcomes, RetryDisposition, RetryOutcomes};
pub use subscriptions::{
    AlertSettings, FailedPayment, NewSubscription, Subscription, SubscriptionStatus,
    SubscriptionStore,
};
