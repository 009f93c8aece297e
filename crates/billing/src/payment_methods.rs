//! Payment-method directory seam. The subscription store validates
//! payment-method ids through [`PaymentMethodDirectory`]; the wallet's real
//! funding-source service sits behind the same trait in production.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// A stored funding source (card, bank account, wallet balance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub method_type: String,
    pub last_four: Option<String>,
    pub expiry: Option<String>,
    pub is_default: bool,
}

/// Resolves a payment-method id to its record, if known.
pub trait PaymentMethodDirectory: Send + Sync {
    fn resolve(&self, id: Uuid) -> Option<PaymentMethod>;
}

/// In-memory directory backed by `DashMap`.
#[derive(Default)]
pub struct InMemoryPaymentMethodDirectory {
    methods: DashMap<Uuid, PaymentMethod>,
}

impl InMemoryPaymentMethodDirectory {
    pub fn new() -> Self {
        Self {
            methods: DashMap::new(),
        }
    }

    /// Register a funding source and return its record.
    pub fn register(
        &self,
        method_type: impl Into<String>,
        last_four: Option<String>,
        expiry: Option<String>,
        is_default: bool,
    ) -> PaymentMethod {
        let method = PaymentMethod {
            id: Uuid::new_v4(),
            method_type: method_type.into(),
            last_four,
            expiry,
            is_default,
        };
        info!(payment_method_id = %method.id, method_type = %method.method_type, "Payment method registered");
        self.methods.insert(method.id, method.clone());
        method
    }

    pub fn list(&self) -> Vec<PaymentMethod> {
        self.methods.iter().map(|e| e.value().clone()).collect()
    }
}

impl PaymentMethodDirectory for InMemoryPaymentMethodDirectory {
    fn resolve(&self, id: Uuid) -> Option<PaymentMethod> {
        self.methods.get(&id).map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let directory = InMemoryPaymentMethodDirectory::new();
        let card = directory.register("card", Some("4242".into()), Some("12/28".into()), true);

        let resolved = directory.resolve(card.id).unwrap();
        assert_eq!(resolved.last_four.as_deref(), Some("4242"));
        assert!(resolved.is_default);

        assert!(directory.resolve(Uuid::new_v4()).is_none());
        assert_eq!(directory.list().len(), 1);
    }
}
