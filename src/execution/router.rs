use crate::error::LedgerError;
use crate::ledger::models::*;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// What the ledger hands back for an accepted batch submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub tx_ref: String,
    #[serde(default)]
    pub cost_estimate: Option<Decimal>,
}

/// Ledger client trait - implemented by each ledger that can move treasury funds
///
/// The queue does not assume submissions are idempotent. Double submission is
/// prevented by batch state, and `integrity_hash` is available to clients that
/// want to deduplicate on their side.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transfer every member of `batch` to its recipient in one submission
    async fn submit(
        &self,
        batch: &PayoutBatch,
        members: &[PayoutRequest],
        signer: &str,
    ) -> Result<LedgerReceipt, LedgerError>;

    /// Get current treasury balance
    async fn treasury_balance(&self, currency: Currency) -> Result<Decimal, LedgerError>;
}

/// LedgerRouter - routes batch submissions to the ledger that settles the batch currency
pub struct LedgerRouter {
    clients: HashMap<Currency, Arc<dyn LedgerClient>>,
}

impl LedgerRouter {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Register a ledger client for a currency
    pub fn register_client(&mut self, currency: Currency, client: Arc<dyn LedgerClient>) {
        info!("Registering ledger client {} for {}", client.name(), currency);
        self.clients.insert(currency, client);
    }

    pub fn client_for(&self, currency: Currency) -> Result<Arc<dyn LedgerClient>, LedgerError> {
        self.clients
            .get(&currency)
            .cloned()
            .ok_or(LedgerError::UnsupportedCurrency(currency))
    }

    pub async fn treasury_balance(&self, currency: Currency) -> Result<Decimal, LedgerError> {
        self.client_for(currency)?.treasury_balance(currency).await
    }

    /// Get all registered currencies
    pub fn registered_currencies(&self) -> Vec<Currency> {
        let mut currencies: Vec<Currency> = self.clients.keys().copied().collect();
        currencies.sort();
        currencies
    }
}

impl Default for LedgerRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::simulated::SimulatedLedgerClient;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_unregistered_currency_is_rejected() {
        let mut router = LedgerRouter::new();
        router.register_client(
            Currency::Gtt,
            Arc::new(SimulatedLedgerClient::with_balance(Currency::Gtt, dec!(100))),
        );

        assert!(router.client_for(Currency::Gtt).is_ok());
        assert!(matches!(
            router.treasury_balance(Currency::Eth).await,
            Err(LedgerError::UnsupportedCurrency(Currency::Eth))
        ));
        assert_eq!(router.treasury_balance(Currency::Gtt).await.unwrap(), dec!(100));
        assert_eq!(router.registered_currencies(), vec![Currency::Gtt]);
    }
}
