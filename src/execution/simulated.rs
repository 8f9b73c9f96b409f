use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use super::router::{LedgerClient, LedgerReceipt};
use crate::error::LedgerError;
use crate::ledger::models::*;

/// Base gas for a batch transfer plus the per-recipient increment
const BASE_GAS: i64 = 21_000;
const GAS_PER_TRANSFER: i64 = 5_000;
const GAS_PRICE: Decimal = dec!(0.00000002);

/// How the simulated ledger answers the next submissions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationMode {
    Succeed,
    Reject(String),
    /// Never resolves; used to exercise the executor timeout
    Hang,
}

/// In-process ledger that keeps treasury balances in memory.
///
/// Used when no ledger endpoint is configured, and by the test suite.
pub struct SimulatedLedgerClient {
    balances: Mutex<HashMap<Currency, Decimal>>,
    mode: Mutex<SimulationMode>,
    submissions: Mutex<Vec<String>>,
}

impl SimulatedLedgerClient {
    pub fn new(balances: HashMap<Currency, Decimal>) -> Self {
        Self {
            balances: Mutex::new(balances),
            mode: Mutex::new(SimulationMode::Succeed),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_balance(currency: Currency, balance: Decimal) -> Self {
        Self::new(HashMap::from([(currency, balance)]))
    }

    pub fn set_mode(&self, mode: SimulationMode) {
        *self.mode.lock() = mode;
    }

    /// Integrity hashes of every submission that reached the ledger, in order
    pub fn submissions(&self) -> Vec<String> {
        self.submissions.lock().clone()
    }

    pub fn estimate_cost(transfers: usize) -> Decimal {
        Decimal::from(BASE_GAS + GAS_PER_TRANSFER * transfers as i64) * GAS_PRICE
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedgerClient {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn submit(
        &self,
        batch: &PayoutBatch,
        members: &[PayoutRequest],
        _signer: &str,
    ) -> Result<LedgerReceipt, LedgerError> {
        self.submissions.lock().push(batch.integrity_hash.clone());

        let mode = self.mode.lock().clone();
        match mode {
            SimulationMode::Reject(reason) => {
                warn!("Simulated ledger rejecting batch {}: {}", batch.id, reason);
                return Err(LedgerError::Rejected(reason));
            }
            SimulationMode::Hang => {
                warn!("Simulated ledger hanging on batch {}", batch.id);
                std::future::pending::<()>().await;
            }
            SimulationMode::Succeed => {}
        }

        {
            let mut balances = self.balances.lock();
            let available = balances.entry(batch.currency).or_insert(Decimal::ZERO);
            if *available < batch.total_amount {
                return Err(LedgerError::InsufficientTreasury {
                    currency: batch.currency,
                    required: batch.total_amount.to_string(),
                    available: available.to_string(),
                });
            }
            *available -= batch.total_amount;
        }

        let tx_ref = format!("0x{}", hex::encode(rand::random::<[u8; 32]>()));
        info!(
            "Simulated ledger paid {} transfers for batch {}: {}",
            members.len(),
            batch.id,
            tx_ref
        );

        Ok(LedgerReceipt {
            tx_ref,
            cost_estimate: Some(Self::estimate_cost(members.len())),
        })
    }

    async fn treasury_balance(&self, currency: Currency) -> Result<Decimal, LedgerError> {
        Ok(self
            .balances
            .lock()
            .get(&currency)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_batch, sample_request};

    #[tokio::test]
    async fn test_submit_debits_treasury() {
        let client = SimulatedLedgerClient::with_balance(Currency::Gtt, dec!(100));
        let members = vec![
            sample_request(dec!(30), Priority::Low),
            sample_request(dec!(20), Priority::Low),
        ];
        let batch = sample_batch(&members);

        let receipt = client.submit(&batch, &members, "signer").await.unwrap();
        assert!(receipt.tx_ref.starts_with("0x"));
        assert_eq!(receipt.tx_ref.len(), 66);
        assert_eq!(receipt.cost_estimate, Some(dec!(0.00062)));
        assert_eq!(client.treasury_balance(Currency::Gtt).await.unwrap(), dec!(50));
        assert_eq!(client.submissions(), vec![batch.integrity_hash.clone()]);
    }

    #[tokio::test]
    async fn test_submit_rejects_overdraft_and_configured_failures() {
        let client = SimulatedLedgerClient::with_balance(Currency::Gtt, dec!(10));
        let members = vec![sample_request(dec!(30), Priority::Low)];
        let batch = sample_batch(&members);

        assert!(matches!(
            client.submit(&batch, &members, "signer").await,
            Err(LedgerError::InsufficientTreasury { .. })
        ));

        client.set_mode(SimulationMode::Reject("node offline".to_string()));
        assert!(matches!(
            client.submit(&batch, &members, "signer").await,
            Err(LedgerError::Rejected(reason)) if reason == "node offline"
        ));
    }
}
