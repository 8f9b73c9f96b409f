// Drain Scheduler - runs drain passes and reconciliation in the background
//
// - One drain pass per configured currency on every tick
// - A busy treasury (operator-triggered drain in progress) is skipped, not waited on
// - Reconciliation runs on its own, slower interval

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::DrainConfig;
use crate::error::{AppError, PayoutError};
use crate::ledger::models::Currency;
use crate::queue::manager::PayoutQueueManager;

/// Drain scheduler - coordinates periodic drain passes and reconciliation
pub struct DrainScheduler {
    config: DrainConfig,
    manager: Arc<PayoutQueueManager>,
}

impl DrainScheduler {
    pub fn new(config: DrainConfig, manager: Arc<PayoutQueueManager>) -> Self {
        Self { config, manager }
    }

    /// Start both loops (runs in background)
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let currencies =
            Self::currencies_to_drain(&self.config.currencies, &self.manager.ledger_currencies());
        if currencies.len() < self.config.currencies.len() {
            warn!(
                "No ledger client for some configured currencies; draining only {:?}",
                currencies
            );
        }

        let drain = {
            let manager = self.manager.clone();
            let period = Duration::from_secs(self.config.interval_secs.max(1));
            tokio::spawn(async move { Self::run_drain_loop(manager, currencies, period).await })
        };

        let reconcile = {
            let manager = self.manager.clone();
            let period = Duration::from_secs(self.config.reconcile_interval_secs.max(1));
            tokio::spawn(async move { Self::run_reconcile_loop(manager, period).await })
        };

        vec![drain, reconcile]
    }

    async fn run_drain_loop(manager: Arc<PayoutQueueManager>, currencies: Vec<Currency>, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            info!("🔄 Starting drain cycle for {:?}", currencies);
            Self::drain_once(&manager, &currencies).await;
        }
    }

    /// One pass over every currency; failures are logged and never stop the loop
    pub async fn drain_once(manager: &PayoutQueueManager, currencies: &[Currency]) {
        for currency in currencies {
            match manager.run_drain_cycle(*currency, None).await {
                Ok(report) => {
                    info!(
                        "✓ {} drain: {} selected, {} deferred, {} batches",
                        currency,
                        report.plan.selected.len(),
                        report.plan.deferred.len(),
                        report.batches.len()
                    );
                }
                Err(AppError::Payout(PayoutError::QueueBusy(_))) => {
                    debug!("{} treasury busy, skipping this tick", currency);
                }
                Err(e) => {
                    error!("❌ {} drain failed: {:?}", currency, e);
                }
            }
        }
    }

    async fn run_reconcile_loop(manager: Arc<PayoutQueueManager>, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = manager.reconcile().await {
                error!("❌ Reconciliation failed: {:?}", e);
            }
        }
    }

    /// Configured currencies that actually have a ledger client, in configured order
    fn currencies_to_drain(configured: &[Currency], registered: &[Currency]) -> Vec<Currency> {
        let mut out = Vec::new();
        for currency in configured {
            if registered.contains(currency) && !out.contains(currency) {
                out.push(*currency);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::execution::router::LedgerRouter;
    use crate::execution::simulated::SimulatedLedgerClient;
    use crate::ledger::models::RequestStatus;
    use crate::ledger::repository::InMemoryPayoutStore;
    use crate::test_utils::new_request;
    use rust_decimal_macros::dec;

    #[test]
    fn test_currencies_to_drain() {
        let picked = DrainScheduler::currencies_to_drain(
            &[Currency::Eth, Currency::Gtt, Currency::Eth, Currency::Matic],
            &[Currency::Gtt, Currency::Eth],
        );
        assert_eq!(picked, vec![Currency::Eth, Currency::Gtt]);
    }

    #[tokio::test]
    async fn test_drain_once_batches_approved_requests_and_skips_busy() {
        let mut router = LedgerRouter::new();
        router.register_client(
            Currency::Gtt,
            Arc::new(SimulatedLedgerClient::with_balance(Currency::Gtt, dec!(500))),
        );
        let manager = Arc::new(PayoutQueueManager::new(
            Arc::new(InMemoryPayoutStore::new()),
            Arc::new(router),
            &QueueConfig::default(),
            std::time::Duration::from_secs(5),
        ));

        let request = manager.create_request(new_request(dec!(25))).await.unwrap();
        manager.approve_request(request.id, "alice", None).await.unwrap();

        let lease = manager.lock_treasury(Currency::Gtt).await.unwrap();
        DrainScheduler::drain_once(&manager, &[Currency::Gtt]).await;
        assert_eq!(
            manager.get_request(request.id).await.unwrap().status,
            RequestStatus::Approved
        );
        drop(lease);

        DrainScheduler::drain_once(&manager, &[Currency::Gtt]).await;
        let drained = manager.get_request(request.id).await.unwrap();
        assert_eq!(drained.status, RequestStatus::Processing);
        assert!(drained.metadata.batch_id.is_some());
    }
}
