use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::approval::ApprovalWorkflow;
use super::batch::BatchAssembler;
use super::clock::MonotonicClock;
use super::executor::{BatchExecutor, ExecutionOutcome};
use super::registry::RequestRegistry;
use super::scheduler::{DrainPlan, PriorityScheduler};
use super::stats::QueueStats;
use crate::config::QueueConfig;
use crate::error::{AppResult, PayoutError};
use crate::execution::router::LedgerRouter;
use crate::ledger::models::*;
use crate::ledger::repository::{PayoutStore, TreasuryLease};
use crate::risk::controls::DailyCapController;
use crate::settlement::{QueueReconciler, ReconcileReport};

/// Result of one drain cycle on a single treasury
#[derive(Debug, Clone, Serialize)]
pub struct DrainReport {
    pub currency: Currency,
    pub treasury_balance: Decimal,
    pub committed: Decimal,
    pub available_today: Decimal,
    pub plan: DrainPlan,
    pub batches: Vec<PayoutBatch>,
    pub errors: Vec<String>,
}

/// Payout queue manager - the public entry point for every queue operation
///
/// Drain, assembly and execution on a currency hold that currency's treasury
/// lease, which the store shares across every instance using it. Request
/// mutations never do; they rely on status compare-and-swap.
pub struct PayoutQueueManager {
    store: Arc<dyn PayoutStore>,
    ledger: Arc<LedgerRouter>,
    clock: Arc<MonotonicClock>,
    registry: RequestRegistry,
    approvals: ApprovalWorkflow,
    scheduler: PriorityScheduler,
    assembler: BatchAssembler,
    executor: BatchExecutor,
    reconciler: QueueReconciler,
    caps: DailyCapController,
    assemble_on_drain: bool,
    ledger_timeout: Duration,
}

impl PayoutQueueManager {
    pub fn new(
        store: Arc<dyn PayoutStore>,
        ledger: Arc<LedgerRouter>,
        settings: &QueueConfig,
        ledger_timeout: Duration,
    ) -> Self {
        let clock = Arc::new(MonotonicClock::new());
        let policy = settings.quorum.clone();

        Self {
            registry: RequestRegistry::new(
                store.clone(),
                clock.clone(),
                settings.max_request_amount,
                settings.max_attempts,
            ),
            approvals: ApprovalWorkflow::new(store.clone(), policy.clone(), clock.clone()),
            scheduler: PriorityScheduler::new(policy.clone()),
            assembler: BatchAssembler::new(
                store.clone(),
                policy,
                clock.clone(),
                settings.max_batch_size,
                chrono::Duration::seconds(settings.batch_schedule_delay_secs),
            ),
            executor: BatchExecutor::new(store.clone(), ledger.clone(), ledger_timeout, clock.clone()),
            reconciler: QueueReconciler::new(
                store.clone(),
                clock.clone(),
                chrono::Duration::seconds(settings.stale_batch_secs),
            ),
            caps: DailyCapController::new(settings.daily_caps.clone()),
            assemble_on_drain: settings.assemble_on_drain,
            ledger_timeout,
            store,
            ledger,
            clock,
        }
    }

    /// Move the clock past every persisted `created_at` so new requests sort after them
    pub async fn restore_clock(&self) -> AppResult<()> {
        let requests = self.store.query_requests(None).await?;
        if let Some(newest) = requests.iter().map(|r| r.created_at).max() {
            self.clock.observe(newest);
            info!("Restored queue clock to {}", newest);
        }
        Ok(())
    }

    /// Try to take the treasury lease for `currency`; contention fails fast with `QueueBusy`
    pub(crate) async fn lock_treasury(&self, currency: Currency) -> AppResult<TreasuryLease> {
        self.store
            .lease_treasury(currency)
            .await?
            .ok_or_else(|| PayoutError::QueueBusy(currency).into())
    }

    pub async fn create_request(&self, data: NewPayoutRequest) -> AppResult<PayoutRequest> {
        self.registry.create(data).await
    }

    pub async fn cancel_request(&self, id: Uuid, actor: &str) -> AppResult<bool> {
        self.registry.cancel(id, actor).await
    }

    pub async fn approve_request(
        &self,
        id: Uuid,
        approver: &str,
        signature: Option<Vec<u8>>,
    ) -> AppResult<ApprovalOutcome> {
        self.approvals.approve(id, approver, signature).await
    }

    pub async fn retry_request(&self, id: Uuid, actor: &str) -> AppResult<PayoutRequest> {
        self.registry.retry(id, actor).await
    }

    pub async fn get_request(&self, id: Uuid) -> AppResult<PayoutRequest> {
        self.registry.get(id).await
    }

    pub async fn get_requests_by_status(
        &self,
        status: RequestStatus,
        limit: usize,
        offset: usize,
    ) -> AppResult<Vec<PayoutRequest>> {
        self.registry.get_by_status(status, limit, offset).await
    }

    /// Ledger-reported balance, bounded by the ledger timeout
    pub async fn treasury_balance(&self, currency: Currency) -> AppResult<Decimal> {
        match tokio::time::timeout(self.ledger_timeout, self.ledger.treasury_balance(currency)).await {
            Ok(balance) => Ok(balance?),
            Err(_) => {
                error!("Treasury balance for {} timed out after {:?}", currency, self.ledger_timeout);
                Err(PayoutError::Timeout(self.ledger_timeout).into())
            }
        }
    }

    pub fn ledger_currencies(&self) -> Vec<Currency> {
        self.ledger.registered_currencies()
    }

    /// Money locked into open batches that has not left the treasury yet
    async fn committed(&self, currency: Currency) -> AppResult<Decimal> {
        let batches = self.store.query_batches(None).await?;
        Ok(batches
            .iter()
            .filter(|b| b.currency == currency && b.status.is_open())
            .map(|b| b.total_amount)
            .sum())
    }

    /// One drain pass over a treasury.
    ///
    /// Without an explicit balance the ledger is asked for it.
    #[instrument(skip(self))]
    pub async fn run_drain_cycle(
        &self,
        currency: Currency,
        treasury_balance: Option<Decimal>,
    ) -> AppResult<DrainReport> {
        let _lease = self.lock_treasury(currency).await?;

        let treasury_balance = match treasury_balance {
            Some(balance) => balance,
            None => self.treasury_balance(currency).await?,
        };

        let now = self.clock.now();
        let requests = self.store.query_requests(None).await?;
        let committed = self.committed(currency).await?;
        let available_today = self
            .caps
            .available_today(currency, &requests, committed, now);

        let working_balance = (treasury_balance - committed)
            .min(available_today)
            .max(Decimal::ZERO);

        let approved: Vec<PayoutRequest> = requests
            .into_iter()
            .filter(|r| r.currency == currency && r.status == RequestStatus::Approved)
            .collect();

        let plan = self.scheduler.plan(approved, working_balance, now);
        info!(
            "Drain pass for {}: {} selected ({}), {} deferred, working balance {}",
            currency,
            plan.selected.len(),
            plan.total_selected,
            plan.deferred.len(),
            working_balance
        );

        let mut batches = Vec::new();
        let mut errors = Vec::new();
        if self.assemble_on_drain {
            let ids: Vec<Uuid> = plan.selected.iter().map(|r| r.id).collect();
            for chunk in ids.chunks(self.assembler.max_batch_size()) {
                match self.assembler.assemble(chunk, None).await {
                    Ok(batch) => batches.push(batch),
                    Err(e) => {
                        error!("Failed to assemble drained requests into a batch: {}", e);
                        errors.push(e.to_string());
                    }
                }
            }
        }

        Ok(DrainReport {
            currency,
            treasury_balance,
            committed,
            available_today,
            plan,
            batches,
            errors,
        })
    }

    #[instrument(skip(self, request_ids), fields(size = request_ids.len()))]
    pub async fn assemble_batch(
        &self,
        request_ids: &[Uuid],
        batch_type: Option<BatchType>,
    ) -> AppResult<PayoutBatch> {
        let Some(first) = request_ids.first() else {
            return Err(PayoutError::Precondition(
                "Batch must contain at least one request".to_string(),
            )
            .into());
        };

        let currency = self
            .store
            .get_request(*first)
            .await?
            .map(|r| r.currency)
            .ok_or_else(|| PayoutError::Precondition(format!("Unknown request {}", first)))?;

        let _lease = self.lock_treasury(currency).await?;
        self.assembler.assemble(request_ids, batch_type).await
    }

    pub async fn approve_batch(
        &self,
        batch_id: Uuid,
        approver: &str,
        signature: Option<Vec<u8>>,
    ) -> AppResult<ApprovalOutcome> {
        self.assembler.approve(batch_id, approver, signature).await
    }

    pub async fn execute_batch(&self, batch_id: Uuid, signer: &str) -> AppResult<ExecutionOutcome> {
        let batch = self.get_batch(batch_id).await?;
        let lease = self.lock_treasury(batch.currency).await?;
        self.executor.execute(batch_id, signer, Some(lease)).await
    }

    pub async fn get_batch(&self, batch_id: Uuid) -> AppResult<PayoutBatch> {
        self.store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| PayoutError::NotFound(format!("Payout batch {}", batch_id)).into())
    }

    pub async fn get_stats(&self) -> AppResult<QueueStats> {
        let requests = self.store.query_requests(None).await?;
        Ok(QueueStats::compute(&requests, self.clock.now()))
    }

    pub async fn reconcile(&self) -> AppResult<ReconcileReport> {
        self.reconciler.reconcile().await
    }
}
