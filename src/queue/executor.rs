use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::clock::MonotonicClock;
use crate::error::{AppError, AppResult, PayoutError};
use crate::execution::router::{LedgerClient, LedgerReceipt, LedgerRouter};
use crate::ledger::models::*;
use crate::ledger::repository::{PayoutStore, TreasuryLease};

/// Result of one execution attempt. Ledger failures land here, not in `Err`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub batch_id: Uuid,
    pub success: bool,
    pub tx_ref: Option<String>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub cost_estimate: Option<Decimal>,
    pub error: Option<String>,
}

/// Batch executor - submits approved batches to the ledger and finalizes members
#[derive(Clone)]
pub struct BatchExecutor {
    store: Arc<dyn PayoutStore>,
    ledger: Arc<LedgerRouter>,
    timeout: Duration,
    clock: Arc<MonotonicClock>,
}

impl BatchExecutor {
    pub fn new(
        store: Arc<dyn PayoutStore>,
        ledger: Arc<LedgerRouter>,
        timeout: Duration,
        clock: Arc<MonotonicClock>,
    ) -> Self {
        Self {
            store,
            ledger,
            timeout,
            clock,
        }
    }

    async fn load_members(&self, batch: &PayoutBatch) -> AppResult<Vec<PayoutRequest>> {
        let lookups = batch.request_ids.iter().map(|id| self.store.get_request(*id));
        let found = futures::future::try_join_all(lookups).await?;

        batch
            .request_ids
            .iter()
            .zip(found)
            .map(|(id, request)| {
                request.ok_or_else(|| {
                    AppError::Internal(format!("Batch {} references missing request {}", batch.id, id))
                })
            })
            .collect()
    }

    /// Submit an approved batch exactly once.
    ///
    /// The batch moves Approved → Processing before the ledger is called, so a
    /// second caller sees `InvalidState` instead of submitting again. Submission
    /// and finalization run on their own task: the batch settles even if the
    /// caller is dropped, and `lease` is held until it has.
    #[instrument(skip(self, lease))]
    pub async fn execute(
        &self,
        batch_id: Uuid,
        signer: &str,
        lease: Option<TreasuryLease>,
    ) -> AppResult<ExecutionOutcome> {
        let mut batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| PayoutError::NotFound(format!("Payout batch {}", batch_id)))?;

        if batch.status != BatchStatus::Approved {
            return Err(PayoutError::InvalidState {
                current: batch.status.to_string(),
                expected: BatchStatus::Approved.to_string(),
            }
            .into());
        }

        // Fail before touching state if nothing can settle this currency
        let client = self.ledger.client_for(batch.currency)?;
        let members = self.load_members(&batch).await?;

        batch.status = BatchStatus::Processing;
        batch.executed_by = Some(signer.to_string());
        batch.started_at = Some(self.clock.now());
        if !self
            .store
            .commit_batch(Some(BatchStatus::Approved), &batch, RequestStatus::Processing, &[])
            .await?
        {
            return Err(PayoutError::InvalidState {
                current: "changed concurrently".to_string(),
                expected: BatchStatus::Approved.to_string(),
            }
            .into());
        }

        info!(
            "Submitting batch {} ({} {}, {} transfers) via {}",
            batch.id,
            batch.total_amount,
            batch.currency,
            members.len(),
            client.name()
        );

        let settlement = self.clone();
        let signer = signer.to_string();
        let handle = tokio::spawn(async move {
            let result = settlement.submit(client, &batch, &members, &signer).await;
            let outcome = settlement.finalize(batch, members, result).await;
            drop(lease);
            outcome
        });

        handle
            .await
            .map_err(|e| AppError::Internal(format!("Batch settlement task failed: {}", e)))?
    }

    async fn submit(
        &self,
        client: Arc<dyn LedgerClient>,
        batch: &PayoutBatch,
        members: &[PayoutRequest],
        signer: &str,
    ) -> Result<LedgerReceipt, String> {
        match tokio::time::timeout(self.timeout, client.submit(batch, members, signer)).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(PayoutError::Timeout(self.timeout).to_string()),
        }
    }

    async fn finalize(
        &self,
        mut batch: PayoutBatch,
        members: Vec<PayoutRequest>,
        result: Result<LedgerReceipt, String>,
    ) -> AppResult<ExecutionOutcome> {
        let now = self.clock.now();

        let outcome = match result {
            Ok(receipt) => {
                batch.status = BatchStatus::Completed;
                batch.tx_ref = Some(receipt.tx_ref.clone());
                batch.cost_estimate = receipt.cost_estimate;
                batch.completed_at = Some(now);
                ExecutionOutcome {
                    batch_id: batch.id,
                    success: true,
                    tx_ref: Some(receipt.tx_ref),
                    cost_estimate: receipt.cost_estimate,
                    error: None,
                }
            }
            Err(message) => {
                batch.status = BatchStatus::Failed;
                batch.last_error = Some(message.clone());
                ExecutionOutcome {
                    batch_id: batch.id,
                    success: false,
                    tx_ref: None,
                    cost_estimate: None,
                    error: Some(message),
                }
            }
        };

        let share = outcome
            .cost_estimate
            .filter(|_| !members.is_empty())
            .map(|cost| cost / Decimal::from(members.len()));

        let mut settled = Vec::with_capacity(members.len());
        for mut m in members {
            if outcome.success {
                m.transition_to(RequestStatus::Completed)?;
                m.completed_at = Some(now);
                m.tx_ref = outcome.tx_ref.clone();
                m.metadata.gas_estimate = share;
                m.last_error = None;
            } else {
                m.transition_to(RequestStatus::Failed)?;
                m.attempts += 1;
                m.last_error = outcome.error.clone();
            }
            settled.push(m);
        }

        if !self
            .store
            .commit_batch(Some(BatchStatus::Processing), &batch, RequestStatus::Processing, &settled)
            .await?
        {
            error!(
                "Could not finalize batch {} as {}; already settled by reconciliation",
                batch.id, batch.status
            );
            return Err(AppError::Internal(format!(
                "Batch {} changed while executing",
                batch.id
            )));
        }

        if outcome.success {
            info!(
                "Batch {} completed: {}",
                batch.id,
                outcome.tx_ref.as_deref().unwrap_or_default()
            );
        } else {
            warn!(
                "Batch {} failed: {}",
                batch.id,
                outcome.error.as_deref().unwrap_or_default()
            );
        }

        Ok(outcome)
    }
}
