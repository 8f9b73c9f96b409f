// Reconciliation of requests left behind by interrupted batch execution
pub mod scheduler;

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppResult, PayoutError};
use crate::ledger::models::*;
use crate::ledger::repository::PayoutStore;
use crate::queue::clock::MonotonicClock;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Processing requests moved to the status of their (terminal or missing) batch
    pub repaired: Vec<Uuid>,
    /// Batches processing past the stale threshold, failed together with their members.
    /// Never resubmitted; members can be retried.
    pub stale_batches: Vec<Uuid>,
}

pub struct QueueReconciler {
    store: Arc<dyn PayoutStore>,
    clock: Arc<MonotonicClock>,
    stale_after: Duration,
}

impl QueueReconciler {
    pub fn new(store: Arc<dyn PayoutStore>, clock: Arc<MonotonicClock>, stale_after: Duration) -> Self {
        Self {
            store,
            clock,
            stale_after,
        }
    }

    /// Fail stale Processing batches, then finalize Processing requests whose
    /// batch already finished or no longer exists.
    ///
    /// Requests whose batch is still open are left alone.
    pub async fn reconcile(&self) -> AppResult<ReconcileReport> {
        let now = self.clock.now();
        let mut report = ReconcileReport::default();

        let stale_before = now - self.stale_after;
        for batch in self.store.query_batches(Some(BatchStatus::Processing)).await? {
            if batch.processing_since_before(stale_before) {
                let batch_id = batch.id;
                if let Some(members) = self.fail_stale_batch(batch).await? {
                    report.stale_batches.push(batch_id);
                    report.repaired.extend(members);
                }
            }
        }

        for mut request in self.store.query_requests(Some(RequestStatus::Processing)).await? {
            let batch = match request.metadata.batch_id {
                Some(batch_id) => self.store.get_batch(batch_id).await?,
                None => None,
            };

            match batch {
                Some(batch) if !batch.status.is_terminal() => continue,
                Some(batch) if batch.status == BatchStatus::Completed => {
                    request.transition_to(RequestStatus::Completed)?;
                    request.tx_ref = batch.tx_ref.clone();
                    request.completed_at = batch.completed_at.or(Some(now));
                    request.last_error = None;
                }
                Some(batch) => {
                    request.transition_to(RequestStatus::Failed)?;
                    request.attempts += 1;
                    request.last_error = batch.last_error.clone();
                }
                None => {
                    request.transition_to(RequestStatus::Failed)?;
                    request.attempts += 1;
                    request.last_error = Some("orphaned: batch missing".to_string());
                }
            }

            let id = request.id;
            let status = request.status;
            if self
                .store
                .swap_requests(RequestStatus::Processing, &[request])
                .await?
            {
                warn!("Reconciled orphaned payout request {} to {}", id, status);
                report.repaired.push(id);
            }
        }

        if !report.repaired.is_empty() || !report.stale_batches.is_empty() {
            info!(
                "Reconciliation finished: {} repaired, {} stale batches",
                report.repaired.len(),
                report.stale_batches.len()
            );
        }

        Ok(report)
    }

    /// Fail a batch whose ledger result never arrived, with every member still
    /// Processing in it. Returns the failed member ids, or `None` if the batch
    /// settled first.
    async fn fail_stale_batch(&self, mut batch: PayoutBatch) -> AppResult<Option<Vec<Uuid>>> {
        let message = PayoutError::Timeout(self.stale_after.to_std().unwrap_or_default()).to_string();

        let lookups = batch.request_ids.iter().map(|id| self.store.get_request(*id));
        let mut members = Vec::new();
        for request in futures::future::try_join_all(lookups).await?.into_iter().flatten() {
            if request.status == RequestStatus::Processing && request.metadata.batch_id == Some(batch.id) {
                members.push(request);
            }
        }

        for member in &mut members {
            member.transition_to(RequestStatus::Failed)?;
            member.attempts += 1;
            member.last_error = Some(message.clone());
        }

        let started = batch.started_at.unwrap_or(batch.created_at);
        batch.status = BatchStatus::Failed;
        batch.last_error = Some(message);

        if !self
            .store
            .commit_batch(Some(BatchStatus::Processing), &batch, RequestStatus::Processing, &members)
            .await?
        {
            return Ok(None);
        }

        warn!(
            "Batch {} ({} {}) processing since {} failed as stale; {} members need retry",
            batch.id,
            batch.total_amount,
            batch.currency,
            started,
            members.len()
        );
        Ok(Some(members.into_iter().map(|m| m.id).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::repository::InMemoryPayoutStore;
    use crate::test_utils::{approved_request, sample_batch};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn processing_in(batch_id: Option<Uuid>) -> PayoutRequest {
        let mut request = approved_request(dec!(10), Priority::Low);
        request.status = RequestStatus::Processing;
        request.metadata.batch_id = batch_id;
        request
    }

    #[tokio::test]
    async fn test_orphans_follow_their_batch() {
        let store: Arc<dyn PayoutStore> = Arc::new(InMemoryPayoutStore::new());

        let orphan = processing_in(Some(Uuid::new_v4()));
        let in_completed = processing_in(None);
        let in_open = processing_in(None);

        let mut completed = sample_batch(&[in_completed.clone()]);
        completed.status = BatchStatus::Completed;
        completed.tx_ref = Some("0xabc".to_string());
        let open = sample_batch(&[in_open.clone()]);

        let mut in_completed = in_completed;
        in_completed.metadata.batch_id = Some(completed.id);
        let mut in_open = in_open;
        in_open.metadata.batch_id = Some(open.id);

        for r in [&orphan, &in_completed, &in_open] {
            store.insert_request(r).await.unwrap();
        }
        store
            .commit_batch(None, &completed, RequestStatus::Processing, &[])
            .await
            .unwrap();
        store
            .commit_batch(None, &open, RequestStatus::Processing, &[])
            .await
            .unwrap();

        let reconciler = QueueReconciler::new(
            store.clone(),
            Arc::new(MonotonicClock::new()),
            Duration::hours(1),
        );
        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.repaired.len(), 2);

        let orphan = store.get_request(orphan.id).await.unwrap().unwrap();
        assert_eq!(orphan.status, RequestStatus::Failed);
        assert_eq!(orphan.attempts, 1);
        assert!(orphan.last_error.unwrap().contains("orphaned"));

        let done = store.get_request(in_completed.id).await.unwrap().unwrap();
        assert_eq!(done.status, RequestStatus::Completed);
        assert_eq!(done.tx_ref.as_deref(), Some("0xabc"));

        let untouched = store.get_request(in_open.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, RequestStatus::Processing);
    }

    /// A Processing batch and its members, with execution started `started_ago`
    async fn processing_batch(store: &Arc<dyn PayoutStore>, started_ago: Duration) -> (PayoutBatch, Vec<Uuid>) {
        let members = vec![processing_in(None), processing_in(None)];
        let mut batch = sample_batch(&members);
        batch.status = BatchStatus::Processing;
        batch.started_at = Some(Utc::now() - started_ago);

        for mut member in members {
            member.metadata.batch_id = Some(batch.id);
            store.insert_request(&member).await.unwrap();
        }
        store
            .commit_batch(None, &batch, RequestStatus::Processing, &[])
            .await
            .unwrap();
        let ids = batch.request_ids.clone();
        (batch, ids)
    }

    #[tokio::test]
    async fn test_stale_processing_batch_fails_with_its_members() {
        let store: Arc<dyn PayoutStore> = Arc::new(InMemoryPayoutStore::new());
        let (batch, member_ids) = processing_batch(&store, Duration::hours(3)).await;

        let reconciler = QueueReconciler::new(
            store.clone(),
            Arc::new(MonotonicClock::new()),
            Duration::hours(1),
        );
        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.stale_batches, vec![batch.id]);
        assert_eq!(report.repaired.len(), 2);

        let stored = store.get_batch(batch.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
        assert!(stored.last_error.unwrap().contains("timed out"));

        for id in member_ids {
            let member = store.get_request(id).await.unwrap().unwrap();
            assert_eq!(member.status, RequestStatus::Failed);
            assert_eq!(member.attempts, 1);
            assert!(member.last_error.unwrap().contains("timed out"));
        }

        // Nothing left to repair on the next pass
        assert_eq!(reconciler.reconcile().await.unwrap(), ReconcileReport::default());
    }

    #[tokio::test]
    async fn test_staleness_counts_from_execution_start() {
        let store: Arc<dyn PayoutStore> = Arc::new(InMemoryPayoutStore::new());
        let (mut batch, _) = processing_batch(&store, Duration::minutes(5)).await;

        // Assembled long ago, but only just handed to the ledger
        batch.created_at = batch.created_at - Duration::hours(6);
        store
            .commit_batch(Some(BatchStatus::Processing), &batch, RequestStatus::Processing, &[])
            .await
            .unwrap();

        let reconciler = QueueReconciler::new(
            store.clone(),
            Arc::new(MonotonicClock::new()),
            Duration::hours(1),
        );
        let report = reconciler.reconcile().await.unwrap();
        assert!(report.stale_batches.is_empty());
        assert!(report.repaired.is_empty());
        assert_eq!(
            store.get_batch(batch.id).await.unwrap().unwrap().status,
            BatchStatus::Processing
        );
    }
}
