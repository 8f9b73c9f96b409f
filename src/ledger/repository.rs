use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::models::*;
use crate::error::{AppError, AppResult};

/// Exclusive hold on one currency's treasury, released on drop.
///
/// Every process sharing the store sees the same lease, so drains, assembly and
/// execution on a currency never overlap across instances.
pub struct TreasuryLease {
    _hold: Box<dyn Send>,
}

impl TreasuryLease {
    pub fn new(hold: impl Send + 'static) -> Self {
        Self {
            _hold: Box::new(hold),
        }
    }
}

/// Payout store - THE source of truth for request and batch state
///
/// Status changes go through the compare-and-swap methods only. A swap either
/// writes every record it was given or none of them.
#[async_trait]
pub trait PayoutStore: Send + Sync {
    async fn insert_request(&self, request: &PayoutRequest) -> AppResult<()>;

    async fn get_request(&self, id: Uuid) -> AppResult<Option<PayoutRequest>>;

    /// All requests, or only those in `status`. No ordering is guaranteed.
    async fn query_requests(&self, status: Option<RequestStatus>) -> AppResult<Vec<PayoutRequest>>;

    /// Replace `updated` requests if every stored copy is still in `expected` status.
    /// Returns false (and writes nothing) if any of them moved or does not exist.
    async fn swap_requests(
        &self,
        expected: RequestStatus,
        updated: &[PayoutRequest],
    ) -> AppResult<bool>;

    async fn get_batch(&self, id: Uuid) -> AppResult<Option<PayoutBatch>>;

    async fn query_batches(&self, status: Option<BatchStatus>) -> AppResult<Vec<PayoutBatch>>;

    /// Write a batch together with its member requests in one step.
    ///
    /// `expected_batch` is the status the stored batch must currently have, or `None`
    /// when the batch is being inserted. Every member must currently be in
    /// `expected_members`.
    async fn commit_batch(
        &self,
        expected_batch: Option<BatchStatus>,
        batch: &PayoutBatch,
        expected_members: RequestStatus,
        members: &[PayoutRequest],
    ) -> AppResult<bool>;

    /// Take the treasury lease for `currency` without waiting.
    /// Returns `None` while anyone else holds it.
    async fn lease_treasury(&self, currency: Currency) -> AppResult<Option<TreasuryLease>>;
}

#[derive(Default)]
struct Tables {
    requests: HashMap<Uuid, PayoutRequest>,
    batches: HashMap<Uuid, PayoutBatch>,
}

impl Tables {
    fn members_in(&self, expected: RequestStatus, members: &[PayoutRequest]) -> bool {
        members.iter().all(|m| {
            self.requests
                .get(&m.id)
                .map_or(false, |stored| stored.status == expected)
        })
    }
}

struct HeldTreasury {
    leased: Arc<Mutex<HashSet<Currency>>>,
    currency: Currency,
}

impl Drop for HeldTreasury {
    fn drop(&mut self) {
        self.leased.lock().remove(&self.currency);
    }
}

/// In-process store for single-node deployments and tests
#[derive(Default)]
pub struct InMemoryPayoutStore {
    tables: RwLock<Tables>,
    leased: Arc<Mutex<HashSet<Currency>>>,
}

impl InMemoryPayoutStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayoutStore for InMemoryPayoutStore {
    async fn insert_request(&self, request: &PayoutRequest) -> AppResult<()> {
        let mut tables = self.tables.write();
        if tables.requests.contains_key(&request.id) {
            return Err(AppError::Internal(format!(
                "Payout request {} already exists",
                request.id
            )));
        }
        tables.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> AppResult<Option<PayoutRequest>> {
        Ok(self.tables.read().requests.get(&id).cloned())
    }

    async fn query_requests(&self, status: Option<RequestStatus>) -> AppResult<Vec<PayoutRequest>> {
        let tables = self.tables.read();
        Ok(tables
            .requests
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect())
    }

    async fn swap_requests(
        &self,
        expected: RequestStatus,
        updated: &[PayoutRequest],
    ) -> AppResult<bool> {
        let mut tables = self.tables.write();
        if !tables.members_in(expected, updated) {
            return Ok(false);
        }
        for request in updated {
            tables.requests.insert(request.id, request.clone());
        }
        Ok(true)
    }

    async fn get_batch(&self, id: Uuid) -> AppResult<Option<PayoutBatch>> {
        Ok(self.tables.read().batches.get(&id).cloned())
    }

    async fn query_batches(&self, status: Option<BatchStatus>) -> AppResult<Vec<PayoutBatch>> {
        let tables = self.tables.read();
        Ok(tables
            .batches
            .values()
            .filter(|b| status.map_or(true, |s| b.status == s))
            .cloned()
            .collect())
    }

    async fn commit_batch(
        &self,
        expected_batch: Option<BatchStatus>,
        batch: &PayoutBatch,
        expected_members: RequestStatus,
        members: &[PayoutRequest],
    ) -> AppResult<bool> {
        let mut tables = self.tables.write();

        let current = tables.batches.get(&batch.id).map(|b| b.status);
        if current != expected_batch {
            return Ok(false);
        }
        if !tables.members_in(expected_members, members) {
            return Ok(false);
        }

        tables.batches.insert(batch.id, batch.clone());
        for member in members {
            tables.requests.insert(member.id, member.clone());
        }
        Ok(true)
    }

    async fn lease_treasury(&self, currency: Currency) -> AppResult<Option<TreasuryLease>> {
        if !self.leased.lock().insert(currency) {
            return Ok(None);
        }
        Ok(Some(TreasuryLease::new(HeldTreasury {
            leased: self.leased.clone(),
            currency,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_batch, sample_request};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_swap_requests_is_all_or_nothing() {
        let store = InMemoryPayoutStore::new();
        let a = sample_request(dec!(10), Priority::Low);
        let mut b = sample_request(dec!(20), Priority::Low);
        b.status = RequestStatus::Approved;
        store.insert_request(&a).await.unwrap();
        store.insert_request(&b).await.unwrap();

        let mut a2 = a.clone();
        a2.status = RequestStatus::Cancelled;
        let mut b2 = b.clone();
        b2.status = RequestStatus::Cancelled;

        // b is not Pending, so neither write lands
        let swapped = store
            .swap_requests(RequestStatus::Pending, &[a2.clone(), b2])
            .await
            .unwrap();
        assert!(!swapped);
        let stored = store.get_request(a.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);

        assert!(store
            .swap_requests(RequestStatus::Pending, &[a2])
            .await
            .unwrap());
        let stored = store.get_request(a.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_swap_unknown_request_fails() {
        let store = InMemoryPayoutStore::new();
        let a = sample_request(dec!(10), Priority::Low);
        assert!(!store
            .swap_requests(RequestStatus::Pending, &[a])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_commit_batch_checks_batch_and_members() {
        let store = InMemoryPayoutStore::new();
        let mut member = sample_request(dec!(50), Priority::High);
        member.status = RequestStatus::Approved;
        store.insert_request(&member).await.unwrap();

        let batch = sample_batch(&[member.clone()]);
        let mut processing = member.clone();
        processing.status = RequestStatus::Processing;

        // Inserting over a non-existent batch with the wrong expectation is refused
        assert!(!store
            .commit_batch(
                Some(BatchStatus::Created),
                &batch,
                RequestStatus::Approved,
                &[processing.clone()]
            )
            .await
            .unwrap());

        assert!(store
            .commit_batch(None, &batch, RequestStatus::Approved, &[processing])
            .await
            .unwrap());
        assert_eq!(
            store.query_batches(Some(BatchStatus::Created)).await.unwrap().len(),
            1
        );
        assert_eq!(
            store
                .query_requests(Some(RequestStatus::Processing))
                .await
                .unwrap()
                .len(),
            1
        );

        // A second insert of the same batch is refused
        assert!(!store
            .commit_batch(None, &batch, RequestStatus::Processing, &[])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = InMemoryPayoutStore::new();
        let a = sample_request(dec!(10), Priority::Low);
        store.insert_request(&a).await.unwrap();
        assert!(store.insert_request(&a).await.is_err());
    }

    #[tokio::test]
    async fn test_treasury_lease_is_exclusive_per_currency() {
        let store = InMemoryPayoutStore::new();

        let lease = store.lease_treasury(Currency::Gtt).await.unwrap();
        assert!(lease.is_some());
        assert!(store.lease_treasury(Currency::Gtt).await.unwrap().is_none());
        assert!(store.lease_treasury(Currency::Eth).await.unwrap().is_some());

        drop(lease);
        assert!(store.lease_treasury(Currency::Gtt).await.unwrap().is_some());
    }
}
