use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{types::Json, PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::models::*;
use super::repository::{PayoutStore, TreasuryLease};
use crate::error::AppResult;

/// Advisory lock namespace shared by every instance on the same database
const TREASURY_LOCK_NAMESPACE: &str = "payout_treasury";

/// Durable payout store backed by Postgres
///
/// Records are stored as JSONB with `status` mirrored into an indexed column.
/// Compare-and-swap writes lock the affected rows with `FOR UPDATE` inside a
/// single transaction. Treasury leases are transaction-scoped advisory locks,
/// so they are released when the lease (and its transaction) is dropped, or
/// when the holding process loses its connection.
pub struct PgPayoutStore {
    pub pool: PgPool,
}

impl PgPayoutStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock the given request rows and check they all sit in `expected`.
    async fn lock_requests_in(
        tx: &mut Transaction<'_, Postgres>,
        expected: RequestStatus,
        ids: &[Uuid],
    ) -> AppResult<bool> {
        if ids.is_empty() {
            return Ok(true);
        }

        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT id, status
            FROM payout_requests
            WHERE id = ANY($1)
            FOR UPDATE
            "#,
        )
        .bind(ids)
        .fetch_all(&mut **tx)
        .await?;

        let distinct: HashSet<&Uuid> = ids.iter().collect();
        Ok(rows.len() == distinct.len()
            && rows.iter().all(|(_, status)| status == expected.as_str()))
    }

    async fn write_requests(
        tx: &mut Transaction<'_, Postgres>,
        requests: &[PayoutRequest],
    ) -> AppResult<()> {
        for request in requests {
            sqlx::query(
                r#"
                UPDATE payout_requests
                SET status = $2, body = $3, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(request.id)
            .bind(request.status.as_str())
            .bind(Json(request))
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PayoutStore for PgPayoutStore {
    async fn insert_request(&self, request: &PayoutRequest) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payout_requests (id, status, currency, created_at, body)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(request.id)
        .bind(request.status.as_str())
        .bind(request.currency.as_str())
        .bind(request.created_at)
        .bind(Json(request))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> AppResult<Option<PayoutRequest>> {
        let row: Option<(Json<PayoutRequest>,)> =
            sqlx::query_as("SELECT body FROM payout_requests WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(Json(request),)| request))
    }

    async fn query_requests(&self, status: Option<RequestStatus>) -> AppResult<Vec<PayoutRequest>> {
        let rows: Vec<(Json<PayoutRequest>,)> = match status {
            Some(status) => {
                sqlx::query_as(
                    "SELECT body FROM payout_requests WHERE status = $1 ORDER BY created_at DESC",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT body FROM payout_requests ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.into_iter().map(|(Json(request),)| request).collect())
    }

    async fn swap_requests(
        &self,
        expected: RequestStatus,
        updated: &[PayoutRequest],
    ) -> AppResult<bool> {
        let ids: Vec<Uuid> = updated.iter().map(|r| r.id).collect();
        let mut tx = self.pool.begin().await?;

        if !Self::lock_requests_in(&mut tx, expected, &ids).await? {
            tx.rollback().await?;
            debug!("Request swap refused: expected all of {:?} in {}", ids, expected);
            return Ok(false);
        }

        Self::write_requests(&mut tx, updated).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn get_batch(&self, id: Uuid) -> AppResult<Option<PayoutBatch>> {
        let row: Option<(Json<PayoutBatch>,)> =
            sqlx::query_as("SELECT body FROM payout_batches WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(Json(batch),)| batch))
    }

    async fn query_batches(&self, status: Option<BatchStatus>) -> AppResult<Vec<PayoutBatch>> {
        let rows: Vec<(Json<PayoutBatch>,)> = match status {
            Some(status) => {
                sqlx::query_as("SELECT body FROM payout_batches WHERE status = $1")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT body FROM payout_batches")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.into_iter().map(|(Json(batch),)| batch).collect())
    }

    async fn commit_batch(
        &self,
        expected_batch: Option<BatchStatus>,
        batch: &PayoutBatch,
        expected_members: RequestStatus,
        members: &[PayoutRequest],
    ) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM payout_batches WHERE id = $1 FOR UPDATE")
                .bind(batch.id)
                .fetch_optional(&mut *tx)
                .await?;

        let batch_matches = match (&current, expected_batch) {
            (None, None) => true,
            (Some((status,)), Some(expected)) => status == expected.as_str(),
            _ => false,
        };

        let ids: Vec<Uuid> = members.iter().map(|m| m.id).collect();
        if !batch_matches || !Self::lock_requests_in(&mut tx, expected_members, &ids).await? {
            tx.rollback().await?;
            debug!("Batch commit refused for {}", batch.id);
            return Ok(false);
        }

        if current.is_none() {
            sqlx::query(
                r#"
                INSERT INTO payout_batches (id, status, currency, created_at, body)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(batch.id)
            .bind(batch.status.as_str())
            .bind(batch.currency.as_str())
            .bind(batch.created_at)
            .bind(Json(batch))
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE payout_batches
                SET status = $2, body = $3, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(batch.id)
            .bind(batch.status.as_str())
            .bind(Json(batch))
            .execute(&mut *tx)
            .await?;
        }

        Self::write_requests(&mut tx, members).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn lease_treasury(&self, currency: Currency) -> AppResult<Option<TreasuryLease>> {
        let mut tx = self.pool.begin().await?;

        let (acquired,): (bool,) = sqlx::query_as(
            "SELECT pg_try_advisory_xact_lock(hashtext($1), hashtext($2))",
        )
        .bind(TREASURY_LOCK_NAMESPACE)
        .bind(currency.as_str())
        .fetch_one(&mut *tx)
        .await?;

        if !acquired {
            tx.rollback().await?;
            debug!("Treasury lease for {} held by another instance", currency);
            return Ok(None);
        }

        Ok(Some(TreasuryLease::new(tx)))
    }
}
