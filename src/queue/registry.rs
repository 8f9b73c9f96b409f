use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::clock::MonotonicClock;
use crate::error::{AppResult, PayoutError};
use crate::ledger::models::*;
use crate::ledger::repository::PayoutStore;

/// Request registry - owns the lifecycle of payout requests
pub struct RequestRegistry {
    store: Arc<dyn PayoutStore>,
    clock: Arc<MonotonicClock>,
    max_request_amount: Decimal,
    max_attempts: u32,
}

impl RequestRegistry {
    pub fn new(
        store: Arc<dyn PayoutStore>,
        clock: Arc<MonotonicClock>,
        max_request_amount: Decimal,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            clock,
            max_request_amount,
            max_attempts,
        }
    }

    /// Every rule the request breaks, in a stable order
    pub fn validate(&self, data: &NewPayoutRequest) -> Vec<String> {
        let mut errors = Vec::new();

        if data.amount <= Decimal::ZERO {
            errors.push("Amount must be positive".to_string());
        }

        if data.amount > self.max_request_amount {
            errors.push(format!(
                "Amount exceeds maximum single request limit of {}",
                self.max_request_amount
            ));
        }

        if !is_valid_address(data.recipient.trim()) {
            errors.push("Invalid recipient address".to_string());
        }

        if data.requested_by.trim().is_empty() {
            errors.push("Requester identity is required".to_string());
        }

        errors
    }

    #[instrument(skip(self, data), fields(amount = %data.amount, recipient = %data.recipient))]
    pub async fn create(&self, data: NewPayoutRequest) -> AppResult<PayoutRequest> {
        let errors = self.validate(&data);
        if !errors.is_empty() {
            warn!("Rejected payout request: {}", errors.join(", "));
            return Err(PayoutError::Validation(errors).into());
        }

        let request = PayoutRequest {
            id: Uuid::new_v4(),
            payout_type: data.payout_type,
            recipient: data.recipient.trim().to_string(),
            amount: data.amount,
            currency: data.currency.unwrap_or_default(),
            priority: data.priority.unwrap_or_default(),
            requested_by: data.requested_by.trim().to_string(),
            created_at: self.clock.now(),
            scheduled_for: data.scheduled_for,
            status: RequestStatus::Pending,
            metadata: data.metadata.unwrap_or_default(),
            approvals: Vec::new(),
            attempts: 0,
            last_error: None,
            completed_at: None,
            tx_ref: None,
        };

        self.store.insert_request(&request).await?;

        info!(
            "Payout request created: {} for {} {} to {}",
            request.id, request.amount, request.currency, request.recipient
        );
        Ok(request)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<PayoutRequest> {
        self.store
            .get_request(id)
            .await?
            .ok_or_else(|| PayoutError::NotFound(format!("Payout request {}", id)).into())
    }

    /// Cancel a pending request. Returns false if the id is unknown.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid, actor: &str) -> AppResult<bool> {
        let Some(mut request) = self.store.get_request(id).await? else {
            return Ok(false);
        };

        request.transition_to(RequestStatus::Cancelled)?;
        request.metadata.cancelled_by = Some(actor.to_string());
        request.metadata.reason_code = Some(format!("Cancelled by {}", actor));

        if !self
            .store
            .swap_requests(RequestStatus::Pending, &[request])
            .await?
        {
            // Approved or cancelled by someone else in the meantime
            let current = self.get(id).await?;
            return Err(PayoutError::InvalidState {
                current: current.status.to_string(),
                expected: RequestStatus::Pending.to_string(),
            }
            .into());
        }

        info!("Payout request {} cancelled by {}", id, actor);
        Ok(true)
    }

    /// Newest-first page of requests in `status`
    pub async fn get_by_status(
        &self,
        status: RequestStatus,
        limit: usize,
        offset: usize,
    ) -> AppResult<Vec<PayoutRequest>> {
        let mut requests = self.store.query_requests(Some(status)).await?;
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(requests.into_iter().skip(offset).take(limit).collect())
    }

    /// Put a failed request back in the approved pool so it can join a new batch.
    ///
    /// Approvals are kept. Requests that used up their attempts stay Failed for
    /// manual review.
    #[instrument(skip(self))]
    pub async fn retry(&self, id: Uuid, actor: &str) -> AppResult<PayoutRequest> {
        let mut request = self.get(id).await?;

        if request.status != RequestStatus::Failed {
            return Err(PayoutError::InvalidState {
                current: request.status.to_string(),
                expected: RequestStatus::Failed.to_string(),
            }
            .into());
        }

        if request.attempts >= self.max_attempts {
            warn!(
                "Payout request {} exhausted {} attempts; manual review required",
                id, request.attempts
            );
            return Err(PayoutError::InvalidState {
                current: format!("failed after {} attempts", request.attempts),
                expected: format!("fewer than {} attempts", self.max_attempts),
            }
            .into());
        }

        request.transition_to(RequestStatus::Approved)?;
        request.metadata.batch_id = None;
        request.metadata.reason_code = Some(format!("Requeued by {}", actor));

        if !self
            .store
            .swap_requests(RequestStatus::Failed, &[request.clone()])
            .await?
        {
            return Err(PayoutError::InvalidState {
                current: "changed concurrently".to_string(),
                expected: RequestStatus::Failed.to_string(),
            }
            .into());
        }

        info!(
            "Payout request {} requeued by {} (attempt {} of {})",
            id,
            actor,
            request.attempts + 1,
            self.max_attempts
        );
        Ok(request)
    }
}
