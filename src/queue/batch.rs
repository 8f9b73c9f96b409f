use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::approval::QuorumPolicy;
use super::clock::MonotonicClock;
use crate::error::{AppError, AppResult, PayoutError};
use crate::ledger::models::*;
use crate::ledger::repository::PayoutStore;

const MAX_CAS_RETRIES: usize = 16;

/// Hex SHA-256 over the sorted member ids followed by the normalized total.
///
/// Independent of member order, so the same set of requests always hashes the same.
pub fn integrity_hash(request_ids: &[Uuid], total_amount: Decimal) -> String {
    let mut ids: Vec<String> = request_ids.iter().map(|id| id.to_string()).collect();
    ids.sort();

    let mut hasher = Sha256::new();
    for id in &ids {
        hasher.update(id.as_bytes());
    }
    hasher.update(total_amount.normalize().to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn precondition(message: impl Into<String>) -> AppError {
    PayoutError::Precondition(message.into()).into()
}

/// Batch assembler - groups approved requests into an executable batch
pub struct BatchAssembler {
    store: Arc<dyn PayoutStore>,
    policy: QuorumPolicy,
    clock: Arc<MonotonicClock>,
    max_batch_size: usize,
    schedule_delay: Duration,
}

impl BatchAssembler {
    pub fn new(
        store: Arc<dyn PayoutStore>,
        policy: QuorumPolicy,
        clock: Arc<MonotonicClock>,
        max_batch_size: usize,
        schedule_delay: Duration,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
            max_batch_size,
            schedule_delay,
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Load every member, in the order given, checking the batch preconditions
    async fn load_members(&self, request_ids: &[Uuid]) -> AppResult<Vec<PayoutRequest>> {
        if request_ids.is_empty() {
            return Err(precondition("Batch must contain at least one request"));
        }

        if request_ids.len() > self.max_batch_size {
            return Err(precondition(format!(
                "Batch of {} requests exceeds maximum size of {}",
                request_ids.len(),
                self.max_batch_size
            )));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = request_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(precondition(format!("Request {} listed more than once", dup)));
        }

        let lookups = request_ids.iter().map(|id| self.store.get_request(*id));
        let found = futures::future::try_join_all(lookups).await?;

        let mut members = Vec::with_capacity(found.len());
        for (id, request) in request_ids.iter().zip(found) {
            let request = request.ok_or_else(|| precondition(format!("Unknown request {}", id)))?;
            if request.status != RequestStatus::Approved {
                return Err(precondition(format!(
                    "Request {} is {}, only approved requests can be batched",
                    id, request.status
                )));
            }
            members.push(request);
        }

        let currency = members[0].currency;
        if members.iter().any(|m| m.currency != currency) {
            return Err(precondition("Batch members must share one currency"));
        }

        Ok(members)
    }

    /// Create a batch from approved requests and move them to Processing atomically
    #[instrument(skip(self, request_ids), fields(size = request_ids.len()))]
    pub async fn assemble(
        &self,
        request_ids: &[Uuid],
        batch_type: Option<BatchType>,
    ) -> AppResult<PayoutBatch> {
        let mut members = self.load_members(request_ids).await?;

        let batch_type = batch_type.unwrap_or_else(|| {
            let urgent = members.iter().any(|m| {
                m.priority == Priority::Critical || m.payout_type == PayoutType::EmergencyPayout
            });
            if urgent {
                BatchType::Emergency
            } else {
                BatchType::Daily
            }
        });

        let total_amount: Decimal = members.iter().map(|m| m.amount).sum();
        let created_at = self.clock.now();
        let batch = PayoutBatch {
            id: Uuid::new_v4(),
            batch_type,
            total_amount,
            currency: members[0].currency,
            request_ids: request_ids.to_vec(),
            created_at,
            scheduled_for: created_at + self.schedule_delay,
            status: BatchStatus::Created,
            integrity_hash: integrity_hash(request_ids, total_amount),
            approvals: Vec::new(),
            required_approvals: self.policy.for_batch(&members),
            tx_ref: None,
            cost_estimate: None,
            last_error: None,
            executed_by: None,
            started_at: None,
            completed_at: None,
        };

        for m in &mut members {
            m.transition_to(RequestStatus::Processing)?;
            m.metadata.batch_id = Some(batch.id);
        }

        if !self
            .store
            .commit_batch(None, &batch, RequestStatus::Approved, &members)
            .await?
        {
            return Err(precondition(
                "A member request changed while the batch was being assembled",
            ));
        }

        info!(
            "Batch {} created: {} requests, {} {}, {} approvals required",
            batch.id,
            batch.request_ids.len(),
            batch.total_amount,
            batch.currency,
            batch.required_approvals
        );
        Ok(batch)
    }

    /// Record a batch-level approval; Created → Approved at quorum
    #[instrument(skip(self, signature))]
    pub async fn approve(
        &self,
        batch_id: Uuid,
        approver: &str,
        signature: Option<Vec<u8>>,
    ) -> AppResult<ApprovalOutcome> {
        let approver = approver.trim();
        if approver.is_empty() {
            return Err(PayoutError::Validation(vec!["Approver identity is required".to_string()]).into());
        }

        for _ in 0..MAX_CAS_RETRIES {
            let mut batch = self
                .store
                .get_batch(batch_id)
                .await?
                .ok_or_else(|| PayoutError::NotFound(format!("Payout batch {}", batch_id)))?;

            if batch.status != BatchStatus::Created {
                return Err(PayoutError::InvalidState {
                    current: batch.status.to_string(),
                    expected: BatchStatus::Created.to_string(),
                }
                .into());
            }

            if batch.has_approval_from(approver) {
                return Err(PayoutError::DuplicateApproval {
                    approver: approver.to_string(),
                }
                .into());
            }

            batch.approvals.push(Approval {
                approver: approver.to_string(),
                approved_at: self.clock.now(),
                signature: signature.clone(),
            });

            let required = batch.required_approvals;
            let current = batch.approvals.len() as u32;
            let approved = current >= required;
            if approved {
                batch.status = BatchStatus::Approved;
            }

            // Members stay Processing; only the batch row changes
            if self
                .store
                .commit_batch(Some(BatchStatus::Created), &batch, RequestStatus::Processing, &[])
                .await?
            {
                if approved {
                    info!("Batch {} approved for execution ({}/{})", batch_id, current, required);
                }
                return Ok(ApprovalOutcome {
                    approved,
                    required,
                    current,
                });
            }

            debug!("Concurrent update on batch {}, retrying approval", batch_id);
        }

        Err(AppError::Internal(format!(
            "Could not record approval for batch {} after {} attempts",
            batch_id, MAX_CAS_RETRIES
        )))
    }
}
