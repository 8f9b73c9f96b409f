use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::clock::MonotonicClock;
use crate::error::{AppError, AppResult, PayoutError};
use crate::ledger::models::*;
use crate::ledger::repository::PayoutStore;

/// Bounded retries when concurrent approvals race on the same request
const MAX_CAS_RETRIES: usize = 16;

/// Required-approval tiers. Defaults: critical or amount > 500 needs 3, amount > 100 needs 2, else 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumPolicy {
    pub high_amount: Decimal,
    pub high_approvals: u32,
    pub medium_amount: Decimal,
    pub medium_approvals: u32,
    pub base_approvals: u32,
}

impl Default for QuorumPolicy {
    fn default() -> Self {
        Self {
            high_amount: dec!(500),
            high_approvals: 3,
            medium_amount: dec!(100),
            medium_approvals: 2,
            base_approvals: 1,
        }
    }
}

impl QuorumPolicy {
    pub fn required(&self, priority: Priority, amount: Decimal) -> u32 {
        if priority == Priority::Critical || amount > self.high_amount {
            return self.high_approvals;
        }

        if amount > self.medium_amount {
            return self.medium_approvals;
        }

        self.base_approvals
    }

    pub fn for_request(&self, request: &PayoutRequest) -> u32 {
        self.required(request.priority, request.amount)
    }

    /// Batch quorum is never lower than the strictest member's
    pub fn for_batch(&self, members: &[PayoutRequest]) -> u32 {
        members
            .iter()
            .map(|m| self.for_request(m))
            .max()
            .unwrap_or(self.base_approvals)
    }

    pub fn is_satisfied(&self, request: &PayoutRequest) -> bool {
        request.approval_count() >= self.for_request(request)
    }
}

/// Approval workflow - records votes and flips requests to Approved at quorum
pub struct ApprovalWorkflow {
    store: Arc<dyn PayoutStore>,
    policy: QuorumPolicy,
    clock: Arc<MonotonicClock>,
}

impl ApprovalWorkflow {
    pub fn new(store: Arc<dyn PayoutStore>, policy: QuorumPolicy, clock: Arc<MonotonicClock>) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &QuorumPolicy {
        &self.policy
    }

    #[instrument(skip(self, signature))]
    pub async fn approve(
        &self,
        id: Uuid,
        approver: &str,
        signature: Option<Vec<u8>>,
    ) -> AppResult<ApprovalOutcome> {
        let approver = approver.trim();
        if approver.is_empty() {
            return Err(PayoutError::Validation(vec!["Approver identity is required".to_string()]).into());
        }

        for _ in 0..MAX_CAS_RETRIES {
            let mut request = self
                .store
                .get_request(id)
                .await?
                .ok_or_else(|| PayoutError::NotFound(format!("Payout request {}", id)))?;

            if request.status != RequestStatus::Pending {
                return Err(PayoutError::InvalidState {
                    current: request.status.to_string(),
                    expected: RequestStatus::Pending.to_string(),
                }
                .into());
            }

            if request.has_approval_from(approver) {
                return Err(PayoutError::DuplicateApproval {
                    approver: approver.to_string(),
                }
                .into());
            }

            request.approvals.push(Approval {
                approver: approver.to_string(),
                approved_at: self.clock.now(),
                signature: signature.clone(),
            });

            let required = self.policy.for_request(&request);
            let current = request.approval_count();
            let approved = current >= required;
            if approved {
                request.transition_to(RequestStatus::Approved)?;
            }

            if self
                .store
                .swap_requests(RequestStatus::Pending, &[request])
                .await?
            {
                if approved {
                    info!("Payout request {} fully approved ({}/{})", id, current, required);
                } else {
                    debug!("Payout request {} approved by {} ({}/{})", id, approver, current, required);
                }
                return Ok(ApprovalOutcome {
                    approved,
                    required,
                    current,
                });
            }

            debug!("Concurrent update on payout request {}, retrying approval", id);
        }

        Err(AppError::Internal(format!(
            "Could not record approval for {} after {} attempts",
            id, MAX_CAS_RETRIES
        )))
    }
}
