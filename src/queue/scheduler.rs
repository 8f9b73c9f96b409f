use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::approval::QuorumPolicy;
use crate::ledger::models::*;

/// Why an approved request was left out of this drain pass. The request stays Approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferralReason {
    InsufficientBalance,
    InsufficientApprovals,
    NotYetDue,
}

impl fmt::Display for DeferralReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DeferralReason::InsufficientBalance => "insufficient balance",
            DeferralReason::InsufficientApprovals => "insufficient approvals",
            DeferralReason::NotYetDue => "not yet due",
        };
        write!(f, "{}", reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deferral {
    pub request_id: Uuid,
    pub reason: DeferralReason,
}

/// Outcome of one planning pass
#[derive(Debug, Clone, Serialize)]
pub struct DrainPlan {
    pub selected: Vec<PayoutRequest>,
    pub deferred: Vec<Deferral>,
    pub working_balance: Decimal,
    pub total_selected: Decimal,
    pub remaining_balance: Decimal,
}

/// Drain order: priority descending, then oldest first, then id for a total order.
pub fn drain_order(a: &PayoutRequest, b: &PayoutRequest) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// Priority scheduler - picks which approved requests fit in the available balance
///
/// Planning is pure: it never writes. Quorum is recomputed on every pass.
pub struct PriorityScheduler {
    policy: QuorumPolicy,
}

impl PriorityScheduler {
    pub fn new(policy: QuorumPolicy) -> Self {
        Self { policy }
    }

    pub fn plan(
        &self,
        candidates: Vec<PayoutRequest>,
        working_balance: Decimal,
        now: DateTime<Utc>,
    ) -> DrainPlan {
        let working_balance = working_balance.max(Decimal::ZERO);

        let mut queue: Vec<PayoutRequest> = candidates
            .into_iter()
            .filter(|r| r.status == RequestStatus::Approved)
            .collect();
        queue.sort_by(drain_order);

        let mut remaining = working_balance;
        let mut selected = Vec::new();
        let mut deferred = Vec::new();

        for request in queue {
            if remaining <= Decimal::ZERO {
                info!("Working balance exhausted, stopping drain pass");
                break;
            }

            let reason = if !request.is_due(now) {
                Some(DeferralReason::NotYetDue)
            } else if request.amount > remaining {
                Some(DeferralReason::InsufficientBalance)
            } else if !self.policy.is_satisfied(&request) {
                Some(DeferralReason::InsufficientApprovals)
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    debug!("Deferring payout request {}: {}", request.id, reason);
                    deferred.push(Deferral {
                        request_id: request.id,
                        reason,
                    });
                }
                None => {
                    remaining -= request.amount;
                    selected.push(request);
                }
            }
        }

        DrainPlan {
            total_selected: working_balance - remaining,
            selected,
            deferred,
            working_balance,
            remaining_balance: remaining,
        }
    }
}
