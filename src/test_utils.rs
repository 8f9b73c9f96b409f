use std::sync::OnceLock;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::ledger::models::*;
use crate::queue::approval::QuorumPolicy;
use crate::queue::batch::integrity_hash;
use crate::queue::clock::MonotonicClock;

pub(crate) const RECIPIENT: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

/// Shared clock so fixtures built back to back have distinct, ordered `created_at`
fn clock() -> &'static MonotonicClock {
    static CLOCK: OnceLock<MonotonicClock> = OnceLock::new();
    CLOCK.get_or_init(MonotonicClock::new)
}

pub(crate) fn new_request(amount: Decimal) -> NewPayoutRequest {
    NewPayoutRequest {
        payout_type: PayoutType::ValidatorReward,
        recipient: RECIPIENT.to_string(),
        amount,
        currency: None,
        priority: None,
        requested_by: "treasury-bot".to_string(),
        scheduled_for: None,
        metadata: None,
    }
}

pub(crate) fn sample_request(amount: Decimal, priority: Priority) -> PayoutRequest {
    PayoutRequest {
        id: Uuid::new_v4(),
        payout_type: PayoutType::ValidatorReward,
        recipient: RECIPIENT.to_string(),
        amount,
        currency: Currency::Gtt,
        priority,
        requested_by: "treasury-bot".to_string(),
        created_at: clock().now(),
        scheduled_for: None,
        status: RequestStatus::Pending,
        metadata: RequestMetadata::default(),
        approvals: Vec::new(),
        attempts: 0,
        last_error: None,
        completed_at: None,
        tx_ref: None,
    }
}

/// Approved request carrying exactly the approvals the default policy requires
pub(crate) fn approved_request(amount: Decimal, priority: Priority) -> PayoutRequest {
    let mut request = sample_request(amount, priority);
    let required = QuorumPolicy::default().for_request(&request);
    request.approvals = (0..required)
        .map(|i| Approval {
            approver: format!("approver-{}", i),
            approved_at: request.created_at,
            signature: None,
        })
        .collect();
    request.status = RequestStatus::Approved;
    request
}

pub(crate) fn sample_batch(members: &[PayoutRequest]) -> PayoutBatch {
    let request_ids: Vec<Uuid> = members.iter().map(|m| m.id).collect();
    let total_amount: Decimal = members.iter().map(|m| m.amount).sum();
    let now = Utc::now();

    PayoutBatch {
        id: Uuid::new_v4(),
        batch_type: BatchType::Daily,
        integrity_hash: integrity_hash(&request_ids, total_amount),
        total_amount,
        currency: members.first().map(|m| m.currency).unwrap_or_default(),
        request_ids,
        created_at: now,
        scheduled_for: now + Duration::minutes(5),
        status: BatchStatus::Created,
        approvals: Vec::new(),
        required_approvals: QuorumPolicy::default().for_batch(members),
        tx_ref: None,
        cost_estimate: None,
        last_error: None,
        executed_by: None,
        started_at: None,
        completed_at: None,
    }
}
