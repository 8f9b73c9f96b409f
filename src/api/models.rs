use crate::ledger::models::*;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// ========== REQUEST MODELS ==========

/// Request to queue a new payout. The requester is the calling actor.
#[derive(Debug, Deserialize, Validate)]
pub struct CreatePayoutBody {
    pub payout_type: PayoutType,

    #[validate(length(min = 1, max = 128, message = "recipient must be 1-128 characters"))]
    pub recipient: String,

    pub amount: Decimal,
    pub currency: Option<Currency>,
    pub priority: Option<Priority>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub metadata: Option<RequestMetadata>,
}

impl CreatePayoutBody {
    pub fn into_new_request(self, requested_by: String) -> NewPayoutRequest {
        NewPayoutRequest {
            payout_type: self.payout_type,
            recipient: self.recipient,
            amount: self.amount,
            currency: self.currency,
            priority: self.priority,
            requested_by,
            scheduled_for: self.scheduled_for,
            metadata: self.metadata,
        }
    }
}

/// GET /payouts query string
#[derive(Debug, Deserialize, Validate)]
pub struct ListPayoutsQuery {
    #[serde(default = "default_status")]
    pub status: RequestStatus,

    #[validate(range(min = 1, max = 500, message = "limit must be between 1 and 500"))]
    pub limit: Option<usize>,

    pub offset: Option<usize>,
}

fn default_status() -> RequestStatus {
    RequestStatus::Pending
}

pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Optional body for approve endpoints
#[derive(Debug, Default, Deserialize)]
pub struct ApproveBody {
    /// Base64 encoded approver signature, stored as-is
    pub signature: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DrainBody {
    #[serde(default)]
    pub currency: Currency,
    /// Override the ledger-reported treasury balance for this pass
    pub treasury_balance: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBatchBody {
    #[validate(length(min = 1, message = "at least one request id is required"))]
    pub request_ids: Vec<Uuid>,
    pub batch_type: Option<BatchType>,
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct PayoutListResponse {
    pub status: RequestStatus,
    pub limit: usize,
    pub offset: usize,
    pub requests: Vec<PayoutRequest>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub id: Uuid,
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub ledger_currencies: Vec<Currency>,
    pub timestamp: DateTime<Utc>,
}
