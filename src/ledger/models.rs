use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppResult, PayoutError};

/// Currencies the treasury can disburse. Each currency is drained as its own treasury.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[serde(alias = "gtt")]
    Gtt,
    #[serde(alias = "eth")]
    Eth,
    #[serde(alias = "matic")]
    Matic,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Gtt => "GTT",
            Currency::Eth => "ETH",
            Currency::Matic => "MATIC",
        }
    }

    /// Return all supported currencies
    pub fn all() -> Vec<Currency> {
        vec![Currency::Gtt, Currency::Eth, Currency::Matic]
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::Gtt
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Currency {
    type Err = PayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GTT" => Ok(Currency::Gtt),
            "ETH" => Ok(Currency::Eth),
            "MATIC" => Ok(Currency::Matic),
            other => Err(PayoutError::Validation(vec![format!(
                "Unsupported currency: {}",
                other
            )])),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutType {
    ValidatorReward,
    CreatorRoyalty,
    ReferralBonus,
    DaoDistribution,
    EmergencyPayout,
}

/// Request priority. Declaration order is the urgency order: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// Payout request status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    /// Valid transitions:
    /// - Pending → Approved, Cancelled
    /// - Approved → Processing
    /// - Processing → Completed, Failed
    /// - Failed → Approved (operator retry, bounded by the attempts cap)
    /// - Completed, Cancelled → NO TRANSITIONS ALLOWED
    pub fn can_transition_to(&self, to: RequestStatus) -> bool {
        matches!(
            (self, to),
            (RequestStatus::Pending, RequestStatus::Approved)
                | (RequestStatus::Pending, RequestStatus::Cancelled)
                | (RequestStatus::Approved, RequestStatus::Processing)
                | (RequestStatus::Processing, RequestStatus::Completed)
                | (RequestStatus::Processing, RequestStatus::Failed)
                | (RequestStatus::Failed, RequestStatus::Approved)
        )
    }

    pub fn ensure_transition(&self, to: RequestStatus) -> AppResult<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(PayoutError::InvalidState {
                current: self.to_string(),
                expected: format!("a status that can move to {}", to),
            }
            .into())
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = PayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "processing" => Ok(RequestStatus::Processing),
            "completed" => Ok(RequestStatus::Completed),
            "failed" => Ok(RequestStatus::Failed),
            "cancelled" => Ok(RequestStatus::Cancelled),
            other => Err(PayoutError::Validation(vec![format!(
                "Unknown request status: {}",
                other
            )])),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchType {
    Daily,
    Weekly,
    Monthly,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Created,
    Approved,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Created => "created",
            BatchStatus::Approved => "approved",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    /// Open batches still hold treasury funds that have not been disbursed.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            BatchStatus::Created | BatchStatus::Approved | BatchStatus::Processing
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One authorization vote. The signature is carried opaquely and never verified here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub approver: String,
    pub approved_at: DateTime<Utc>,
    #[serde(default, with = "signature_base64", skip_serializing_if = "Option::is_none")]
    pub signature: Option<Vec<u8>>,
}

mod signature_base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => {
                serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| {
                base64::engine::general_purpose::STANDARD
                    .decode(s)
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capsule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_estimate: Option<Decimal>,
}

/// Payout request entity - a single proposed transfer out of the treasury
///
/// INVARIANTS:
/// - amount > 0 and never above the configured per-request ceiling
/// - at most one approval per approver
/// - never deleted, only terminalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub id: Uuid,
    pub payout_type: PayoutType,
    pub recipient: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub priority: Priority,
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub status: RequestStatus,
    pub metadata: RequestMetadata,
    pub approvals: Vec<Approval>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub tx_ref: Option<String>,
}

impl PayoutRequest {
    /// Move to `to`; lifecycle violations are refused with `InvalidState`
    pub fn transition_to(&mut self, to: RequestStatus) -> AppResult<()> {
        self.status.ensure_transition(to)?;
        self.status = to;
        Ok(())
    }

    pub fn approval_count(&self) -> u32 {
        self.approvals.len() as u32
    }

    pub fn has_approval_from(&self, approver: &str) -> bool {
        self.approvals.iter().any(|a| a.approver == approver)
    }

    /// Requests scheduled for the future are not drained before their time.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for.map_or(true, |at| at <= now)
    }
}

/// Caller-supplied data for a new payout request
#[derive(Debug, Clone, Deserialize)]
pub struct NewPayoutRequest {
    pub payout_type: PayoutType,
    pub recipient: String,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default)]
    pub priority: Option<Priority>,
    pub requested_by: String,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<RequestMetadata>,
}

/// Payout batch entity - an atomically executed group of approved requests
///
/// INVARIANTS:
/// - every member shares `currency`
/// - `integrity_hash` is derived from the sorted member ids and `total_amount`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutBatch {
    pub id: Uuid,
    pub batch_type: BatchType,
    pub total_amount: Decimal,
    pub currency: Currency,
    pub request_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
    pub status: BatchStatus,
    pub integrity_hash: String,
    pub approvals: Vec<Approval>,
    pub required_approvals: u32,
    pub tx_ref: Option<String>,
    pub cost_estimate: Option<Decimal>,
    pub last_error: Option<String>,
    pub executed_by: Option<String>,
    /// When the batch was handed to the ledger; staleness is measured from here
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PayoutBatch {
    pub fn has_approval_from(&self, approver: &str) -> bool {
        self.approvals.iter().any(|a| a.approver == approver)
    }

    /// Processing since before `cutoff`. Batches from before `started_at` was
    /// recorded fall back to `created_at`.
    pub fn processing_since_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == BatchStatus::Processing && self.started_at.unwrap_or(self.created_at) < cutoff
    }
}

/// Result of recording one approval vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApprovalOutcome {
    /// True only on the call that crossed the quorum threshold
    pub approved: bool,
    pub required: u32,
    pub current: u32,
}

/// EVM-style recipient address: `0x` followed by 40 hex digits.
pub fn is_valid_address(address: &str) -> bool {
    match address.strip_prefix("0x") {
        Some(body) => body.len() == 40 && body.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}
