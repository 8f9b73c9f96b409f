use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::router::{LedgerClient, LedgerReceipt};
use crate::error::LedgerError;
use crate::ledger::models::*;

/// Header carrying the batch integrity hash so the ledger service can deduplicate
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Serialize)]
struct TransferInstruction<'a> {
    request_id: Uuid,
    recipient: &'a str,
    amount: Decimal,
}

#[derive(Debug, Serialize)]
struct SubmitBatchPayload<'a> {
    batch_id: Uuid,
    integrity_hash: &'a str,
    currency: Currency,
    total_amount: Decimal,
    signer: &'a str,
    transfers: Vec<TransferInstruction<'a>>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: Decimal,
}

/// Ledger client for a treasury service reachable over HTTP
///
/// `POST {base_url}/batches` submits a batch, `GET {base_url}/treasury/{currency}`
/// reports the balance.
pub struct HttpLedgerClient {
    client: Client,
    base_url: String,
}

impl HttpLedgerClient {
    /// Every request is cut off after `timeout`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LedgerError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn submit(
        &self,
        batch: &PayoutBatch,
        members: &[PayoutRequest],
        signer: &str,
    ) -> Result<LedgerReceipt, LedgerError> {
        let payload = SubmitBatchPayload {
            batch_id: batch.id,
            integrity_hash: &batch.integrity_hash,
            currency: batch.currency,
            total_amount: batch.total_amount,
            signer,
            transfers: members
                .iter()
                .map(|m| TransferInstruction {
                    request_id: m.id,
                    recipient: &m.recipient,
                    amount: m.amount,
                })
                .collect(),
        };

        debug!("Submitting batch {} to {}", batch.id, self.base_url);

        let response = self
            .client
            .post(format!("{}/batches", self.base_url))
            .header(IDEMPOTENCY_HEADER, &batch.integrity_hash)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Ledger rejected batch {} ({}): {}", batch.id, status, body);
            return Err(LedgerError::Rejected(format!("{}: {}", status, body)));
        }

        let receipt: LedgerReceipt = response.json().await?;
        info!("Ledger accepted batch {}: {}", batch.id, receipt.tx_ref);
        Ok(receipt)
    }

    async fn treasury_balance(&self, currency: Currency) -> Result<Decimal, LedgerError> {
        let response = self
            .client
            .get(format!("{}/treasury/{}", self.base_url, currency))
            .send()
            .await?
            .error_for_status()?;

        let body: BalanceResponse = response.json().await?;
        Ok(body.balance)
    }
}
