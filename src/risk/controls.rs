use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::warn;

use crate::ledger::models::*;

/// Disbursement cap applied when a currency has no explicit entry
pub const DEFAULT_DAILY_CAP: Decimal = dec!(10_000);

/// Rolling window over which the daily cap applies
pub fn cap_window() -> Duration {
    Duration::hours(24)
}

/// Daily cap controller - bounds total disbursement per currency over a rolling 24h window
#[derive(Debug, Clone)]
pub struct DailyCapController {
    caps: HashMap<Currency, Decimal>,
}

impl DailyCapController {
    pub fn new(caps: HashMap<Currency, Decimal>) -> Self {
        Self { caps }
    }

    pub fn cap_for(&self, currency: Currency) -> Decimal {
        self.caps
            .get(&currency)
            .copied()
            .unwrap_or(DEFAULT_DAILY_CAP)
    }

    /// Sum of completed payouts in `currency` within the window ending at `now`
    pub fn disbursed_in_window(
        requests: &[PayoutRequest],
        currency: Currency,
        now: DateTime<Utc>,
    ) -> Decimal {
        let since = now - cap_window();
        requests
            .iter()
            .filter(|r| r.currency == currency && r.status == RequestStatus::Completed)
            .filter(|r| r.completed_at.map_or(false, |at| at > since))
            .map(|r| r.amount)
            .sum()
    }

    /// Amount still available under the cap.
    ///
    /// `committed` is money already locked into open batches that has not been
    /// disbursed yet. Never negative.
    pub fn available_today(
        &self,
        currency: Currency,
        requests: &[PayoutRequest],
        committed: Decimal,
        now: DateTime<Utc>,
    ) -> Decimal {
        let cap = self.cap_for(currency);
        let disbursed = Self::disbursed_in_window(requests, currency, now);
        let available = cap - disbursed - committed;

        if available <= Decimal::ZERO {
            warn!(
                "Daily cap exhausted for {}: disbursed {} + committed {} >= cap {}",
                currency, disbursed, committed, cap
            );
            return Decimal::ZERO;
        }

        available
    }
}

impl Default for DailyCapController {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}
