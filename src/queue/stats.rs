use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::ledger::models::*;

/// Aggregate view of the queue, recomputed from request history on demand
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    pub total_requests: usize,
    pub pending_amount: BTreeMap<Currency, Decimal>,
    pub processed_today: usize,
    pub processing_errors: usize,
    pub average_processing_secs: f64,
    pub by_type: BTreeMap<PayoutType, usize>,
    pub by_priority: BTreeMap<Priority, usize>,
    pub by_status: BTreeMap<RequestStatus, usize>,
    pub daily_volume: BTreeMap<Currency, Decimal>,
    pub weekly_volume: BTreeMap<Currency, Decimal>,
    /// completed / (completed + failed), 0 when nothing has finished yet
    pub success_rate: f64,
}

impl QueueStats {
    pub fn compute(requests: &[PayoutRequest], now: DateTime<Utc>) -> Self {
        let day_ago = now - Duration::hours(24);
        let week_ago = now - Duration::days(7);

        let mut stats = QueueStats {
            total_requests: requests.len(),
            pending_amount: BTreeMap::new(),
            processed_today: 0,
            processing_errors: 0,
            average_processing_secs: 0.0,
            by_type: BTreeMap::new(),
            by_priority: BTreeMap::new(),
            by_status: BTreeMap::new(),
            daily_volume: BTreeMap::new(),
            weekly_volume: BTreeMap::new(),
            success_rate: 0.0,
        };

        let mut completed = 0usize;
        let mut processing_millis = 0i64;

        for request in requests {
            *stats.by_type.entry(request.payout_type).or_default() += 1;
            *stats.by_priority.entry(request.priority).or_default() += 1;
            *stats.by_status.entry(request.status).or_default() += 1;

            match request.status {
                RequestStatus::Pending => {
                    *stats.pending_amount.entry(request.currency).or_default() += request.amount;
                }
                RequestStatus::Failed => stats.processing_errors += 1,
                RequestStatus::Completed => {
                    completed += 1;
                    let Some(done) = request.completed_at else {
                        continue;
                    };
                    processing_millis += (done - request.created_at).num_milliseconds();

                    if done > day_ago {
                        stats.processed_today += 1;
                        *stats.daily_volume.entry(request.currency).or_default() += request.amount;
                    }
                    if done > week_ago {
                        *stats.weekly_volume.entry(request.currency).or_default() += request.amount;
                    }
                }
                _ => {}
            }
        }

        if completed > 0 {
            stats.average_processing_secs = processing_millis as f64 / 1000.0 / completed as f64;
        }

        let finished = completed + stats.processing_errors;
        if finished > 0 {
            stats.success_rate = (Decimal::from(completed) / Decimal::from(finished))
                .to_f64()
                .unwrap_or(0.0);
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_request;
    use rust_decimal_macros::dec;

    #[test]
    fn test_empty_history_is_all_zero() {
        let stats = QueueStats::compute(&[], Utc::now());
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.average_processing_secs, 0.0);
        assert!(stats.pending_amount.is_empty());
        assert!(!stats.success_rate.is_nan());
    }

    #[test]
    fn test_mixed_history() {
        let now = Utc::now();

        let pending = sample_request(dec!(12.5), Priority::Low);
        let mut eth_pending = sample_request(dec!(3), Priority::High);
        eth_pending.currency = Currency::Eth;

        let mut done_today = sample_request(dec!(100), Priority::Medium);
        done_today.status = RequestStatus::Completed;
        done_today.created_at = now - Duration::seconds(90);
        done_today.completed_at = Some(now - Duration::seconds(30));

        let mut done_last_week = sample_request(dec!(40), Priority::Medium);
        done_last_week.payout_type = PayoutType::CreatorRoyalty;
        done_last_week.status = RequestStatus::Completed;
        done_last_week.created_at = now - Duration::days(3) - Duration::seconds(120);
        done_last_week.completed_at = Some(now - Duration::days(3));

        let mut done_long_ago = sample_request(dec!(7), Priority::Medium);
        done_long_ago.status = RequestStatus::Completed;
        done_long_ago.created_at = now - Duration::days(30) - Duration::seconds(30);
        done_long_ago.completed_at = Some(now - Duration::days(30));

        let mut failed = sample_request(dec!(5), Priority::Critical);
        failed.status = RequestStatus::Failed;

        let stats = QueueStats::compute(
            &[pending, eth_pending, done_today, done_last_week, done_long_ago, failed],
            now,
        );

        assert_eq!(stats.total_requests, 6);
        assert_eq!(stats.pending_amount[&Currency::Gtt], dec!(12.5));
        assert_eq!(stats.pending_amount[&Currency::Eth], dec!(3));
        assert_eq!(stats.processed_today, 1);
        assert_eq!(stats.processing_errors, 1);
        assert_eq!(stats.daily_volume[&Currency::Gtt], dec!(100));
        assert_eq!(stats.weekly_volume[&Currency::Gtt], dec!(140));
        assert_eq!(stats.average_processing_secs, 70.0);
        assert_eq!(stats.success_rate, 0.75);
        assert_eq!(stats.by_type[&PayoutType::CreatorRoyalty], 1);
        assert_eq!(stats.by_priority[&Priority::Medium], 3);
        assert_eq!(stats.by_status[&RequestStatus::Completed], 3);
    }
}
