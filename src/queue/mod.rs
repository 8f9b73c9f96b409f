// Payout queue core: request lifecycle, approvals, scheduling, batching and execution
pub mod approval;
pub mod batch;
pub mod clock;
pub mod executor;
pub mod manager;
pub mod registry;
pub mod scheduler;
pub mod stats;

pub use approval::{ApprovalWorkflow, QuorumPolicy};
pub use executor::ExecutionOutcome;
pub use manager::{DrainReport, PayoutQueueManager};
pub use scheduler::{DeferralReason, DrainPlan};
pub use stats::QueueStats;
