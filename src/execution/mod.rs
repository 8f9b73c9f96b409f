pub mod http;
pub mod router;
pub mod simulated;

pub use http::HttpLedgerClient;
pub use router::{LedgerClient, LedgerReceipt, LedgerRouter};
pub use simulated::{SimulatedLedgerClient, SimulationMode};
