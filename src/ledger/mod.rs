pub mod models;
pub mod postgres;
pub mod repository;

pub use postgres::PgPayoutStore;
pub use repository::{InMemoryPayoutStore, PayoutStore};
