pub mod actor;
pub mod cors;
pub mod rate_limit;
pub mod validation;

pub use actor::Actor;
pub use cors::create_cors_layer;
pub use rate_limit::{rate_limit_middleware, RateLimitLayer};
pub use validation::{validation_failed, ValidatedJson};
