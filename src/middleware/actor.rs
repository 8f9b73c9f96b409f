use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;

/// Header carrying the caller identity, set by the gateway in front of this service
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Opaque identity of the caller. Requests without one are rejected with 401.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(AppError::Unauthorized)?;

        Ok(Actor(identity.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> Result<Actor, AppError> {
        let (mut parts, _) = req.into_parts();
        Actor::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_actor_header() {
        let req = Request::builder()
            .header(ACTOR_HEADER, "  ops-team ")
            .body(())
            .unwrap();
        assert_eq!(extract(req).await.unwrap(), Actor("ops-team".to_string()));

        let missing = Request::builder().body(()).unwrap();
        assert!(matches!(extract(missing).await, Err(AppError::Unauthorized)));

        let blank = Request::builder().header(ACTOR_HEADER, "   ").body(()).unwrap();
        assert!(matches!(extract(blank).await, Err(AppError::Unauthorized)));
    }
}
