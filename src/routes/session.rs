use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::request::Parts,
};

use crate::{dto::validation::validate_username, error::AppError};

/// Header carrying the acting user; sessions are handled upstream.
pub const USER_HEADER: &str = "x-user-id";

/// Acting user taken from the `X-User-Id` header.
#[derive(Debug, Clone)]
pub struct ActingUser(pub String);

impl ActingUser {
    /// Username of the caller.
    pub fn name(&self) -> &str {
        &self.0
    }
}

fn parse_header(parts: &Parts) -> Result<Option<ActingUser>, AppError> {
    let Some(value) = parts.headers.get(USER_HEADER) else {
        return Ok(None);
    };
    let user = value
        .to_str()
        .map(str::trim)
        .map_err(|_| AppError::Unauthorized("invalid user header `X-User-Id`".into()))?;

    validate_username(user)
        .map_err(|_| AppError::Unauthorized("invalid user header `X-User-Id`".into()))?;

    Ok(Some(ActingUser(user.to_owned())))
}

impl<S> FromRequestParts<S> for ActingUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parse_header(parts)?
            .ok_or_else(|| AppError::Unauthorized("missing user header `X-User-Id`".into()))
    }
}

impl<S> OptionalFromRequestParts<S> for ActingUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        parse_header(parts)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(header: Option<&str>) -> Result<ActingUser, AppError> {
        let mut builder = Request::builder().uri("/competitions");
        if let Some(value) = header {
            builder = builder.header(USER_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        <ActingUser as FromRequestParts<()>>::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn header_becomes_acting_user() {
        let user = extract(Some(" alice ")).await.unwrap();
        assert_eq!(user.name(), "alice");
    }

    #[tokio::test]
    async fn missing_or_blank_header_is_unauthorized() {
        assert!(matches!(extract(None).await, Err(AppError::Unauthorized(_))));
        assert!(matches!(extract(Some("   ")).await, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn optional_extraction_tolerates_absence_only() {
        let (mut parts, _) = Request::builder().body(()).unwrap().into_parts();
        let absent =
            <ActingUser as OptionalFromRequestParts<()>>::from_request_parts(&mut parts, &())
                .await
                .unwrap();
        assert!(absent.is_none());

        let (mut parts, _) = Request::builder()
            .header(USER_HEADER, "two words")
            .body(())
            .unwrap()
            .into_parts();
        let invalid =
            <ActingUser as OptionalFromRequestParts<()>>::from_request_parts(&mut parts, &()).await;
        assert!(invalid.is_err());
    }
}
