//! Caller identity forwarded by the upstream gateway.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};

use crate::{
    error::AppError,
    state::user::{AuthenticatedUser, UserRole},
};

/// Required caller id.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Optional display name.
pub const USER_NAME_HEADER: &str = "x-user-name";
/// Optional role: `player`, `admin` or `zero_score`.
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Build the caller from the identity headers.
///
/// `x-user-id` is required; the name defaults to the id and the role to
/// `player`.
pub fn user_from_headers(headers: &HeaderMap) -> Result<AuthenticatedUser, AppError> {
    let id = header(headers, USER_ID_HEADER)?
        .ok_or_else(|| AppError::Unauthorized(format!("missing `{USER_ID_HEADER}` header")))?;
    let name = header(headers, USER_NAME_HEADER)?.unwrap_or(id);
    let role = match header(headers, USER_ROLE_HEADER)? {
        Some(raw) => raw.parse::<UserRole>().map_err(AppError::Unauthorized)?,
        None => UserRole::Player,
    };

    Ok(AuthenticatedUser::new(id, name, role))
}

/// Trimmed header value; blank counts as absent.
fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, AppError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|value| Some(value.trim()).filter(|value| !value.is_empty()))
            .map_err(|_| AppError::Unauthorized(format!("header `{name}` is not valid text"))),
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_from_headers(&parts.headers)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn full_identity_is_parsed() {
        let user = user_from_headers(&headers(&[
            (USER_ID_HEADER, "u1"),
            (USER_NAME_HEADER, "Alice"),
            (USER_ROLE_HEADER, "admin"),
        ]))
        .unwrap();
        assert_eq!(user, AuthenticatedUser::new("u1", "Alice", UserRole::Admin));
    }

    #[test]
    fn name_and_role_have_defaults() {
        let user = user_from_headers(&headers(&[(USER_ID_HEADER, "u1")])).unwrap();
        assert_eq!(user.name, "u1");
        assert_eq!(user.role, UserRole::Player);
    }

    #[test]
    fn missing_id_or_unknown_role_is_unauthorized() {
        assert!(matches!(
            user_from_headers(&HeaderMap::new()),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            user_from_headers(&headers(&[(USER_ID_HEADER, "u1"), (USER_ROLE_HEADER, "root")])),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            user_from_headers(&headers(&[(USER_ID_HEADER, "  ")])),
            Err(AppError::Unauthorized(_))
        ));
    }
}
