//! Token authentication for the API routes.

use crate::{AppState, errors::AppError, models::user::User, services::access_log_service::RequestMeta};
use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{
        HeaderMap,
        header::{AUTHORIZATION, COOKIE, USER_AGENT},
        request::Parts,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tracing::error;

const SESSION_COOKIE: &str = "session";

/// Pulls the token from `Authorization: Bearer|Token <t>` or the session cookie.
fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| {
            h.strip_prefix("Bearer ")
                .or_else(|| h.strip_prefix("bearer "))
                .or_else(|| h.strip_prefix("Token "))
        })
        .map(str::trim);
    if let Some(token) = from_header.filter(|t| !t.is_empty()) {
        return Some(token);
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value)
}

/// Resolves the caller and stores the [`User`] in request extensions.
pub async fn auth_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let Some(token) = extract_token(request.headers()).map(str::to_owned) else {
        return AppError::unauthenticated().into_response();
    };

    match state.users.find_by_token(&token).await {
        Ok(Some(user)) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Ok(None) => AppError::unauthenticated().into_response(),
        Err(err) => {
            error!("token lookup failed: {err}");
            AppError::internal().into_response()
        }
    }
}

/// The authenticated actor, placed by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<User>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(AppError::unauthenticated)
    }
}

/// Caller IP and user agent for the access log.
#[derive(Debug, Clone)]
pub struct ClientMeta(pub RequestMeta);

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_owned);
        let ip_address = forwarded.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(ClientMeta(RequestMeta {
            ip_address,
            user_agent,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn accepts_bearer_token_and_cookie() {
        assert_eq!(extract_token(&headers(&[("authorization", "Bearer abc")])), Some("abc"));
        assert_eq!(extract_token(&headers(&[("authorization", "Token abc")])), Some("abc"));
        assert_eq!(
            extract_token(&headers(&[("cookie", "theme=dark; session=xyz")])),
            Some("xyz")
        );
        assert_eq!(extract_token(&headers(&[("authorization", "Basic Zm9v")])), None);
        assert_eq!(extract_token(&headers(&[("cookie", "session=")])), None);
    }

    #[tokio::test]
    async fn first_forwarded_address_wins() {
        let request = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("user-agent", "curl/8.0")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();
        let ClientMeta(meta) = ClientMeta::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(meta.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(meta.user_agent, "curl/8.0");
    }
}
