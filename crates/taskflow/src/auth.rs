use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};

use crate::app::AppState;
use crate::error::ApiError;
use taskflow_models::{Identity, SessionUser};

pub const SESSION_COOKIE: &str = "taskflow_session";

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn cookie_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|t| !t.is_empty())
}

// Axum extractor for Identity. Never rejects; unknown sessions are Anonymous.
// Resolves the session token (bearer header first, then cookie) to a user.
#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>() {
            return Ok(identity.clone());
        }

        let Some(token) = bearer_token(parts).or_else(|| cookie_token(parts)) else {
            return Ok(Identity::Anonymous);
        };

        let storage = state.storage.clone();
        let token = token.to_string();
        let resolved = tokio::task::spawn_blocking(move || storage.user_for_session(&token)).await;
        match resolved {
            Ok(Ok(Some(user))) => Ok(Identity::User(user)),
            Ok(Ok(None)) => Ok(Identity::Anonymous),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "session lookup failed");
                Ok(Identity::Anonymous)
            }
            Err(e) => {
                tracing::error!(error = %e, "session lookup task failed");
                Ok(Identity::Anonymous)
            }
        }
    }
}

/// Every task and billing endpoint requires a signed-in user.
pub fn require_user(identity: &Identity) -> Result<&SessionUser, ApiError> {
    identity.user().ok_or(ApiError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn bearer_header_is_read() {
        let p = parts(&[("authorization", "Bearer tf_abc")]);
        assert_eq!(bearer_token(&p), Some("tf_abc"));
        assert_eq!(cookie_token(&p), None);
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let p = parts(&[("cookie", "theme=dark; taskflow_session=tf_xyz; lang=en")]);
        assert_eq!(cookie_token(&p), Some("tf_xyz"));
    }

    #[test]
    fn anonymous_cannot_pass_require_user() {
        assert!(matches!(require_user(&Identity::Anonymous), Err(ApiError::Unauthorized)));
    }
}
