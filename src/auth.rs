//! Bearer-token authentication gate.
//!
//! Tokens are pre-issued and stored in `sgi_usuarios.token_sesion`; a
//! request is authenticated when its `Authorization: Bearer` credential
//! matches a row exactly. No issuance, expiry or refresh here.

use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use serde::Serialize;

use crate::api::SharedState;
use crate::errors::SgeError;

/// Identity resolved from a valid session token.
#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub id_usuario: i64,
    pub usuario: String,
    pub id_rol: i64,
}

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = SgeError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| SgeError::Unauthorized("Token no enviado".into()))?;

        state
            .db
            .call(move |db| {
                db.find_session(&token)?
                    .ok_or_else(|| SgeError::Unauthorized("Token inválido".into()))
            })
            .await
    }
}

/// Extract a non-empty bearer credential from the Authorization header.
fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with_auth(value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/private/whoami");
        if let Some(v) = value {
            builder = builder.header(header::AUTHORIZATION, v);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[test]
    fn missing_header_yields_none() {
        assert!(bearer_token(&parts_with_auth(None)).is_none());
    }

    #[test]
    fn blank_token_yields_none() {
        assert!(bearer_token(&parts_with_auth(Some("Bearer    "))).is_none());
    }

    #[test]
    fn wrong_scheme_yields_none() {
        assert!(bearer_token(&parts_with_auth(Some("Basic abc"))).is_none());
    }

    #[test]
    fn token_is_trimmed() {
        let token = bearer_token(&parts_with_auth(Some("Bearer  tok-1 "))).unwrap();
        assert_eq!(token, "tok-1");
    }
}
