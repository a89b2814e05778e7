use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use shared_models::auth::{JwtClaims, JwtHeader, User};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("JWT secret is not set")]
    MissingSecret,

    #[error("Invalid token format")]
    Malformed,

    #[error("Invalid signature encoding")]
    SignatureEncoding,

    #[error("Invalid token signature")]
    BadSignature,

    #[error("Invalid claims encoding")]
    ClaimsEncoding,

    #[error("Invalid claims format")]
    ClaimsFormat,

    #[error("Token expired")]
    Expired,
}

/// Validate an HS256 token and return the user it was issued for.
pub fn validate_token(token: &str, jwt_secret: &str) -> Result<User, TokenError> {
    if jwt_secret.is_empty() {
        return Err(TokenError::MissingSecret);
    }

    let mut parts = token.split('.');
    let (header_b64, claims_b64, signature_b64) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(c), Some(s), None) => (h, c, s),
        _ => return Err(TokenError::Malformed),
    };

    let signature = URL_SAFE_NO_PAD.decode(signature_b64).map_err(|e| {
        debug!("Failed to decode signature: {}", e);
        TokenError::SignatureEncoding
    })?;

    let mut mac = mac_for(jwt_secret)?;
    mac.update(format!("{}.{}", header_b64, claims_b64).as_bytes());
    mac.verify_slice(&signature).map_err(|_| {
        debug!("Token signature verification failed");
        TokenError::BadSignature
    })?;

    let claims_json = URL_SAFE_NO_PAD
        .decode(claims_b64)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or(TokenError::ClaimsEncoding)?;

    let claims: JwtClaims = serde_json::from_str(&claims_json).map_err(|e| {
        debug!("Failed to parse claims: {}", e);
        TokenError::ClaimsFormat
    })?;

    if let Some(exp) = claims.exp {
        let now = Utc::now().timestamp().max(0) as u64;
        if exp < now {
            debug!("Token expired at {} (now: {})", exp, now);
            return Err(TokenError::Expired);
        }
    }

    let created_at = claims
        .iat
        .and_then(|timestamp| Utc.timestamp_opt(timestamp as i64, 0).single());

    let user = User {
        id: claims.sub,
        email: claims.email,
        role: claims.role,
        metadata: claims.user_metadata,
        created_at,
    };

    debug!("Token validated successfully for user: {}", user.id);
    Ok(user)
}

/// Sign claims as an HS256 token. Used by operator tooling and tests.
pub fn sign_token(claims: &JwtClaims, jwt_secret: &str) -> Result<String, TokenError> {
    let header = JwtHeader {
        alg: "HS256".to_string(),
        typ: "JWT".to_string(),
    };
    let header_json = serde_json::to_string(&header).map_err(|_| TokenError::ClaimsFormat)?;
    let claims_json = serde_json::to_string(claims).map_err(|_| TokenError::ClaimsFormat)?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(claims_json)
    );

    let mut mac = mac_for(jwt_secret)?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", signing_input, signature))
}

fn mac_for(jwt_secret: &str) -> Result<HmacSha256, TokenError> {
    if jwt_secret.is_empty() {
        return Err(TokenError::MissingSecret);
    }
    HmacSha256::new_from_slice(jwt_secret.as_bytes()).map_err(|_| TokenError::MissingSecret)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(exp_offset_secs: i64) -> JwtClaims {
        let now = Utc::now().timestamp();
        JwtClaims {
            sub: "7f1d1c2e-0000-4000-8000-000000000001".to_string(),
            exp: Some((now + exp_offset_secs) as u64),
            email: Some("desk@clinic.test".to_string()),
            role: Some("staff".to_string()),
            user_metadata: None,
            iat: Some(now as u64),
        }
    }

    #[test]
    fn signed_token_round_trips() {
        let token = sign_token(&claims(3600), "secret").unwrap();
        let user = validate_token(&token, "secret").unwrap();
        assert_eq!(user.role.as_deref(), Some("staff"));
        assert!(user.created_at.is_some());
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        let token = sign_token(&claims(3600), "secret").unwrap();
        assert_eq!(validate_token(&token, "other"), Err(TokenError::BadSignature));

        let expired = sign_token(&claims(-3600), "secret").unwrap();
        assert_eq!(validate_token(&expired, "secret"), Err(TokenError::Expired));
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert_eq!(validate_token("a.b", "secret"), Err(TokenError::Malformed));
        assert_eq!(validate_token("a.b.c.d", "secret"), Err(TokenError::Malformed));
        assert_eq!(validate_token("a.b.c", ""), Err(TokenError::MissingSecret));
    }
}
