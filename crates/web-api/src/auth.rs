//! JWT 认证模块
//!
//! 签发/校验 access 与 refresh 两类 HS256 token。refresh token 注销后
//! 按 `jti` 进入黑名单。

use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use config::JwtConfig;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT Claims 结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub jti: Uuid,
    pub token_type: TokenType,
    pub exp: i64, // 过期时间 (Unix timestamp)
    pub iat: i64,
}

impl Claims {
    pub fn expires_at(&self) -> chrono::DateTime<Utc> {
        chrono::DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub refresh: String,
    pub access: String,
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    pub fn issue_pair(&self, user_id: Uuid) -> Result<TokenPair, ApiError> {
        Ok(TokenPair {
            refresh: self.issue(user_id, TokenType::Refresh)?,
            access: self.issue(user_id, TokenType::Access)?,
        })
    }

    pub fn issue(&self, user_id: Uuid, token_type: TokenType) -> Result<String, ApiError> {
        let now = Utc::now();
        let ttl = match token_type {
            TokenType::Access => Duration::try_minutes(self.config.access_ttl_minutes),
            TokenType::Refresh => Duration::try_hours(self.config.refresh_ttl_hours),
        };
        let expires_at = ttl
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| ApiError::internal_server_error("token lifetime out of range"))?;

        let claims = Claims {
            sub: user_id,
            jti: Uuid::new_v4(),
            token_type,
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("token generation failed: {err}")))
    }

    /// 验证签名、过期时间与 token 类型
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, ApiError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| ApiError::unauthorized(format!("Invalid token: {err}")))?;

        if claims.token_type != expected {
            return Err(ApiError::unauthorized("Token has wrong type"));
        }
        Ok(claims)
    }

    /// 从 headers 中提取和验证 access token
    pub fn extract_user_from_headers(&self, headers: &HeaderMap) -> Result<Uuid, ApiError> {
        let auth_header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

        let claims = self.verify(token, TokenType::Access)?;
        Ok(claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::AUTHORIZATION, HeaderValue, StatusCode};

    fn service() -> JwtService {
        JwtService::new(JwtConfig::default())
    }

    #[test]
    fn pair_tokens_carry_their_type() {
        let jwt = service();
        let user_id = Uuid::new_v4();
        let pair = jwt.issue_pair(user_id).expect("pair");

        let access = jwt.verify(&pair.access, TokenType::Access).expect("access");
        let refresh = jwt.verify(&pair.refresh, TokenType::Refresh).expect("refresh");
        assert_eq!(access.sub, user_id);
        assert_eq!(refresh.sub, user_id);
        assert_ne!(access.jti, refresh.jti);
        assert!(refresh.exp > access.exp);
    }

    #[test]
    fn oversized_lifetime_is_an_error() {
        let jwt = JwtService::new(JwtConfig {
            refresh_ttl_hours: i64::MAX,
            ..JwtConfig::default()
        });
        let err = jwt
            .issue(Uuid::new_v4(), TokenType::Refresh)
            .expect_err("ttl overflow");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(jwt.issue(Uuid::new_v4(), TokenType::Access).is_ok());
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let jwt = service();
        let pair = jwt.issue_pair(Uuid::new_v4()).expect("pair");
        let err = jwt
            .verify(&pair.refresh, TokenType::Access)
            .expect_err("wrong type");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let other = JwtService::new(JwtConfig {
            secret: "another-secret-that-is-long-enough-to-use".into(),
            ..JwtConfig::default()
        });
        let token = other
            .issue(Uuid::new_v4(), TokenType::Access)
            .expect("token");
        assert!(service().verify(&token, TokenType::Access).is_err());
    }

    #[test]
    fn bearer_header_is_required() {
        let jwt = service();
        let user_id = Uuid::new_v4();
        let token = jwt.issue(user_id, TokenType::Access).expect("token");

        let mut headers = HeaderMap::new();
        assert!(jwt.extract_user_from_headers(&headers).is_err());

        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Token {token}")).expect("header"),
        );
        assert!(jwt.extract_user_from_headers(&headers).is_err());

        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).expect("header"),
        );
        assert_eq!(jwt.extract_user_from_headers(&headers).expect("user"), user_id);
    }
}
