/*!
 * # Authentication and Authorization Module
 *
 * JWT access tokens plus rotating refresh tokens for storefront accounts.
 *
 * - Access tokens are short-lived HS256 JWTs, accepted from the
 *   `Authorization: Bearer` header or the `accessToken` cookie.
 * - Refresh tokens are JWTs whose `jti` is persisted in `refresh_tokens`.
 *   Every refresh revokes the presented token and links it to its
 *   replacement; presenting a revoked token again revokes every outstanding
 *   refresh token of the account.
 */

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{
    error::{DbErr, SqlErr},
    sea_query::Expr,
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

pub mod password;

use crate::entities::{refresh_token, user, RefreshToken, User, UserRole};
use crate::errors::{FieldErrors, ServiceError};

pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,           // Subject (user ID)
    pub email: Option<String>, // Only on access tokens
    pub role: UserRole,
    pub token_type: TokenType,
    pub jti: String, // JWT ID, persisted for refresh tokens
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub iss: String,
    pub aud: String,
}

/// Authenticated user data extracted from the access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: UserRole,
    pub token_id: String,
}

impl AuthUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_str() == role
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

impl TryFrom<Claims> for AuthUser {
    type Error = AuthError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?,
            email: claims.email,
            role: claims.role,
            token_id: claims.jti,
        })
    }
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_issuer: String,
    pub access_token_expiration: Duration,
    pub refresh_token_expiration: Duration,
    /// Adds `Secure` to session cookies
    pub secure_cookies: bool,
}

impl AuthConfig {
    pub fn new(
        jwt_secret: String,
        jwt_audience: String,
        jwt_issuer: String,
        access_token_expiration: Duration,
        refresh_token_expiration: Duration,
    ) -> Self {
        Self {
            jwt_secret,
            jwt_audience,
            jwt_issuer,
            access_token_expiration,
            refresh_token_expiration,
            secure_cookies: false,
        }
    }

    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }
}

/// Token pair response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100, message = "name is required"))]
    pub name: String,
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, max = 128, message = "must be 8 to 128 characters"))]
    pub password: String,
}

/// Login credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

/// Refresh/logout body; the `refreshToken` cookie is used when absent.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<String>,
}

/// Body returned by register, login and refresh
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: user::Model,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

/// Authentication service that handles accounts and token issuance
#[derive(Debug, Clone)]
pub struct AuthService {
    pub config: AuthConfig,
    pub db: Arc<DatabaseConnection>,
}

impl AuthService {
    pub fn new(config: AuthConfig, db: Arc<DatabaseConnection>) -> Self {
        Self { config, db }
    }

    /// Creates a `user` account and signs it in.
    #[instrument(skip(self, request))]
    pub async fn register(
        &self,
        request: RegisterRequest,
    ) -> Result<(user::Model, TokenPair), AuthError> {
        request.validate()?;
        let email = normalize_email(&request.email);

        let existing = User::find()
            .filter(user::Column::Email.eq(email.clone()))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let password_hash = hash_off_thread(request.password).await?;
        let now = Utc::now();
        let account = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name.trim().to_string()),
            email: Set(email),
            password_hash: Set(password_hash),
            role: Set(UserRole::User),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => AuthError::EmailTaken,
            _ => AuthError::from(e),
        })?;

        let tokens = self.generate_token(&account).await?;
        info!(user_id = %account.id, "account registered");
        Ok((account, tokens))
    }

    #[instrument(skip(self, credentials))]
    pub async fn login(
        &self,
        credentials: LoginCredentials,
    ) -> Result<(user::Model, TokenPair), AuthError> {
        let email = normalize_email(&credentials.email);
        let account = User::find()
            .filter(user::Column::Email.eq(email))
            .one(&*self.db)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let stored = account.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || {
            password::verify_password(&stored, &credentials.password)
        })
        .await
        .map_err(|e| AuthError::InternalError(e.to_string()))??;
        if !matches {
            warn!(user_id = %account.id, "login rejected: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let tokens = self.generate_token(&account).await?;
        info!(user_id = %account.id, "login succeeded");
        Ok((account, tokens))
    }

    /// Issues a fresh access/refresh pair and persists the refresh token id.
    pub async fn generate_token(&self, account: &user::Model) -> Result<TokenPair, AuthError> {
        self.issue_tokens(&*self.db, account, Uuid::new_v4().to_string())
            .await
    }

    async fn issue_tokens<C: ConnectionTrait>(
        &self,
        conn: &C,
        account: &user::Model,
        refresh_jti: String,
    ) -> Result<TokenPair, AuthError> {
        let now = Utc::now();
        let access_exp = now
            + ChronoDuration::from_std(self.config.access_token_expiration)
                .map_err(|_| AuthError::InternalError("Invalid token duration".to_string()))?;
        let refresh_exp = now
            + ChronoDuration::from_std(self.config.refresh_token_expiration)
                .map_err(|_| AuthError::InternalError("Invalid token duration".to_string()))?;

        let access_claims = Claims {
            sub: account.id.to_string(),
            email: Some(account.email.clone()),
            role: account.role,
            token_type: TokenType::Access,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: access_exp.timestamp(),
            nbf: now.timestamp(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        };

        let refresh_claims = Claims {
            sub: account.id.to_string(),
            email: None,
            role: account.role,
            token_type: TokenType::Refresh,
            jti: refresh_jti.clone(),
            iat: now.timestamp(),
            exp: refresh_exp.timestamp(),
            nbf: now.timestamp(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        };

        let access_token = self.encode_claims(&access_claims)?;
        let refresh_token = self.encode_claims(&refresh_claims)?;

        refresh_token::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(account.id),
            token_id: Set(refresh_jti),
            created_at: Set(now),
            expires_at: Set(refresh_exp),
            revoked: Set(false),
            replaced_by: Set(None),
        }
        .insert(conn)
        .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_expiration.as_secs() as i64,
            refresh_expires_in: self.config.refresh_token_expiration.as_secs() as i64,
        })
    }

    fn encode_claims(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    fn decode_claims(
        &self,
        token: &str,
        expected: TokenType,
        check_expiry: bool,
    ) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);
        validation.set_audience(&[self.config.jwt_audience.as_str()]);
        validation.validate_exp = check_expiry;

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?
        .claims;

        if claims.token_type != expected {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }

    /// Validates an access token and extracts its claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.decode_claims(token, TokenType::Access, true)
    }

    /// Rotates a refresh token. The presented token is revoked and linked to
    /// the replacement in the same transaction the replacement is stored in.
    #[instrument(skip_all)]
    pub async fn refresh_token(&self, raw: &str) -> Result<(user::Model, TokenPair), AuthError> {
        let claims = self.decode_claims(raw, TokenType::Refresh, true)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        let replacement_jti = Uuid::new_v4().to_string();

        let txn = self.db.begin().await?;
        let rotated = RefreshToken::update_many()
            .col_expr(refresh_token::Column::Revoked, Expr::value(true))
            .col_expr(
                refresh_token::Column::ReplacedBy,
                Expr::value(replacement_jti.clone()),
            )
            .filter(refresh_token::Column::TokenId.eq(claims.jti.clone()))
            .filter(refresh_token::Column::UserId.eq(user_id))
            .filter(refresh_token::Column::Revoked.eq(false))
            .exec(&txn)
            .await?;

        if rotated.rows_affected == 0 {
            let known = RefreshToken::find()
                .filter(refresh_token::Column::TokenId.eq(claims.jti.clone()))
                .filter(refresh_token::Column::UserId.eq(user_id))
                .one(&txn)
                .await?;
            return match known {
                Some(_) => {
                    let revoked = revoke_all_for_user(&txn, user_id).await?;
                    txn.commit().await?;
                    warn!(%user_id, token_id = %claims.jti, revoked, "refresh token reuse detected; all sessions revoked");
                    Err(AuthError::RevokedToken)
                }
                None => Err(AuthError::InvalidToken),
            };
        }

        let account = User::find_by_id(user_id)
            .one(&txn)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        let tokens = self.issue_tokens(&txn, &account, replacement_jti).await?;
        txn.commit().await?;

        debug!(%user_id, "refresh token rotated");
        Ok((account, tokens))
    }

    /// Revokes the presented refresh token. Expired tokens are still revoked.
    #[instrument(skip_all)]
    pub async fn logout(&self, raw_refresh: &str) -> Result<(), AuthError> {
        let claims = self.decode_claims(raw_refresh, TokenType::Refresh, false)?;
        RefreshToken::update_many()
            .col_expr(refresh_token::Column::Revoked, Expr::value(true))
            .filter(refresh_token::Column::TokenId.eq(claims.jti))
            .filter(refresh_token::Column::Revoked.eq(false))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    fn session_cookies(&self, tokens: &TokenPair) -> [String; 2] {
        [
            self.cookie(
                ACCESS_TOKEN_COOKIE,
                &tokens.access_token,
                tokens.expires_in,
            ),
            self.cookie(
                REFRESH_TOKEN_COOKIE,
                &tokens.refresh_token,
                tokens.refresh_expires_in,
            ),
        ]
    }

    fn cookie(&self, name: &str, value: &str, max_age: i64) -> String {
        let secure = if self.config.secure_cookies {
            "; Secure"
        } else {
            ""
        };
        format!(
            "{}={}; HttpOnly; Path=/; Max-Age={}; SameSite=Lax{}",
            name, value, max_age, secure
        )
    }
}

async fn revoke_all_for_user<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<u64, DbErr> {
    let result = RefreshToken::update_many()
        .col_expr(refresh_token::Column::Revoked, Expr::value(true))
        .filter(refresh_token::Column::UserId.eq(user_id))
        .filter(refresh_token::Column::Revoked.eq(false))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

async fn hash_off_thread(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || password::hash_password(&password))
        .await
        .map_err(|e| AuthError::InternalError(e.to_string()))?
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token has expired")]
    TokenExpired,
    #[error("Token has been revoked")]
    RevokedToken,
    #[error("Token creation failed: {0}")]
    TokenCreation(String),
    #[error("Email is already registered")]
    EmailTaken,
    #[error("Validation failed")]
    Validation(FieldErrors),
    #[error("Insufficient permissions")]
    InsufficientPermissions,
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<DbErr> for AuthError {
    fn from(err: DbErr) -> Self {
        AuthError::DatabaseError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        match ServiceError::from(err) {
            ServiceError::InvalidFields(fields) => AuthError::Validation(fields),
            other => AuthError::InternalError(other.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message): (StatusCode, &str, String) = match &self {
            Self::MissingAuth => (
                StatusCode::UNAUTHORIZED,
                "AUTH_MISSING",
                "Authentication required".to_string(),
            ),
            Self::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "AUTH_INVALID_CREDENTIALS",
                "Invalid credentials".to_string(),
            ),
            Self::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "AUTH_INVALID_TOKEN",
                "Invalid authentication token".to_string(),
            ),
            Self::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "AUTH_TOKEN_EXPIRED",
                "Token has expired".to_string(),
            ),
            Self::RevokedToken => (
                StatusCode::UNAUTHORIZED,
                "AUTH_REVOKED_TOKEN",
                "Authentication token has been revoked".to_string(),
            ),
            Self::TokenCreation(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "AUTH_TOKEN_CREATION_FAILED",
                "Token creation failed".to_string(),
            ),
            Self::EmailTaken => (
                StatusCode::CONFLICT,
                "AUTH_EMAIL_TAKEN",
                "Email is already registered".to_string(),
            ),
            Self::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "AUTH_VALIDATION",
                "Validation failed".to_string(),
            ),
            Self::InsufficientPermissions => (
                StatusCode::FORBIDDEN,
                "AUTH_INSUFFICIENT_PERMISSIONS",
                "Insufficient permissions".to_string(),
            ),
            Self::DatabaseError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "AUTH_DATABASE_ERROR",
                "Database error".to_string(),
            ),
            Self::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "AUTH_INTERNAL_ERROR",
                "Internal server error".to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "auth request failed");
        }

        let mut error = serde_json::json!({
            "code": error_code,
            "message": error_message,
        });
        if let Self::Validation(fields) = self {
            error["fields"] = serde_json::json!(fields);
        }

        (status, Json(serde_json::json!({ "error": error }))).into_response()
    }
}

/// Role middleware; must run after `auth_middleware`.
pub async fn role_middleware(
    State(required_role): State<String>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AuthError::MissingAuth)?;

    if !user.has_role(&required_role) {
        warn!(user_id = %user.user_id, required_role = %required_role, "role check failed");
        return Err(AuthError::InsufficientPermissions);
    }

    Ok(next.run(request).await)
}

/// Resolves the access token into an `AuthUser` request extension.
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let auth_service = match request.extensions().get::<Arc<AuthService>>() {
        Some(service) => service.clone(),
        None => {
            return AuthError::InternalError("Authentication service not available".to_string())
                .into_response();
        }
    };

    match extract_auth_from_headers(request.headers(), &auth_service) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

fn extract_auth_from_headers(
    headers: &HeaderMap,
    auth_service: &AuthService,
) -> Result<AuthUser, AuthError> {
    let token = bearer_token(headers)
        .or_else(|| cookie_value(headers, ACCESS_TOKEN_COOKIE))
        .ok_or(AuthError::MissingAuth)?;
    let claims = auth_service.validate_token(token)?;
    AuthUser::try_from(claims)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Finds a cookie by name across every `Cookie` header.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value)
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
    fn with_role(self, role: &str) -> Self;
}

impl<S> AuthRouterExt for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }

    fn with_role(self, role: &str) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            role.to_string(),
            role_middleware,
        ))
        .with_auth()
    }
}

/// Authentication routes
pub fn auth_routes() -> Router<Arc<AuthService>> {
    Router::new()
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .route("/refresh", post(refresh_token_handler))
        .route("/logout", post(logout_handler))
        .layer(DefaultBodyLimit::max(1024 * 64))
}

fn session_response(
    auth_service: &AuthService,
    status: StatusCode,
    account: user::Model,
    tokens: TokenPair,
) -> Result<Response, AuthError> {
    let cookies = auth_service.session_cookies(&tokens);
    let mut response = (
        status,
        Json(AuthResponse {
            user: account,
            tokens,
        }),
    )
        .into_response();
    for cookie in cookies {
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| AuthError::InternalError(e.to_string()))?;
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    Ok(response)
}

pub async fn register_handler(
    State(auth_service): State<Arc<AuthService>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Response, AuthError> {
    let (account, tokens) = auth_service.register(request).await?;
    session_response(&auth_service, StatusCode::CREATED, account, tokens)
}

pub async fn login_handler(
    State(auth_service): State<Arc<AuthService>>,
    Json(credentials): Json<LoginCredentials>,
) -> Result<Response, AuthError> {
    let (account, tokens) = auth_service.login(credentials).await?;
    session_response(&auth_service, StatusCode::OK, account, tokens)
}

pub async fn refresh_token_handler(
    State(auth_service): State<Arc<AuthService>>,
    headers: HeaderMap,
    body: Option<Json<RefreshTokenRequest>>,
) -> Result<Response, AuthError> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let raw = body
        .refresh_token
        .as_deref()
        .or_else(|| cookie_value(&headers, REFRESH_TOKEN_COOKIE))
        .ok_or(AuthError::MissingAuth)?;

    let (account, tokens) = auth_service.refresh_token(raw).await?;
    session_response(&auth_service, StatusCode::OK, account, tokens)
}

/// Always clears the session cookies; an unusable token is only logged.
pub async fn logout_handler(
    State(auth_service): State<Arc<AuthService>>,
    headers: HeaderMap,
    body: Option<Json<RefreshTokenRequest>>,
) -> Result<Response, AuthError> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let raw = body
        .refresh_token
        .as_deref()
        .or_else(|| cookie_value(&headers, REFRESH_TOKEN_COOKIE));

    if let Some(raw) = raw {
        match auth_service.logout(raw).await {
            Ok(()) => {}
            Err(AuthError::InvalidToken) => debug!("logout with unusable refresh token"),
            Err(e) => return Err(e),
        }
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    for name in [ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE] {
        let value = HeaderValue::from_str(&auth_service.cookie(name, "", 0))
            .map_err(|e| AuthError::InternalError(e.to_string()))?;
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new(
            AuthConfig::new(
                crate::config::DEV_DEFAULT_JWT_SECRET.to_string(),
                "bookstore-api".to_string(),
                "bookstore-auth".to_string(),
                Duration::from_secs(900),
                Duration::from_secs(3600),
            ),
            Arc::new(DatabaseConnection::Disconnected),
        )
    }

    fn claims(token_type: TokenType, exp_offset: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: Uuid::new_v4().to_string(),
            email: Some("reader@example.com".into()),
            role: UserRole::User,
            token_type,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + exp_offset,
            nbf: now,
            iss: "bookstore-auth".into(),
            aud: "bookstore-api".into(),
        }
    }

    #[test]
    fn access_token_round_trip() {
        let svc = service();
        let original = claims(TokenType::Access, 600);
        let token = svc.encode_claims(&original).unwrap();
        let decoded = svc.validate_token(&token).unwrap();
        assert_eq!(decoded.sub, original.sub);

        let user = AuthUser::try_from(decoded).unwrap();
        assert!(!user.is_admin());
        assert!(user.has_role("user"));
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let svc = service();
        let token = svc.encode_claims(&claims(TokenType::Refresh, 600)).unwrap();
        assert!(matches!(
            svc.validate_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn expired_and_foreign_tokens_are_rejected() {
        let svc = service();
        let expired = svc.encode_claims(&claims(TokenType::Access, -3600)).unwrap();
        assert!(matches!(
            svc.validate_token(&expired),
            Err(AuthError::TokenExpired)
        ));

        let mut foreign = claims(TokenType::Access, 600);
        foreign.aud = "someone-else".into();
        let token = svc.encode_claims(&foreign).unwrap();
        assert!(matches!(
            svc.validate_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn tokens_are_read_from_header_or_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; accessToken=abc.def; refreshToken=r1"),
        );
        assert_eq!(bearer_token(&headers), None);
        assert_eq!(cookie_value(&headers, ACCESS_TOKEN_COOKIE), Some("abc.def"));
        assert_eq!(cookie_value(&headers, REFRESH_TOKEN_COOKIE), Some("r1"));

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer xyz"),
        );
        assert_eq!(bearer_token(&headers), Some("xyz"));
    }

    #[test]
    fn session_cookies_are_http_only() {
        let svc = service();
        let tokens = TokenPair {
            access_token: "a".into(),
            refresh_token: "r".into(),
            token_type: "Bearer".into(),
            expires_in: 900,
            refresh_expires_in: 3600,
        };
        let [access, refresh] = svc.session_cookies(&tokens);
        assert!(access.starts_with("accessToken=a; HttpOnly"));
        assert!(refresh.contains("Max-Age=3600"));
        assert!(!access.contains("Secure"));
    }
}
