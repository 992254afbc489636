use axum::{
    extract::{FromRef, Query, State},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, EmailExistsResponse, EmailQuery, LoginRequest, RefreshRequest,
            RegisterRequest,
        },
        extractors::AuthUser,
        jwt::JwtKeys,
        validation::{validate_login, validate_registration},
    },
    error::ApiError,
    state::AppState,
    store::{normalize_email, StoreError, UserProfile},
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/email-exists", get(email_exists))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn issue_tokens(state: &AppState, user: UserProfile) -> Result<AuthResponse, ApiError> {
    let keys = JwtKeys::from_ref(state);
    Ok(AuthResponse {
        access_token: keys.sign_access(user.id)?,
        refresh_token: keys.sign_refresh(user.id)?,
        user,
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = normalize_email(&payload.email);
    let full_name = payload.full_name.trim();
    let password = payload.password.trim();
    let confirm = payload.confirm_password.trim();

    validate_registration(full_name, &email, password, confirm).map_err(|e| {
        warn!(email = %email, reason = %e, "registration rejected");
        e
    })?;

    let id = state.store.register(&email, password, full_name).await?;
    let user = state.store.find_by_id(id).await?;

    info!(user_id = user.id, "registration complete");
    Ok(Json(issue_tokens(&state, user)?))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = normalize_email(&payload.email);
    let password = payload.password.trim();

    validate_login(&email, password)?;

    let user = state.store.authenticate(&email, password).await?;
    Ok(Json(issue_tokens(&state, user)?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&payload.refresh_token).map_err(|e| {
        warn!(error = %e, "refresh rejected");
        ApiError::Unauthorized("invalid refresh token")
    })?;

    let user = match state.store.find_by_id(claims.sub).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => return Err(ApiError::Unauthorized("user not found")),
        Err(e) => return Err(e.into()),
    };
    Ok(Json(issue_tokens(&state, user)?))
}

#[instrument(skip(state, query))]
pub async fn email_exists(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<EmailExistsResponse>, ApiError> {
    let exists = state.store.email_exists(&query.email).await?;
    Ok(Json(EmailExistsResponse { exists }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserProfile>, ApiError> {
    match state.store.find_by_id(user_id).await {
        Ok(user) => Ok(Json(user)),
        Err(StoreError::NotFound) => Err(ApiError::Unauthorized("user not found")),
        Err(e) => Err(e.into()),
    }
}
