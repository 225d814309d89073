use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    routing::{delete, get, patch, post},
    Json, Router,
};
use tracing::instrument;

use super::dto::{
    LoginRequest, MessageResponse, ProfileResponse, RefreshRequest, RegisterRequest,
    TokenPairResponse, UpdatedProfileResponse, VerificationConfirmRequest, VerificationRequest,
};
use super::extractors::AuthUser;
use super::repo::User;
use super::services::{self, UploadedImage};
use crate::error::ApiError;
use crate::state::AppState;

const PRESIGN_TTL_SECS: u64 = 30 * 60;
const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/verification", post(request_verification))
        .route("/auth/verification/confirm", post(confirm_verification))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me))
        .route(
            "/me",
            patch(update_me).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/users/:id", delete(remove_account))
}

#[instrument(skip(state, payload))]
async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    services::register(&state, payload).await.map(Json)
}

#[instrument(skip(state, payload))]
async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenPairResponse>, ApiError> {
    services::login(&state, payload).await.map(Json)
}

#[instrument(skip(state, payload))]
async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenPairResponse>, ApiError> {
    services::refresh(&state, &payload.refresh_token)
        .await
        .map(Json)
}

#[instrument(skip(state, payload))]
async fn request_verification(
    State(state): State<AppState>,
    Json(payload): Json<VerificationRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    services::request_verification(&state, &payload.email)
        .await
        .map(Json)
}

#[instrument(skip(state, payload))]
async fn confirm_verification(
    State(state): State<AppState>,
    Json(payload): Json<VerificationConfirmRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    services::confirm_verification(&state, &payload.email, &payload.code)
        .await
        .map(Json)
}

#[instrument(skip(state))]
async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    let Some(user) = User::find_by_id(&state.db, user_id).await? else {
        return Err(ApiError::not_found("User not found"));
    };

    let image_url = match &user.image_key {
        Some(key) => Some(state.storage.presign_get(key, PRESIGN_TTL_SECS).await?),
        None => None,
    };

    Ok(Json(ProfileResponse {
        id: user.id,
        email: user.email,
        name: user.name,
        nickname: user.nickname,
        phone: user.phone,
        image_url,
    }))
}

/// Multipart fields: `nickname` and `phone` (text, optional), `file`
/// (optional image).
#[instrument(skip(state, multipart))]
async fn update_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<UpdatedProfileResponse>, ApiError> {
    let mut nickname: Option<String> = None;
    let mut phone: Option<String> = None;
    let mut file: Option<UploadedImage> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::bad_request("Malformed multipart body"))?
    {
        match field.name() {
            Some("nickname") => {
                nickname = Some(
                    field
                        .text()
                        .await
                        .map_err(|_| ApiError::bad_request("Invalid nickname field"))?,
                );
            }
            Some("phone") => {
                phone = Some(
                    field
                        .text()
                        .await
                        .map_err(|_| ApiError::bad_request("Invalid phone field"))?,
                );
            }
            Some("file") => {
                let filename = field.file_name().map(|s| s.to_string());
                let content_type = field.content_type().map(|s| s.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::bad_request("Invalid file field"))?;
                file = Some(UploadedImage {
                    bytes,
                    filename,
                    content_type,
                });
            }
            _ => {}
        }
    }

    services::update_profile(&state, user_id, nickname, phone, file)
        .await
        .map(Json)
}

#[instrument(skip(state))]
async fn remove_account(
    State(state): State<AppState>,
    AuthUser(acting_id): AuthUser,
    Path(target_id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    services::remove_account(&state, acting_id, target_id)
        .await
        .map(Json)
}
