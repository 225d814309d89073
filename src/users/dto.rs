use serde::{Deserialize, Serialize};

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub nickname: String,
    pub phone: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for token refresh.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Token pair returned after login or refresh.
#[derive(Debug, Serialize)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// Plain acknowledgement for operations that issue no data.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Request body to trigger verification-code delivery.
#[derive(Debug, Deserialize)]
pub struct VerificationRequest {
    pub email: String,
}

/// Request body to confirm a pending verification code.
#[derive(Debug, Deserialize)]
pub struct VerificationConfirmRequest {
    pub email: String,
    pub code: String,
}

/// Public profile returned to the client; `image_url` is a presigned GET
/// link when an image is stored.
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub nickname: String,
    pub phone: String,
    pub image_url: Option<String>,
}

/// Fields returned after a profile update.
#[derive(Debug, Serialize)]
pub struct UpdatedProfileResponse {
    pub id: i64,
    pub nickname: String,
    pub phone: String,
    pub image_key: Option<String>,
}
