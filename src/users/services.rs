use std::time::Duration;

use axum::extract::FromRef;
use bytes::Bytes;
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{
    LoginRequest, MessageResponse, RegisterRequest, TokenPairResponse, UpdatedProfileResponse,
};
use super::jwt::JwtKeys;
use super::password::{hash_password, verify_password};
use super::repo::User;
use crate::error::ApiError;
use crate::state::AppState;

const VERIFICATION_KEY_PREFIX: &str = "verification_code:";
const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn verification_key(email: &str) -> String {
    format!("{VERIFICATION_KEY_PREFIX}{email}")
}

/// Random 6-digit verification code.
fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:06}")
}

/// Extension of an uploaded filename, when one can be derived. A name
/// without a dot has no extension.
fn file_extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.contains('/') {
        return None;
    }
    Some(ext.to_lowercase())
}

fn ext_from_mime(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

fn is_unique_violation(e: &anyhow::Error) -> bool {
    e.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .and_then(|d| d.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

/// File received through the profile-update multipart form.
pub struct UploadedImage {
    pub bytes: Bytes,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

pub async fn register(state: &AppState, payload: RegisterRequest) -> Result<MessageResponse, ApiError> {
    let email = normalize_email(&payload.email);
    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(ApiError::bad_request("Invalid email"));
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(ApiError::bad_request("Password too short"));
    }

    if User::find_by_email(&state.db, &email).await?.is_some() {
        warn!(%email, "email already registered");
        return Err(ApiError::conflict("Email already registered"));
    }

    let hash = hash_password(&payload.password)?;
    let user = match User::create(
        &state.db,
        &email,
        &hash,
        &payload.name,
        &payload.nickname,
        &payload.phone,
    )
    .await
    {
        Ok(u) => u,
        // Lost the race against a concurrent registration with the same
        // email; the unique index is the authority.
        Err(e) if is_unique_violation(&e) => {
            warn!(%email, "email already registered (concurrent insert)");
            return Err(ApiError::conflict("Email already registered"));
        }
        Err(e) => return Err(e.into()),
    };

    info!(user_id = user.id, email = %user.email, "user registered");
    Ok(MessageResponse::new("Registration complete"))
}

pub async fn login(state: &AppState, payload: LoginRequest) -> Result<TokenPairResponse, ApiError> {
    let email = normalize_email(&payload.email);

    // Unknown email and wrong password produce the same response shape.
    let Some(row) = User::find_login_by_email(&state.db, &email).await? else {
        warn!(%email, "login unknown email");
        return Err(ApiError::unauthorized("Invalid credentials"));
    };

    if !verify_password(&payload.password, &row.password_hash)? {
        warn!(%email, user_id = row.id, "login invalid password");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let keys = JwtKeys::from_ref(state);
    let access_token = keys.sign_access(row.id, &row.email)?;
    let refresh_token = keys.sign_refresh(row.id, &row.email)?;

    info!(user_id = row.id, email = %row.email, "user logged in");
    Ok(TokenPairResponse {
        access_token,
        refresh_token,
    })
}

pub async fn refresh(state: &AppState, refresh_token: &str) -> Result<TokenPairResponse, ApiError> {
    let keys = JwtKeys::from_ref(state);
    let claims = keys
        .verify_refresh(refresh_token)
        .map_err(|_| ApiError::unauthorized("Invalid refresh token"))?;

    let Some(user) = User::find_by_id(&state.db, claims.sub).await? else {
        return Err(ApiError::unauthorized("Invalid refresh token"));
    };

    let access_token = keys.sign_access(user.id, &user.email)?;
    let refresh_token = keys.sign_refresh(user.id, &user.email)?;
    Ok(TokenPairResponse {
        access_token,
        refresh_token,
    })
}

pub async fn update_profile(
    state: &AppState,
    user_id: i64,
    nickname: Option<String>,
    phone: Option<String>,
    file: Option<UploadedImage>,
) -> Result<UpdatedProfileResponse, ApiError> {
    let Some(user) = User::find_by_id(&state.db, user_id).await? else {
        return Err(ApiError::not_found("User not found"));
    };

    // A new key is set only when a file arrives with a resolvable extension;
    // otherwise the stored image reference is left untouched.
    let mut new_image_key: Option<String> = None;
    if let Some(file) = file {
        let ext = file
            .filename
            .as_deref()
            .and_then(file_extension)
            .or_else(|| {
                file.content_type
                    .as_deref()
                    .and_then(ext_from_mime)
                    .map(str::to_string)
            });

        match ext {
            Some(ext) => {
                // Delete-then-upload, no rollback on upload failure.
                if let Some(old_key) = &user.image_key {
                    state.storage.delete_object(old_key).await?;
                }
                let key = format!("avatars/{}.{}", Uuid::new_v4(), ext);
                let content_type = file
                    .content_type
                    .unwrap_or_else(|| "application/octet-stream".into());
                state
                    .storage
                    .put_object(&key, file.bytes, &content_type)
                    .await?;
                new_image_key = Some(key);
            }
            None => {
                warn!(user_id, "upload skipped: no resolvable file extension");
            }
        }
    }

    let updated = User::update_profile(
        &state.db,
        user_id,
        nickname.as_deref(),
        phone.as_deref(),
        new_image_key.as_deref(),
    )
    .await?;

    info!(user_id, "profile updated");
    Ok(UpdatedProfileResponse {
        id: updated.id,
        nickname: updated.nickname,
        phone: updated.phone,
        image_key: updated.image_key,
    })
}

pub async fn request_verification(
    state: &AppState,
    email: &str,
) -> Result<MessageResponse, ApiError> {
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email"));
    }

    // Re-issue overwrites any pending code for this email.
    let code = generate_code();
    let ttl = Duration::from_secs(state.config.verification_ttl_seconds);
    state
        .cache
        .set_ex(&verification_key(&email), &code, ttl)
        .await?;
    state.mailer.send_verification_code(&email, &code).await?;

    info!(%email, "verification code issued");
    Ok(MessageResponse::new("Verification code sent"))
}

pub async fn confirm_verification(
    state: &AppState,
    email: &str,
    code: &str,
) -> Result<MessageResponse, ApiError> {
    let email = normalize_email(email);
    let key = verification_key(&email);

    let Some(stored) = state.cache.get(&key).await? else {
        return Err(ApiError::bad_request(
            "No pending verification code; request one first",
        ));
    };

    if stored != code {
        // Entry stays pending so the client can retry with the right code.
        warn!(%email, "verification code mismatch");
        return Err(ApiError::bad_request("Verification code does not match"));
    }

    // Single use: a matching code consumes the entry.
    state.cache.del(&key).await?;
    info!(%email, "email verified");
    Ok(MessageResponse::new("Verification complete"))
}

pub async fn remove_account(
    state: &AppState,
    acting_id: i64,
    target_id: i64,
) -> Result<MessageResponse, ApiError> {
    // The only access-control check: a user may delete only themselves.
    if acting_id != target_id {
        warn!(acting_id, target_id, "account removal identity mismatch");
        return Err(ApiError::not_found("User not found"));
    }

    let deleted = User::delete(&state.db, target_id).await?;
    if deleted == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    info!(user_id = target_id, "account removed");
    Ok(MessageResponse::new("Account removed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::mailer::Mailer;
    use crate::state::AppState;
    use axum::async_trait;
    use std::sync::{Arc, Mutex};

    /// Captures outbound verification mail for assertions.
    struct RecordingMailer {
        sent: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_verification_code(&self, email: &str, code: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((email.to_string(), code.to_string()));
            Ok(())
        }
    }

    fn recording_state() -> (AppState, Arc<Mutex<Vec<(String, String)>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let base = AppState::fake();
        let state = AppState::from_parts(
            base.db,
            base.config,
            base.storage,
            Arc::new(InMemoryCache::new()),
            Arc::new(RecordingMailer { sent: sent.clone() }),
        );
        (state, sent)
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last@sub.example.org"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@x.com"));
    }

    #[test]
    fn generated_code_is_six_digits() {
        for _ in 0..20 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn file_extension_handling() {
        assert_eq!(file_extension("photo.PNG"), Some("png".to_string()));
        assert_eq!(file_extension("a.b.jpeg"), Some("jpeg".to_string()));
        assert_eq!(file_extension("noext"), None);
        assert_eq!(file_extension(".hidden"), None);
        assert_eq!(file_extension("trailing."), None);
    }

    #[tokio::test]
    async fn request_stores_code_and_sends_mail() {
        let (state, sent) = recording_state();
        request_verification(&state, "A@X.com ").await.unwrap();

        let stored = state
            .cache
            .get("verification_code:a@x.com")
            .await
            .unwrap()
            .expect("code stored");
        let mails = sent.lock().unwrap();
        assert_eq!(mails.len(), 1);
        assert_eq!(mails[0].0, "a@x.com");
        assert_eq!(mails[0].1, stored);
    }

    #[tokio::test]
    async fn reissue_overwrites_pending_code() {
        let (state, sent) = recording_state();
        request_verification(&state, "a@x.com").await.unwrap();
        request_verification(&state, "a@x.com").await.unwrap();

        let stored = state
            .cache
            .get("verification_code:a@x.com")
            .await
            .unwrap()
            .unwrap();
        let mails = sent.lock().unwrap();
        assert_eq!(mails.len(), 2);
        // Only the latest issued code is live.
        assert_eq!(mails[1].1, stored);
    }

    #[tokio::test]
    async fn confirm_is_single_use() {
        let (state, sent) = recording_state();
        request_verification(&state, "a@x.com").await.unwrap();
        let code = sent.lock().unwrap()[0].1.clone();

        confirm_verification(&state, "a@x.com", &code)
            .await
            .expect("first confirm succeeds");

        // Entry consumed: same code again is a hard error.
        let err = confirm_verification(&state, "a@x.com", &code)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn wrong_code_keeps_entry_pending() {
        let (state, sent) = recording_state();
        request_verification(&state, "a@x.com").await.unwrap();
        let code = sent.lock().unwrap()[0].1.clone();
        let wrong = if code == "000000" { "000001" } else { "000000" };

        let err = confirm_verification(&state, "a@x.com", wrong)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        // Entry survived the mismatch; the right code still works.
        confirm_verification(&state, "a@x.com", &code)
            .await
            .expect("correct code still succeeds");
    }

    #[tokio::test]
    async fn confirm_without_request_is_bad_request() {
        let (state, _) = recording_state();
        let err = confirm_verification(&state, "a@x.com", "123456")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn removal_rejects_identity_mismatch_without_store_lookup() {
        // acting != target fails before any DB call, so the fake lazy pool
        // is never touched.
        let state = AppState::fake();
        let err = remove_account(&state, 1, 2).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    fn state_with_pool(pool: sqlx::PgPool) -> AppState {
        let base = AppState::fake();
        AppState::from_parts(pool, base.config, base.storage, base.cache, base.mailer)
    }

    fn register_payload(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: "pw123456".into(),
            name: "A".into(),
            nickname: "a1".into(),
            phone: "010".into(),
        }
    }

    #[sqlx::test]
    #[ignore] // Requires a database (DATABASE_URL)
    async fn duplicate_registration_conflicts_and_inserts_once(pool: sqlx::PgPool) {
        let state = state_with_pool(pool.clone());

        register(&state, register_payload("a@x.com")).await.unwrap();
        let err = register(&state, register_payload("a@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM users WHERE email = $1")
            .bind("a@x.com")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[sqlx::test]
    #[ignore] // Requires a database (DATABASE_URL)
    async fn login_failures_are_indistinguishable(pool: sqlx::PgPool) {
        let state = state_with_pool(pool);
        register(&state, register_payload("a@x.com")).await.unwrap();

        let wrong_password = login(
            &state,
            LoginRequest {
                email: "a@x.com".into(),
                password: "wrong".into(),
            },
        )
        .await
        .unwrap_err();

        let unknown_email = login(
            &state,
            LoginRequest {
                email: "nobody@x.com".into(),
                password: "pw123456".into(),
            },
        )
        .await
        .unwrap_err();

        // Same status, same message: nothing tells the caller which part
        // was wrong.
        assert!(matches!(wrong_password, ApiError::Unauthorized(_)));
        assert!(matches!(unknown_email, ApiError::Unauthorized(_)));
        assert_eq!(wrong_password.status(), unknown_email.status());
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
    }

    #[sqlx::test]
    #[ignore] // Requires a database (DATABASE_URL)
    async fn login_returns_distinct_tokens_with_correct_claims(pool: sqlx::PgPool) {
        let state = state_with_pool(pool);
        register(&state, register_payload("a@x.com")).await.unwrap();

        let pair = login(
            &state,
            LoginRequest {
                email: "a@x.com".into(),
                password: "pw123456".into(),
            },
        )
        .await
        .unwrap();

        assert!(!pair.access_token.is_empty());
        assert!(!pair.refresh_token.is_empty());
        assert_ne!(pair.access_token, pair.refresh_token);

        let keys = JwtKeys::from_ref(&state);
        let access = keys.verify(&pair.access_token).unwrap();
        let refresh = keys.verify(&pair.refresh_token).unwrap();
        assert_eq!(access.email, "a@x.com");
        assert_eq!(access.sub, refresh.sub);
        assert!(access.exp < refresh.exp);
    }
}
