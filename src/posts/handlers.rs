use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::instrument;

use super::dto::{CreateCommentRequest, CreatePostRequest, Pagination, PostDetails, PostListItem};
use super::repo::{Post, PostComment};
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::extractors::AuthUser;

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_posts))
        .route("/posts/:id", get(get_post))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/posts", post(create_post))
        .route("/posts/:id", delete(delete_post))
        .route("/posts/:id/comments", post(create_comment))
}

#[instrument(skip(state))]
async fn list_posts(
    State(state): State<AppState>,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<PostListItem>>, ApiError> {
    let (limit, offset) = p.clamped();
    let posts = Post::list(&state.db, limit, offset).await?;
    let items = posts
        .into_iter()
        .map(|p| PostListItem {
            id: p.id,
            user_id: p.user_id,
            title: p.title,
            created_at: p.created_at,
        })
        .collect();
    Ok(Json(items))
}

#[instrument(skip(state))]
async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PostDetails>, ApiError> {
    let Some(post) = Post::find_by_id(&state.db, id).await? else {
        return Err(ApiError::not_found("Post not found"));
    };
    let comments = PostComment::list_by_post(&state.db, id).await?;

    Ok(Json(PostDetails {
        id: post.id,
        user_id: post.user_id,
        title: post.title,
        content: post.content,
        image: post.image,
        created_at: post.created_at,
        comments,
    }))
}

#[instrument(skip(state, payload))]
async fn create_post(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    if payload.title.trim().is_empty() || payload.content.trim().is_empty() {
        return Err(ApiError::bad_request("Title and content are required"));
    }
    let post = Post::create(&state.db, user_id, &payload.title, &payload.content).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

#[instrument(skip(state))]
async fn delete_post(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let deleted = Post::delete_owned(&state.db, id, user_id).await?;
    if deleted == 0 {
        return Err(ApiError::not_found("Post not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload))]
async fn create_comment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(post_id): Path<i64>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<PostComment>), ApiError> {
    if payload.content.trim().is_empty() {
        return Err(ApiError::bad_request("Content is required"));
    }
    if Post::find_by_id(&state.db, post_id).await?.is_none() {
        return Err(ApiError::not_found("Post not found"));
    }
    let comment = PostComment::create(&state.db, post_id, user_id, &payload.content).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}
