use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::repo::PostComment;

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl Pagination {
    pub const MAX_LIMIT: i64 = 100;

    /// Limit clamped to 1..=MAX_LIMIT and offset floored at 0, so client
    /// input never reaches the query as a negative bound.
    pub fn clamped(&self) -> (i64, i64) {
        (self.limit.clamp(1, Self::MAX_LIMIT), self.offset.max(0))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct PostListItem {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct PostDetails {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub image: Option<String>,
    pub created_at: OffsetDateTime,
    pub comments: Vec<PostComment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_clamps_out_of_range_values() {
        let p = Pagination {
            limit: -5,
            offset: -10,
        };
        assert_eq!(p.clamped(), (1, 0));

        let p = Pagination {
            limit: 10_000,
            offset: 40,
        };
        assert_eq!(p.clamped(), (Pagination::MAX_LIMIT, 40));
    }

    #[test]
    fn pagination_defaults_apply() {
        let p: Pagination = serde_json::from_str("{}").unwrap();
        assert_eq!(p.clamped(), (20, 0));
    }
}
