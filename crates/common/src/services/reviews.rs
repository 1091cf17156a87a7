//! Review service: one review per (title, author), live ratings, comments

use crate::access::{Action, AdminModeratorOwnerOrReadOnly, AdminPolicy, Caller, Permission};
use crate::db::models::review::{SCORE_MAX, SCORE_MIN};
use crate::db::models::{Comment, Review};
use crate::db::{duplicate_review, Repository};
use crate::errors::{AppError, Result};
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, instrument};
use validator::Validate;

/// Mean of `count` scores summing to `total`, rounded half up
pub fn rounded_mean(total: i64, count: i64) -> Option<i32> {
    if count <= 0 {
        return None;
    }
    i32::try_from((2 * total + count) / (2 * count)).ok()
}

/// Review payload; any client-supplied author or date is ignored
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateReviewRequest {
    #[validate(length(min = 1))]
    pub text: String,

    #[validate(range(min = SCORE_MIN, max = SCORE_MAX))]
    pub score: i32,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateReviewRequest {
    #[validate(length(min = 1))]
    pub text: Option<String>,

    #[validate(range(min = SCORE_MIN, max = SCORE_MAX))]
    pub score: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CommentRequest {
    #[validate(length(min = 1))]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewResponse {
    pub id: i32,
    pub text: String,
    /// Author username
    pub author: String,
    pub score: i32,
    pub pub_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentResponse {
    pub id: i32,
    pub text: String,
    pub author: String,
    pub pub_date: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ReviewService {
    repo: Repository,
    admin: AdminPolicy,
}

impl ReviewService {
    pub fn new(repo: Repository, admin: AdminPolicy) -> Self {
        Self { repo, admin }
    }

    fn policy(&self) -> AdminModeratorOwnerOrReadOnly {
        AdminModeratorOwnerOrReadOnly(self.admin)
    }

    // ========================================================================
    // Reviews
    // ========================================================================

    /// Create the caller's review of a title.
    ///
    /// The existence check is a fast path; the unique index on
    /// (title_id, author_id) settles concurrent attempts.
    #[instrument(skip(self, caller, request))]
    pub async fn create_review(
        &self,
        caller: &Caller,
        title_id: i32,
        request: CreateReviewRequest,
    ) -> Result<ReviewResponse> {
        self.policy().check(caller, Action::Write)?;
        let author = caller.require_principal()?;

        self.ensure_title(title_id).await?;
        request.validate()?;

        if self.repo.find_review_by_author(title_id, author.id).await?.is_some() {
            metrics::record_conflict("review");
            return Err(duplicate_review());
        }

        let review = self
            .repo
            .create_review(title_id, author.id, request.text, request.score)
            .await
            .inspect_err(|e| {
                if matches!(e, AppError::Conflict { .. }) {
                    metrics::record_conflict("review");
                }
            })?;

        metrics::record_review_created();
        info!(review_id = review.id, title_id, author_id = author.id, "Review created");

        Ok(review_response(review, author.username.clone()))
    }

    pub async fn list_reviews(&self, title_id: i32) -> Result<Vec<ReviewResponse>> {
        self.ensure_title(title_id).await?;

        let reviews = self.repo.list_reviews(title_id).await?;
        let authors = self.authors(reviews.iter().map(|r| r.author_id)).await?;

        Ok(reviews
            .into_iter()
            .map(|review| {
                let author = authors.get(&review.author_id).cloned().unwrap_or_default();
                review_response(review, author)
            })
            .collect())
    }

    pub async fn get_review(&self, title_id: i32, review_id: i32) -> Result<ReviewResponse> {
        let review = self.review(title_id, review_id).await?;
        self.render_review(review).await
    }

    pub async fn update_review(
        &self,
        caller: &Caller,
        title_id: i32,
        review_id: i32,
        request: UpdateReviewRequest,
    ) -> Result<ReviewResponse> {
        self.policy().check(caller, Action::Write)?;

        let review = self.review(title_id, review_id).await?;
        self.policy().check_object(caller, Action::Write, review.author_id)?;
        request.validate()?;

        let updated = self
            .repo
            .update_review(review, request.text, request.score)
            .await?;

        self.render_review(updated).await
    }

    pub async fn delete_review(&self, caller: &Caller, title_id: i32, review_id: i32) -> Result<()> {
        self.policy().check(caller, Action::Write)?;

        let review = self.review(title_id, review_id).await?;
        self.policy().check_object(caller, Action::Write, review.author_id)?;

        self.repo.delete_review(review.id).await?;
        info!(review_id, title_id, "Review deleted");
        Ok(())
    }

    /// Live rating of a title, null when it has no reviews
    pub async fn compute_rating(&self, title_id: i32) -> Result<Option<i32>> {
        self.ensure_title(title_id).await?;

        let totals = self.repo.score_totals(&[title_id]).await?;
        Ok(totals
            .get(&title_id)
            .and_then(|&(total, count)| rounded_mean(total, count)))
    }

    // ========================================================================
    // Comments
    // ========================================================================

    pub async fn create_comment(
        &self,
        caller: &Caller,
        title_id: i32,
        review_id: i32,
        request: CommentRequest,
    ) -> Result<CommentResponse> {
        self.policy().check(caller, Action::Write)?;
        let author = caller.require_principal()?;

        let review = self.review(title_id, review_id).await?;
        request.validate()?;

        let comment = self
            .repo
            .create_comment(review.id, author.id, request.text)
            .await?;

        info!(comment_id = comment.id, review_id, author_id = author.id, "Comment created");
        Ok(comment_response(comment, author.username.clone()))
    }

    pub async fn list_comments(&self, title_id: i32, review_id: i32) -> Result<Vec<CommentResponse>> {
        let review = self.review(title_id, review_id).await?;

        let comments = self.repo.list_comments(review.id).await?;
        let authors = self.authors(comments.iter().map(|c| c.author_id)).await?;

        Ok(comments
            .into_iter()
            .map(|comment| {
                let author = authors.get(&comment.author_id).cloned().unwrap_or_default();
                comment_response(comment, author)
            })
            .collect())
    }

    pub async fn get_comment(&self, title_id: i32, review_id: i32, comment_id: i32) -> Result<CommentResponse> {
        let comment = self.comment(title_id, review_id, comment_id).await?;
        self.render_comment(comment).await
    }

    pub async fn update_comment(
        &self,
        caller: &Caller,
        title_id: i32,
        review_id: i32,
        comment_id: i32,
        request: CommentRequest,
    ) -> Result<CommentResponse> {
        self.policy().check(caller, Action::Write)?;

        let comment = self.comment(title_id, review_id, comment_id).await?;
        self.policy().check_object(caller, Action::Write, comment.author_id)?;
        request.validate()?;

        let updated = self.repo.update_comment(comment, request.text).await?;
        self.render_comment(updated).await
    }

    pub async fn delete_comment(
        &self,
        caller: &Caller,
        title_id: i32,
        review_id: i32,
        comment_id: i32,
    ) -> Result<()> {
        self.policy().check(caller, Action::Write)?;

        let comment = self.comment(title_id, review_id, comment_id).await?;
        self.policy().check_object(caller, Action::Write, comment.author_id)?;

        self.repo.delete_comment(comment.id).await?;
        Ok(())
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    async fn ensure_title(&self, title_id: i32) -> Result<()> {
        match self.repo.find_title_by_id(title_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::not_found("title", title_id)),
        }
    }

    async fn review(&self, title_id: i32, review_id: i32) -> Result<Review> {
        self.ensure_title(title_id).await?;
        self.repo
            .find_review(title_id, review_id)
            .await?
            .ok_or_else(|| AppError::not_found("review", review_id))
    }

    async fn comment(&self, title_id: i32, review_id: i32, comment_id: i32) -> Result<Comment> {
        let review = self.review(title_id, review_id).await?;
        self.repo
            .find_comment(review.id, comment_id)
            .await?
            .ok_or_else(|| AppError::not_found("comment", comment_id))
    }

    async fn authors(&self, ids: impl Iterator<Item = i32>) -> Result<HashMap<i32, String>> {
        let mut ids: Vec<i32> = ids.collect();
        ids.sort_unstable();
        ids.dedup();
        self.repo.usernames_by_ids(&ids).await
    }

    async fn render_review(&self, review: Review) -> Result<ReviewResponse> {
        let author = self.author_name(review.author_id).await?;
        Ok(review_response(review, author))
    }

    async fn render_comment(&self, comment: Comment) -> Result<CommentResponse> {
        let author = self.author_name(comment.author_id).await?;
        Ok(comment_response(comment, author))
    }

    async fn author_name(&self, author_id: i32) -> Result<String> {
        let mut authors = self.repo.usernames_by_ids(&[author_id]).await?;
        Ok(authors.remove(&author_id).unwrap_or_default())
    }
}

fn review_response(review: Review, author: String) -> ReviewResponse {
    ReviewResponse {
        id: review.id,
        text: review.text,
        author,
        score: review.score,
        pub_date: review.pub_date,
    }
}

fn comment_response(comment: Comment, author: String) -> CommentResponse {
    CommentResponse {
        id: comment.id,
        text: comment.text,
        author,
        pub_date: comment.pub_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Role, Title};
    use crate::services::testing::{admin_policy, caller, repo, user_with_role};

    async fn setup() -> (ReviewService, Repository, Title) {
        let repo = repo().await;
        let title = repo
            .create_title("Dune".into(), String::new(), 1965, None, &[])
            .await
            .unwrap();
        (ReviewService::new(repo.clone(), admin_policy()), repo, title)
    }

    fn review(score: i32) -> CreateReviewRequest {
        CreateReviewRequest { text: "worth reading".into(), score }
    }

    #[test]
    fn test_rounded_mean_convention() {
        assert_eq!(rounded_mean(0, 0), None);
        assert_eq!(rounded_mean(27, 3), Some(9)); // [8, 9, 10]
        assert_eq!(rounded_mean(3, 2), Some(2)); // [1, 2] -> 1.5 rounds up
        assert_eq!(rounded_mean(17, 2), Some(9)); // [8, 9] -> 8.5 rounds up
        assert_eq!(rounded_mean(4, 3), Some(1)); // [1, 1, 2] -> 1.33
        assert_eq!(rounded_mean(5, 3), Some(2)); // [1, 2, 2] -> 1.67
        assert_eq!(rounded_mean(10, 1), Some(10));
    }

    #[tokio::test]
    async fn test_one_review_per_author() {
        let (service, repo, title) = setup().await;
        let alice = caller(&user_with_role(&repo, "alice", Role::User).await);

        let created = service.create_review(&alice, title.id, review(8)).await.unwrap();
        assert_eq!(created.author, "alice");

        let err = service.create_review(&alice, title.id, review(3)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
        assert_eq!(service.list_reviews(title.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_reviews_leave_one() {
        let (service, repo, title) = setup().await;
        let alice = caller(&user_with_role(&repo, "alice", Role::User).await);

        let attempts = (1..=5).map(|score| service.create_review(&alice, title.id, review(score)));
        let results = futures::future::join_all(attempts).await;

        let created = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(created, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AppError::Conflict { .. })));
        assert_eq!(service.list_reviews(title.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_review_validation_and_lookup() {
        let (service, repo, title) = setup().await;
        let alice = caller(&user_with_role(&repo, "alice", Role::User).await);

        for score in [SCORE_MIN - 1, SCORE_MAX + 1] {
            let err = service.create_review(&alice, title.id, review(score)).await.unwrap_err();
            assert_eq!(err.field(), Some("score"));
        }
        assert!(review(SCORE_MIN).validate().is_ok());
        assert!(review(SCORE_MAX).validate().is_ok());

        let err = service.create_review(&alice, 9999, review(5)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));

        let err = service.create_review(&Caller::Anonymous, title.id, review(5)).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_compute_rating() {
        let (service, repo, title) = setup().await;
        assert_eq!(service.compute_rating(title.id).await.unwrap(), None);

        for (name, score) in [("a", 8), ("b", 9), ("c", 10)] {
            let author = caller(&user_with_role(&repo, name, Role::User).await);
            service.create_review(&author, title.id, review(score)).await.unwrap();
        }
        assert_eq!(service.compute_rating(title.id).await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_delete_permissions() {
        let (service, repo, title) = setup().await;
        let author = caller(&user_with_role(&repo, "alice", Role::User).await);
        let stranger = caller(&user_with_role(&repo, "bob", Role::User).await);
        let moderator = caller(&user_with_role(&repo, "mod", Role::Moderator).await);

        let created = service.create_review(&author, title.id, review(7)).await.unwrap();

        let err = service.delete_review(&Caller::Anonymous, title.id, created.id).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized { .. }));

        let err = service.delete_review(&stranger, title.id, created.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        service.delete_review(&moderator, title.id, created.id).await.unwrap();
        let err = service.get_review(title.id, created.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_author_can_update_without_duplicate_check() {
        let (service, repo, title) = setup().await;
        let author = caller(&user_with_role(&repo, "alice", Role::User).await);
        let created = service.create_review(&author, title.id, review(4)).await.unwrap();

        let updated = service
            .update_review(
                &author,
                title.id,
                created.id,
                UpdateReviewRequest { score: Some(6), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(updated.score, 6);
        assert_eq!(updated.pub_date, created.pub_date);
        assert_eq!(service.compute_rating(title.id).await.unwrap(), Some(6));
    }

    #[tokio::test]
    async fn test_review_scoped_to_title() {
        let (service, repo, title) = setup().await;
        let other = repo
            .create_title("Solaris".into(), String::new(), 1961, None, &[])
            .await
            .unwrap();
        let author = caller(&user_with_role(&repo, "alice", Role::User).await);
        let created = service.create_review(&author, title.id, review(4)).await.unwrap();

        let err = service.get_review(other.id, created.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_comments() {
        let (service, repo, title) = setup().await;
        let author = caller(&user_with_role(&repo, "alice", Role::User).await);
        let commenter = caller(&user_with_role(&repo, "bob", Role::User).await);
        let admin = caller(&user_with_role(&repo, "root", Role::Admin).await);

        let created = service.create_review(&author, title.id, review(9)).await.unwrap();

        let comment = service
            .create_comment(&commenter, title.id, created.id, CommentRequest { text: "agreed".into() })
            .await
            .unwrap();
        assert_eq!(comment.author, "bob");

        let err = service
            .update_comment(&author, title.id, created.id, comment.id, CommentRequest { text: "no".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        let edited = service
            .update_comment(&commenter, title.id, created.id, comment.id, CommentRequest { text: "strongly agreed".into() })
            .await
            .unwrap();
        assert_eq!(edited.text, "strongly agreed");

        let err = service
            .create_comment(&commenter, title.id, 9999, CommentRequest { text: "lost".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));

        service.delete_comment(&admin, title.id, created.id, comment.id).await.unwrap();
        assert!(service.list_comments(title.id, created.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleting_review_cascades_to_comments() {
        let (service, repo, title) = setup().await;
        let author = caller(&user_with_role(&repo, "alice", Role::User).await);
        let created = service.create_review(&author, title.id, review(9)).await.unwrap();
        service
            .create_comment(&author, title.id, created.id, CommentRequest { text: "self-reply".into() })
            .await
            .unwrap();

        service.delete_review(&author, title.id, created.id).await.unwrap();
        assert!(repo.list_comments(created.id).await.unwrap().is_empty());
    }
}
