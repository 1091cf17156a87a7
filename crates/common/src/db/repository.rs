//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations
//! with proper error handling and transaction support.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{is_unique_violation, AppError, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Deserialize;
use std::collections::HashMap;

/// Filters accepted by the title listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TitleFilter {
    /// Category slug
    pub category: Option<String>,
    /// Genre slug
    pub genre: Option<String>,
    /// Substring of the title name
    pub name: Option<String>,
    pub year: Option<i32>,
}

/// Partial update of a user record; `None` leaves the column untouched
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub bio: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Partial update of a title; `genre_ids` replaces the whole genre set
#[derive(Debug, Clone, Default)]
pub struct TitleChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub year: Option<i32>,
    pub category_id: Option<Option<i32>>,
    pub genre_ids: Option<Vec<i32>>,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // User Operations
    // ========================================================================

    /// Find user by ID
    pub async fn find_user_by_id(&self, id: i32) -> Result<Option<User>> {
        UserEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find user by username (exact match)
    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        UserEntity::find()
            .filter(UserColumn::Username.eq(username))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find user by email (exact match)
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        UserEntity::find()
            .filter(UserColumn::Email.eq(email))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// List users ordered by username, optionally filtered by a username substring
    pub async fn list_users(&self, search: Option<&str>) -> Result<Vec<User>> {
        let mut query = UserEntity::find();

        if let Some(term) = search.filter(|s| !s.is_empty()) {
            query = query.filter(UserColumn::Username.contains(term));
        }

        query
            .order_by_asc(UserColumn::Username)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Create a new user
    pub async fn create_user(
        &self,
        username: String,
        email: String,
        role: Role,
        bio: String,
        first_name: String,
        last_name: String,
    ) -> Result<User> {
        let user = UserActiveModel {
            username: Set(username),
            email: Set(email),
            role: Set(role),
            bio: Set(bio),
            first_name: Set(first_name),
            last_name: Set(last_name),
            is_superuser: Set(false),
            last_login: Set(None),
            date_joined: Set(Utc::now()),
            ..Default::default()
        };

        user.insert(self.write_conn()).await.map_err(user_conflict)
    }

    /// Apply a partial update to a user
    pub async fn update_user(&self, user: User, changes: UserChanges) -> Result<User> {
        let mut active: UserActiveModel = user.clone().into();

        if let Some(username) = changes.username {
            active.username = Set(username);
        }
        if let Some(email) = changes.email {
            active.email = Set(email);
        }
        if let Some(role) = changes.role {
            active.role = Set(role);
        }
        if let Some(bio) = changes.bio {
            active.bio = Set(bio);
        }
        if let Some(first_name) = changes.first_name {
            active.first_name = Set(first_name);
        }
        if let Some(last_name) = changes.last_name {
            active.last_name = Set(last_name);
        }

        if !active.is_changed() {
            return Ok(user);
        }

        active.update(self.write_conn()).await.map_err(user_conflict)
    }

    /// Move `last_login` forward, but only if it still holds `expected`.
    ///
    /// Returns false when another request advanced it first.
    pub async fn advance_last_login(
        &self,
        user_id: i32,
        expected: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let query = UserEntity::update_many()
            .col_expr(UserColumn::LastLogin, Expr::value(now))
            .filter(UserColumn::Id.eq(user_id));

        let query = match expected {
            Some(previous) => query.filter(UserColumn::LastLogin.eq(previous)),
            None => query.filter(UserColumn::LastLogin.is_null()),
        };

        let result = query.exec(self.write_conn()).await?;
        Ok(result.rows_affected == 1)
    }

    /// Delete user by username
    pub async fn delete_user_by_username(&self, username: &str) -> Result<bool> {
        let result = UserEntity::delete_many()
            .filter(UserColumn::Username.eq(username))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Map user ids to usernames
    pub async fn usernames_by_ids(&self, ids: &[i32]) -> Result<HashMap<i32, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let users = UserEntity::find()
            .filter(UserColumn::Id.is_in(ids.iter().copied()))
            .all(self.read_conn())
            .await?;

        Ok(users.into_iter().map(|u| (u.id, u.username)).collect())
    }

    // ========================================================================
    // Category Operations
    // ========================================================================

    /// List categories ordered by name, optionally filtered by a name prefix
    pub async fn list_categories(&self, search: Option<&str>) -> Result<Vec<Category>> {
        let mut query = CategoryEntity::find();

        if let Some(term) = search.filter(|s| !s.is_empty()) {
            query = query.filter(CategoryColumn::Name.starts_with(term));
        }

        query
            .order_by_asc(CategoryColumn::Name)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find category by slug
    pub async fn find_category_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        CategoryEntity::find()
            .filter(CategoryColumn::Slug.eq(slug))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Create a new category
    pub async fn create_category(&self, name: String, slug: String) -> Result<Category> {
        let category = CategoryActiveModel {
            name: Set(name),
            slug: Set(slug),
            ..Default::default()
        };

        category.insert(self.write_conn()).await.map_err(slug_conflict)
    }

    /// Delete category by slug; titles keep existing with no category
    pub async fn delete_category_by_slug(&self, slug: &str) -> Result<bool> {
        let Some(category) = self.find_category_by_slug(slug).await? else {
            return Ok(false);
        };

        let txn = self.write_conn().begin().await?;

        TitleEntity::update_many()
            .col_expr(TitleColumn::CategoryId, Expr::value(Option::<i32>::None))
            .filter(TitleColumn::CategoryId.eq(category.id))
            .exec(&txn)
            .await?;

        let result = CategoryEntity::delete_by_id(category.id).exec(&txn).await?;
        txn.commit().await?;

        Ok(result.rows_affected > 0)
    }

    /// Fetch categories by id
    pub async fn categories_by_ids(&self, ids: &[i32]) -> Result<HashMap<i32, Category>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let categories = CategoryEntity::find()
            .filter(CategoryColumn::Id.is_in(ids.iter().copied()))
            .all(self.read_conn())
            .await?;

        Ok(categories.into_iter().map(|c| (c.id, c)).collect())
    }

    // ========================================================================
    // Genre Operations
    // ========================================================================

    /// List genres ordered by name, optionally filtered by a name prefix
    pub async fn list_genres(&self, search: Option<&str>) -> Result<Vec<Genre>> {
        let mut query = GenreEntity::find();

        if let Some(term) = search.filter(|s| !s.is_empty()) {
            query = query.filter(GenreColumn::Name.starts_with(term));
        }

        query
            .order_by_asc(GenreColumn::Name)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find genre by slug
    pub async fn find_genre_by_slug(&self, slug: &str) -> Result<Option<Genre>> {
        GenreEntity::find()
            .filter(GenreColumn::Slug.eq(slug))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find all genres whose slug is in `slugs`
    pub async fn find_genres_by_slugs(&self, slugs: &[String]) -> Result<Vec<Genre>> {
        if slugs.is_empty() {
            return Ok(Vec::new());
        }

        GenreEntity::find()
            .filter(GenreColumn::Slug.is_in(slugs.iter().cloned()))
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Create a new genre
    pub async fn create_genre(&self, name: String, slug: String) -> Result<Genre> {
        let genre = GenreActiveModel {
            name: Set(name),
            slug: Set(slug),
            ..Default::default()
        };

        genre.insert(self.write_conn()).await.map_err(slug_conflict)
    }

    /// Delete genre by slug along with its title links
    pub async fn delete_genre_by_slug(&self, slug: &str) -> Result<bool> {
        let Some(genre) = self.find_genre_by_slug(slug).await? else {
            return Ok(false);
        };

        let txn = self.write_conn().begin().await?;

        GenreTitleEntity::delete_many()
            .filter(GenreTitleColumn::GenreId.eq(genre.id))
            .exec(&txn)
            .await?;

        let result = GenreEntity::delete_by_id(genre.id).exec(&txn).await?;
        txn.commit().await?;

        Ok(result.rows_affected > 0)
    }

    /// Genres attached to each of the given titles
    pub async fn genres_for_titles(&self, title_ids: &[i32]) -> Result<HashMap<i32, Vec<Genre>>> {
        if title_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let links = GenreTitleEntity::find()
            .filter(GenreTitleColumn::TitleId.is_in(title_ids.iter().copied()))
            .all(self.read_conn())
            .await?;

        let genre_ids: Vec<i32> = links.iter().map(|l| l.genre_id).collect();
        let genres: HashMap<i32, Genre> = if genre_ids.is_empty() {
            HashMap::new()
        } else {
            GenreEntity::find()
                .filter(GenreColumn::Id.is_in(genre_ids))
                .all(self.read_conn())
                .await?
                .into_iter()
                .map(|g| (g.id, g))
                .collect()
        };

        let mut by_title: HashMap<i32, Vec<Genre>> = HashMap::new();
        for link in links {
            if let Some(genre) = genres.get(&link.genre_id) {
                by_title.entry(link.title_id).or_default().push(genre.clone());
            }
        }
        for genres in by_title.values_mut() {
            genres.sort_by(|a, b| a.slug.cmp(&b.slug));
        }

        Ok(by_title)
    }

    // ========================================================================
    // Title Operations
    // ========================================================================

    /// List titles ordered by name
    pub async fn list_titles(&self, filter: &TitleFilter) -> Result<Vec<Title>> {
        let mut query = TitleEntity::find();

        if let Some(slug) = filter.category.as_deref() {
            match self.find_category_by_slug(slug).await? {
                Some(category) => query = query.filter(TitleColumn::CategoryId.eq(category.id)),
                None => return Ok(Vec::new()),
            }
        }

        if let Some(slug) = filter.genre.as_deref() {
            let Some(genre) = self.find_genre_by_slug(slug).await? else {
                return Ok(Vec::new());
            };
            let title_ids: Vec<i32> = GenreTitleEntity::find()
                .filter(GenreTitleColumn::GenreId.eq(genre.id))
                .all(self.read_conn())
                .await?
                .into_iter()
                .map(|l| l.title_id)
                .collect();
            if title_ids.is_empty() {
                return Ok(Vec::new());
            }
            query = query.filter(TitleColumn::Id.is_in(title_ids));
        }

        if let Some(name) = filter.name.as_deref().filter(|s| !s.is_empty()) {
            query = query.filter(TitleColumn::Name.contains(name));
        }

        if let Some(year) = filter.year {
            query = query.filter(TitleColumn::Year.eq(year));
        }

        query
            .order_by_asc(TitleColumn::Name)
            .order_by_asc(TitleColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find title by ID
    pub async fn find_title_by_id(&self, id: i32) -> Result<Option<Title>> {
        TitleEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find a title by its (name, category) pair
    pub async fn find_title_by_name_and_category(
        &self,
        name: &str,
        category_id: Option<i32>,
    ) -> Result<Option<Title>> {
        let query = TitleEntity::find().filter(TitleColumn::Name.eq(name));
        let query = match category_id {
            Some(id) => query.filter(TitleColumn::CategoryId.eq(id)),
            None => query.filter(TitleColumn::CategoryId.is_null()),
        };

        query.one(self.read_conn()).await.map_err(Into::into)
    }

    /// Create a title together with its genre links
    pub async fn create_title(
        &self,
        name: String,
        description: String,
        year: i32,
        category_id: Option<i32>,
        genre_ids: &[i32],
    ) -> Result<Title> {
        let txn = self.write_conn().begin().await?;

        let title = TitleActiveModel {
            name: Set(name),
            description: Set(description),
            year: Set(year),
            category_id: Set(category_id),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(title_conflict)?;

        replace_title_genres(&txn, title.id, genre_ids).await?;
        txn.commit().await?;

        Ok(title)
    }

    /// Apply a partial update to a title
    pub async fn update_title(&self, title: Title, changes: TitleChanges) -> Result<Title> {
        let txn = self.write_conn().begin().await?;

        let mut active: TitleActiveModel = title.clone().into();
        if let Some(name) = changes.name {
            active.name = Set(name);
        }
        if let Some(description) = changes.description {
            active.description = Set(description);
        }
        if let Some(year) = changes.year {
            active.year = Set(year);
        }
        if let Some(category_id) = changes.category_id {
            active.category_id = Set(category_id);
        }

        let updated = if active.is_changed() {
            active.update(&txn).await.map_err(title_conflict)?
        } else {
            title
        };

        if let Some(genre_ids) = changes.genre_ids {
            replace_title_genres(&txn, updated.id, &genre_ids).await?;
        }

        txn.commit().await?;
        Ok(updated)
    }

    /// Delete title by ID (reviews and comments cascade)
    pub async fn delete_title(&self, id: i32) -> Result<bool> {
        let result = TitleEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    // ========================================================================
    // Rating Aggregation
    // ========================================================================

    /// Sum and count of review scores for each title that has reviews
    pub async fn score_totals(&self, title_ids: &[i32]) -> Result<HashMap<i32, (i64, i64)>> {
        if title_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<(i32, i64, i64)> = ReviewEntity::find()
            .select_only()
            .column(ReviewColumn::TitleId)
            .column_as(Expr::col(ReviewColumn::Score).sum(), "score_total")
            .column_as(Expr::col(ReviewColumn::Id).count(), "review_count")
            .filter(ReviewColumn::TitleId.is_in(title_ids.iter().copied()))
            .group_by(ReviewColumn::TitleId)
            .into_tuple()
            .all(self.read_conn())
            .await?;

        Ok(rows
            .into_iter()
            .map(|(title_id, total, count)| (title_id, (total, count)))
            .collect())
    }

    // ========================================================================
    // Review Operations
    // ========================================================================

    /// Find the review a given author left on a title
    pub async fn find_review_by_author(&self, title_id: i32, author_id: i32) -> Result<Option<Review>> {
        ReviewEntity::find()
            .filter(ReviewColumn::TitleId.eq(title_id))
            .filter(ReviewColumn::AuthorId.eq(author_id))
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// Create a review; a concurrent duplicate surfaces as a conflict
    pub async fn create_review(
        &self,
        title_id: i32,
        author_id: i32,
        text: String,
        score: i32,
    ) -> Result<Review> {
        let review = ReviewActiveModel {
            title_id: Set(title_id),
            author_id: Set(author_id),
            text: Set(text),
            score: Set(score),
            pub_date: Set(Utc::now()),
            ..Default::default()
        };

        review.insert(self.write_conn()).await.map_err(|e| {
            if is_unique_violation(&e) {
                duplicate_review()
            } else {
                e.into()
            }
        })
    }

    /// List reviews for a title, oldest first
    pub async fn list_reviews(&self, title_id: i32) -> Result<Vec<Review>> {
        ReviewEntity::find()
            .filter(ReviewColumn::TitleId.eq(title_id))
            .order_by_asc(ReviewColumn::PubDate)
            .order_by_asc(ReviewColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find a review scoped to its title
    pub async fn find_review(&self, title_id: i32, review_id: i32) -> Result<Option<Review>> {
        ReviewEntity::find_by_id(review_id)
            .filter(ReviewColumn::TitleId.eq(title_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Update review text and/or score
    pub async fn update_review(
        &self,
        review: Review,
        text: Option<String>,
        score: Option<i32>,
    ) -> Result<Review> {
        let mut active: ReviewActiveModel = review.clone().into();
        if let Some(text) = text {
            active.text = Set(text);
        }
        if let Some(score) = score {
            active.score = Set(score);
        }

        if !active.is_changed() {
            return Ok(review);
        }

        active.update(self.write_conn()).await.map_err(Into::into)
    }

    /// Delete review by ID (comments cascade)
    pub async fn delete_review(&self, id: i32) -> Result<bool> {
        let result = ReviewEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    // ========================================================================
    // Comment Operations
    // ========================================================================

    /// Create a comment on a review
    pub async fn create_comment(&self, review_id: i32, author_id: i32, text: String) -> Result<Comment> {
        let comment = CommentActiveModel {
            review_id: Set(review_id),
            author_id: Set(author_id),
            text: Set(text),
            pub_date: Set(Utc::now()),
            ..Default::default()
        };

        comment.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// List comments on a review, oldest first
    pub async fn list_comments(&self, review_id: i32) -> Result<Vec<Comment>> {
        CommentEntity::find()
            .filter(CommentColumn::ReviewId.eq(review_id))
            .order_by_asc(CommentColumn::PubDate)
            .order_by_asc(CommentColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find a comment scoped to its review
    pub async fn find_comment(&self, review_id: i32, comment_id: i32) -> Result<Option<Comment>> {
        CommentEntity::find_by_id(comment_id)
            .filter(CommentColumn::ReviewId.eq(review_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Replace comment text
    pub async fn update_comment(&self, comment: Comment, text: String) -> Result<Comment> {
        let mut active: CommentActiveModel = comment.into();
        active.text = Set(text);
        active.update(self.write_conn()).await.map_err(Into::into)
    }

    /// Delete comment by ID
    pub async fn delete_comment(&self, id: i32) -> Result<bool> {
        let result = CommentEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }
}

async fn replace_title_genres<C: ConnectionTrait>(db: &C, title_id: i32, genre_ids: &[i32]) -> Result<()> {
    GenreTitleEntity::delete_many()
        .filter(GenreTitleColumn::TitleId.eq(title_id))
        .exec(db)
        .await?;

    if genre_ids.is_empty() {
        return Ok(());
    }

    let mut unique_ids = genre_ids.to_vec();
    unique_ids.sort_unstable();
    unique_ids.dedup();

    let links = unique_ids.into_iter().map(|genre_id| GenreTitleActiveModel {
        title_id: Set(title_id),
        genre_id: Set(genre_id),
    });

    GenreTitleEntity::insert_many(links)
        .exec_without_returning(db)
        .await?;

    Ok(())
}

/// Error returned when an author already reviewed a title
pub fn duplicate_review() -> AppError {
    AppError::conflict("title", "author already reviewed this title")
}

fn user_conflict(err: DbErr) -> AppError {
    if is_unique_violation(&err) {
        AppError::Conflict {
            message: "username or email already registered".to_string(),
            field: None,
        }
    } else {
        err.into()
    }
}

fn slug_conflict(err: DbErr) -> AppError {
    if is_unique_violation(&err) {
        AppError::conflict("slug", "slug already in use")
    } else {
        err.into()
    }
}

fn title_conflict(err: DbErr) -> AppError {
    if is_unique_violation(&err) {
        AppError::conflict("name", "a title with this name already exists in the category")
    } else {
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn repo() -> Repository {
        Repository::new(test_pool().await)
    }

    async fn user(repo: &Repository, name: &str) -> User {
        repo.create_user(
            name.to_string(),
            format!("{name}@example.com"),
            Role::User,
            String::new(),
            String::new(),
            String::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_user_uniqueness_is_enforced_by_storage() {
        let repo = repo().await;
        user(&repo, "alice").await;

        let err = repo
            .create_user(
                "alice".into(),
                "other@example.com".into(),
                Role::User,
                String::new(),
                String::new(),
                String::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict { .. }));
        assert_eq!(repo.list_users(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_advance_last_login_is_compare_and_set() {
        let repo = repo().await;
        let alice = user(&repo, "alice").await;
        let now = Utc::now();

        assert!(repo.advance_last_login(alice.id, None, now).await.unwrap());
        // Second writer still expects the old (empty) value
        assert!(!repo.advance_last_login(alice.id, None, now).await.unwrap());

        let stored = repo.find_user_by_id(alice.id).await.unwrap().unwrap();
        assert!(stored.last_login.is_some());
        let later = now + chrono::Duration::seconds(1);
        assert!(repo.advance_last_login(alice.id, stored.last_login, later).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_review_insert_maps_to_conflict() {
        let repo = repo().await;
        let alice = user(&repo, "alice").await;
        let title = repo
            .create_title("Dune".into(), String::new(), 1965, None, &[])
            .await
            .unwrap();

        repo.create_review(title.id, alice.id, "great".into(), 9).await.unwrap();
        let err = repo
            .create_review(title.id, alice.id, "again".into(), 3)
            .await
            .unwrap_err();

        assert_eq!(err.field(), Some("title"));
        assert_eq!(repo.list_reviews(title.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_score_totals_group_by_title() {
        let repo = repo().await;
        let dune = repo.create_title("Dune".into(), String::new(), 1965, None, &[]).await.unwrap();
        let solaris = repo.create_title("Solaris".into(), String::new(), 1961, None, &[]).await.unwrap();
        let empty = repo.create_title("Empty".into(), String::new(), 2000, None, &[]).await.unwrap();

        for (name, score) in [("a", 8), ("b", 9), ("c", 10)] {
            let author = user(&repo, name).await;
            repo.create_review(dune.id, author.id, String::new(), score).await.unwrap();
            if score == 8 {
                repo.create_review(solaris.id, author.id, String::new(), 4).await.unwrap();
            }
        }

        let totals = repo.score_totals(&[dune.id, solaris.id, empty.id]).await.unwrap();
        assert_eq!(totals.get(&dune.id), Some(&(27, 3)));
        assert_eq!(totals.get(&solaris.id), Some(&(4, 1)));
        assert!(!totals.contains_key(&empty.id));
    }

    #[tokio::test]
    async fn test_title_filters_and_genre_links() {
        let repo = repo().await;
        let books = repo.create_category("Books".into(), "books".into()).await.unwrap();
        let scifi = repo.create_genre("Sci-Fi".into(), "sci-fi".into()).await.unwrap();
        let drama = repo.create_genre("Drama".into(), "drama".into()).await.unwrap();

        let dune = repo
            .create_title("Dune".into(), String::new(), 1965, Some(books.id), &[scifi.id, drama.id, scifi.id])
            .await
            .unwrap();
        repo.create_title("Hamlet".into(), String::new(), 1603, None, &[drama.id]).await.unwrap();

        let by_category = repo
            .list_titles(&TitleFilter { category: Some("books".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(by_category.len(), 1);

        let by_genre = repo
            .list_titles(&TitleFilter { genre: Some("drama".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(by_genre.len(), 2);

        let by_year = repo
            .list_titles(&TitleFilter { year: Some(1603), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(by_year[0].name, "Hamlet");

        let unknown = repo
            .list_titles(&TitleFilter { genre: Some("horror".into()), ..Default::default() })
            .await
            .unwrap();
        assert!(unknown.is_empty());

        let genres = repo.genres_for_titles(&[dune.id]).await.unwrap();
        let slugs: Vec<_> = genres[&dune.id].iter().map(|g| g.slug.as_str()).collect();
        assert_eq!(slugs, vec!["drama", "sci-fi"]);
    }

    #[tokio::test]
    async fn test_delete_category_detaches_titles() {
        let repo = repo().await;
        let books = repo.create_category("Books".into(), "books".into()).await.unwrap();
        let dune = repo
            .create_title("Dune".into(), String::new(), 1965, Some(books.id), &[])
            .await
            .unwrap();

        assert!(repo.delete_category_by_slug("books").await.unwrap());
        assert!(!repo.delete_category_by_slug("books").await.unwrap());

        let dune = repo.find_title_by_id(dune.id).await.unwrap().unwrap();
        assert_eq!(dune.category_id, None);
    }

    #[tokio::test]
    async fn test_duplicate_slug_is_conflict() {
        let repo = repo().await;
        repo.create_genre("Drama".into(), "drama".into()).await.unwrap();
        let err = repo.create_genre("Drama 2".into(), "drama".into()).await.unwrap_err();
        assert_eq!(err.field(), Some("slug"));
    }
}
