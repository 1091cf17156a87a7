//! Catalog service: categories, genres and titles

use crate::access::{Action, AdminPolicy, AdminReadOnly, Caller, Permission};
use crate::db::models::{Category, Genre, Title};
use crate::db::{Repository, TitleChanges, TitleFilter};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::services::reviews::rounded_mean;
use crate::validators::{validate_slug, validate_year};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use tracing::info;
use validator::Validate;

/// Payload for creating a category or a genre
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CatalogEntryRequest {
    #[validate(length(min = 1, max = 256))]
    pub name: String,

    #[validate(custom(function = "validate_slug"))]
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntryResponse {
    pub name: String,
    pub slug: String,
}

impl From<Category> for CatalogEntryResponse {
    fn from(category: Category) -> Self {
        Self { name: category.name, slug: category.slug }
    }
}

impl From<Genre> for CatalogEntryResponse {
    fn from(genre: Genre) -> Self {
        Self { name: genre.name, slug: genre.slug }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTitleRequest {
    #[validate(length(min = 1, max = 256))]
    pub name: String,

    pub year: i32,

    #[serde(default)]
    pub description: String,

    /// Genre slugs
    #[serde(default)]
    pub genre: Vec<String>,

    /// Category slug
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateTitleRequest {
    #[validate(length(min = 1, max = 256))]
    pub name: Option<String>,

    pub year: Option<i32>,

    pub description: Option<String>,

    pub genre: Option<Vec<String>>,

    /// Absent leaves the category, `null` clears it
    #[serde(default, deserialize_with = "present")]
    pub category: Option<Option<String>>,
}

/// Maps a present field (including `null`) to `Some`
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleResponse {
    pub id: i32,
    pub name: String,
    pub year: i32,
    /// Rounded mean review score, null without reviews
    pub rating: Option<i32>,
    pub description: String,
    pub genre: Vec<CatalogEntryResponse>,
    pub category: Option<CatalogEntryResponse>,
}

#[derive(Clone)]
pub struct CatalogService {
    repo: Repository,
    admin: AdminPolicy,
}

impl CatalogService {
    pub fn new(repo: Repository, admin: AdminPolicy) -> Self {
        Self { repo, admin }
    }

    fn policy(&self) -> AdminReadOnly {
        AdminReadOnly(self.admin)
    }

    // ========================================================================
    // Categories
    // ========================================================================

    pub async fn list_categories(&self, search: Option<&str>) -> Result<Vec<CatalogEntryResponse>> {
        let categories = self.repo.list_categories(search).await?;
        Ok(categories.into_iter().map(Into::into).collect())
    }

    pub async fn create_category(
        &self,
        caller: &Caller,
        request: CatalogEntryRequest,
    ) -> Result<CatalogEntryResponse> {
        self.policy().check(caller, Action::Write)?;
        request.validate()?;

        let category = self
            .repo
            .create_category(request.name, request.slug)
            .await
            .inspect_err(|e| record_conflict(e, "slug"))?;

        info!(slug = %category.slug, "Category created");
        Ok(category.into())
    }

    pub async fn delete_category(&self, caller: &Caller, slug: &str) -> Result<()> {
        self.policy().check(caller, Action::Write)?;

        if !self.repo.delete_category_by_slug(slug).await? {
            return Err(AppError::not_found("category", slug));
        }
        Ok(())
    }

    // ========================================================================
    // Genres
    // ========================================================================

    pub async fn list_genres(&self, search: Option<&str>) -> Result<Vec<CatalogEntryResponse>> {
        let genres = self.repo.list_genres(search).await?;
        Ok(genres.into_iter().map(Into::into).collect())
    }

    pub async fn create_genre(
        &self,
        caller: &Caller,
        request: CatalogEntryRequest,
    ) -> Result<CatalogEntryResponse> {
        self.policy().check(caller, Action::Write)?;
        request.validate()?;

        let genre = self
            .repo
            .create_genre(request.name, request.slug)
            .await
            .inspect_err(|e| record_conflict(e, "slug"))?;

        info!(slug = %genre.slug, "Genre created");
        Ok(genre.into())
    }

    pub async fn delete_genre(&self, caller: &Caller, slug: &str) -> Result<()> {
        self.policy().check(caller, Action::Write)?;

        if !self.repo.delete_genre_by_slug(slug).await? {
            return Err(AppError::not_found("genre", slug));
        }
        Ok(())
    }

    // ========================================================================
    // Titles
    // ========================================================================

    pub async fn list_titles(&self, filter: &TitleFilter) -> Result<Vec<TitleResponse>> {
        let titles = self.repo.list_titles(filter).await?;
        self.render(titles).await
    }

    pub async fn get_title(&self, id: i32) -> Result<TitleResponse> {
        let title = self.title(id).await?;
        self.render_one(title).await
    }

    pub async fn create_title(&self, caller: &Caller, request: CreateTitleRequest) -> Result<TitleResponse> {
        self.policy().check(caller, Action::Write)?;
        request.validate()?;
        validate_year(request.year)?;

        let category_id = self.resolve_category(request.category.as_deref()).await?;
        let genre_ids = self.resolve_genres(&request.genre).await?;
        self.ensure_unique_title(&request.name, category_id, None).await?;

        let title = self
            .repo
            .create_title(request.name, request.description, request.year, category_id, &genre_ids)
            .await
            .inspect_err(|e| record_conflict(e, "title"))?;

        info!(title_id = title.id, "Title created");
        self.render_one(title).await
    }

    pub async fn update_title(
        &self,
        caller: &Caller,
        id: i32,
        request: UpdateTitleRequest,
    ) -> Result<TitleResponse> {
        self.policy().check(caller, Action::Write)?;
        request.validate()?;
        if let Some(year) = request.year {
            validate_year(year)?;
        }

        let title = self.title(id).await?;

        let category_id = match &request.category {
            Some(slug) => Some(self.resolve_category(slug.as_deref()).await?),
            None => None,
        };
        let genre_ids = match &request.genre {
            Some(slugs) => Some(self.resolve_genres(slugs).await?),
            None => None,
        };

        let name = request.name.as_deref().unwrap_or(&title.name);
        let effective_category = category_id.unwrap_or(title.category_id);
        if name != title.name || effective_category != title.category_id {
            self.ensure_unique_title(name, effective_category, Some(title.id)).await?;
        }

        let changes = TitleChanges {
            name: request.name,
            description: request.description,
            year: request.year,
            category_id,
            genre_ids,
        };

        let updated = self
            .repo
            .update_title(title, changes)
            .await
            .inspect_err(|e| record_conflict(e, "title"))?;

        self.render_one(updated).await
    }

    pub async fn delete_title(&self, caller: &Caller, id: i32) -> Result<()> {
        self.policy().check(caller, Action::Write)?;

        if !self.repo.delete_title(id).await? {
            return Err(AppError::not_found("title", id));
        }

        info!(title_id = id, "Title deleted");
        Ok(())
    }

    async fn title(&self, id: i32) -> Result<Title> {
        self.repo
            .find_title_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("title", id))
    }

    async fn resolve_category(&self, slug: Option<&str>) -> Result<Option<i32>> {
        let Some(slug) = slug else {
            return Ok(None);
        };

        match self.repo.find_category_by_slug(slug).await? {
            Some(category) => Ok(Some(category.id)),
            None => Err(AppError::validation("category", format!("unknown category '{slug}'"))),
        }
    }

    async fn resolve_genres(&self, slugs: &[String]) -> Result<Vec<i32>> {
        let genres = self.repo.find_genres_by_slugs(slugs).await?;

        if let Some(missing) = slugs.iter().find(|slug| !genres.iter().any(|g| &g.slug == *slug)) {
            return Err(AppError::validation("genre", format!("unknown genre '{missing}'")));
        }

        Ok(genres.into_iter().map(|g| g.id).collect())
    }

    async fn ensure_unique_title(&self, name: &str, category_id: Option<i32>, except_id: Option<i32>) -> Result<()> {
        if let Some(existing) = self.repo.find_title_by_name_and_category(name, category_id).await? {
            if Some(existing.id) != except_id {
                metrics::record_conflict("title");
                return Err(AppError::conflict(
                    "name",
                    "a title with this name already exists in the category",
                ));
            }
        }
        Ok(())
    }

    async fn render_one(&self, title: Title) -> Result<TitleResponse> {
        let mut rendered = self.render(vec![title]).await?;
        rendered.pop().ok_or_else(|| AppError::Internal {
            message: "title rendering produced no output".to_string(),
        })
    }

    /// Attach genres, category and live rating to each title
    async fn render(&self, titles: Vec<Title>) -> Result<Vec<TitleResponse>> {
        let ids: Vec<i32> = titles.iter().map(|t| t.id).collect();
        let category_ids: Vec<i32> = titles.iter().filter_map(|t| t.category_id).collect();

        let mut genres = self.repo.genres_for_titles(&ids).await?;
        let categories = self.repo.categories_by_ids(&category_ids).await?;
        let totals: HashMap<i32, (i64, i64)> = self.repo.score_totals(&ids).await?;

        Ok(titles
            .into_iter()
            .map(|title| TitleResponse {
                id: title.id,
                rating: totals
                    .get(&title.id)
                    .and_then(|&(total, count)| rounded_mean(total, count)),
                genre: genres
                    .remove(&title.id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(Into::into)
                    .collect(),
                category: title
                    .category_id
                    .and_then(|id| categories.get(&id).cloned())
                    .map(Into::into),
                name: title.name,
                year: title.year,
                description: title.description,
            })
            .collect())
    }
}

fn record_conflict(err: &AppError, kind: &'static str) {
    if matches!(err, AppError::Conflict { .. }) {
        metrics::record_conflict(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Role;
    use crate::services::testing::{admin_policy, caller, repo, user_with_role};
    use chrono::{Datelike, Utc};

    fn entry(name: &str, slug: &str) -> CatalogEntryRequest {
        CatalogEntryRequest { name: name.into(), slug: slug.into() }
    }

    fn title(name: &str, year: i32, category: Option<&str>, genre: &[&str]) -> CreateTitleRequest {
        CreateTitleRequest {
            name: name.into(),
            year,
            description: String::new(),
            genre: genre.iter().map(|g| g.to_string()).collect(),
            category: category.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_category_writes_are_admin_only() {
        let repo = repo().await;
        let service = CatalogService::new(repo.clone(), admin_policy());
        let admin = user_with_role(&repo, "root", Role::Admin).await;
        let user = user_with_role(&repo, "alice", Role::User).await;

        let err = service.create_category(&Caller::Anonymous, entry("Books", "books")).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized { .. }));

        let err = service.create_category(&caller(&user), entry("Books", "books")).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        service.create_category(&caller(&admin), entry("Books", "books")).await.unwrap();
        let err = service.create_category(&caller(&admin), entry("Books 2", "books")).await.unwrap_err();
        assert_eq!(err.field(), Some("slug"));

        let listed = service.list_categories(Some("Bo")).await.unwrap();
        assert_eq!(listed, vec![CatalogEntryResponse { name: "Books".into(), slug: "books".into() }]);

        service.delete_category(&caller(&admin), "books").await.unwrap();
        let err = service.delete_category(&caller(&admin), "books").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_title_creation_rules() {
        let repo = repo().await;
        let service = CatalogService::new(repo.clone(), admin_policy());
        let admin = caller(&user_with_role(&repo, "root", Role::Admin).await);

        service.create_category(&admin, entry("Books", "books")).await.unwrap();
        service.create_genre(&admin, entry("Sci-Fi", "sci-fi")).await.unwrap();

        let created = service
            .create_title(&admin, title("Dune", 1965, Some("books"), &["sci-fi"]))
            .await
            .unwrap();
        assert_eq!(created.rating, None);
        assert_eq!(created.genre.len(), 1);
        assert_eq!(created.category.as_ref().map(|c| c.slug.as_str()), Some("books"));

        let err = service
            .create_title(&admin, title("Dune", 1984, Some("books"), &[]))
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("name"));

        let next_year = Utc::now().year() + 1;
        let err = service
            .create_title(&admin, title("Future", next_year, None, &[]))
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("year"));

        let err = service
            .create_title(&admin, title("Ghost", 2000, None, &["horror"]))
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("genre"));

        let err = service
            .create_title(&admin, title("Ghost", 2000, Some("films"), &[]))
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("category"));
    }

    #[tokio::test]
    async fn test_concurrent_uncategorized_titles_are_unique() {
        let repo = repo().await;
        let service = CatalogService::new(repo.clone(), admin_policy());
        let admin = caller(&user_with_role(&repo, "root", Role::Admin).await);

        let attempts = (0..3).map(|_| service.create_title(&admin, title("Dune", 1965, None, &[])));
        let results = futures::future::join_all(attempts).await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for err in results.into_iter().filter_map(|r| r.err()) {
            assert!(matches!(err, AppError::Conflict { .. }));
            assert_eq!(err.field(), Some("name"));
        }

        let stored = service.list_titles(&TitleFilter::default()).await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_title_category_can_be_cleared() {
        let repo = repo().await;
        let service = CatalogService::new(repo.clone(), admin_policy());
        let admin = caller(&user_with_role(&repo, "root", Role::Admin).await);
        service.create_category(&admin, entry("Books", "books")).await.unwrap();

        let created = service
            .create_title(&admin, title("Dune", 1965, Some("books"), &[]))
            .await
            .unwrap();

        let untouched: UpdateTitleRequest = serde_json::from_str(r#"{"year": 1966}"#).unwrap();
        assert_eq!(untouched.category, None);
        let updated = service.update_title(&admin, created.id, untouched).await.unwrap();
        assert_eq!(updated.category.map(|c| c.slug), Some("books".to_string()));

        let cleared: UpdateTitleRequest = serde_json::from_str(r#"{"category": null}"#).unwrap();
        assert_eq!(cleared.category, Some(None));
        let updated = service.update_title(&admin, created.id, cleared).await.unwrap();
        assert_eq!(updated.category, None);
        assert_eq!(updated.year, 1966);
    }

    #[tokio::test]
    async fn test_title_update_and_delete() {
        let repo = repo().await;
        let service = CatalogService::new(repo.clone(), admin_policy());
        let admin = caller(&user_with_role(&repo, "root", Role::Admin).await);
        service.create_genre(&admin, entry("Drama", "drama")).await.unwrap();

        let created = service.create_title(&admin, title("Hamlet", 1603, None, &[])).await.unwrap();

        let updated = service
            .update_title(
                &admin,
                created.id,
                UpdateTitleRequest {
                    description: Some("Prince of Denmark".into()),
                    genre: Some(vec!["drama".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Hamlet");
        assert_eq!(updated.description, "Prince of Denmark");
        assert_eq!(updated.genre[0].slug, "drama");

        service.delete_title(&admin, created.id).await.unwrap();
        let err = service.get_title(created.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_title_rating_is_live() {
        let repo = repo().await;
        let service = CatalogService::new(repo.clone(), admin_policy());
        let admin = caller(&user_with_role(&repo, "root", Role::Admin).await);

        let created = service.create_title(&admin, title("Dune", 1965, None, &[])).await.unwrap();
        for (name, score) in [("a", 8), ("b", 9), ("c", 10)] {
            let author = user_with_role(&repo, name, Role::User).await;
            repo.create_review(created.id, author.id, "text".into(), score).await.unwrap();
        }

        assert_eq!(service.get_title(created.id).await.unwrap().rating, Some(9));
    }
}
