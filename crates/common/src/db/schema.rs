//! Schema bootstrap
//!
//! Creates every table from the entity definitions plus the composite
//! unique indexes the integrity rules depend on. Idempotent.

use super::models::{
    category, comment, genre, genre_title, review, title, user,
};
use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectionTrait, DbErr, EntityTrait, Schema};
use tracing::info;

/// Name of the unique index enforcing one review per (title, author)
pub const REVIEW_AUTHOR_INDEX: &str = "idx_reviews_title_author";

/// Name of the unique index enforcing (name, category) uniqueness for titles
pub const TITLE_NAME_CATEGORY_INDEX: &str = "idx_titles_name_category";

/// Create all tables and indexes that do not exist yet
pub async fn create_schema<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    // Parents before children so foreign keys resolve
    create_table(db, &schema, user::Entity).await?;
    create_table(db, &schema, category::Entity).await?;
    create_table(db, &schema, genre::Entity).await?;
    create_table(db, &schema, title::Entity).await?;
    create_table(db, &schema, genre_title::Entity).await?;
    create_table(db, &schema, review::Entity).await?;
    create_table(db, &schema, comment::Entity).await?;

    for index in unique_indexes() {
        db.execute(backend.build(&index)).await?;
    }
    db.execute_unprepared(&title_name_category_index()).await?;

    info!("Database schema ready");
    Ok(())
}

async fn create_table<C, E>(db: &C, schema: &Schema, entity: E) -> Result<(), DbErr>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let backend = db.get_database_backend();

    let mut table = schema.create_table_from_entity(entity);
    table.if_not_exists();
    db.execute(backend.build(&table)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute(backend.build(&index)).await?;
    }

    Ok(())
}

fn unique_indexes() -> Vec<IndexCreateStatement> {
    vec![
        Index::create()
            .name(REVIEW_AUTHOR_INDEX)
            .table(review::Entity)
            .col(review::Column::TitleId)
            .col(review::Column::AuthorId)
            .unique()
            .if_not_exists()
            .to_owned(),
    ]
}

/// Unique index over `(name, COALESCE(category_id, 0))`
///
/// NULLs are distinct in a plain unique index, so uncategorized titles need
/// the expression. Category ids start at 1.
fn title_name_category_index() -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {TITLE_NAME_CATEGORY_INDEX} ON titles (name, COALESCE(category_id, 0))"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_create_schema_is_idempotent() {
        let pool = test_pool().await;
        create_schema(pool.write()).await.unwrap();
        pool.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_uncategorized_title_names_are_unique() {
        let pool = test_pool().await;
        let insert = "INSERT INTO titles (name, description, year, category_id) VALUES ('Dune', '', 1965, NULL)";

        pool.write().execute_unprepared(insert).await.unwrap();
        let err = pool.write().execute_unprepared(insert).await.unwrap_err();
        assert!(crate::errors::is_unique_violation(&err));
    }
}
