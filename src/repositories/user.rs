//! User repository
//!
//! Users are created lazily the first time an external identity is seen.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::models::user::{self, Entity as User};

/// Email stored until the real address is known
pub fn placeholder_email(external_id: &str) -> String {
    format!("{}@temp.placeholder", external_id)
}

#[derive(Debug, Clone)]
pub struct UserRepository {
    db: Arc<DatabaseConnection>,
}

impl UserRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_external_id(&self, external_id: &str) -> Result<Option<user::Model>, DbErr> {
        User::find()
            .filter(user::Column::ExternalId.eq(external_id))
            .one(&*self.db)
            .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<user::Model>, DbErr> {
        User::find_by_id(id).one(&*self.db).await
    }

    /// Returns the user for `external_id`, inserting a placeholder row on first sight.
    ///
    /// Concurrent first requests race on the unique external id; the loser's insert is a no-op.
    pub async fn get_or_create(&self, external_id: &str) -> Result<user::Model, DbErr> {
        if let Some(existing) = self.find_by_external_id(external_id).await? {
            return Ok(existing);
        }

        let now = Utc::now().fixed_offset();
        let row = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            external_id: Set(external_id.to_string()),
            email: Set(placeholder_email(external_id)),
            full_name: Set(None),
            hubspot_owner_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        User::insert(row)
            .on_conflict(
                OnConflict::column(user::Column::ExternalId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        tracing::info!(external_id = %external_id, "Created user on first sight");

        self.find_by_external_id(external_id)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("user {}", external_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, PaginatorTrait};

    async fn repo() -> UserRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        UserRepository::new(Arc::new(db))
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let repo = repo().await;
        let first = repo.get_or_create("user_abc").await.unwrap();
        let second = repo.get_or_create("user_abc").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.email, "user_abc@temp.placeholder");
        assert_eq!(User::find().count(&*repo.db).await.unwrap(), 1);
    }
}
