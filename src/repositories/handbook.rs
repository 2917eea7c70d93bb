//! Solution handbook repository

use std::sync::Arc;

use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use crate::models::SolutionHandbook;
use crate::models::solution_handbook;

#[derive(Debug, Clone)]
pub struct HandbookRepository {
    db: Arc<DatabaseConnection>,
}

impl HandbookRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// The user's handbooks, newest first
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<solution_handbook::Model>, DbErr> {
        SolutionHandbook::find()
            .filter(solution_handbook::Column::UserId.eq(user_id))
            .order_by_desc(solution_handbook::Column::CreatedAt)
            .order_by_desc(solution_handbook::Column::Id)
            .all(&*self.db)
            .await
    }

    /// A handbook, only if owned by `user_id`
    pub async fn find_for_user(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<Option<solution_handbook::Model>, DbErr> {
        SolutionHandbook::find_by_id(id)
            .filter(solution_handbook::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await
    }
}
