//! User entity model
//!
//! A user is identified by the external identity the auth layer supplies. Rows are created
//! lazily on first sight with a placeholder email.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Caller identity (unique)
    pub external_id: String,

    pub email: String,

    pub full_name: Option<String>,

    /// HubSpot owner id, when the user is mapped to a HubSpot owner
    pub hubspot_owner_id: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_integration::Entity")]
    UserIntegration,
}

impl Related<super::user_integration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserIntegration.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
