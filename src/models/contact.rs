//! Contact entity model (HubSpot contacts mirror)
//!
//! `company_id` stays NULL until association linking resolves the contact's HubSpot company.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "contacts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub hubspot_contact_id: String,

    pub email: Option<String>,

    pub first_name: Option<String>,

    pub last_name: Option<String>,

    pub phone: Option<String>,

    /// Free-text `company` property from HubSpot
    pub company_name: Option<String>,

    pub company_id: Option<Uuid>,

    #[sea_orm(column_type = "JsonBinary")]
    pub raw_data: JsonValue,

    pub hubspot_synced_at: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::company::Entity",
        from = "Column::CompanyId",
        to = "super::company::Column::Id"
    )]
    Company,
}

impl Related<super::company::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Company.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
