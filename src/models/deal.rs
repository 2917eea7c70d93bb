//! Deal entity model (HubSpot deals mirror)

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "deals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub hubspot_deal_id: String,

    pub name: Option<String>,

    pub amount: Option<f64>,

    pub stage: Option<String>,

    pub pipeline: Option<String>,

    pub close_date: Option<DateTimeWithTimeZone>,

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
    #[sea_orm(has_many = "super::deal_engagement::Entity")]
    DealEngagement,
}

impl Related<super::company::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Company.def()
    }
}

impl Related<super::deal_engagement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DealEngagement.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
