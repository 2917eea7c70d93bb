//! HubSpot mirror repository: companies, contacts, deals and deal engagements.
//!
//! Every write is an upsert keyed on the HubSpot object id, so re-syncing the same objects
//! overwrites data columns and keeps local ids.

use std::collections::HashMap;
use std::sync::Arc;

use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{company, contact, deal, deal_engagement};
use crate::models::{Company, Contact, Deal, DealEngagement};

/// Local row counts for the HubSpot mirror
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct CrmCounts {
    pub companies: u64,
    pub contacts: u64,
    pub deals: u64,
    pub deal_engagements: u64,
    pub unlinked_contacts: u64,
    pub unlinked_deals: u64,
}

#[derive(Debug, Clone)]
pub struct CrmRepository {
    db: Arc<DatabaseConnection>,
}

impl CrmRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn upsert_companies(&self, rows: Vec<company::ActiveModel>) -> Result<u64, DbErr> {
        if rows.is_empty() {
            return Ok(0);
        }
        let count = rows.len() as u64;
        Company::insert_many(rows)
            .on_conflict(
                OnConflict::column(company::Column::HubspotCompanyId)
                    .update_columns([
                        company::Column::Name,
                        company::Column::Domain,
                        company::Column::Website,
                        company::Column::Phone,
                        company::Column::Industry,
                        company::Column::RawData,
                        company::Column::HubspotSyncedAt,
                        company::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        Ok(count)
    }

    /// Upserts contacts. `company_id` is never overwritten so links survive a re-sync.
    pub async fn upsert_contacts(&self, rows: Vec<contact::ActiveModel>) -> Result<u64, DbErr> {
        if rows.is_empty() {
            return Ok(0);
        }
        let count = rows.len() as u64;
        Contact::insert_many(rows)
            .on_conflict(
                OnConflict::column(contact::Column::HubspotContactId)
                    .update_columns([
                        contact::Column::Email,
                        contact::Column::FirstName,
                        contact::Column::LastName,
                        contact::Column::Phone,
                        contact::Column::CompanyName,
                        contact::Column::RawData,
                        contact::Column::HubspotSyncedAt,
                        contact::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        Ok(count)
    }

    /// Upserts deals. `company_id` is never overwritten so links survive a re-sync.
    pub async fn upsert_deals(&self, rows: Vec<deal::ActiveModel>) -> Result<u64, DbErr> {
        if rows.is_empty() {
            return Ok(0);
        }
        let count = rows.len() as u64;
        Deal::insert_many(rows)
            .on_conflict(
                OnConflict::column(deal::Column::HubspotDealId)
                    .update_columns([
                        deal::Column::Name,
                        deal::Column::Amount,
                        deal::Column::Stage,
                        deal::Column::Pipeline,
                        deal::Column::CloseDate,
                        deal::Column::RawData,
                        deal::Column::HubspotSyncedAt,
                        deal::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        Ok(count)
    }

    pub async fn upsert_engagements(
        &self,
        rows: Vec<deal_engagement::ActiveModel>,
    ) -> Result<u64, DbErr> {
        if rows.is_empty() {
            return Ok(0);
        }
        let count = rows.len() as u64;
        DealEngagement::insert_many(rows)
            .on_conflict(
                OnConflict::column(deal_engagement::Column::HubspotEngagementId)
                    .update_columns([
                        deal_engagement::Column::DealId,
                        deal_engagement::Column::EngagementType,
                        deal_engagement::Column::Title,
                        deal_engagement::Column::Body,
                        deal_engagement::Column::OccurredAt,
                        deal_engagement::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        Ok(count)
    }

    pub async fn counts(&self) -> Result<CrmCounts, DbErr> {
        let db = &*self.db;
        Ok(CrmCounts {
            companies: Company::find().count(db).await?,
            contacts: Contact::find().count(db).await?,
            deals: Deal::find().count(db).await?,
            deal_engagements: DealEngagement::find().count(db).await?,
            unlinked_contacts: Contact::find()
                .filter(contact::Column::CompanyId.is_null())
                .count(db)
                .await?,
            unlinked_deals: Deal::find()
                .filter(deal::Column::CompanyId.is_null())
                .count(db)
                .await?,
        })
    }

    /// (local id, HubSpot id) of contacts without a company link
    pub async fn unlinked_contacts(&self) -> Result<Vec<(Uuid, String)>, DbErr> {
        Contact::find()
            .select_only()
            .column(contact::Column::Id)
            .column(contact::Column::HubspotContactId)
            .filter(contact::Column::CompanyId.is_null())
            .order_by_asc(contact::Column::HubspotContactId)
            .into_tuple()
            .all(&*self.db)
            .await
    }

    /// (local id, HubSpot id) of deals without a company link
    pub async fn unlinked_deals(&self) -> Result<Vec<(Uuid, String)>, DbErr> {
        Deal::find()
            .select_only()
            .column(deal::Column::Id)
            .column(deal::Column::HubspotDealId)
            .filter(deal::Column::CompanyId.is_null())
            .order_by_asc(deal::Column::HubspotDealId)
            .into_tuple()
            .all(&*self.db)
            .await
    }

    /// HubSpot company id -> local company id, for the ids that exist locally
    pub async fn company_ids_by_hubspot_id(
        &self,
        hubspot_ids: &[String],
    ) -> Result<HashMap<String, Uuid>, DbErr> {
        if hubspot_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(Uuid, String)> = Company::find()
            .select_only()
            .column(company::Column::Id)
            .column(company::Column::HubspotCompanyId)
            .filter(company::Column::HubspotCompanyId.is_in(hubspot_ids.iter().cloned()))
            .into_tuple()
            .all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(|(id, hs)| (hs, id)).collect())
    }

    /// Sets `company_id` on a contact only while it is still unlinked.
    pub async fn link_contact(&self, contact_id: Uuid, company_id: Uuid) -> Result<bool, DbErr> {
        let result = Contact::update_many()
            .col_expr(contact::Column::CompanyId, Expr::value(company_id))
            .filter(contact::Column::Id.eq(contact_id))
            .filter(contact::Column::CompanyId.is_null())
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Sets `company_id` on a deal only while it is still unlinked.
    pub async fn link_deal(&self, deal_id: Uuid, company_id: Uuid) -> Result<bool, DbErr> {
        let result = Deal::update_many()
            .col_expr(deal::Column::CompanyId, Expr::value(company_id))
            .filter(deal::Column::Id.eq(deal_id))
            .filter(deal::Column::CompanyId.is_null())
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    pub async fn find_deal_by_hubspot_id(
        &self,
        hubspot_deal_id: &str,
    ) -> Result<Option<deal::Model>, DbErr> {
        Deal::find()
            .filter(deal::Column::HubspotDealId.eq(hubspot_deal_id))
            .one(&*self.db)
            .await
    }

    pub async fn engagements_for_deal(
        &self,
        deal_id: Uuid,
    ) -> Result<Vec<deal_engagement::Model>, DbErr> {
        DealEngagement::find()
            .filter(deal_engagement::Column::DealId.eq(deal_id))
            .order_by_desc(deal_engagement::Column::OccurredAt)
            .all(&*self.db)
            .await
    }
}
