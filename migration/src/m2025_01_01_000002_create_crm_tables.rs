//! Migration to create the HubSpot-mirrored CRM tables.
//!
//! Each table carries the HubSpot object id under a unique index; sync upserts target it.
//! `company_id` links on contacts and deals are filled in by association linking.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Companies::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Companies::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Companies::HubspotCompanyId).text().not_null())
                    .col(ColumnDef::new(Companies::Name).text().null())
                    .col(ColumnDef::new(Companies::Domain).text().null())
                    .col(ColumnDef::new(Companies::Website).text().null())
                    .col(ColumnDef::new(Companies::Phone).text().null())
                    .col(ColumnDef::new(Companies::Industry).text().null())
                    .col(ColumnDef::new(Companies::RawData).json_binary().not_null())
                    .col(
                        ColumnDef::new(Companies::HubspotSyncedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Companies::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Companies::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_companies_hubspot_company_id")
                    .table(Companies::Table)
                    .col(Companies::HubspotCompanyId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Contacts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Contacts::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Contacts::HubspotContactId).text().not_null())
                    .col(ColumnDef::new(Contacts::Email).text().null())
                    .col(ColumnDef::new(Contacts::FirstName).text().null())
                    .col(ColumnDef::new(Contacts::LastName).text().null())
                    .col(ColumnDef::new(Contacts::Phone).text().null())
                    .col(ColumnDef::new(Contacts::CompanyName).text().null())
                    .col(ColumnDef::new(Contacts::CompanyId).uuid().null())
                    .col(ColumnDef::new(Contacts::RawData).json_binary().not_null())
                    .col(
                        ColumnDef::new(Contacts::HubspotSyncedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Contacts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Contacts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_contacts_company_id")
                            .from(Contacts::Table, Contacts::CompanyId)
                            .to(Companies::Table, Companies::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_contacts_hubspot_contact_id")
                    .table(Contacts::Table)
                    .col(Contacts::HubspotContactId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Deals::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Deals::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Deals::HubspotDealId).text().not_null())
                    .col(ColumnDef::new(Deals::Name).text().null())
                    .col(ColumnDef::new(Deals::Amount).double().null())
                    .col(ColumnDef::new(Deals::Stage).text().null())
                    .col(ColumnDef::new(Deals::Pipeline).text().null())
                    .col(
                        ColumnDef::new(Deals::CloseDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Deals::CompanyId).uuid().null())
                    .col(ColumnDef::new(Deals::RawData).json_binary().not_null())
                    .col(
                        ColumnDef::new(Deals::HubspotSyncedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Deals::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Deals::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deals_company_id")
                            .from(Deals::Table, Deals::CompanyId)
                            .to(Companies::Table, Companies::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deals_hubspot_deal_id")
                    .table(Deals::Table)
                    .col(Deals::HubspotDealId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DealEngagements::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DealEngagements::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DealEngagements::DealId).uuid().not_null())
                    .col(
                        ColumnDef::new(DealEngagements::HubspotEngagementId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DealEngagements::EngagementType)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DealEngagements::Title).text().null())
                    .col(ColumnDef::new(DealEngagements::Body).text().null())
                    .col(
                        ColumnDef::new(DealEngagements::OccurredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DealEngagements::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DealEngagements::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deal_engagements_deal_id")
                            .from(DealEngagements::Table, DealEngagements::DealId)
                            .to(Deals::Table, Deals::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deal_engagements_hubspot_engagement_id")
                    .table(DealEngagements::Table)
                    .col(DealEngagements::HubspotEngagementId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DealEngagements::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Deals::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Contacts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Companies::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Companies {
    Table,
    Id,
    HubspotCompanyId,
    Name,
    Domain,
    Website,
    Phone,
    Industry,
    RawData,
    HubspotSyncedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Contacts {
    Table,
    Id,
    HubspotContactId,
    Email,
    FirstName,
    LastName,
    Phone,
    CompanyName,
    CompanyId,
    RawData,
    HubspotSyncedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Deals {
    Table,
    Id,
    HubspotDealId,
    Name,
    Amount,
    Stage,
    Pipeline,
    CloseDate,
    CompanyId,
    RawData,
    HubspotSyncedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DealEngagements {
    Table,
    Id,
    DealId,
    HubspotEngagementId,
    EngagementType,
    Title,
    Body,
    OccurredAt,
    CreatedAt,
    UpdatedAt,
}
