//! Migration to create the users and user_integrations tables.
//!
//! Users are keyed by the external identity supplied by the auth layer. Integrations hold
//! per-platform credentials (encrypted) and the incremental sync watermark in `metadata`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Users::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Users::ExternalId).text().not_null())
                    .col(ColumnDef::new(Users::Email).text().not_null())
                    .col(ColumnDef::new(Users::FullName).text().null())
                    .col(ColumnDef::new(Users::HubspotOwnerId).text().null())
                    .col(
                        ColumnDef::new(Users::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Users::UpdatedAt)
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
                    .name("idx_users_external_id")
                    .table(Users::Table)
                    .col(Users::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UserIntegrations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserIntegrations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UserIntegrations::UserId).uuid().not_null())
                    .col(ColumnDef::new(UserIntegrations::Platform).text().not_null())
                    .col(
                        ColumnDef::new(UserIntegrations::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(UserIntegrations::AccessTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(UserIntegrations::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(UserIntegrations::TokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(UserIntegrations::LastSyncAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(UserIntegrations::Metadata)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(UserIntegrations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(UserIntegrations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_integrations_user_id")
                            .from(UserIntegrations::Table, UserIntegrations::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_integrations_user_platform")
                    .table(UserIntegrations::Table)
                    .col(UserIntegrations::UserId)
                    .col(UserIntegrations::Platform)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_integrations_platform_active")
                    .table(UserIntegrations::Table)
                    .col(UserIntegrations::Platform)
                    .col(UserIntegrations::IsActive)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserIntegrations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Users {
    Table,
    Id,
    ExternalId,
    Email,
    FullName,
    HubspotOwnerId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum UserIntegrations {
    Table,
    Id,
    UserId,
    Platform,
    IsActive,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    TokenExpiresAt,
    LastSyncAt,
    Metadata,
    CreatedAt,
    UpdatedAt,
}
