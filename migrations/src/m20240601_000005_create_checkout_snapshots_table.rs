use sea_orm_migration::prelude::*;

use super::m20240601_000001_create_users_table::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CheckoutSnapshots::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CheckoutSnapshots::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CheckoutSnapshots::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(CheckoutSnapshots::ShippingName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CheckoutSnapshots::ShippingAddress)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CheckoutSnapshots::TotalAmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CheckoutSnapshots::Items).json().not_null())
                    .col(
                        ColumnDef::new(CheckoutSnapshots::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CheckoutSnapshots::ConsumedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_checkout_snapshots_user")
                            .from(CheckoutSnapshots::Table, CheckoutSnapshots::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CheckoutSnapshots::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CheckoutSnapshots {
    Table,
    Id,
    UserId,
    ShippingName,
    ShippingAddress,
    TotalAmountMinor,
    Items,
    CreatedAt,
    ConsumedAt,
}
