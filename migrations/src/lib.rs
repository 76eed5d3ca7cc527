pub use sea_orm_migration::prelude::*;

mod m20240601_000001_create_users_table;
mod m20240601_000002_create_books_table;
mod m20240601_000003_create_cart_items_table;
mod m20240601_000004_create_orders_tables;
mod m20240601_000005_create_checkout_snapshots_table;
mod m20240601_000006_create_refresh_tokens_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_users_table::Migration),
            Box::new(m20240601_000002_create_books_table::Migration),
            Box::new(m20240601_000003_create_cart_items_table::Migration),
            Box::new(m20240601_000004_create_orders_tables::Migration),
            Box::new(m20240601_000005_create_checkout_snapshots_table::Migration),
            Box::new(m20240601_000006_create_refresh_tokens_table::Migration),
        ]
    }
}
